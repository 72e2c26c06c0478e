//! External command execution.
//!
//! Every cluster, DNS and cloud operation is a CLI invocation. Executables
//! are resolved once at startup; each invocation carries a declared
//! failure policy instead of an ad-hoc "check" flag.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::{DeployError, Result};

/// Tools the lifecycle manager always needs.
pub const REQUIRED_TOOLS: &[&str] = &["gcloud", "kubectl", "aws"];

/// What a non-zero exit means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Non-zero exit aborts the current phase.
    MustSucceed,
    /// Non-zero exit is logged; the caller inspects the exit code.
    BestEffort,
}

/// A single command line plus how to treat its output and failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub capture: bool,
    pub policy: Policy,
}

impl Invocation {
    /// Must-succeed invocation whose stdout goes to the terminal.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            capture: false,
            policy: Policy::MustSucceed,
        }
    }

    /// Capture stdout for parsing.
    #[must_use]
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Tolerate a non-zero exit.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.policy = Policy::BestEffort;
        self
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(extra.into_iter().map(Into::into));
        self
    }

    /// The command line as a single string, for logs and errors.
    #[must_use]
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Exit status and captured output of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout, or `None` when empty.
    #[must_use]
    pub fn stdout_trimmed(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (!out.is_empty()).then_some(out)
    }
}

/// Something that can execute invocations.
pub trait CommandRunner {
    /// Run the invocation.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::CommandFailed`] for a non-zero exit under
    /// [`Policy::MustSucceed`], or an I/O error if the process cannot start.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;
}

/// Absolute paths of the executables resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct Executables {
    paths: HashMap<String, PathBuf>,
}

impl Executables {
    /// Resolve every tool on the search path.
    ///
    /// With `lenient` set (configuration-only runs), a missing tool is
    /// logged and left unresolved instead of failing.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::ToolNotFound`] for the first missing tool.
    pub fn resolve(tools: &[&str], lenient: bool) -> Result<Self> {
        let mut executables = Self::default();
        for tool in tools {
            executables.ensure(tool, lenient)?;
        }
        Ok(executables)
    }

    /// Resolve one more tool after startup.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::ToolNotFound`] if the tool is missing and
    /// `lenient` is not set.
    pub fn ensure(&mut self, tool: &str, lenient: bool) -> Result<()> {
        if self.paths.contains_key(tool) {
            return Ok(());
        }
        match which::which(tool) {
            Ok(path) => {
                self.paths.insert(tool.to_string(), path);
                Ok(())
            }
            Err(_) if lenient => {
                warn!(tool, "Executable not found; continuing for configuration only");
                Ok(())
            }
            Err(_) => Err(DeployError::ToolNotFound(tool.to_string())),
        }
    }

    /// Resolved path for a tool, if any.
    #[must_use]
    pub fn path(&self, tool: &str) -> Option<&Path> {
        self.paths.get(tool).map(PathBuf::as_path)
    }

    /// Whether a tool was found.
    #[must_use]
    pub fn has(&self, tool: &str) -> bool {
        self.paths.contains_key(tool)
    }
}

/// Runs invocations as child processes inside the configuration directory.
#[derive(Debug)]
pub struct ProcessRunner {
    executables: Executables,
    workdir: PathBuf,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(executables: Executables, workdir: impl Into<PathBuf>) -> Self {
        Self {
            executables,
            workdir: workdir.into(),
        }
    }

    #[must_use]
    pub fn executables(&self) -> &Executables {
        &self.executables
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let Some((program, args)) = invocation.argv.split_first() else {
            return Err(DeployError::Other("Empty command line".into()));
        };
        let resolved = self
            .executables
            .path(program)
            .map_or_else(|| PathBuf::from(program), Path::to_path_buf);

        info!("About to run '{}'", invocation.display());

        let stdout = if invocation.capture {
            Stdio::piped()
        } else {
            Stdio::inherit()
        };
        // The child gets the configuration directory; our own cwd is untouched.
        let output = Command::new(&resolved)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .output()?;

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        check(invocation, result)
    }
}

/// Apply the invocation's policy to a finished command.
pub(crate) fn check(invocation: &Invocation, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    match invocation.policy {
        Policy::MustSucceed => Err(DeployError::CommandFailed {
            command: invocation.display(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }),
        Policy::BestEffort => {
            warn!(
                command = %invocation.display(),
                code = output.code,
                stderr = %output.stderr.trim(),
                "Command failed; continuing"
            );
            Ok(output)
        }
    }
}
