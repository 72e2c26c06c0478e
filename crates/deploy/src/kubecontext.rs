//! kubectl context selection and restoration.

use tracing::{info, warn};

use crate::error::{DeployError, Result};
use crate::runner::{CommandRunner, Invocation};
use crate::tools::kubectl;

/// First context in `kubectl config get-contexts` output whose name ends
/// with `cluster`.
#[must_use]
pub fn find_context(listing: &str, cluster: &str) -> Option<String> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().find(|field| *field != "*"))
        .find(|name| name.ends_with(cluster))
        .map(str::to_string)
}

/// The context kubectl currently uses, if any.
///
/// # Errors
///
/// Returns an error if kubectl cannot be started.
pub fn current_context(runner: &dyn CommandRunner) -> Result<Option<String>> {
    let out = runner.run(
        &kubectl(["config", "current-context"])
            .capture()
            .best_effort(),
    )?;
    Ok(out
        .success()
        .then(|| out.stdout_trimmed().map(str::to_string))
        .flatten())
}

/// Make `namespace` the default namespace of `context`.
///
/// # Errors
///
/// Returns [`DeployError::CommandFailed`] if kubectl rejects the change.
pub fn set_namespace(runner: &dyn CommandRunner, context: &str, namespace: &str) -> Result<()> {
    runner.run(&kubectl([
        "config",
        "set-context",
        context,
        "--namespace",
        namespace,
    ]))?;
    Ok(())
}

/// Switch to the context for `cluster` and default it to `namespace`.
///
/// # Errors
///
/// Returns [`DeployError::ContextNotFound`] if no context matches.
pub fn switch_to(runner: &dyn CommandRunner, cluster: &str, namespace: &str) -> Result<String> {
    let out = runner.run(&kubectl(["config", "get-contexts"]).capture())?;
    let context = find_context(&out.stdout, cluster)
        .ok_or_else(|| DeployError::ContextNotFound(cluster.to_string()))?;
    info!(context = %context, namespace, "Switching kubectl context");
    runner.run(&kubectl(["config", "use-context", context.as_str()]))?;
    set_namespace(runner, &context, namespace)?;
    Ok(context)
}

/// Restores the context that was current when it was created.
///
/// Restoration happens on drop, so it runs whether the guarded work
/// succeeded, failed or panicked.
pub struct ContextGuard<'a> {
    runner: &'a dyn CommandRunner,
    saved: Option<String>,
}

impl<'a> ContextGuard<'a> {
    /// Remember the current context.
    ///
    /// # Errors
    ///
    /// Returns an error if kubectl cannot be started.
    pub fn save(runner: &'a dyn CommandRunner) -> Result<Self> {
        let saved = current_context(runner)?;
        match &saved {
            Some(context) => info!(context = %context, "Saved kubectl context"),
            None => warn!("No current kubectl context to restore"),
        }
        Ok(Self { runner, saved })
    }

    #[must_use]
    pub fn saved(&self) -> Option<&str> {
        self.saved.as_deref()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let Some(context) = self.saved.take() else {
            return;
        };
        let restore = Invocation::new(["kubectl", "config", "use-context", context.as_str()])
            .best_effort();
        match self.runner.run(&restore) {
            Ok(out) if out.success() => info!(context = %context, "Restored kubectl context"),
            Ok(_) => {}
            Err(e) => warn!(context = %context, error = %e, "Could not restore kubectl context"),
        }
    }
}
