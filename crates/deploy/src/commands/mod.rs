//! `deploy` and `undeploy` subcommands.

pub mod deploy;
pub mod undeploy;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Input, Password};

use crate::params::{self, Operation, ParamValue, ParameterRecord};
use crate::ui;

pub use deploy::DeployCommand;
pub use undeploy::UndeployCommand;

/// Where configuration lands when no directory is given.
#[must_use]
pub fn default_config_dir(hostname: &str) -> PathBuf {
    Path::new("configurations").join(hostname)
}

/// Gather parameters from a file or the environment, prompting for any
/// required value still missing when attached to a terminal.
///
/// # Errors
///
/// Returns an error naming every missing or invalid parameter.
pub fn load_parameters(file: Option<&Path>, operation: Operation) -> Result<ParameterRecord> {
    let record = match file {
        Some(path) => params::load_file(path)
            .with_context(|| format!("Failed to read parameters from {}", path.display()))?,
        None => params::from_env(),
    };
    let mut record = params::canonicalize(record)?;
    let missing = params::missing_parameters(&record, operation);
    if !missing.is_empty() && std::io::stdin().is_terminal() {
        prompt_missing(&mut record, &missing)?;
        record = params::canonicalize(record)?;
    }
    params::validate(&record, operation)?;
    Ok(record)
}

fn prompt_missing(record: &mut ParameterRecord, missing: &[String]) -> Result<()> {
    let theme = ColorfulTheme::default();
    ui::print_info("Some required parameters are missing");
    for key in missing {
        if record.get(key.as_str()).is_some_and(|v| !v.is_empty()) {
            continue;
        }
        // Derived from the hostname once that is known.
        if key == "kubernetes_cluster_name" && record.contains_key("hostname") {
            continue;
        }
        if key.starts_with("tls_") {
            let dir: String = Input::with_theme(&theme)
                .with_prompt("TLS certificate directory")
                .interact_text()?;
            let logging = !record.contains_key("beats_cert");
            record.extend(params::certs_from_dir(Path::new(dir.trim()), logging));
            continue;
        }
        let value: String = if key == "oauth_secret" {
            Password::with_theme(&theme)
                .with_prompt("oauth_secret")
                .interact()?
        } else {
            Input::with_theme(&theme).with_prompt(key).interact_text()?
        };
        record.insert(key.clone(), ParamValue::Str(value.trim().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_dir() {
        assert_eq!(
            default_config_dir("nb.kremvax.ru"),
            PathBuf::from("configurations/nb.kremvax.ru")
        );
    }

    #[test]
    fn test_load_parameters_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.yml");
        std::fs::write(
            &path,
            "hostname: nb.kremvax.ru\nallowed_groups: kgb, gru\ngke_node_count: \"4\"\n",
        )
        .unwrap();
        let record = load_parameters(Some(&path), Operation::Undeploy).unwrap();
        assert_eq!(record["gke_node_count"], ParamValue::Int(4));
        assert_eq!(
            record["allowed_groups"],
            ParamValue::List(vec!["kgb".into(), "gru".into()])
        );
    }

    #[test]
    fn test_unreadable_file_names_path() {
        let err = load_parameters(Some(Path::new("/nonexistent/params.yml")), Operation::Deploy)
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/params.yml"));
    }
}
