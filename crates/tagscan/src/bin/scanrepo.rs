//! Scan an image repository for its most recent lab builds.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nb_tagscan::{assemble, shell_report, Limits, ScanConfig, ScanRepo};

/// Report the newest daily, weekly and release lab images.
#[derive(Parser, Debug)]
#[command(name = "scanrepo", version, about = "Scan a registry for lab image tags")]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Print the tag data as JSON instead of shell assignments
    #[arg(short, long)]
    json: bool,

    /// Host serving the tag listing
    #[arg(short, long, value_name = "HOST", default_value = "hub.docker.com")]
    repo: String,

    /// Host serving the registry manifest API
    #[arg(long, value_name = "HOST", default_value = "registry.hub.docker.com")]
    registry: String,

    /// Repository owner
    #[arg(short, long, default_value = "lsstsqre")]
    owner: String,

    /// Repository name
    #[arg(short, long, default_value = "jld-lab")]
    name: String,

    /// Daily builds to keep
    #[arg(short = 'q', long, default_value_t = 3)]
    dailies: usize,

    /// Weekly builds to keep
    #[arg(short, long, default_value_t = 2)]
    weeklies: usize,

    /// Release builds to keep
    #[arg(short = 'b', long, default_value_t = 1)]
    releases: usize,

    /// Connect without TLS
    #[arg(short, long)]
    insecure: bool,

    /// Also resolve the `recommended` tag
    #[arg(long)]
    recommended: bool,
}

impl Cli {
    fn config(&self) -> ScanConfig {
        ScanConfig {
            repo_host: self.repo.clone(),
            registry_host: self.registry.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            insecure: self.insecure,
            limits: Limits {
                dailies: self.dailies,
                weeklies: self.weeklies,
                releases: self.releases,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info,nb_tagscan=debug")
    } else {
        EnvFilter::new("warn,nb_tagscan=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config();
    let repo = ScanRepo::new(config.clone()).context("Failed to build registry client")?;
    let scan = repo
        .scan()
        .await
        .with_context(|| format!("Failed to scan {}", config.tags_url()))?;
    let recommended = if cli.recommended {
        repo.resolve_recommended(&scan)
            .await
            .context("Failed to resolve recommended tag")?
    } else {
        None
    };

    if cli.json {
        let mut data = serde_json::to_value(&scan.buckets)?;
        if cli.recommended {
            data["recommended"] = serde_json::json!(recommended);
        }
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print!(
            "{}",
            shell_report(&assemble(&config, &scan, recommended.as_deref()))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["scanrepo"]).unwrap();
        let config = cli.config();
        assert_eq!(config, ScanConfig::default());
    }

    #[test]
    fn test_limits_from_flags() {
        let cli = Cli::try_parse_from(["scanrepo", "-q", "1", "--weeklies", "4", "-b", "0"]).unwrap();
        assert_eq!(
            cli.config().limits,
            Limits {
                dailies: 1,
                weeklies: 4,
                releases: 0
            }
        );
    }
}
