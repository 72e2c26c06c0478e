//! Lab image choices for the hub's spawner options form.

use tracing::{info, warn};

use crate::client::{Scan, ScanConfig, ScanRepo};
use crate::tags::{self, ImageOption};

/// Image choices from a finished scan, the resolved recommended image
/// first when there is one.
#[must_use]
pub fn assemble(config: &ScanConfig, scan: &Scan, recommended: Option<&str>) -> Vec<ImageOption> {
    let mut options = tags::extract_image_info(&config.owner, &config.name, &scan.buckets);
    if let Some(tag) = recommended {
        let image = config.image(tag);
        options.retain(|o| o.image != image);
        options.insert(
            0,
            ImageOption {
                image,
                label: format!("Recommended ({})", tags::label(tag)),
            },
        );
    }
    options
}

/// Scan and assemble image choices, degrading to no choices when the
/// registry cannot be read.
///
/// A failure to resolve the recommended tag only drops that entry.
pub async fn lab_options(repo: &ScanRepo, with_recommended: bool) -> Vec<ImageOption> {
    let scan = match repo.scan().await {
        Ok(scan) => scan,
        Err(e) => {
            warn!(error = %e, "Registry scan failed; offering no image options");
            return Vec::new();
        }
    };
    let recommended = if with_recommended {
        match repo.resolve_recommended(&scan).await {
            Ok(tag) => tag,
            Err(e) => {
                warn!(error = %e, "Could not resolve recommended image");
                None
            }
        }
    } else {
        None
    };
    let options = assemble(repo.config(), &scan, recommended.as_deref());
    info!(count = options.len(), "Assembled image options");
    options
}

/// Shell assignments consumed by the lab container environment.
#[must_use]
pub fn shell_report(options: &[ImageOption]) -> String {
    let names: Vec<&str> = options.iter().map(|o| o.image.as_str()).collect();
    let descs: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
    format!(
        "# Environment variables for Jupyter Lab containers\n\
         LAB_CONTAINER_NAMES='{}'\n\
         LAB_CONTAINER_DESCS='{}'\n\
         export LAB_CONTAINER_NAMES LAB_CONTAINER_DESCS\n",
        names.join(","),
        descs.join(",")
    )
}

/// Radio-button form body for the spawner.
#[must_use]
pub fn render_form(title: &str, options: &[ImageOption]) -> String {
    let mut form = format!("<label for=\"{title}\">{title}</label></br>\n");
    for option in options {
        form.push_str(&format!(
            "      <input type=\"radio\" name=\"kernel_image\" value=\"{}\">{}<br>\n",
            option.image, option.label
        ));
    }
    form
}
