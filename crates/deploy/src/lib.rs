//! Notebook platform deployment library.
//!
//! Turns a set of deployment parameters into a rendered configuration tree
//! and drives the cluster, DNS and cloud CLIs to create or tear down the
//! platform described by it.
//!
//! # Example
//!
//! ```ignore
//! use nb_deploy::{params, Platform, PlatformOptions};
//! use nb_deploy::runner::{Executables, ProcessRunner, REQUIRED_TOOLS};
//!
//! fn main() -> anyhow::Result<()> {
//!     let record = params::load_file("kremvax.yml".as_ref())?;
//!     let params = params::normalize(&record)?;
//!     let runner = ProcessRunner::new(Executables::resolve(REQUIRED_TOOLS, false)?, ".");
//!     let report = Platform::new(&runner, params, PlatformOptions::default(), ".").deploy()?;
//!     println!("{:?}", report.phases);
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod commands;
pub mod components;
pub mod error;
pub mod generate;
pub mod kubecontext;
pub mod manifests;
pub mod params;
pub mod platform;
pub mod poll;
pub mod preflight;
pub mod runner;
pub mod secrets;
pub mod snapshot;
pub mod template;
pub mod tools;
pub mod ui;

// Re-export commonly used types at the crate root
pub use components::{Component, PlatformOptions};
pub use error::{DeployError, Result};
pub use params::{Operation, ParamValue, ParameterRecord, Params};
pub use platform::{Platform, Report};
pub use runner::{CommandOutput, CommandRunner, Invocation, Policy};
