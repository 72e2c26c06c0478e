//! Container registry tag scanner.
//!
//! Lists an image repository's tags, keeps the newest daily, weekly and
//! release builds, labels them for people, and can work out which build
//! the floating `recommended` tag currently points at.

pub mod client;
pub mod error;
pub mod options;
pub mod tags;

pub use client::{Challenge, Resolution, Scan, ScanConfig, ScanRepo, RECOMMENDED_TAG};
pub use error::{Result, ScanError};
pub use options::{assemble, lab_options, render_form, shell_report};
pub use tags::{extract_image_info, label, partition, Buckets, ImageOption, Limits, TagRecord};
