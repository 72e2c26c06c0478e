//! Tag records, bucketing by build kind, and human-readable labels.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// One entry of a registry tag listing.
///
/// Fields other than the name and timestamp are carried through untouched
/// so JSON output shows everything the registry reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub name: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// How many tags of each kind to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub dailies: usize,
    pub weeklies: usize,
    pub releases: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            dailies: 3,
            weeklies: 2,
            releases: 1,
        }
    }
}

/// The kinds of build a tag can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    Daily,
    Weekly,
    Release,
}

impl BuildKind {
    /// Kind named by a tag: a `d`, `w` or `r` prefix followed by a digit.
    #[must_use]
    pub fn of(tag: &str) -> Option<Self> {
        let mut chars = tag.chars();
        let kind = match chars.next()? {
            'd' => Self::Daily,
            'w' => Self::Weekly,
            'r' => Self::Release,
            _ => return None,
        };
        chars.next().filter(char::is_ascii_digit).map(|_| kind)
    }
}

/// Most recent tags of each kind, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Buckets {
    pub daily: Vec<TagRecord>,
    pub weekly: Vec<TagRecord>,
    pub release: Vec<TagRecord>,
}

impl Buckets {
    /// Every kept tag: dailies, then weeklies, then releases.
    pub fn iter(&self) -> impl Iterator<Item = &TagRecord> {
        self.daily
            .iter()
            .chain(self.weekly.iter())
            .chain(self.release.iter())
    }
}

fn timestamp(record: &TagRecord) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(&record.last_updated).map_err(|source| ScanError::Timestamp {
        value: record.last_updated.clone(),
        source,
    })
}

fn newest(mut candidates: Vec<(DateTime<FixedOffset>, TagRecord)>, keep: usize) -> Vec<TagRecord> {
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.into_iter().take(keep).map(|(_, r)| r).collect()
}

/// Sort tags into daily, weekly and release buckets, newest first, each
/// truncated to its limit. Tags of no known kind are dropped.
///
/// # Errors
///
/// Returns [`ScanError::Timestamp`] if a bucketed tag's timestamp does not
/// parse.
pub fn partition(records: Vec<TagRecord>, limits: Limits) -> Result<Buckets> {
    let mut daily = Vec::new();
    let mut weekly = Vec::new();
    let mut release = Vec::new();
    for record in records {
        let Some(kind) = BuildKind::of(&record.name) else {
            continue;
        };
        let entry = (timestamp(&record)?, record);
        match kind {
            BuildKind::Daily => daily.push(entry),
            BuildKind::Weekly => weekly.push(entry),
            BuildKind::Release => release.push(entry),
        }
    }
    Ok(Buckets {
        daily: newest(daily, limits.dailies),
        weekly: newest(weekly, limits.weeklies),
        release: newest(release, limits.releases),
    })
}

fn digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Human-readable label for a tag.
///
/// `d20230101` reads `Daily 2023_01_01`, `w202301` reads `Weekly 2023_01`,
/// `r2001` reads `Release 20.01` and `r20_1` reads `Release 20.1`.
/// Underscore-separated forms of the daily and weekly dates are accepted.
/// Anything else is its own label.
#[must_use]
pub fn label(tag: &str) -> String {
    let Some(kind) = BuildKind::of(tag) else {
        return tag.to_string();
    };
    let rest = &tag[1..];
    let packed: String = rest.chars().filter(|c| *c != '_').collect();
    match kind {
        BuildKind::Daily if packed.len() == 8 && digits(&packed) => format!(
            "Daily {}_{}_{}",
            &packed[..4],
            &packed[4..6],
            &packed[6..]
        ),
        BuildKind::Weekly if packed.len() == 6 && digits(&packed) => {
            format!("Weekly {}_{}", &packed[..4], &packed[4..])
        }
        BuildKind::Release => match rest.split_once('_') {
            Some((major, minor)) if digits(major) => {
                format!("Release {major}.{}", minor.replace('_', "."))
            }
            None if rest.len() > 2 && digits(rest) => {
                format!("Release {}.{}", &rest[..2], &rest[2..])
            }
            _ => tag.to_string(),
        },
        _ => tag.to_string(),
    }
}

/// A selectable lab image and its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageOption {
    pub image: String,
    pub label: String,
}

/// `<owner>/<name>:<tag>` with a label for every kept tag, in bucket order.
#[must_use]
pub fn extract_image_info(owner: &str, name: &str, buckets: &Buckets) -> Vec<ImageOption> {
    buckets
        .iter()
        .map(|record| ImageOption {
            image: format!("{owner}/{name}:{}", record.name),
            label: label(&record.name),
        })
        .collect()
}
