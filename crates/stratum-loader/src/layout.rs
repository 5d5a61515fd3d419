//! Submission ordering
//!
//! Submitted batches are sorted so that urgent jobs go first and reads from
//! one file proceed by ascending offset. Between files, a [`LayoutOrder`]
//! ranks paths by where their archives sit on the medium.

use crate::job::FileJob;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One ranking rule: paths containing `pattern` get `rank`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRule {
    /// Caseless substring of the full path
    pub pattern: String,
    /// Lower ranks are read first
    pub rank: u32,
}

impl LayoutRule {
    /// Create a rule
    pub fn new(pattern: impl Into<String>, rank: u32) -> Self {
        Self {
            pattern: pattern.into(),
            rank,
        }
    }
}

/// Ordered ranking rules; the first matching rule wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOrder {
    /// Rules checked in order
    pub rules: Vec<LayoutRule>,
    /// Rank of paths no rule matches
    pub fallback_rank: u32,
}

impl Default for LayoutOrder {
    /// Level files and node graphs first, then the shipped content packs
    fn default() -> Self {
        Self {
            rules: vec![
                LayoutRule::new("/maps/graphs/", 1),
                LayoutRule::new("/maps/", 0),
                LayoutRule::new("/platform/zip", 2),
                LayoutRule::new("/hl2/zip", 3),
                LayoutRule::new("/episodic/zip", 4),
                LayoutRule::new("/ep2/zip", 5),
                LayoutRule::new("/tf/zip", 6),
                LayoutRule::new("/portal/zip", 7),
            ],
            fallback_rank: 8,
        }
    }
}

impl LayoutOrder {
    /// A ranking that treats every path alike
    pub const fn flat() -> Self {
        Self {
            rules: Vec::new(),
            fallback_rank: 0,
        }
    }

    /// Rank of a full path
    pub fn rank(&self, path: &str) -> u32 {
        let lowered = path.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|rule| lowered.contains(&rule.pattern.to_ascii_lowercase()))
            .map_or(self.fallback_rank, |rule| rule.rank)
    }

    pub(crate) fn compare(&self, a: &FileJob, b: &FileJob) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| self.rank(&a.path).cmp(&self.rank(&b.path)))
            .then_with(|| caseless_cmp(&a.path, &b.path))
            // paths differing only in case still need a total order
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.offset.cmp(&b.offset))
    }
}

fn caseless_cmp(a: &str, b: &str) -> Ordering {
    a.bytes()
        .map(|byte| byte.to_ascii_lowercase())
        .cmp(b.bytes().map(|byte| byte.to_ascii_lowercase()))
}
