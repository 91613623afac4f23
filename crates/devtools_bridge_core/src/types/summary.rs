use super::entry::{CapturedEntry, Level};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const RECENT_ERRORS_LIMIT: usize = 20;
pub const RECENT_WARNINGS_LIMIT: usize = 10;
pub const LAST_ENTRIES_LIMIT: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_entries: usize,
    pub errors: usize,
    pub warnings: usize,
    pub sources: Vec<String>,
    pub by_level: BTreeMap<Level, usize>,
}

/// Point-in-time aggregate over the collector's buffer. Always recomputed, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub stats: SummaryStats,
    pub recent_errors: Vec<CapturedEntry>,
    pub recent_warnings: Vec<CapturedEntry>,
    pub last_entries: Vec<CapturedEntry>,
}

impl Summary {
    /// Builds a summary from entries in arrival order. Output depends only on the inputs.
    pub fn from_entries<'a, I>(entries: I, generated_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a CapturedEntry>,
    {
        let entries: Vec<&CapturedEntry> = entries.into_iter().collect();

        let mut by_level: BTreeMap<Level, usize> =
            Level::ALL.into_iter().map(|level| (level, 0)).collect();
        let mut sources = BTreeSet::new();
        for entry in &entries {
            *by_level.entry(entry.level()).or_default() += 1;
            sources.insert(entry.source().to_string());
        }

        let stats = SummaryStats {
            total_entries: entries.len(),
            errors: by_level[&Level::Error],
            warnings: by_level[&Level::Warn],
            sources: sources.into_iter().collect(),
            by_level,
        };

        Self {
            generated_at,
            stats,
            recent_errors: tail_of_level(&entries, Level::Error, RECENT_ERRORS_LIMIT),
            recent_warnings: tail_of_level(&entries, Level::Warn, RECENT_WARNINGS_LIMIT),
            last_entries: tail(entries.iter().copied(), LAST_ENTRIES_LIMIT),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.stats.errors > 0
    }
}

fn tail_of_level(entries: &[&CapturedEntry], level: Level, limit: usize) -> Vec<CapturedEntry> {
    tail(
        entries.iter().copied().filter(|entry| entry.level() == level),
        limit,
    )
}

fn tail<'a>(entries: impl Iterator<Item = &'a CapturedEntry>, limit: usize) -> Vec<CapturedEntry> {
    let matching: Vec<&CapturedEntry> = entries.collect();
    let skip = matching.len().saturating_sub(limit);
    matching.into_iter().skip(skip).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entry::{EntryTimestamp, LogEntry};

    fn captured(seq: u64, level: Level, source: &str) -> CapturedEntry {
        CapturedEntry {
            seq,
            received_at: Utc::now(),
            entry: LogEntry {
                timestamp: EntryTimestamp::Numeric(seq.into()),
                level,
                source: source.to_string(),
                message: format!("message {seq}"),
                data: None,
            },
        }
    }

    #[test]
    fn test_empty_summary() {
        let summary = Summary::from_entries(std::iter::empty(), Utc::now());
        assert_eq!(summary.stats.total_entries, 0);
        assert!(summary.stats.sources.is_empty());
        assert_eq!(summary.stats.by_level.len(), 4);
        assert!(!summary.has_errors());
    }

    #[test]
    fn test_counts_and_sorted_sources() {
        let entries = vec![
            captured(0, Level::Info, "B"),
            captured(1, Level::Error, "A"),
            captured(2, Level::Warn, "C"),
            captured(3, Level::Debug, "A"),
        ];
        let summary = Summary::from_entries(&entries, Utc::now());

        assert_eq!(summary.stats.total_entries, 4);
        assert_eq!(summary.stats.errors, 1);
        assert_eq!(summary.stats.warnings, 1);
        assert_eq!(summary.stats.sources, vec!["A", "B", "C"]);
        assert_eq!(summary.stats.by_level[&Level::Debug], 1);
        assert!(summary.has_errors());
    }

    #[test]
    fn test_recent_lists_keep_newest_in_arrival_order() {
        let entries: Vec<CapturedEntry> = (0..50)
            .map(|seq| {
                let level = if seq % 2 == 0 { Level::Error } else { Level::Warn };
                captured(seq, level, "A")
            })
            .collect();
        let summary = Summary::from_entries(&entries, Utc::now());

        assert_eq!(summary.recent_errors.len(), RECENT_ERRORS_LIMIT);
        assert_eq!(summary.recent_errors.first().map(|e| e.seq), Some(10));
        assert_eq!(summary.recent_errors.last().map(|e| e.seq), Some(48));

        assert_eq!(summary.recent_warnings.len(), RECENT_WARNINGS_LIMIT);
        assert_eq!(summary.recent_warnings.first().map(|e| e.seq), Some(31));

        assert_eq!(summary.last_entries.len(), LAST_ENTRIES_LIMIT);
        assert_eq!(summary.last_entries.first().map(|e| e.seq), Some(20));
        assert_eq!(summary.last_entries.last().map(|e| e.seq), Some(49));
    }

    #[test]
    fn test_summary_file_shape() {
        let entries = vec![captured(0, Level::Error, "A")];
        let value = serde_json::to_value(Summary::from_entries(&entries, Utc::now())).unwrap();

        assert!(value.get("generatedAt").is_some());
        assert_eq!(value["stats"]["totalEntries"], 1);
        assert_eq!(value["stats"]["errors"], 1);
        assert_eq!(value["stats"]["warnings"], 0);
        assert_eq!(value["stats"]["sources"], serde_json::json!(["A"]));
        assert_eq!(value["stats"]["byLevel"]["error"], 1);
        assert_eq!(value["recentErrors"].as_array().map(Vec::len), Some(1));
        assert!(value["recentWarnings"].as_array().is_some());
        assert!(value["lastEntries"].as_array().is_some());
    }
}
