use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Per-kind observation inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySample {
    pub count: u64,
    /// Content checksum, present only when checksum tracking is enabled.
    pub checksum: Option<String>,
}

/// A point-in-time summary of the backing store.
///
/// Immutable once captured. Kinds that failed to sample are missing from the
/// per-kind map but still listed in [`StateSnapshot::tracked_kinds`].
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub taken_at: DateTime<Utc>,
    pub capture_duration: Duration,
    samples: IndexMap<String, EntitySample>,
    tracked_kinds: BTreeSet<String>,
}

impl StateSnapshot {
    pub(crate) fn new(
        taken_at: DateTime<Utc>,
        capture_duration: Duration,
        samples: IndexMap<String, EntitySample>,
        tracked_kinds: BTreeSet<String>,
    ) -> Self {
        Self {
            taken_at,
            capture_duration,
            samples,
            tracked_kinds,
        }
    }

    /// The recorded count for a kind, `0` when the kind was not sampled.
    pub fn count(&self, kind: &str) -> u64 {
        self.samples.get(kind).map_or(0, |sample| sample.count)
    }

    pub fn sample(&self, kind: &str) -> Option<&EntitySample> {
        self.samples.get(kind)
    }

    /// Every kind that was selected for tracking, sampled or not.
    pub fn tracked_kinds(&self) -> &BTreeSet<String> {
        &self.tracked_kinds
    }

    /// Changes between this snapshot and a later one.
    ///
    /// A change is emitted for a kind iff the counts differ, or both
    /// snapshots carry a checksum for the kind and the checksums differ.
    pub fn diff(&self, after: &StateSnapshot) -> StateDiff {
        let mut kinds: Vec<&String> = self.samples.keys().collect();
        for kind in after.samples.keys() {
            if !self.samples.contains_key(kind) {
                kinds.push(kind);
            }
        }

        let changes = kinds
            .into_iter()
            .filter_map(|kind| {
                let count_before = self.count(kind);
                let count_after = after.count(kind);
                let checksum_before = self
                    .sample(kind)
                    .and_then(|sample| sample.checksum.clone());
                let checksum_after = after
                    .sample(kind)
                    .and_then(|sample| sample.checksum.clone());

                let checksums_differ = matches!(
                    (&checksum_before, &checksum_after),
                    (Some(before), Some(after)) if before != after
                );
                if count_before == count_after && !checksums_differ {
                    return None;
                }
                Some(EntityChange {
                    kind: kind.clone(),
                    count_before,
                    count_after,
                    checksum_before,
                    checksum_after,
                })
            })
            .collect();

        StateDiff { changes }
    }
}

/// One observed difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub kind: String,
    pub count_before: u64,
    pub count_after: u64,
    pub checksum_before: Option<String>,
    pub checksum_after: Option<String>,
}

impl EntityChange {
    /// One-line human-readable description.
    pub fn summary(&self) -> String {
        if self.count_before == self.count_after {
            format!("{}: contents changed (count {})", self.kind, self.count_after)
        } else {
            format!(
                "{}: count {} -> {}",
                self.kind, self.count_before, self.count_after
            )
        }
    }
}

/// The ordered set of changes between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct StateDiff {
    changes: Vec<EntityChange>,
}

impl StateDiff {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes(&self) -> &[EntityChange] {
        &self.changes
    }

    pub fn change_for(&self, kind: &str) -> Option<&EntityChange> {
        self.changes.iter().find(|change| change.kind == kind)
    }

    /// All change summaries joined on one line.
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(EntityChange::summary)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, u64, Option<&str>)]) -> StateSnapshot {
        let samples = entries
            .iter()
            .map(|(kind, count, checksum)| {
                (
                    (*kind).to_string(),
                    EntitySample {
                        count: *count,
                        checksum: checksum.map(str::to_string),
                    },
                )
            })
            .collect();
        let tracked = entries.iter().map(|(kind, ..)| (*kind).to_string()).collect();
        StateSnapshot::new(Utc::now(), Duration::ZERO, samples, tracked)
    }

    #[test]
    fn should_report_no_changes_for_identical_snapshots() {
        let before = snapshot(&[("Users", 3, None), ("Posts", 7, None)]);
        let after = snapshot(&[("Users", 3, None), ("Posts", 7, None)]);

        let diff = before.diff(&after);
        assert!(!diff.has_changes());
        assert_eq!(diff.summary(), "");
    }

    #[test]
    fn should_emit_change_on_count_difference() {
        let before = snapshot(&[("AuditLog", 0, None)]);
        let after = snapshot(&[("AuditLog", 1, None)]);

        let diff = before.diff(&after);
        assert!(diff.has_changes());
        let change = diff.change_for("AuditLog").expect("change present");
        assert_eq!(change.count_before, 0);
        assert_eq!(change.count_after, 1);
        insta::assert_snapshot!(diff.summary(), @"AuditLog: count 0 -> 1");
    }

    #[test]
    fn should_emit_change_when_both_checksums_differ() {
        let before = snapshot(&[("Users", 3, Some("aaa"))]);
        let after = snapshot(&[("Users", 3, Some("bbb"))]);

        let diff = before.diff(&after);
        assert!(diff.has_changes());
        insta::assert_snapshot!(diff.summary(), @"Users: contents changed (count 3)");
    }

    #[test]
    fn should_not_compare_checksums_when_one_is_missing() {
        let before = snapshot(&[("Users", 3, Some("aaa"))]);
        let after = snapshot(&[("Users", 3, None)]);

        assert!(!before.diff(&after).has_changes());
    }

    #[test]
    fn should_mirror_counts_in_both_directions() {
        let a = snapshot(&[("Users", 3, None)]);
        let b = snapshot(&[("Users", 5, None)]);

        let forward = a.diff(&b);
        let change = forward.change_for("Users").expect("change");
        assert_eq!(change.count_before, a.count("Users"));
        assert_eq!(change.count_after, b.count("Users"));

        let backward = b.diff(&a);
        let change = backward.change_for("Users").expect("change");
        assert_eq!(change.count_before, b.count("Users"));
        assert_eq!(change.count_after, a.count("Users"));
    }

    #[test]
    fn should_handle_kind_present_on_one_side_only() {
        let before = snapshot(&[]);
        let after = snapshot(&[("Orders", 2, None)]);

        let diff = before.diff(&after);
        let change = diff.change_for("Orders").expect("change");
        assert_eq!(change.count_before, 0);
        assert_eq!(change.count_after, 2);
    }
}
