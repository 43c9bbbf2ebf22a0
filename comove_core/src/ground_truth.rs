//! Ground truth about device relations.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The relation between two devices at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The first device leads the second (includes co-leading).
    Leading,
    /// The first device follows the second.
    Following,
    /// Not co-moving at all.
    None,
}

/// One ground-truth record: a device's group and position at a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruthEntry {
    pub name: String,
    /// Unique group number for this timestamp. Two devices co-move iff
    /// their group numbers are equal.
    pub group: i32,
    /// Order of the device in the group; 0 marks the leader.
    pub order: i32,
}

/// Ground-truth group membership for every timestamp.
///
/// A device may have several entries per timestamp; the one with the
/// greatest group number wins (the latest one on ties), which lets later
/// records shadow earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Sorted by timestamp.
    pub timestamps: BTreeMap<i64, Vec<GroundTruthEntry>>,
}

impl GroundTruth {
    /// The relation between `device_a` and `device_b` at `timestamp`.
    pub fn relation_at(&self, timestamp: i64, device_a: &str, device_b: &str) -> Relation {
        let Some(entries) = self.timestamps.get(&timestamp) else {
            return Relation::None;
        };

        // The entry with the greatest group index wins; equal groups keep
        // the latest entry.
        let find = |name: &str| {
            let mut found: Option<&GroundTruthEntry> = None;
            for entry in entries {
                if entry.name == name && found.map_or(true, |f| entry.group >= f.group) {
                    found = Some(entry);
                }
            }
            found
        };

        let (Some(a), Some(b)) = (find(device_a), find(device_b)) else {
            return Relation::None;
        };
        if a.group != b.group {
            return Relation::None;
        }

        if a.order <= b.order {
            Relation::Leading
        } else {
            Relation::Following
        }
    }

    /// True iff the two devices are co-moving at `timestamp`.
    pub fn co_moving_at(&self, timestamp: i64, device_a: &str, device_b: &str) -> bool {
        self.relation_at(timestamp, device_a, device_b) != Relation::None
    }

    /// The leaders of every group at `timestamp`, keyed by group number.
    /// Only entries with order 0 count; a group may have several leaders.
    /// Returns `None` when the timestamp is unknown.
    pub fn leaders_at(&self, timestamp: i64) -> Option<HashMap<i32, Vec<String>>> {
        let entries = self.timestamps.get(&timestamp)?;

        let mut leaders: HashMap<i32, Vec<String>> = HashMap::new();
        for entry in entries {
            if entry.order == 0 {
                leaders
                    .entry(entry.group)
                    .or_default()
                    .push(entry.name.clone());
            }
        }
        Some(leaders)
    }

    /// Checks that this ground truth covers exactly `[start, end]` and
    /// mentions every device in `targets` at least once.
    pub fn must_match(&self, start: i64, end: i64, targets: &[String]) -> Result<()> {
        let Some((&first, _)) = self.timestamps.first_key_value() else {
            return Err(Error::EmptyInput("ground truth is empty"));
        };
        let (&last, _) = self.timestamps.last_key_value().expect("non-empty map");

        if first != start {
            return Err(Error::Range(format!(
                "ground truth starts at {first}, expected {start}"
            )));
        }
        if last != end {
            return Err(Error::Range(format!(
                "ground truth ends at {last}, expected {end}"
            )));
        }

        let known: HashSet<&str> = self
            .timestamps
            .values()
            .flatten()
            .map(|entry| entry.name.as_str())
            .collect();
        for target in targets {
            if !known.contains(target.as_str()) {
                return Err(Error::Range(format!(
                    "missing device in ground truth: {target}"
                )));
            }
        }
        Ok(())
    }
}
