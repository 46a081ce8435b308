use std::collections::BTreeMap;

use chrono::NaiveDate;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One bounded unit of work: an inclusive date span plus the caller's
/// non-date filters. Consumed exactly once by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchDescriptor {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub filters: BTreeMap<String, String>,
}

impl BatchDescriptor {
    pub fn new(
        start: NaiveDate,
        end: NaiveDate,
        filters: BTreeMap<String, String>,
    ) -> Self {
        debug_assert!(start <= end, "batch start after end");
        Self {
            start,
            end,
            filters,
        }
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Calendar days covered, inclusive of both ends.
    pub fn calendar_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn label(&self) -> String {
        if self.is_single_day() {
            self.start.format("%Y-%m-%d").to_string()
        } else {
            format!(
                "{}..{}",
                self.start.format("%Y-%m-%d"),
                self.end.format("%Y-%m-%d")
            )
        }
    }
}
