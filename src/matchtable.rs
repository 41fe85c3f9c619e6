// TSval match table for passive-ping round trips

use std::collections::HashMap;

struct TsEntry {
    tm: f64,
    used: bool,
}

/// First-seen capture times keyed by "flowkey+tsval".
///
/// An ECR observed on the reverse flow is matched against the first
/// appearance of that value as a TSval, giving one RTT sample per echoed
/// timestamp. Matched entries are kept but marked used until they age
/// out: a TSval that cycles back on a long-lived flow must not be
/// re-created and matched against an echo of its earlier incarnation,
/// which would badly underestimate the RTT.
pub struct TsMatchTable {
    entries: HashMap<String, TsEntry>,
}

impl TsMatchTable {
    pub fn new() -> Self {
        TsMatchTable {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the capture time of a TSval. The same value may appear on
    /// several packets; the first (oldest) appearance is kept, which may
    /// overestimate the RTT but never underestimates it.
    pub fn observe(&mut self, key: String, tm: f64) {
        self.entries
            .entry(key)
            .or_insert(TsEntry { tm, used: false });
    }

    /// Consume the entry for `key`, returning its capture time the first
    /// time only.
    pub fn take(&mut self, key: &str) -> Option<f64> {
        let entry = self.entries.get_mut(key)?;
        if entry.used {
            return None;
        }
        entry.used = true;
        Some(entry.tm)
    }

    /// Drop entries whose TSval was seen more than `max_age` seconds ago.
    pub fn age_out(&mut self, now: f64, max_age: f64) {
        self.entries.retain(|_, e| now - e.tm <= max_age);
    }
}

impl Default for TsMatchTable {
    fn default() -> Self {
        Self::new()
    }
}
