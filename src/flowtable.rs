// Flow table keyed by "src+dst" endpoint strings

use std::collections::HashMap;

use crate::flow::{ClockEstimate, FlowRecord};

/// Key of the opposite direction: "src+dst" becomes "dst+src".
///
/// Endpoint strings are "ip:port", so '+' is the only separator that can
/// appear between them.
pub fn reverse_key(key: &str) -> Option<String> {
    let (src, dst) = key.split_once('+')?;
    Some(format!("{}+{}", dst, src))
}

/// All active flows, one record per direction.
///
/// A flow and its exact reverse are paired when both are present; each
/// side carries a `rev_flow` flag and reaches its partner through the
/// derived reverse key, so eviction can never leave a dangling
/// reference. Admission is capped; new flows are refused while the
/// table is full.
pub struct FlowTable {
    flows: HashMap<String, FlowRecord>,
    max_flows: usize,
}

impl FlowTable {
    pub fn new(max_flows: usize) -> Self {
        FlowTable {
            flows: HashMap::new(),
            max_flows,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flows.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&FlowRecord> {
        self.flows.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut FlowRecord> {
        self.flows.get_mut(key)
    }

    /// Admit a new flow. Returns false, leaving the table unchanged,
    /// when the flow cap has been reached.
    pub fn try_insert(&mut self, key: String, record: FlowRecord) -> bool {
        if self.flows.len() >= self.max_flows {
            return false;
        }
        self.flows.insert(key, record);
        true
    }

    /// Mark two flows as each other's reverse.
    pub fn pair(&mut self, a: &str, b: &str) {
        if let Some(fa) = self.flows.get_mut(a) {
            fa.rev_flow = true;
        }
        if let Some(fb) = self.flows.get_mut(b) {
            fb.rev_flow = true;
        }
    }

    /// Clock snapshot of the flow at `key`, when it has one.
    pub fn clock_of(&self, key: &str) -> Option<ClockEstimate> {
        self.flows.get(key).and_then(|f| f.clock())
    }

    /// Evict flows idle longer than `max_idle`, unpairing partners
    /// first. Returns the number of flows removed.
    pub fn age_out(&mut self, now: f64, max_idle: f64) -> usize {
        let stale: Vec<String> = self
            .flows
            .iter()
            .filter(|(_, f)| now - f.last_tm > max_idle)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            if let Some(gone) = self.flows.remove(key) {
                if gone.rev_flow {
                    if let Some(partner) = reverse_key(key).and_then(|rk| self.flows.get_mut(&rk)) {
                        partner.rev_flow = false;
                    }
                }
            }
        }
        stale.len()
    }
}
