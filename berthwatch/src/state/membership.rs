// berthwatch/src/state/membership.rs
//
// Alert membership — the set of vessels currently believed CRITICAL.
//
// Process memory only; empty after every restart. Each monitor tick replaces
// it atomically under one lock:
//
//   onsets     = current − previous        (alert these)
//   membership = current                   (i.e. previous ∩ current, plus onsets)
//   resolved   = previous − current        (dropped silently)
//
// A vessel therefore cannot be alerted twice without first leaving the set.

use std::collections::HashSet;

use parking_lot::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// New members, in the order they appeared in the tick's input.
    pub onsets:   Vec<String>,
    /// Members dropped this tick (no message is sent for these).
    pub resolved: Vec<String>,
}

#[derive(Debug, Default)]
pub struct AlertMembership {
    members: Mutex<HashSet<String>>,
}

impl AlertMembership {
    pub fn new() -> Self { Self::default() }

    /// Apply one tick. `current` is the ordered, de-duplicated list of vessels
    /// meeting the criticality predicate in this snapshot.
    pub fn apply_tick(&self, current: &[String]) -> Transition {
        let mut members = self.members.lock();

        let onsets: Vec<String> = current.iter()
            .filter(|id| !members.contains(id.as_str()))
            .cloned()
            .collect();

        let now: HashSet<String> = current.iter().cloned().collect();
        let mut resolved: Vec<String> = members.difference(&now).cloned().collect();
        resolved.sort();

        *members = now;
        Transition { onsets, resolved }
    }

    pub fn len(&self) -> usize { self.members.lock().len() }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool { self.members.lock().contains(id) }
}
