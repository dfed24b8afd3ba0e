// berthwatch/src/state/requests.rs
//
// Recent request IDs — at-most-one response per logical chat request.
//
// Duplicate deliveries of the same update (webhook retries, a long-poll
// replay after a crash of the poll task) are dropped. The set is bounded and
// simply cleared when full; an ID older than the last clear can slip through
// again, which is the accepted trade-off for not persisting anything.

use dashmap::DashSet;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct RecentRequests {
    seen:     DashSet<String>,
    capacity: usize,
}

impl RecentRequests {
    pub fn new(capacity: usize) -> Self {
        Self { seen: DashSet::new(), capacity: capacity.max(1) }
    }

    /// True the first time `id` is offered; false for a duplicate.
    pub fn first_seen(&self, id: &str) -> bool {
        if self.seen.contains(id) { return false; }
        if self.seen.len() >= self.capacity {
            debug!(capacity = self.capacity, "recent request cache full, clearing");
            self.seen.clear();
        }
        self.seen.insert(id.to_string())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize { self.seen.len() }
}

impl Default for RecentRequests {
    fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}
