//! Cycle watchdog.
//!
//! One watchdog task runs per scope with outstanding top-level loads. Each tick
//! it first rejects entries that have waited longer than the configured wait
//! interval, then, once no entry is still discovering its dependencies, walks
//! the graph below every pending load and forces one resolver per back-edge.
//! The walk also steps from an entry into its deferred export producer.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::error::LoadError;
use crate::loader::LoaderInner;
use crate::resolver::DependencyResolver;
use crate::state::{EntryId, LoaderState, ScopeId};

/// Edge to force: `(consumer, dependency, handle)`.
type ForcedEdge = (String, String, Arc<DependencyResolver>);

#[derive(Default)]
struct CycleTrace {
    traced: HashSet<EntryId>,
    processed: HashSet<EntryId>,
    forced: Vec<ForcedEdge>,
}

impl CycleTrace {
    fn walk(&mut self, state: &LoaderState, id: EntryId) {
        self.traced.insert(id);
        let entry = state.entry(id);
        for (name, target) in state.dependency_targets(id) {
            let Some(target) = target else { continue };
            let Some(resolver) = entry.resolvers.get(&name) else { continue };
            if resolver.is_settled()
                || state.entry(target).is_settled()
                || self.processed.contains(&target)
            {
                continue;
            }
            if self.traced.contains(&target) {
                self.forced
                    .push((entry.name.clone(), name, Arc::clone(resolver)));
            } else {
                self.walk(state, target);
            }
        }
        // A deferred export waits on its producer without a resolver edge; the
        // producer's own edges carry any back-edge into this entry.
        if let Some(producer) = state.deferred_producer(id) {
            if !state.entry(producer).is_settled()
                && !self.traced.contains(&producer)
                && !self.processed.contains(&producer)
            {
                self.walk(state, producer);
            }
        }
        self.traced.remove(&id);
        self.processed.insert(id);
    }
}

impl LoaderInner {
    /// Start the watchdog for `scope` unless it is already running.
    pub(crate) fn arm_watchdog(self: &Arc<Self>, scope: ScopeId) {
        {
            let mut state = self.state.lock();
            let record = state.scope_mut(scope);
            if record.watchdog_armed {
                return;
            }
            record.watchdog_armed = true;
        }
        trace!(loader = self.id, "watchdog armed");

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.watch_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else { break };
                if !inner.watch_tick(scope) {
                    break;
                }
            }
        });
    }

    /// One watchdog pass. Returns false once the watchdog has disarmed.
    fn watch_tick(self: &Arc<Self>, scope: ScopeId) -> bool {
        {
            let mut state = self.state.lock();
            let record = state.scope_mut(scope);
            if record.pending_loads.is_empty() {
                record.watchdog_armed = false;
                trace!(loader = self.id, "watchdog disarmed");
                return false;
            }
        }

        if let Some(wait) = self.config.wait_interval {
            if self.expire_entries(wait) > 0 {
                return true;
            }
        }

        let forced = {
            let state = self.state.lock();
            let registering = state.registering_total();
            if registering > 0 {
                trace!(registering, "dependency discovery in progress; skipping cycle scan");
                return true;
            }
            let mut walker = CycleTrace::default();
            for load in state.scope(scope).pending_loads.iter().rev() {
                for name in &load.names {
                    if let Some(id) = state.find_entry(scope, name) {
                        if !walker.processed.contains(&id) && !state.entry(id).is_settled() {
                            walker.walk(&state, id);
                        }
                    }
                }
            }
            walker.forced
        };

        for (consumer, dependency, resolver) in forced {
            if resolver.force() {
                info!(
                    module = %consumer,
                    dependency = %dependency,
                    "breaking dependency cycle"
                );
            }
        }
        true
    }

    /// Reject every started entry that has been unresolved for at least `wait`.
    fn expire_entries(&self, wait: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<(EntryId, LoadError)> = {
            let state = self.state.lock();
            state
                .entries()
                .filter(|(_, entry)| !entry.is_settled())
                .filter_map(|(id, entry)| {
                    let waited = now.saturating_duration_since(entry.started?);
                    (waited >= wait).then(|| {
                        (
                            id,
                            LoadError::Timeout {
                                name: entry.name.clone(),
                                waited,
                            },
                        )
                    })
                })
                .collect()
        };
        if !expired.is_empty() {
            debug!(count = expired.len(), "expiring timed out modules");
        }
        let count = expired.len();
        for (id, err) in expired {
            self.reject(id, err);
        }
        count
    }
}
