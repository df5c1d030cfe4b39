//! State cell: a replay-1 hub holding exactly one current value
//!
//! Always non-empty, distinct-until-changed per subscriber, conflated toward
//! the latest value for slow subscribers. Equal `set` calls still bump an
//! internal version for bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard};

use async_stream::stream;
use futures_util::{pin_mut, StreamExt};

use crate::config::{HubConfig, OverflowPolicy};
use crate::flow::Flow;
use crate::hub::MulticastHub;

pub struct StateCell<T> {
    hub: MulticastHub<T>,
    current: Mutex<Versioned<T>>,
}

struct Versioned<T> {
    value: T,
    version: u64,
}

impl<T: Clone + PartialEq + Send + 'static> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let hub = MulticastHub::unchecked(HubConfig::new(1, 0, OverflowPolicy::DropOldest));
        // Seed the replay slot so subscribers registered before any `set`
        // immediately observe the initial value.
        let _ = hub.try_emit(initial.clone());
        Self {
            hub,
            current: Mutex::new(Versioned {
                value: initial,
                version: 0,
            }),
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Versioned<T>> {
        self.current.lock().expect("state cell mutex poisoned")
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.lock_current().value.clone()
    }

    /// Bumped on every `set`, equal or not
    pub fn version(&self) -> u64 {
        self.lock_current().version
    }

    /// Update the current value. A value equal to the current one emits
    /// nothing. Never blocks: a subscriber slower than the setter sees
    /// intermediate values conflated away, with the final value guaranteed.
    pub fn set(&self, value: T) {
        let mut cur = self.lock_current();
        cur.version = cur.version.wrapping_add(1);
        if cur.value != value {
            cur.value = value.clone();
            // Emit while holding the cell lock so hub order matches update
            // order; DropOldest at capacity 1 cannot block.
            let _ = self.hub.try_emit(value);
        }
    }

    /// Current value immediately, then future distinct changes.
    ///
    /// Distinct-until-changed is relative to the last value delivered to
    /// *this* subscriber: conflation can fold an A→B→A burst back to a value
    /// the subscriber already saw, so each subscription filters against its
    /// own delivery history, not the cell's current value.
    pub fn subscribe(&self) -> Flow<T> {
        let upstream = self.hub.subscribe();
        Flow::from_source(Arc::new(move || {
            let s = upstream.clone().into_stream();
            stream! {
                pin_mut!(s);
                let mut delivered: Option<T> = None;
                while let Some(item) = s.next().await {
                    match item {
                        Ok(v) => {
                            if delivered.as_ref() != Some(&v) {
                                delivered = Some(v.clone());
                                yield Ok(v);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                }
            }
            .boxed()
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }
}
