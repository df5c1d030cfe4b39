//! Hot multicast hub with a bounded replay/overflow buffer
//!
//! One producer side, N subscriber cursors over a shared ring buffer. The
//! buffer retains up to `replay` recent items for new subscribers plus `extra`
//! in-flight slack; once full, the configured [`OverflowPolicy`] arbitrates.
//! Buffer, cursor table, and fan-out wakeups are all mutated under a single
//! mutex so admission, eviction, and delivery stay atomic with respect to
//! concurrent `emit` and `subscribe` calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_stream::stream;
use futures_util::StreamExt;
use tokio::sync::Notify;

use crate::config::{HubConfig, OverflowPolicy};
use crate::error::{FlowError, FlowResult};
use crate::flow::{Flow, FlowStream};

pub struct MulticastHub<T> {
    shared: Arc<HubShared<T>>,
}

impl<T> Clone for MulticastHub<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct HubShared<T> {
    config: HubConfig,
    state: Mutex<HubState<T>>,
    /// Wakes subscribers waiting for new values
    values: Notify,
    /// Wakes emitters waiting for buffer space
    space: Notify,
}

impl<T> HubShared<T> {
    fn lock(&self) -> MutexGuard<'_, HubState<T>> {
        self.state.lock().expect("hub state mutex poisoned")
    }
}

struct HubState<T> {
    buffer: VecDeque<T>,
    /// Sequence number of the buffer front
    head_seq: u64,
    /// Per-subscriber delivery cursor: next sequence to read
    cursors: HashMap<u64, u64>,
    next_cursor_id: u64,
    closed: bool,
}

impl<T> HubState<T> {
    fn next_seq(&self) -> u64 {
        self.head_seq + self.buffer.len() as u64
    }

    fn min_cursor(&self) -> Option<u64> {
        self.cursors.values().copied().min()
    }

    /// Drop front items that every subscriber has consumed and that fall
    /// outside the replay window.
    fn evict(&mut self, replay: usize) {
        let consumed_to = self.min_cursor().unwrap_or_else(|| self.next_seq());
        let replay_floor = self.next_seq().saturating_sub(replay as u64);
        let limit = consumed_to.min(replay_floor);
        while self.head_seq < limit && !self.buffer.is_empty() {
            self.buffer.pop_front();
            self.head_seq += 1;
        }
    }
}

/// Outcome of one non-blocking admission attempt
enum Admit<T> {
    /// Enqueued (or intentionally discarded under DropLatest)
    Done,
    /// Buffer full under Suspend; caller must wait for space
    MustWait(T),
    /// Zero-capacity hand-off: value enqueued at `seq`, caller must wait
    /// until every current subscriber has taken it
    Handoff(u64),
}

impl<T: Clone + Send + 'static> MulticastHub<T> {
    /// `replay` items are redelivered to new subscribers; `extra` is slack
    /// beyond replay before `policy` triggers. Total capacity 0 with a drop
    /// policy is rejected here, never at runtime.
    pub fn new(replay: usize, extra: usize, policy: OverflowPolicy) -> FlowResult<Self> {
        Self::with_config(HubConfig::new(replay, extra, policy))
    }

    pub fn with_config(config: HubConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self::unchecked(config))
    }

    pub(crate) fn unchecked(config: HubConfig) -> Self {
        Self {
            shared: Arc::new(HubShared {
                config,
                state: Mutex::new(HubState {
                    buffer: VecDeque::new(),
                    head_seq: 0,
                    cursors: HashMap::new(),
                    next_cursor_id: 0,
                    closed: false,
                }),
                values: Notify::new(),
                space: Notify::new(),
            }),
        }
    }

    /// Non-blocking admission shared by `emit` and `try_emit`. Caller holds
    /// the state lock; the returned flag says whether subscribers need waking.
    fn admit(&self, st: &mut HubState<T>, value: T) -> (Admit<T>, bool) {
        let cfg = &self.shared.config;
        st.evict(cfg.replay);
        if st.cursors.is_empty() {
            // No subscribers: never block, retain only the replay window.
            st.buffer.push_back(value);
            st.evict(cfg.replay);
            return (Admit::Done, false);
        }
        if st.buffer.len() < cfg.total() {
            st.buffer.push_back(value);
            return (Admit::Done, true);
        }
        match cfg.policy {
            OverflowPolicy::DropOldest => {
                st.buffer.pop_front();
                st.head_seq += 1;
                let head = st.head_seq;
                for cursor in st.cursors.values_mut() {
                    if *cursor < head {
                        *cursor = head;
                    }
                }
                st.buffer.push_back(value);
                log::trace!("hub buffer full, evicted oldest item");
                (Admit::Done, true)
            }
            OverflowPolicy::DropLatest => {
                log::trace!("hub buffer full, discarded new item");
                (Admit::Done, false)
            }
            OverflowPolicy::Suspend => {
                if cfg.total() == 0 {
                    let seq = st.next_seq();
                    st.buffer.push_back(value);
                    (Admit::Handoff(seq), true)
                } else {
                    (Admit::MustWait(value), false)
                }
            }
        }
    }

    /// Offer a value to the buffer. Under Suspend this blocks until space
    /// frees (or, at zero capacity, until every current subscriber has taken
    /// the value); the drop policies never block. Fails once the hub is
    /// closed.
    pub async fn emit(&self, value: T) -> FlowResult<()> {
        let mut pending = Some(value);
        let mut handoff: Option<u64> = None;
        loop {
            let mut notified = None;
            let mut wake_subscribers = false;
            let done = {
                let mut st = self.shared.lock();
                if st.closed {
                    return Err(FlowError::Cancelled);
                }
                match handoff {
                    Some(seq) => {
                        st.evict(self.shared.config.replay);
                        if st.head_seq > seq {
                            handoff = None;
                        }
                    }
                    None => {
                        let value = pending.take().expect("value pending until admitted");
                        match self.admit(&mut st, value) {
                            (Admit::Done, wake) => wake_subscribers = wake,
                            (Admit::Handoff(seq), wake) => {
                                wake_subscribers = wake;
                                handoff = Some(seq);
                            }
                            (Admit::MustWait(value), _) => pending = Some(value),
                        }
                    }
                }
                let done = pending.is_none() && handoff.is_none();
                if !done {
                    // Register interest in space before releasing the lock so
                    // a consumer's wakeup cannot slip between check and await.
                    let mut n = Box::pin(self.shared.space.notified());
                    n.as_mut().enable();
                    notified = Some(n);
                }
                done
            };
            if wake_subscribers {
                self.shared.values.notify_waiters();
            }
            if done {
                return Ok(());
            }
            if let Some(n) = notified {
                n.await;
            }
        }
    }

    /// Non-suspending emit. Returns `false` when a Suspend-policy buffer
    /// would have to block, or when the hub is closed.
    pub fn try_emit(&self, value: T) -> bool {
        let mut wake_subscribers = false;
        let accepted = {
            let mut st = self.shared.lock();
            if st.closed {
                false
            } else {
                match self.admit(&mut st, value) {
                    (Admit::Done, wake) => {
                        wake_subscribers = wake;
                        true
                    }
                    (Admit::Handoff(seq), _) => {
                        // Cannot wait for the hand-off; withdraw the value.
                        let idx = (seq - st.head_seq) as usize;
                        st.buffer.remove(idx);
                        false
                    }
                    (Admit::MustWait(_), _) => false,
                }
            }
        };
        if wake_subscribers {
            self.shared.values.notify_waiters();
        }
        accepted
    }

    /// A flow of future values, preceded by up to `replay` retained items.
    /// Each materialization registers an independent delivery cursor.
    pub fn subscribe(&self) -> Flow<T> {
        let shared = Arc::clone(&self.shared);
        Flow::from_source(Arc::new(move || cursor_stream(Arc::clone(&shared))))
    }

    /// Stop accepting emissions; subscribers drain what is buffered for them
    /// and complete.
    pub fn close(&self) {
        {
            let mut st = self.shared.lock();
            st.closed = true;
        }
        log::debug!("hub closed");
        self.shared.values.notify_waiters();
        self.shared.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().cursors.len()
    }
}

/// Removes the cursor when a subscriber goes away, releasing retained items
/// and any emitter suspended on this subscriber.
struct CursorGuard<T> {
    shared: Arc<HubShared<T>>,
    id: u64,
}

impl<T> Drop for CursorGuard<T> {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock();
            st.cursors.remove(&self.id);
            st.evict(self.shared.config.replay);
        }
        log::debug!("hub subscriber {} unregistered", self.id);
        self.shared.space.notify_waiters();
    }
}

fn cursor_stream<T: Clone + Send + 'static>(shared: Arc<HubShared<T>>) -> FlowStream<T> {
    stream! {
        let id = {
            let mut st = shared.lock();
            let id = st.next_cursor_id;
            st.next_cursor_id += 1;
            let replay_start = st.next_seq().saturating_sub(shared.config.replay as u64);
            let start = replay_start.max(st.head_seq);
            st.cursors.insert(id, start);
            log::debug!("hub subscriber {} registered at seq {}", id, start);
            id
        };
        let _guard = CursorGuard { shared: Arc::clone(&shared), id };
        loop {
            let mut notified = None;
            let item = {
                let mut st = shared.lock();
                let cursor = *st.cursors.get(&id).expect("cursor registered above");
                if cursor < st.next_seq() {
                    let idx = (cursor - st.head_seq) as usize;
                    let value = st.buffer[idx].clone();
                    st.cursors.insert(id, cursor + 1);
                    st.evict(shared.config.replay);
                    Some(value)
                } else if st.closed {
                    break;
                } else {
                    let mut n = Box::pin(shared.values.notified());
                    n.as_mut().enable();
                    notified = Some(n);
                    None
                }
            };
            match item {
                Some(value) => {
                    // Consuming may have freed a slot for a suspended emitter.
                    shared.space.notify_waiters();
                    yield Ok(value);
                }
                None => {
                    if let Some(n) = notified {
                        n.await;
                    }
                }
            }
        }
    }
    .boxed()
}
