//! Cold flow engine and operator pipeline
//!
//! A [`Flow`] is a declarative description of an asynchronous sequence: a
//! source factory plus a chain of operator stages. Nothing runs at definition
//! time; every materialization (`into_stream`, `subscribe`, a collect call)
//! re-runs the producer from its initial state, so concurrent subscriptions
//! share no state.
//!
//! On the wire a flow is a `BoxStream` of `FlowResult` items: `Ok` carries a
//! value, a single `Err` is the failure terminal, stream end is completion.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use futures_util::pin_mut;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::OverflowPolicy;
use crate::dispatcher::Dispatcher;
use crate::error::{FlowError, FlowResult};
use crate::scope::{cancelled, Scope, Subscription};

/// A boxed, heap-allocated stream of flow items
pub type FlowStream<T> = BoxStream<'static, FlowResult<T>>;

/// Handle passed to producer closures.
///
/// `emit` is a suspension point: the producer runs at most one element ahead
/// of the consumer and observes cancellation here, as `Err(Cancelled)`, once
/// the consumer is gone.
pub struct Emitter<T> {
    tx: mpsc::Sender<FlowResult<T>>,
}

impl<T: Send + 'static> Emitter<T> {
    pub async fn emit(&self, value: T) -> FlowResult<()> {
        self.tx
            .send(Ok(value))
            .await
            .map_err(|_| FlowError::Cancelled)
    }

    /// True once the subscription driving this producer has gone away.
    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One stage of a same-typed operator chain segment.
///
/// The chain is a closed set of variants traversed by the interpreter in
/// [`Flow::into_stream`]; a type-changing `map` closes the segment by fusing
/// source and chain into the next flow's source factory.
pub(crate) enum Operator<T> {
    OnEach(Arc<dyn Fn(&T) + Send + Sync>),
    Buffer {
        capacity: usize,
        policy: OverflowPolicy,
    },
    RedirectTo(Dispatcher),
}

impl<T> Clone for Operator<T> {
    fn clone(&self) -> Self {
        match self {
            Operator::OnEach(f) => Operator::OnEach(Arc::clone(f)),
            Operator::Buffer { capacity, policy } => Operator::Buffer {
                capacity: *capacity,
                policy: *policy,
            },
            Operator::RedirectTo(d) => Operator::RedirectTo(d.clone()),
        }
    }
}

/// A cold asynchronous sequence definition
pub struct Flow<T> {
    source: Arc<dyn Fn() -> FlowStream<T> + Send + Sync>,
    ops: Vec<Operator<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            ops: self.ops.clone(),
        }
    }
}

// ================================
// Constructors
// ================================

/// Create a cold flow from a producer closure.
///
/// The producer is re-invoked for every materialization. Raising an error
/// terminates the subscription with that error, delivered once.
///
/// # Examples
/// ```
/// use flowkit::flow;
///
/// # async fn example() {
/// let numbers = flow(|emitter| async move {
///     for n in 0..3 {
///         emitter.emit(n).await?;
///     }
///     Ok(())
/// });
/// assert_eq!(numbers.try_collect().await, Ok(vec![0, 1, 2]));
/// # }
/// ```
pub fn flow<T, F, Fut>(producer: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    let producer = Arc::new(producer);
    Flow::from_source(Arc::new(move || {
        let producer = Arc::clone(&producer);
        let (tx, rx) = mpsc::channel(1);
        let emitter = Emitter { tx: tx.clone() };
        tokio::spawn(async move {
            match producer(emitter).await {
                Ok(()) => {}
                Err(FlowError::Cancelled) => {
                    log::trace!("producer stopped at cancellation");
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        ReceiverStream::new(rx).boxed()
    }))
}

/// Create a cold flow from a cloneable iterator
pub fn from_iter<I>(iter: I) -> Flow<I::Item>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    Flow::from_source(Arc::new(move || {
        stream::iter(iter.clone().into_iter().map(Ok)).boxed()
    }))
}

/// Create a cold flow over a fixed set of values
pub fn from_values<T>(values: Vec<T>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    from_iter(values)
}

/// Emit a single value, then complete
pub fn just<T>(value: T) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    from_values(vec![value])
}

/// A flow that completes immediately without values
pub fn empty<T: Send + 'static>() -> Flow<T> {
    Flow::from_source(Arc::new(|| stream::empty().boxed()))
}

/// A flow that fails immediately with the given error
pub fn failed<T: Send + 'static>(error: FlowError) -> Flow<T> {
    Flow::from_source(Arc::new(move || {
        let error = error.clone();
        stream::once(async move { Err(error) }).boxed()
    }))
}

// ================================
// Operator pipeline
// ================================

impl<T: Send + 'static> Flow<T> {
    pub(crate) fn from_source(source: Arc<dyn Fn() -> FlowStream<T> + Send + Sync>) -> Self {
        Self {
            source,
            ops: Vec::new(),
        }
    }

    /// Transform each value. Starts a new chain segment: the current source
    /// and operators are fused into the returned flow's source factory.
    pub fn map<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Flow::from_source(Arc::new(move || {
            let f = Arc::clone(&f);
            self.clone()
                .into_stream()
                .map(move |r| r.map(|v| f(v)))
                .boxed()
        }))
    }

    /// Observe each value as it passes this point in the chain
    pub fn on_each<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.ops.push(Operator::OnEach(Arc::new(f)));
        self
    }

    /// Decouple producer and consumer with an explicit bounded queue.
    ///
    /// Under `Suspend` the producer blocks once the queue fills; under the
    /// drop policies it never blocks and the queue arbitrates. Capacity 0 with
    /// a drop policy is a configuration error: there is nothing to drop.
    ///
    /// `Suspend` with capacity 0 uses a single-slot hand-off: the producer
    /// runs at most one element ahead of the consumer, the same lookahead a
    /// bare producer has. Every value is still delivered in order.
    pub fn buffer(mut self, capacity: usize, policy: OverflowPolicy) -> FlowResult<Self> {
        if capacity == 0 && policy != OverflowPolicy::Suspend {
            return Err(FlowError::Config(format!(
                "buffer capacity is 0 but policy is {:?}",
                policy
            )));
        }
        self.ops.push(Operator::Buffer { capacity, policy });
        Ok(self)
    }

    /// Keep only the freshest unconsumed value: `buffer(1, DropOldest)`
    pub fn conflate(mut self) -> Self {
        self.ops.push(Operator::Buffer {
            capacity: 1,
            policy: OverflowPolicy::DropOldest,
        });
        self
    }

    /// Execute the stages upstream of this point on the given dispatcher.
    /// Pure placement: ordering and values are unchanged.
    pub fn flow_on(mut self, dispatcher: Dispatcher) -> Self {
        self.ops.push(Operator::RedirectTo(dispatcher));
        self
    }

    // ================================
    // Materialization
    // ================================

    /// Interpret the definition into a running stream. Each call starts an
    /// independent execution of the producer.
    pub fn into_stream(self) -> FlowStream<T> {
        let mut s = (self.source)();
        for op in self.ops {
            s = apply_operator(s, op);
        }
        s
    }

    /// Drive the flow on a spawned task, delivering values and exactly one
    /// terminal callback. Cancellation (scope or subscription handle) invokes
    /// neither `on_complete` nor `on_error`.
    pub fn subscribe<FV, FC, FE>(
        self,
        scope: &Scope,
        mut on_value: FV,
        on_complete: FC,
        on_error: FE,
    ) -> Subscription
    where
        FV: FnMut(T) + Send + 'static,
        FC: FnOnce() + Send + 'static,
        FE: FnOnce(FlowError) + Send + 'static,
    {
        let scope_rx = scope.signal();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut on_complete = Some(on_complete);
        let mut on_error = Some(on_error);
        let handle = tokio::spawn(async move {
            let stream = self.into_stream();
            pin_mut!(stream);
            let scope_cancelled = cancelled(scope_rx);
            let self_cancelled = cancelled(cancel_rx);
            pin_mut!(scope_cancelled);
            pin_mut!(self_cancelled);
            loop {
                tokio::select! {
                    _ = &mut scope_cancelled => {
                        log::debug!("subscription stopped by scope cancellation");
                        return;
                    }
                    _ = &mut self_cancelled => {
                        log::debug!("subscription cancelled");
                        return;
                    }
                    item = stream.next() => match item {
                        Some(Ok(v)) => on_value(v),
                        Some(Err(e)) => {
                            if let Some(f) = on_error.take() {
                                f(e);
                            }
                            return;
                        }
                        None => {
                            if let Some(f) = on_complete.take() {
                                f();
                            }
                            return;
                        }
                    }
                }
            }
        });
        Subscription::new(cancel_tx, handle)
    }

    /// Collect every value, or the first failure
    pub async fn try_collect(self) -> FlowResult<Vec<T>> {
        let stream = self.into_stream();
        pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item?);
        }
        Ok(out)
    }
}

// ================================
// Chain interpreter
// ================================

fn apply_operator<T: Send + 'static>(s: FlowStream<T>, op: Operator<T>) -> FlowStream<T> {
    match op {
        Operator::OnEach(cb) => s
            .map(move |r| {
                if let Ok(v) = &r {
                    cb(v);
                }
                r
            })
            .boxed(),
        Operator::Buffer { capacity, policy } => apply_buffer(s, capacity, policy),
        Operator::RedirectTo(dispatcher) => apply_redirect(s, dispatcher),
    }
}

/// Bridge upstream onto a dedicated queue so the producer only suspends per
/// the overflow policy, not on every downstream hand-off.
fn apply_buffer<T: Send + 'static>(
    s: FlowStream<T>,
    capacity: usize,
    policy: OverflowPolicy,
) -> FlowStream<T> {
    match policy {
        OverflowPolicy::Suspend => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            tokio::spawn(async move {
                pin_mut!(s);
                while let Some(item) = s.next().await {
                    if tx.send(item).await.is_err() {
                        log::trace!("buffer consumer gone, stopping producer bridge");
                        break;
                    }
                }
            });
            ReceiverStream::new(rx).boxed()
        }
        OverflowPolicy::DropOldest | OverflowPolicy::DropLatest => drop_bridge(s, capacity, policy),
    }
}

struct DropBridge<T> {
    queue: Mutex<VecDeque<FlowResult<T>>>,
    readable: Notify,
    done: AtomicBool,
    closed: AtomicBool,
}

/// Consumer-side guard: marks the bridge closed so the producer task stops at
/// its next suspension point.
struct DropBridgeGuard<T>(Arc<DropBridge<T>>);

impl<T> Drop for DropBridgeGuard<T> {
    fn drop(&mut self) {
        self.0.closed.store(true, Ordering::Release);
    }
}

fn drop_bridge<T: Send + 'static>(
    s: FlowStream<T>,
    capacity: usize,
    policy: OverflowPolicy,
) -> FlowStream<T> {
    let bridge = Arc::new(DropBridge {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        readable: Notify::new(),
        done: AtomicBool::new(false),
        closed: AtomicBool::new(false),
    });

    let writer = Arc::clone(&bridge);
    tokio::spawn(async move {
        pin_mut!(s);
        while let Some(item) = s.next().await {
            if writer.closed.load(Ordering::Acquire) {
                break;
            }
            let failed = item.is_err();
            {
                let mut q = writer.queue.lock().await;
                if failed || q.len() < capacity {
                    // A failure terminal is never dropped.
                    q.push_back(item);
                } else {
                    match policy {
                        OverflowPolicy::DropOldest => {
                            q.pop_front();
                            q.push_back(item);
                            log::trace!("buffer full, evicted oldest item");
                        }
                        OverflowPolicy::DropLatest => {
                            log::trace!("buffer full, discarded latest item");
                        }
                        OverflowPolicy::Suspend => unreachable!("handled by channel bridge"),
                    }
                }
            }
            writer.readable.notify_one();
            if failed {
                break;
            }
        }
        writer.done.store(true, Ordering::Release);
        writer.readable.notify_one();
    });

    stream! {
        let _guard = DropBridgeGuard(Arc::clone(&bridge));
        loop {
            let item = {
                let mut q = bridge.queue.lock().await;
                q.pop_front()
            };
            match item {
                Some(Ok(v)) => yield Ok(v),
                Some(Err(e)) => {
                    yield Err(e);
                    break;
                }
                None => {
                    if bridge.done.load(Ordering::Acquire) {
                        break;
                    }
                    bridge.readable.notified().await;
                }
            }
        }
    }
    .boxed()
}

fn apply_redirect<T: Send + 'static>(s: FlowStream<T>, dispatcher: Dispatcher) -> FlowStream<T> {
    if matches!(dispatcher, Dispatcher::Inline) {
        return s;
    }
    let (tx, rx) = mpsc::channel(1);
    let _ = dispatcher.spawn(async move {
        pin_mut!(s);
        while let Some(item) = s.next().await {
            if tx.send(item).await.is_err() {
                log::trace!("downstream gone, stopping redirected producer");
                break;
            }
        }
    });
    ReceiverStream::new(rx).boxed()
}
