//! Combinator engine: build flows from multiple input flows
//!
//! Ordering across `merge` and `flat_map_merge` is arrival order, not source
//! declaration order, and is explicitly nondeterministic across runs. A
//! failure in any input fails the combined flow once and cancels the remaining
//! inputs at their next suspension point.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::stream;
use futures_core::Stream;
use futures_util::{pin_mut, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::{mpsc, Semaphore};

use crate::error::{FlowError, FlowResult};
use crate::flow::{Flow, FlowStream};

/// Forward channel items downstream, stopping after the first failure so the
/// terminal signal is delivered exactly once and remaining producers are
/// cancelled when their next send fails.
fn drain_until_failure<T: Send + 'static>(rx: mpsc::Receiver<FlowResult<T>>) -> FlowStream<T> {
    stream! {
        let mut rx = rx;
        while let Some(item) = rx.recv().await {
            let failed = item.is_err();
            yield item;
            if failed {
                break;
            }
        }
    }
    .boxed()
}

/// Interleave values from all sources in arrival order. Completes once every
/// source has completed; the first failure fails the merged flow and cancels
/// the rest.
pub fn merge<T: Send + 'static>(flows: Vec<Flow<T>>) -> Flow<T> {
    Flow::from_source(Arc::new(move || {
        let (tx, rx) = mpsc::channel::<FlowResult<T>>(16);
        for flow in flows.iter().cloned() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let s = flow.into_stream();
                pin_mut!(s);
                while let Some(item) = s.next().await {
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() {
                        log::trace!("merge output gone, stopping source");
                        break;
                    }
                    if failed {
                        break;
                    }
                }
            });
        }
        drain_until_failure(rx)
    }))
}

pin_project! {
    /// Lock-step pairing of two sources. A slot is pulled only when empty, so
    /// once the shorter source completes the longer one is not consumed past
    /// its last paired element.
    struct Zip<S1, S2, A, B, F> {
        #[pin]
        s1: S1,
        #[pin]
        s2: S2,
        left: Option<A>,
        right: Option<B>,
        f: F,
        done: bool,
    }
}

impl<S1, S2, A, B, O, F> Stream for Zip<S1, S2, A, B, F>
where
    S1: Stream<Item = FlowResult<A>>,
    S2: Stream<Item = FlowResult<B>>,
    F: FnMut(A, B) -> O,
{
    type Item = FlowResult<O>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        if this.left.is_none() {
            match this.s1.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(v))) => *this.left = Some(v),
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }
        }

        if this.right.is_none() {
            match this.s2.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(v))) => *this.right = Some(v),
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {}
            }
        }

        if this.left.is_some() && this.right.is_some() {
            let a = this.left.take().expect("left slot checked");
            let b = this.right.take().expect("right slot checked");
            return Poll::Ready(Some(Ok((this.f)(a, b))));
        }

        Poll::Pending
    }
}

/// Pull one value from each source per step and combine them. Completes as
/// soon as the shorter source completes; the longer source is cancelled.
pub fn zip<A, B, O, F>(a: Flow<A>, b: Flow<B>, f: F) -> Flow<O>
where
    A: Send + 'static,
    B: Send + 'static,
    O: Send + 'static,
    F: Fn(A, B) -> O + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        Zip {
            s1: a.clone().into_stream(),
            s2: b.clone().into_stream(),
            left: None,
            right: None,
            f: move |x, y| f(x, y),
            done: false,
        }
        .boxed()
    }))
}

/// Re-emit `f` over the latest value of each source whenever either produces
/// a new one. Emission starts once both sources have produced at least one
/// value; each slot is conflated to its source's latest value. Completes when
/// both sources have completed.
pub fn combine<A, B, O, F>(a: Flow<A>, b: Flow<B>, f: F) -> Flow<O>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(A, B) -> O + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let a = a.conflate();
    let b = b.conflate();
    Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        let sa = a.clone().into_stream();
        let sb = b.clone().into_stream();
        stream! {
            pin_mut!(sa);
            pin_mut!(sb);
            let mut latest_a: Option<A> = None;
            let mut latest_b: Option<B> = None;
            let mut done_a = false;
            let mut done_b = false;
            loop {
                if done_a && done_b {
                    break;
                }
                tokio::select! {
                    item = sa.next(), if !done_a => match item {
                        Some(Ok(v)) => {
                            latest_a = Some(v);
                            if let (Some(x), Some(y)) = (&latest_a, &latest_b) {
                                yield Ok(f(x.clone(), y.clone()));
                            }
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => done_a = true,
                    },
                    item = sb.next(), if !done_b => match item {
                        Some(Ok(v)) => {
                            latest_b = Some(v);
                            if let (Some(x), Some(y)) = (&latest_a, &latest_b) {
                                yield Ok(f(x.clone(), y.clone()));
                            }
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => done_b = true,
                    },
                }
            }
        }
        .boxed()
    }))
}

/// Three-source `combine`
pub fn combine3<A, B, C, O, F>(a: Flow<A>, b: Flow<B>, c: Flow<C>, f: F) -> Flow<O>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
    O: Send + 'static,
    F: Fn(A, B, C) -> O + Send + Sync + 'static,
{
    let f = Arc::new(f);
    combine(
        combine(a, b, |x, y| (x, y)),
        c,
        move |(x, y), z| f(x, y, z),
    )
}

/// Subscribe and fully drain one inner flow per outer value, strictly in
/// outer-arrival order. The next inner flow is not started until the current
/// one completes.
pub fn flat_map_concat<T, U, F>(outer: Flow<T>, f: F) -> Flow<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        let outer = outer.clone().into_stream();
        stream! {
            pin_mut!(outer);
            'outer: while let Some(item) = outer.next().await {
                match item {
                    Ok(v) => {
                        let inner = f(v).into_stream();
                        pin_mut!(inner);
                        while let Some(inner_item) = inner.next().await {
                            let failed = inner_item.is_err();
                            yield inner_item;
                            if failed {
                                break 'outer;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break 'outer;
                    }
                }
            }
        }
        .boxed()
    }))
}

/// Run up to `limit` inner flows concurrently (unbounded when `None`),
/// delivering their values in arrival order. A completed inner flow frees a
/// slot for the next pending outer value. A limit of 0 could never admit an
/// inner flow, so it is a configuration error.
pub fn flat_map_merge<T, U, F>(
    outer: Flow<T>,
    limit: Option<usize>,
    f: F,
) -> FlowResult<Flow<U>>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync + 'static,
{
    if limit == Some(0) {
        return Err(FlowError::Config(
            "flat_map_merge concurrency limit must be positive".to_string(),
        ));
    }
    let f = Arc::new(f);
    Ok(Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        let outer = outer.clone();
        let (tx, rx) = mpsc::channel::<FlowResult<U>>(16);
        tokio::spawn(async move {
            let sem = Arc::new(Semaphore::new(limit.unwrap_or(Semaphore::MAX_PERMITS)));
            let s = outer.into_stream();
            pin_mut!(s);
            loop {
                // Admission first: the next outer value stays pending until
                // an inner slot frees.
                let permit = match Arc::clone(&sem).acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                match s.next().await {
                    Some(Ok(v)) => {
                        let tx = tx.clone();
                        let inner = f(v).into_stream();
                        tokio::spawn(async move {
                            let _slot = permit;
                            pin_mut!(inner);
                            while let Some(item) = inner.next().await {
                                let failed = item.is_err();
                                if tx.send(item).await.is_err() {
                                    break;
                                }
                                if failed {
                                    break;
                                }
                            }
                        });
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    None => break,
                }
            }
        });
        drain_until_failure(rx)
    })))
}

async fn next_inner<U>(inner: &mut Option<FlowStream<U>>) -> Option<FlowResult<U>> {
    match inner {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

/// On each new outer value, cancel the running inner flow and switch to the
/// new one. Only the most recent inner flow's values are delivered.
pub fn flat_map_latest<T, U, F>(outer: Flow<T>, f: F) -> Flow<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> Flow<U> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        let outer = outer.clone().into_stream();
        stream! {
            pin_mut!(outer);
            let mut inner: Option<FlowStream<U>> = None;
            let mut outer_done = false;
            loop {
                if outer_done && inner.is_none() {
                    break;
                }
                tokio::select! {
                    item = outer.next(), if !outer_done => match item {
                        Some(Ok(v)) => {
                            if inner.is_some() {
                                log::trace!("new outer value, cancelling running inner flow");
                            }
                            // Dropping the previous stream cancels its
                            // producer at the next suspension point.
                            inner = Some(f(v).into_stream());
                        }
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => outer_done = true,
                    },
                    item = next_inner(&mut inner), if inner.is_some() => match item {
                        Some(Ok(v)) => yield Ok(v),
                        Some(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        None => inner = None,
                    },
                }
            }
        }
        .boxed()
    }))
}

impl<T: Send + 'static> Flow<T> {
    /// Interleave with another flow of the same type
    pub fn merge_with(self, other: Flow<T>) -> Flow<T> {
        merge(vec![self, other])
    }

    /// See [`zip`]
    pub fn zip_with<B, O, F>(self, other: Flow<B>, f: F) -> Flow<O>
    where
        B: Send + 'static,
        O: Send + 'static,
        F: Fn(T, B) -> O + Send + Sync + 'static,
    {
        zip(self, other, f)
    }

    /// See [`combine`]
    pub fn combine_with<B, O, F>(self, other: Flow<B>, f: F) -> Flow<O>
    where
        T: Clone,
        B: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(T, B) -> O + Send + Sync + 'static,
    {
        combine(self, other, f)
    }

    /// See [`flat_map_concat`]
    pub fn flat_map_concat<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        flat_map_concat(self, f)
    }

    /// See [`flat_map_merge`]
    pub fn flat_map_merge<U, F>(self, limit: Option<usize>, f: F) -> FlowResult<Flow<U>>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        flat_map_merge(self, limit, f)
    }

    /// See [`flat_map_latest`]
    pub fn flat_map_latest<U, F>(self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Flow<U> + Send + Sync + 'static,
    {
        flat_map_latest(self, f)
    }
}
