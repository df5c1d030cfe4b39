//! Terminal and semi-terminal accumulation operators
//!
//! `reduce` and `fold` drive the flow to completion and resolve to a single
//! value; `scan` stays a flow, emitting the running accumulation.

use std::future::Future;
use std::sync::Arc;

use async_stream::stream;
use futures_util::pin_mut;
use futures_util::StreamExt;

use crate::error::{FlowError, FlowResult};
use crate::flow::Flow;

/// Fold every value into an accumulator starting from an explicit seed.
/// Valid for empty sources: the seed is returned unchanged.
pub async fn fold<T, A, F, Fut>(flow: Flow<T>, init: A, mut f: F) -> FlowResult<A>
where
    T: Send + 'static,
    A: Send + 'static,
    F: FnMut(A, T) -> Fut,
    Fut: Future<Output = A>,
{
    let s = flow.into_stream();
    pin_mut!(s);
    let mut acc = init;
    while let Some(item) = s.next().await {
        acc = f(acc, item?).await;
    }
    Ok(acc)
}

/// Combine all values with a binary operation, using the first value as the
/// seed. Fails with [`FlowError::EmptySource`] when the flow completes
/// without values.
pub async fn reduce<T, F, Fut>(flow: Flow<T>, mut f: F) -> FlowResult<T>
where
    T: Send + 'static,
    F: FnMut(T, T) -> Fut,
    Fut: Future<Output = T>,
{
    let s = flow.into_stream();
    pin_mut!(s);
    let mut acc = match s.next().await {
        Some(item) => item?,
        None => return Err(FlowError::EmptySource),
    };
    while let Some(item) = s.next().await {
        acc = f(acc, item?).await;
    }
    Ok(acc)
}

/// Emit the running accumulation after every input value. The first emission
/// is `f(seed, first)`; completion and failure mirror the source.
pub fn scan<T, A, F>(flow: Flow<T>, init: A, f: F) -> Flow<A>
where
    T: Send + 'static,
    A: Clone + Send + Sync + 'static,
    F: Fn(A, T) -> A + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Flow::from_source(Arc::new(move || {
        let f = Arc::clone(&f);
        let init = init.clone();
        let s = flow.clone().into_stream();
        stream! {
            pin_mut!(s);
            let mut acc = init;
            while let Some(item) = s.next().await {
                match item {
                    Ok(v) => {
                        acc = f(acc.clone(), v);
                        yield Ok(acc.clone());
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

impl<T: Send + 'static> Flow<T> {
    /// See [`fold`]
    pub async fn fold<A, F, Fut>(self, init: A, f: F) -> FlowResult<A>
    where
        A: Send + 'static,
        F: FnMut(A, T) -> Fut,
        Fut: Future<Output = A>,
    {
        fold(self, init, f).await
    }

    /// See [`reduce`]
    pub async fn reduce<F, Fut>(self, f: F) -> FlowResult<T>
    where
        F: FnMut(T, T) -> Fut,
        Fut: Future<Output = T>,
    {
        reduce(self, f).await
    }

    /// See [`scan`]
    pub fn scan<A, F>(self, init: A, f: F) -> Flow<A>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        scan(self, init, f)
    }
}
