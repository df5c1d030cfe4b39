//! Execution placement for producer-side work
//!
//! A `Dispatcher` decides where the stages upstream of a `flow_on` operator
//! run. It is a pure placement directive: ordering and values are unaffected.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default)]
pub enum Dispatcher {
    /// Run on the subscriber's own task (no hand-off)
    Inline,
    /// Spawn onto the ambient tokio runtime
    #[default]
    Task,
    /// Spawn onto an explicit runtime handle
    Handle(Handle),
}

impl Dispatcher {
    /// Spawn `fut` according to this dispatcher. Returns `None` for `Inline`,
    /// which callers treat as "keep the work where it is".
    pub(crate) fn spawn<F>(&self, fut: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Dispatcher::Inline => None,
            Dispatcher::Task => Some(tokio::spawn(fut)),
            Dispatcher::Handle(handle) => Some(handle.spawn(fut)),
        }
    }
}
