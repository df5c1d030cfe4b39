//! flowkit - cold and hot asynchronous flows
//!
//! An in-process stream-processing core: cold flows that re-run their
//! producer per subscription, hot multicast hubs with bounded replay/overflow
//! buffers, a distinct-until-changed state cell, combinators (merge, zip,
//! combine, flatMap variants), and accumulators (reduce, fold, scan).

pub mod accumulators;
pub mod combinators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod hub;
pub mod scope;
pub mod state;

pub use accumulators::{fold, reduce, scan};
pub use combinators::{
    combine, combine3, flat_map_concat, flat_map_latest, flat_map_merge, merge, zip,
};
pub use config::{HubConfig, OverflowPolicy};
pub use dispatcher::Dispatcher;
pub use error::{FlowError, FlowResult};
pub use flow::{empty, failed, flow, from_iter, from_values, just, Emitter, Flow, FlowStream};
pub use hub::MulticastHub;
pub use scope::{Scope, Subscription};
pub use state::StateCell;
