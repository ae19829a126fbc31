//! Execution: sizing, transaction costs and two-leg order dispatch.
//!
//! Every signal is authorized by the risk manager and applied to the
//! portfolio under a single lock; orders leave through an
//! [`OrderDispatcher`].

pub mod cost;
pub mod engine;
pub mod order;

pub use cost::CostModel;
pub use engine::{
    size_legs, Book, ExecutionConfig, ExecutionEngine, ExecutionError, ExecutionOutcome,
    ExecutionReport, SkipReason,
};
pub use order::{DispatchError, Fill, OrderDispatcher, OrderKind, OrderRequest, PaperDispatcher};
