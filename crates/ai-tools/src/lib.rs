//! Execution tracing for behavior trees and environment queries.
//!
//! Events are plain data so they can be recorded during simulation and inspected by tests or
//! rendered by tooling afterwards.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod trace;

pub use trace::{
    emit, NullTraceSink, TraceEvent, TraceLog, TraceNode, TraceSink, VecTraceSink, TRACE_LOG,
    TRACE_SINK,
};
