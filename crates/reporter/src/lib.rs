//! Specstream Reporter
//!
//! Converts streaming, unordered test-runner notifications into a
//! well-formed, nested sequence of lifecycle lines in a service-message
//! protocol. The consumer parses strictly by line and must never see an
//! invalid state: child before parent, finish before start, duplicate ids.
//!
//! # Architecture
//!
//! ```text
//! runner events ──> RunController ──> Tree / nodes ──> message encoder ──> sink
//! ```
//!
//! The controller is the only entry point for events; the tree layer has no
//! timers and no I/O beyond the injected sink. Everything is synchronous
//! and single-threaded: line order equals call order.

pub mod controller;
pub mod coverage;
pub mod message;
pub mod tree;

pub use controller::{ReporterConfig, RunController, RunState};
pub use coverage::{CoverageDelegate, NoopCoverage};
pub use tree::{MessageSink, NodeId, Tree};
