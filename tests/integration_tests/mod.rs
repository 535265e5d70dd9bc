//! Integration tests module
//!
//! End-to-end scenarios across the queue, credential pool, liveness
//! registry and phase tracker.

pub mod fixtures;
pub mod phase_test;
pub mod pool_test;
pub mod queue_test;
pub mod worker_test;
