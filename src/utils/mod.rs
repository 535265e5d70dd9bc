//! Common utilities shared by the worker runtime and the CLI

pub mod retry;

pub use retry::{with_retry, with_retry_if, RetryConfig};
