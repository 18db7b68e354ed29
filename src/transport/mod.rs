//! Outbound OneBot API transport
//!
//! This module handles:
//! - The transport trait the orchestrator talks to
//! - The HTTP implementation against a OneBot API endpoint
//! - Fixed-delay retries for every outbound call

pub mod http;
pub mod retry;
pub mod traits;

pub use http::HttpTransport;
pub use retry::RetryPolicy;
pub use traits::{MessageTransport, SendRequest};
