//! Inbound webhook intake
//!
//! The OneBot endpoint posts every event to `/`. Message events are handed
//! to the dispatcher; everything else is dropped. The answer is always an
//! empty 200.

mod server;

pub use server::serve;
