//! Command orchestration
//!
//! This module handles:
//! - The descriptor model and its configuration form
//! - Resolving configured targets against the static catalog
//! - The shared registry and attribute edits on it
//! - Parameter resolution and the invocation boundary

pub mod attribute;
pub mod descriptor;
mod executor;
pub mod factory;
pub mod handlers;
pub mod registry;
pub mod resolver;

pub use descriptor::{AutoParams, CommandConfig, CommandKind, Descriptor, LivingParams};
pub use executor::CommandExecutor;
pub use factory::Catalog;
pub use registry::{CommandTable, Registry, SharedTable, TableChanges};
pub use resolver::CallContext;
