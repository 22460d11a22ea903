//! Side-effect function catalog and executor.
//!
//! The decider chooses functions by name; this crate owns what those names
//! mean: the declared catalog (exposed to the decider prompt), parameter
//! validation, and the pure transforms that produce a new mirrored-customer
//! snapshot from the old one.

pub mod catalog;
pub mod executor;

pub use catalog::{FunctionCatalog, FunctionDefinition, ParamSpec};
pub use executor::{replay_customer, ExecutionRecord, FunctionExecutor};
