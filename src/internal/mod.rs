//! Internal implementation details.

pub(crate) mod circular;
pub(crate) mod shutdown_hub;

pub(crate) use circular::{builder_key, service_key, ConstructionGuard, ConstructionLock};
pub(crate) use shutdown_hub::ShutdownHub;
