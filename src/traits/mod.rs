//! Core traits for the registry.

mod locator;
mod shutdown;

pub(crate) use locator::downcast_service;
pub use locator::{LocatedService, ServiceLocator, ServiceLocatorCore};
pub use shutdown::{EagerLoad, RegistryShutdownListener};
