//! Module definitions.
//!
//! A [`ModuleDef`] is the immutable result of configuring one module: its
//! services, decorators, advisors and optional builder constructor. Definitions
//! are produced by [`ModuleDefBuilder::finish`](crate::ModuleDefBuilder::finish)
//! and consumed by the [`RegistryBuilder`](crate::RegistryBuilder).

use std::fmt;
use std::sync::Arc;

use crate::descriptors::{AdvisorDef, DecoratorDef, ServiceDef};
use crate::error::IocResult;
use crate::key::{AnyArc, ServiceId};
use crate::provider::ModuleResources;

pub(crate) type BuilderCtor = Arc<dyn Fn(&ModuleResources) -> IocResult<AnyArc> + Send + Sync>;

/// Constructor of a module's builder object.
#[derive(Clone)]
pub(crate) struct BuilderDef {
    pub(crate) type_name: &'static str,
    pub(crate) ctor: BuilderCtor,
}

/// Everything one module contributes to a registry.
#[derive(Clone)]
pub struct ModuleDef {
    pub(crate) module_id: String,
    pub(crate) services: Vec<Arc<ServiceDef>>,
    pub(crate) decorators: Vec<Arc<DecoratorDef>>,
    pub(crate) advisors: Vec<Arc<AdvisorDef>>,
    pub(crate) builder: Option<BuilderDef>,
}

impl ModuleDef {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Looks up a service by case-insensitive id.
    pub fn service(&self, service_id: &str) -> Option<&Arc<ServiceDef>> {
        self.services
            .iter()
            .find(|def| def.service_id.matches(service_id))
    }

    /// Ids of the module's services, in definition order.
    pub fn service_ids(&self) -> Vec<&ServiceId> {
        self.services.iter().map(|def| &def.service_id).collect()
    }

    pub fn services(&self) -> &[Arc<ServiceDef>] {
        &self.services
    }

    pub fn decorators(&self) -> &[Arc<DecoratorDef>] {
        &self.decorators
    }

    pub fn advisors(&self) -> &[Arc<AdvisorDef>] {
        &self.advisors
    }

    /// Type name of the module builder object, if the module has one.
    pub fn builder_type(&self) -> Option<&'static str> {
        self.builder.as_ref().map(|builder| builder.type_name)
    }
}

impl fmt::Debug for ModuleDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDef")
            .field("module_id", &self.module_id)
            .field("services", &self.service_ids())
            .field("decorators", &self.decorators.len())
            .field("advisors", &self.advisors.len())
            .field("builder", &self.builder_type())
            .finish()
    }
}
