//! Method advice for registry services.
//!
//! Advisors contribute [`MethodAdvice`] to the methods of matching services.
//! When at least one piece of advice was contributed, the realized service is
//! wrapped in an advised forwarding object whose methods run through an
//! [`AspectInterceptor`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::creator::{invoke_guarded, ObjectCreator};
use crate::descriptors::{AdvisorDef, ServiceDef};
use crate::error::{IocError, IocResult};
use crate::key::{AnyArc, ServiceId};
use crate::provider::ServiceResources;

/// Advice wrapped around a method invocation.
///
/// Implementations normally do some work, call [`MethodInvocation::proceed`] and
/// do some more. Advice that does not proceed must supply a return value with
/// [`MethodInvocation::set_return_value`].
///
/// Any `Fn(&mut MethodInvocation)` closure is advice.
pub trait MethodAdvice: Send + Sync {
    fn advise(&self, invocation: &mut MethodInvocation<'_>);
}

impl<F> MethodAdvice for F
where
    F: for<'a> Fn(&mut MethodInvocation<'a>) + Send + Sync,
{
    fn advise(&self, invocation: &mut MethodInvocation<'_>) {
        self(invocation)
    }
}

/// One call of an advised method, as seen by advice.
pub struct MethodInvocation<'a> {
    method: &'static str,
    service_id: &'a ServiceId,
    remaining: &'a [Arc<dyn MethodAdvice>],
    target: &'a mut dyn FnMut(&mut dyn Any),
    result: &'a mut dyn Any,
    started: Instant,
}

impl<'a> MethodInvocation<'a> {
    pub fn method_name(&self) -> &'static str {
        self.method
    }

    pub fn service_id(&self) -> &ServiceId {
        self.service_id
    }

    /// Time since the outermost advice started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Runs the rest of the advice chain and then the service method.
    ///
    /// The service method runs at most once per invocation; proceeding again
    /// has no effect.
    pub fn proceed(&mut self) {
        let current = self.remaining;
        match current.split_first() {
            Some((advice, rest)) => {
                self.remaining = rest;
                advice.advise(self);
                self.remaining = current;
            }
            None => (self.target)(&mut *self.result),
        }
    }

    /// The method's return value, once it is known and of type `R`.
    pub fn return_value<R: 'static>(&self) -> Option<&R> {
        self.result.downcast_ref::<Option<R>>()?.as_ref()
    }

    /// Replaces the return value. Returns false if `R` is not the method's return type.
    pub fn set_return_value<R: 'static>(&mut self, value: R) -> bool {
        match self.result.downcast_mut::<Option<R>>() {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }
}

/// Per-method advice chains for one service.
pub struct AspectInterceptor {
    service_id: ServiceId,
    advice: HashMap<&'static str, Vec<Arc<dyn MethodAdvice>>>,
}

impl AspectInterceptor {
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Names of the methods that carry advice.
    pub fn advised_methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.advice.keys().copied().collect();
        methods.sort_unstable();
        methods
    }

    /// Runs `method` through its advice chain. `result` is the `Option<R>` slot the
    /// target fills in.
    pub fn invoke(
        &self,
        method: &'static str,
        result: &mut dyn Any,
        target: &mut dyn FnMut(&mut dyn Any),
    ) {
        let chain = self.advice.get(method).map(Vec::as_slice).unwrap_or(&[]);
        if chain.is_empty() {
            target(result);
            return;
        }
        let mut invocation = MethodInvocation {
            method,
            service_id: &self.service_id,
            remaining: chain,
            target,
            result,
            started: Instant::now(),
        };
        invocation.proceed();
    }
}

impl fmt::Debug for AspectInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectInterceptor")
            .field("service_id", &self.service_id)
            .field("advised_methods", &self.advised_methods())
            .finish()
    }
}

/// Collects the advice an advisor contributes to one service.
///
/// Advice added first is outermost.
pub struct AdviceReceiver {
    service_id: ServiceId,
    methods: &'static [&'static str],
    advice: HashMap<&'static str, Vec<Arc<dyn MethodAdvice>>>,
}

impl AdviceReceiver {
    pub(crate) fn new(service_id: ServiceId, methods: &'static [&'static str]) -> Self {
        Self {
            service_id,
            methods,
            advice: HashMap::new(),
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Methods of the service interface.
    pub fn methods(&self) -> &'static [&'static str] {
        self.methods
    }

    /// Adds `advice` to every method of the service.
    pub fn advise_all_methods(&mut self, advice: Arc<dyn MethodAdvice>) {
        for method in self.methods {
            self.advice.entry(method).or_default().push(advice.clone());
        }
    }

    /// Adds `advice` to one method, failing if the interface has no such method.
    pub fn advise_method(&mut self, method: &str, advice: Arc<dyn MethodAdvice>) -> IocResult<()> {
        let name = self
            .methods
            .iter()
            .copied()
            .find(|candidate| *candidate == method)
            .ok_or_else(|| {
                IocError::Custom(format!(
                    "service '{}' has no method '{method}' (methods: {})",
                    self.service_id,
                    self.methods.join(", ")
                ))
            })?;
        self.advice.entry(name).or_default().push(advice);
        Ok(())
    }

    pub fn has_advice(&self) -> bool {
        !self.advice.is_empty()
    }

    pub(crate) fn into_interceptor(self) -> AspectInterceptor {
        AspectInterceptor {
            service_id: self.service_id,
            advice: self.advice,
        }
    }
}

/// Creator stage that applies matching advisors.
///
/// With no advisors the inner object is returned unchanged.
pub struct AdvisorStackBuilder {
    def: Arc<ServiceDef>,
    resources: ServiceResources,
    advisors: Vec<Arc<AdvisorDef>>,
    inner: Arc<dyn ObjectCreator>,
}

impl AdvisorStackBuilder {
    pub(crate) fn new(
        def: Arc<ServiceDef>,
        resources: ServiceResources,
        advisors: Vec<Arc<AdvisorDef>>,
        inner: Arc<dyn ObjectCreator>,
    ) -> Self {
        Self {
            def,
            resources,
            advisors,
            inner,
        }
    }
}

impl ObjectCreator for AdvisorStackBuilder {
    fn create_object(&self) -> IocResult<AnyArc> {
        let core = self.inner.create_object()?;
        if self.advisors.is_empty() {
            return Ok(core);
        }

        let service_id = &self.def.service_id;
        let kit = self.def.proxy.ok_or_else(|| {
            IocError::Configuration(format!(
                "service '{service_id}' cannot be advised because its interface is not proxiable"
            ))
        })?;

        let mut receiver = AdviceReceiver::new(service_id.clone(), kit.methods);
        for advisor in &self.advisors {
            let construct = format!("invoking advisor '{}'", advisor.id);
            invoke_guarded(service_id, &construct, || {
                (advisor.advise)(&self.resources, &mut receiver)
            })?;
        }

        if !receiver.has_advice() {
            return Ok(core);
        }

        tracing::debug!(
            service_id = %service_id,
            advisors = self.advisors.len(),
            "applying method advice"
        );
        kit.advised(&core, Arc::new(receiver.into_interceptor()))
            .ok_or_else(|| IocError::WrongInterface {
                service_id: service_id.to_string(),
                requested: kit.interface.name(),
                actual: self.def.interface.name(),
            })
    }
}

/// Advice that logs method entry, exit and timing through `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct LoggingAdvice {
    level: tracing::Level,
}

impl LoggingAdvice {
    pub fn new() -> Self {
        Self {
            level: tracing::Level::DEBUG,
        }
    }

    pub fn with_level(level: tracing::Level) -> Self {
        Self { level }
    }
}

impl Default for LoggingAdvice {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::ERROR => tracing::error!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            tracing::Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}

impl MethodAdvice for LoggingAdvice {
    fn advise(&self, invocation: &mut MethodInvocation<'_>) {
        let service_id = invocation.service_id().to_string();
        let method = invocation.method_name();
        log_at!(self.level, service_id = %service_id, method, "[ENTER]");
        invocation.proceed();
        let elapsed_ms = invocation.elapsed().as_secs_f64() * 1000.0;
        log_at!(self.level, service_id = %service_id, method, elapsed_ms, "[EXIT]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn interceptor(advice: Vec<Arc<dyn MethodAdvice>>) -> AspectInterceptor {
        let mut receiver = AdviceReceiver::new(ServiceId::new("Calc"), &["double", "halve"]);
        for a in advice {
            receiver.advise_method("double", a).unwrap();
        }
        receiver.into_interceptor()
    }

    fn call(interceptor: &AspectInterceptor, method: &'static str, input: i64) -> Option<i64> {
        let mut result: Option<i64> = None;
        interceptor.invoke(method, &mut result, &mut |slot: &mut dyn Any| {
            if let Some(slot) = slot.downcast_mut::<Option<i64>>() {
                *slot = Some(input * 2);
            }
        });
        result
    }

    #[test]
    fn advice_runs_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let outer_log = log.clone();
        let inner_log = log.clone();
        let outer: Arc<dyn MethodAdvice> = Arc::new(move |inv: &mut MethodInvocation<'_>| {
            outer_log.lock().push("outer>");
            inv.proceed();
            outer_log.lock().push("<outer");
        });
        let inner: Arc<dyn MethodAdvice> = Arc::new(move |inv: &mut MethodInvocation<'_>| {
            inner_log.lock().push("inner>");
            inv.proceed();
            inner_log.lock().push("<inner");
        });

        let interceptor = interceptor(vec![outer, inner]);
        assert_eq!(call(&interceptor, "double", 4), Some(8));
        assert_eq!(*log.lock(), vec!["outer>", "inner>", "<inner", "<outer"]);
    }

    #[test]
    fn advice_can_replace_the_return_value() {
        let advice: Arc<dyn MethodAdvice> = Arc::new(|inv: &mut MethodInvocation<'_>| {
            inv.proceed();
            let doubled = *inv.return_value::<i64>().unwrap();
            assert!(inv.set_return_value(doubled + 1));
            assert!(!inv.set_return_value("wrong type"));
        });
        let interceptor = interceptor(vec![advice]);
        assert_eq!(call(&interceptor, "double", 4), Some(9));
        assert_eq!(call(&interceptor, "halve", 4), Some(8));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut receiver = AdviceReceiver::new(ServiceId::new("Calc"), &["double"]);
        let err = receiver
            .advise_method("triple", Arc::new(LoggingAdvice::new()))
            .unwrap_err();
        assert!(err.to_string().contains("triple"));
        assert!(!receiver.has_advice());

        receiver.advise_all_methods(Arc::new(LoggingAdvice::new()));
        assert!(receiver.has_advice());
    }
}
