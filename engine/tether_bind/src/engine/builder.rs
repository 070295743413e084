//! `EngineBuilder` for assembling an [`Engine`] from its collaborators.

use std::cell::RefCell;
use std::rc::Rc;

use tether_diagnostic::{DeferredErrorLog, WarningSink};
use tether_ir::{Arena, StringInterner, Value};
use url::Url;

use super::{Engine, EngineState};
use crate::config::EngineConfig;
use crate::guard::GuardPool;
use crate::host::{FunctionProvider, Reflection};

/// Builder for [`Engine`].
///
/// Only the reflection layer is required. Without a function provider,
/// expressions must be created from already compiled functions.
pub struct EngineBuilder {
    reflection: Rc<dyn Reflection>,
    provider: Option<Rc<dyn FunctionProvider>>,
    warnings: WarningSink,
    global: Value,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(reflection: Rc<dyn Reflection>) -> Self {
        EngineBuilder {
            reflection,
            provider: None,
            warnings: WarningSink::default(),
            global: Value::Undefined,
            config: EngineConfig::default(),
        }
    }

    /// Set the compiler used for expressions created from source text.
    #[must_use]
    pub fn function_provider(mut self, provider: Rc<dyn FunctionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set where unbatched errors and diagnostic lines go.
    ///
    /// Default is [`WarningSink::Log`].
    #[must_use]
    pub fn warnings(mut self, sink: WarningSink) -> Self {
        self.warnings = sink;
        self
    }

    /// Set the fallback "this" value.
    #[must_use]
    pub fn global_object(mut self, global: Value) -> Self {
        self.global = global;
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: Url) -> Self {
        self.config.base_url = Some(url);
        self
    }

    #[must_use]
    pub fn max_creation_depth(mut self, depth: usize) -> Self {
        self.config.max_creation_depth = depth;
        self
    }

    #[must_use]
    pub fn guard_pool_capacity(mut self, capacity: usize) -> Self {
        self.config.guard_pool_capacity = capacity;
        self
    }

    #[must_use]
    pub fn report_non_notifiable(mut self, report: bool) -> Self {
        self.config.report_non_notifiable = report;
        self
    }

    pub fn build(self) -> Engine {
        let guards = GuardPool::with_capacity(self.config.guard_pool_capacity);
        tracing::debug!(config = ?self.config, "engine created");
        Engine {
            state: Rc::new(EngineState {
                reflection: self.reflection,
                provider: self.provider,
                warnings: self.warnings,
                interner: StringInterner::new(),
                global: self.global,
                contexts: RefCell::new(Arena::new()),
                expressions: RefCell::new(Arena::new()),
                guards: RefCell::new(guards),
                notifiers: RefCell::new(Arena::new()),
                errors: RefCell::new(DeferredErrorLog::new()),
                object_contexts: RefCell::default(),
                roots_in_creation: RefCell::default(),
                config: self.config,
            }),
        }
    }
}
