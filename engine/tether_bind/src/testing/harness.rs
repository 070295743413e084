//! One-call engine setup for tests.

use std::rc::Rc;

use tether_diagnostic::{BufferWarningSink, WarningSink};

use super::host::TestHost;
use super::script::ScriptProvider;
use crate::context::ContextId;
use crate::engine::{Engine, EngineBuilder};

/// An engine over a [`TestHost`] with a [`ScriptProvider`], buffered
/// warnings and one root context.
///
/// Set `RUST_LOG` to see the engine's tracing output while a test runs.
pub struct TestBench {
    pub engine: Engine,
    pub host: Rc<TestHost>,
    pub provider: Rc<ScriptProvider>,
    pub warnings: Rc<BufferWarningSink>,
    pub root: ContextId,
}

impl TestBench {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    /// Like [`new`](Self::new), with extra builder configuration.
    pub fn with(configure: impl FnOnce(EngineBuilder) -> EngineBuilder) -> Self {
        crate::init_tracing();
        let host = TestHost::new();
        let provider = ScriptProvider::new();
        let (sink, warnings) = WarningSink::buffer();
        let builder = Engine::builder(host.clone())
            .function_provider(provider.clone())
            .warnings(sink);
        let engine = configure(builder).build();
        let root = engine.create_root_context(None);
        TestBench {
            engine,
            host,
            provider,
            warnings,
            root,
        }
    }

    /// Descriptions of the errors reported so far.
    pub fn reported(&self) -> Vec<String> {
        self.warnings
            .errors()
            .into_iter()
            .map(|e| e.description)
            .collect()
    }
}

impl Default for TestBench {
    fn default() -> Self {
        Self::new()
    }
}
