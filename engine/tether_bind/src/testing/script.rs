//! Closures as compiled functions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_ir::{SourceLocation, Value};

use crate::capture::CallContext;
use crate::context::ContextId;
use crate::host::{CompiledFunction, Exception, FunctionProvider};

type ScriptBody = dyn Fn(&mut CallContext<'_>, &Value, &[Value]) -> Result<Value, Exception>;

struct Script {
    body: Box<ScriptBody>,
    location: SourceLocation,
}

impl CompiledFunction for Script {
    fn call(
        &self,
        cx: &mut CallContext<'_>,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, Exception> {
        (self.body)(cx, this, args)
    }

    fn location(&self) -> SourceLocation {
        self.location.clone()
    }
}

/// Wrap a closure as a compiled function with an unknown location.
pub fn script<F>(body: F) -> Rc<dyn CompiledFunction>
where
    F: Fn(&mut CallContext<'_>, &Value, &[Value]) -> Result<Value, Exception> + 'static,
{
    script_at(SourceLocation::unknown(), body)
}

/// Wrap a closure as a compiled function at `location`.
pub fn script_at<F>(location: SourceLocation, body: F) -> Rc<dyn CompiledFunction>
where
    F: Fn(&mut CallContext<'_>, &Value, &[Value]) -> Result<Value, Exception> + 'static,
{
    Rc::new(Script {
        body: Box::new(body),
        location,
    })
}

/// Function provider backed by a table of registered sources.
///
/// Compiling an unregistered source fails with a syntax error.
#[derive(Default)]
pub struct ScriptProvider {
    scripts: RefCell<FxHashMap<String, Rc<dyn CompiledFunction>>>,
    compiled: Cell<usize>,
}

impl ScriptProvider {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn register(&self, source: &str, function: Rc<dyn CompiledFunction>) {
        self.scripts.borrow_mut().insert(source.to_owned(), function);
    }

    /// Number of successful compilations.
    pub fn compiled(&self) -> usize {
        self.compiled.get()
    }
}

impl FunctionProvider for ScriptProvider {
    fn compile(
        &self,
        source: &str,
        location: &SourceLocation,
        _scope: ContextId,
    ) -> Result<Rc<dyn CompiledFunction>, Exception> {
        let function = self.scripts.borrow().get(source).cloned();
        match function {
            Some(function) => {
                self.compiled.set(self.compiled.get() + 1);
                Ok(function)
            }
            None => Err(Exception::new(format!("SyntaxError: unexpected token in `{source}`"))
                .at(location.clone())),
        }
    }
}
