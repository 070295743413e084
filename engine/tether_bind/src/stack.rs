//! Stack growth for recursive scope-tree walks and nested evaluation.
//!
//! A scope tree mirrors the host's object tree, so its depth is set by user
//! content rather than by the engine. Teardown and refresh walk it with one
//! native frame per level, and nested delegates can stack contexts far
//! deeper than the default thread stack allows.
//!
//! Evaluation nests the same way. A compiled function that reads a property
//! can trigger another binding's evaluation, which reads the next property,
//! so a long chain of bindings stacks one function call per link. Each call
//! site wraps its step so the stack grows before the host's frames run out.
//!
//! On wasm32 the runtime owns the stack and the wrapper is a plain call.

/// Grow the stack when less than this remains (100KB).
#[cfg(not(target_arch = "wasm32"))]
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment (1MB).
#[cfg(not(target_arch = "wasm32"))]
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
