//! Testing utilities for the binding engine.
//!
//! - **host**: [`TestHost`], an in-memory object model implementing
//!   [`Reflection`](crate::Reflection)
//! - **script**: closures as compiled functions, and a provider that
//!   "compiles" registered source strings
//! - **harness**: one-call engine setup with buffered warnings
//!
//! # Usage
//!
//! ```ignore
//! use tether_bind::testing::{script, TestBench};
//!
//! let bench = TestBench::new();
//! let a = bench.host.add_object("Item");
//! let x = bench.host.add_property(a, "x", Value::Int(1));
//! let expr = bench
//!     .engine
//!     .create_expression(bench.root, None, script(move |cx, _, _| Ok(cx.read(a, x))))?;
//! assert_eq!(bench.engine.evaluate(expr).value, Value::Int(1));
//! ```

pub mod harness;
pub mod host;
pub mod script;

pub use harness::TestBench;
pub use host::{PropertyKind, TestHost};
pub use script::{script, script_at, ScriptProvider};
