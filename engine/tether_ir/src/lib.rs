//! Tether IR - foundation types shared by the binding engine crates.
//!
//! Nothing in here knows about evaluation. The crate provides:
//!
//! - [`Arena`] / [`Handle`]: generational slot storage. Every engine entity
//!   (context, expression, guard, notifier) lives in one and is addressed by
//!   a handle that goes stale when the slot is freed.
//! - [`Name`] / [`StringInterner`]: interned identifiers for scope lookups.
//! - [`Value`] / [`ValueKind`]: the tagged result of a compiled function.
//! - [`ObjectId`], [`PropertyIndex`], [`NotifyIndex`]: opaque references
//!   into the host's object model.
//! - [`SourceLocation`]: url/line/column of a compiled function.

mod arena;
mod ids;
mod interner;
mod location;
mod name;
mod value;

pub use arena::{Arena, Handle};
pub use ids::{NotifyIndex, ObjectId, PropertyIndex};
pub use interner::StringInterner;
pub use location::SourceLocation;
pub use name::Name;
pub use value::{Value, ValueKind};
