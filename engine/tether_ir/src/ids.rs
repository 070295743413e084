//! Opaque references into the host's object model.
//!
//! The engine never looks inside these. The host (through the reflection
//! layer) decides what an object or property index means.

use std::fmt;

/// Host object identity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        ObjectId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.0)
    }
}

/// Index of a property within its object's metadata.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct PropertyIndex(pub u32);

/// Handle identifying "the change notification for property N".
///
/// Several properties may share one notify index; a guard is wired to the
/// notify index, not to the property.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct NotifyIndex(pub u32);
