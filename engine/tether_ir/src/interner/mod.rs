//! String interner for scope names.
//!
//! Single-threaded: the engine that owns it is never shared across threads,
//! so interior mutability is a `RefCell` rather than a lock.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::Name;

#[derive(Default)]
struct InternTable {
    map: FxHashMap<Rc<str>, Name>,
    strings: Vec<Rc<str>>,
}

/// Maps strings to compact [`Name`]s and back.
pub struct StringInterner {
    table: RefCell<InternTable>,
}

impl StringInterner {
    /// Create an interner with the empty string pre-interned as [`Name::EMPTY`].
    pub fn new() -> Self {
        let empty: Rc<str> = Rc::from("");
        let mut table = InternTable::default();
        table.map.insert(Rc::clone(&empty), Name::EMPTY);
        table.strings.push(empty);
        StringInterner {
            table: RefCell::new(table),
        }
    }

    /// Intern `s`, returning the existing name if it was seen before.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct strings are interned.
    pub fn intern(&self, s: &str) -> Name {
        if let Some(&name) = self.table.borrow().map.get(s) {
            return name;
        }
        let mut table = self.table.borrow_mut();
        let index = u32::try_from(table.strings.len())
            .unwrap_or_else(|_| panic!("interner exceeded {} strings", u32::MAX));
        let name = Name::from_index(index);
        let owned: Rc<str> = Rc::from(s);
        table.strings.push(Rc::clone(&owned));
        table.map.insert(owned, name);
        name
    }

    /// Look up a string without interning it.
    pub fn get(&self, s: &str) -> Option<Name> {
        self.table.borrow().map.get(s).copied()
    }

    /// Resolve a name back to its string.
    ///
    /// Returns the empty string for names this interner never issued.
    pub fn lookup(&self, name: Name) -> Rc<str> {
        let table = self.table.borrow();
        table
            .strings
            .get(name.index())
            .map_or_else(|| Rc::clone(&table.strings[0]), Rc::clone)
    }

    /// Number of interned strings, including the empty string.
    pub fn len(&self) -> usize {
        self.table.borrow().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        // The empty string is always present.
        false
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}
