//! In-memory host object model.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_ir::{NotifyIndex, ObjectId, PropertyIndex, Value};

use crate::engine::Engine;
use crate::host::{ObserveSink, Reflection};

/// How a test property announces changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    /// Notify-index path.
    Notifiable(NotifyIndex),
    /// Cannot be observed.
    Constant,
    /// Direct observe path.
    Bindable,
}

#[derive(Debug)]
struct TestProperty {
    name: String,
    value: Value,
    kind: PropertyKind,
}

#[derive(Debug)]
struct TestObject {
    class: String,
    properties: Vec<TestProperty>,
}

/// Objects with named properties, held in memory.
///
/// Reads are counted so tests can check what an evaluation touched.
#[derive(Debug, Default)]
pub struct TestHost {
    objects: RefCell<FxHashMap<ObjectId, TestObject>>,
    observers: RefCell<FxHashMap<(ObjectId, PropertyIndex), Vec<ObserveSink>>>,
    next_object: Cell<u64>,
    reads: Cell<usize>,
}

impl TestHost {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_object(&self, class: &str) -> ObjectId {
        let id = ObjectId::new(self.next_object.get() + 1);
        self.next_object.set(id.raw());
        self.objects.borrow_mut().insert(
            id,
            TestObject {
                class: class.to_owned(),
                properties: Vec::new(),
            },
        );
        id
    }

    /// Add a notifiable property. Its notify index equals its property index.
    pub fn add_property(&self, object: ObjectId, name: &str, value: Value) -> PropertyIndex {
        self.add_property_with(object, name, value, None)
    }

    /// Add a property that shares an existing notify index.
    pub fn add_property_sharing(
        &self,
        object: ObjectId,
        name: &str,
        value: Value,
        notify: NotifyIndex,
    ) -> PropertyIndex {
        self.add_property_with(object, name, value, Some(PropertyKind::Notifiable(notify)))
    }

    pub fn add_constant_property(
        &self,
        object: ObjectId,
        name: &str,
        value: Value,
    ) -> PropertyIndex {
        self.add_property_with(object, name, value, Some(PropertyKind::Constant))
    }

    pub fn add_bindable_property(
        &self,
        object: ObjectId,
        name: &str,
        value: Value,
    ) -> PropertyIndex {
        self.add_property_with(object, name, value, Some(PropertyKind::Bindable))
    }

    fn add_property_with(
        &self,
        object: ObjectId,
        name: &str,
        value: Value,
        kind: Option<PropertyKind>,
    ) -> PropertyIndex {
        let mut objects = self.objects.borrow_mut();
        let Some(target) = objects.get_mut(&object) else {
            panic!("unknown test object {object:?}");
        };
        let index = u32::try_from(target.properties.len()).unwrap_or(u32::MAX);
        target.properties.push(TestProperty {
            name: name.to_owned(),
            value,
            kind: kind.unwrap_or(PropertyKind::Notifiable(NotifyIndex(index))),
        });
        PropertyIndex(index)
    }

    pub fn get(&self, object: ObjectId, property: PropertyIndex) -> Value {
        self.with_property(object, property, |p| p.value.clone())
            .unwrap_or_default()
    }

    /// Write a property and announce the change to `engine`.
    pub fn set(&self, engine: &Engine, object: ObjectId, property: PropertyIndex, value: Value) {
        let kind = {
            let mut objects = self.objects.borrow_mut();
            let Some(slot) = objects
                .get_mut(&object)
                .and_then(|o| o.properties.get_mut(property.0 as usize))
            else {
                return;
            };
            slot.value = value;
            slot.kind
        };
        match kind {
            PropertyKind::Notifiable(notify) => {
                engine.notify_property(object, notify);
            }
            PropertyKind::Bindable => {
                let sinks = self
                    .observers
                    .borrow_mut()
                    .remove(&(object, property))
                    .unwrap_or_default();
                for sink in sinks {
                    engine.fire_observed(sink);
                }
            }
            PropertyKind::Constant => {}
        }
    }

    /// Destroy an object and tell the engine.
    pub fn destroy_object(&self, engine: &Engine, object: ObjectId) {
        self.objects.borrow_mut().remove(&object);
        self.observers
            .borrow_mut()
            .retain(|(owner, _), _| *owner != object);
        engine.object_destroyed(object);
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.borrow().contains_key(&object)
    }

    /// Number of property reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// Observations currently registered for a bindable property.
    pub fn observer_count(&self, object: ObjectId, property: PropertyIndex) -> usize {
        self.observers
            .borrow()
            .get(&(object, property))
            .map_or(0, Vec::len)
    }

    fn with_property<R>(
        &self,
        object: ObjectId,
        property: PropertyIndex,
        f: impl FnOnce(&TestProperty) -> R,
    ) -> Option<R> {
        let objects = self.objects.borrow();
        objects
            .get(&object)
            .and_then(|o| o.properties.get(property.0 as usize))
            .map(f)
    }
}

impl Reflection for TestHost {
    fn read(&self, object: ObjectId, property: PropertyIndex) -> Value {
        self.reads.set(self.reads.get() + 1);
        self.get(object, property)
    }

    fn notify_index(&self, object: ObjectId, property: PropertyIndex) -> Option<NotifyIndex> {
        match self.with_property(object, property, |p| p.kind)? {
            PropertyKind::Notifiable(notify) => Some(notify),
            PropertyKind::Constant | PropertyKind::Bindable => None,
        }
    }

    fn is_bindable_property(&self, object: ObjectId, property: PropertyIndex) -> bool {
        self.with_property(object, property, |p| p.kind) == Some(PropertyKind::Bindable)
    }

    fn observe(&self, object: ObjectId, property: PropertyIndex, sink: ObserveSink) {
        self.observers
            .borrow_mut()
            .entry((object, property))
            .or_default()
            .push(sink);
    }

    fn property_by_name(&self, object: ObjectId, name: &str) -> Option<PropertyIndex> {
        let objects = self.objects.borrow();
        let position = objects
            .get(&object)?
            .properties
            .iter()
            .position(|p| p.name == name)?;
        u32::try_from(position).ok().map(PropertyIndex)
    }

    fn describe_property(&self, object: ObjectId, property: PropertyIndex) -> String {
        let objects = self.objects.borrow();
        match objects.get(&object) {
            Some(o) => {
                let name = o
                    .properties
                    .get(property.0 as usize)
                    .map_or("<unknown>", |p| p.name.as_str());
                format!("{}::{name}", o.class)
            }
            None => format!("{object:?}::{}", property.0),
        }
    }

    fn write(
        &self,
        engine: &Engine,
        object: ObjectId,
        property: PropertyIndex,
        value: Value,
    ) -> bool {
        if self.with_property(object, property, |_| ()).is_none() {
            return false;
        }
        self.set(engine, object, property, value);
        true
    }
}
