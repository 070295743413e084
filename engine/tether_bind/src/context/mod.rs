//! Scope tree.
//!
//! Each [`ContextNode`] owns its children (by handle), lists the
//! expressions created against it, owns named entries backed by
//! notifiers, and records the host objects installed into it.
//!
//! # Teardown
//!
//! `invalidate` walks children before touching the node itself:
//!
//! ```text
//! invalidate(node)
//!   for child in children:  owned-by-parent → destroy, else → invalidate
//!   fire destruction observers           (parent state still intact)
//!   mark invalid, unlink from parent
//!   detach expressions                    (context gone, not destroyed)
//!   drop imported scripts
//! ```
//!
//! Every step that can run user code is followed by a handle liveness
//! check before the node is touched again.

use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tether_ir::{Handle, Name, ObjectId, Value};
use url::Url;

use crate::engine::{Engine, NotifierId};
use crate::error::{EngineError, EngineResult};
use crate::expression::ExprId;
use crate::stack::ensure_sufficient_stack;

/// Handle to a context node.
pub type ContextId = Handle<ContextNode>;

/// Observer run when a context is invalidated.
pub type DestructionHandler = Box<dyn FnOnce(&Engine, ContextId)>;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct ContextFlags: u8 {
        /// Created by the engine for its own bookkeeping.
        const INTERNAL = 1 << 0;
        /// Some expression failed a name lookup in this context.
        const UNRESOLVED_NAMES = 1 << 1;
        /// The next installed object is the root of a component being built.
        const ROOT_IN_CREATION = 1 << 2;
        const INVALIDATED = 1 << 3;
    }
}

/// Who decides when a context dies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContextOwnership {
    /// Reference counted; destroyed when the count drops to zero.
    Standalone,
    /// Destroyed when its parent is invalidated.
    OwnedByParent,
}

/// What [`Engine::install_object`] did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The object now belongs to the context.
    Added,
    /// The object already belonged to `owner`; the context was appended to
    /// `owner`'s chain of linked contexts instead.
    Linked { owner: ContextId },
    /// The object already belongs to `owner`; nothing changed.
    AlreadyOwned { owner: ContextId },
}

#[derive(Debug)]
struct NamedEntry {
    name: Name,
    value: Value,
    notifier: NotifierId,
}

/// One scope.
pub struct ContextNode {
    pub(crate) parent: Option<ContextId>,
    pub(crate) children: SmallVec<[ContextId; 4]>,
    pub(crate) expressions: Vec<ExprId>,
    pub(crate) objects: Vec<ObjectId>,
    pub(crate) context_object: Option<ObjectId>,
    linked: Option<ContextId>,
    url: Option<Url>,
    names: Vec<NamedEntry>,
    /// Built on first query.
    name_index: Option<FxHashMap<Name, usize>>,
    scripts: Vec<Value>,
    on_destruction: Vec<DestructionHandler>,
    flags: ContextFlags,
    ownership: ContextOwnership,
    ref_count: u32,
}

impl ContextNode {
    fn new(parent: Option<ContextId>, ownership: ContextOwnership) -> Self {
        ContextNode {
            parent,
            children: SmallVec::new(),
            expressions: Vec::new(),
            objects: Vec::new(),
            context_object: None,
            linked: None,
            url: None,
            names: Vec::new(),
            name_index: None,
            scripts: Vec::new(),
            on_destruction: Vec::new(),
            flags: ContextFlags::empty(),
            ownership,
            ref_count: u32::from(ownership == ContextOwnership::Standalone),
        }
    }

    fn is_valid(&self) -> bool {
        !self.flags.contains(ContextFlags::INVALIDATED)
    }

    /// Index of `name` among the named entries.
    fn property_index(&mut self, name: Name) -> Option<usize> {
        let names = &self.names;
        let index = self.name_index.get_or_insert_with(|| {
            names
                .iter()
                .enumerate()
                .map(|(i, entry)| (entry.name, i))
                .collect()
        });
        index.get(&name).copied()
    }

    fn push_name(&mut self, entry: NamedEntry) -> usize {
        let index = self.names.len();
        if let Some(map) = self.name_index.as_mut() {
            map.insert(entry.name, index);
        }
        self.names.push(entry);
        index
    }
}

impl std::fmt::Debug for ContextNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextNode")
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("expressions", &self.expressions.len())
            .field("flags", &self.flags)
            .field("ownership", &self.ownership)
            .finish_non_exhaustive()
    }
}

/// One step of a scope-chain name lookup.
pub(crate) struct LookupStep {
    pub(crate) entry: Option<(Value, NotifierId)>,
    pub(crate) context_object: Option<ObjectId>,
    pub(crate) parent: Option<ContextId>,
}

impl Engine {
    /// Create a standalone root context with a reference count of one.
    pub fn create_root_context(&self, url: Option<Url>) -> ContextId {
        let mut node = ContextNode::new(None, ContextOwnership::Standalone);
        node.url = url;
        let id = self.state().contexts.borrow_mut().insert(node);
        tracing::debug!(context = ?id, "root context created");
        id
    }

    pub fn create_child_context(
        &self,
        parent: ContextId,
        ownership: ContextOwnership,
    ) -> EngineResult<ContextId> {
        self.check_context(parent)?;
        let mut contexts = self.state().contexts.borrow_mut();
        let id = contexts.insert(ContextNode::new(Some(parent), ownership));
        if let Some(node) = contexts.get_mut(parent) {
            node.children.push(id);
        }
        tracing::trace!(context = ?id, ?parent, ?ownership, "child context created");
        Ok(id)
    }

    pub fn context_exists(&self, id: ContextId) -> bool {
        self.state().contexts.borrow().contains(id)
    }

    /// Live and not invalidated.
    pub fn is_context_valid(&self, id: ContextId) -> bool {
        self.state()
            .contexts
            .borrow()
            .get(id)
            .is_some_and(ContextNode::is_valid)
    }

    pub(crate) fn check_context(&self, id: ContextId) -> EngineResult<()> {
        match self.state().contexts.borrow().get(id) {
            None => Err(EngineError::StaleContext(id)),
            Some(node) if !node.is_valid() => Err(EngineError::InvalidatedContext(id)),
            Some(_) => Ok(()),
        }
    }

    pub fn context_parent(&self, id: ContextId) -> Option<ContextId> {
        self.state().contexts.borrow().get(id).and_then(|n| n.parent)
    }

    pub fn context_children(&self, id: ContextId) -> Vec<ContextId> {
        self.state()
            .contexts
            .borrow()
            .get(id)
            .map(|n| n.children.to_vec())
            .unwrap_or_default()
    }

    pub fn context_expressions(&self, id: ContextId) -> Vec<ExprId> {
        self.state()
            .contexts
            .borrow()
            .get(id)
            .map(|n| n.expressions.clone())
            .unwrap_or_default()
    }

    pub fn context_objects(&self, id: ContextId) -> Vec<ObjectId> {
        self.state()
            .contexts
            .borrow()
            .get(id)
            .map(|n| n.objects.clone())
            .unwrap_or_default()
    }

    pub fn context_flags(&self, id: ContextId) -> Option<ContextFlags> {
        self.state().contexts.borrow().get(id).map(|n| n.flags)
    }

    pub fn linked_context(&self, id: ContextId) -> Option<ContextId> {
        self.state().contexts.borrow().get(id).and_then(|n| n.linked)
    }

    pub fn set_internal(&self, id: ContextId, internal: bool) -> EngineResult<()> {
        self.check_context(id)?;
        self.set_context_flag(id, ContextFlags::INTERNAL, internal);
        Ok(())
    }

    pub(crate) fn set_context_flag(&self, id: ContextId, flag: ContextFlags, on: bool) {
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
            node.flags.set(flag, on);
        }
    }

    // Reference counting

    pub fn retain_context(&self, id: ContextId) -> EngineResult<u32> {
        let mut contexts = self.state().contexts.borrow_mut();
        let node = contexts.get_mut(id).ok_or(EngineError::StaleContext(id))?;
        node.ref_count += 1;
        Ok(node.ref_count)
    }

    /// Drop one reference. A standalone context whose count reaches zero is
    /// destroyed. Returns the remaining count.
    pub fn release_context(&self, id: ContextId) -> EngineResult<u32> {
        let (remaining, ownership) = {
            let mut contexts = self.state().contexts.borrow_mut();
            let node = contexts.get_mut(id).ok_or(EngineError::StaleContext(id))?;
            node.ref_count = node.ref_count.saturating_sub(1);
            (node.ref_count, node.ownership)
        };
        if remaining == 0 && ownership == ContextOwnership::Standalone {
            self.destroy_context(id)?;
        }
        Ok(remaining)
    }

    // Teardown

    /// Invalidate the context and its subtree. The node itself stays
    /// allocated (but unusable) until destroyed.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn invalidate_context(&self, id: ContextId) -> EngineResult<()> {
        if !self.context_exists(id) {
            return Err(EngineError::StaleContext(id));
        }
        self.invalidate_node(id);
        Ok(())
    }

    /// Destroy the context: linked contexts first, then the subtree, then
    /// the node's objects and named entries.
    pub fn destroy_context(&self, id: ContextId) -> EngineResult<()> {
        if !self.context_exists(id) {
            return Err(EngineError::StaleContext(id));
        }
        self.destroy_node(id);
        Ok(())
    }

    fn invalidate_node(&self, id: ContextId) {
        ensure_sufficient_stack(|| {
            let children = match self.state().contexts.borrow().get(id) {
                Some(node) if node.is_valid() => node.children.to_vec(),
                _ => return,
            };
            for child in children {
                let ownership = self.state().contexts.borrow().get(child).map(|n| n.ownership);
                match ownership {
                    Some(ContextOwnership::OwnedByParent) => self.destroy_node(child),
                    Some(ContextOwnership::Standalone) => self.invalidate_node(child),
                    None => {}
                }
            }

            let handlers = match self.state().contexts.borrow_mut().get_mut(id) {
                Some(node) => std::mem::take(&mut node.on_destruction),
                None => return,
            };
            for handler in handlers {
                handler(self, id);
            }

            let (parent, expressions) = {
                let mut contexts = self.state().contexts.borrow_mut();
                let Some(node) = contexts.get_mut(id) else {
                    return;
                };
                if !node.is_valid() {
                    return;
                }
                node.flags.insert(ContextFlags::INVALIDATED);
                let parent = node.parent.take();
                let expressions = std::mem::take(&mut node.expressions);
                if let Some(parent_node) = parent.and_then(|p| contexts.get_mut(p)) {
                    parent_node.children.retain(|c| *c != id);
                }
                (parent, expressions)
            };
            for expr in &expressions {
                self.detach_expression(*expr);
            }
            if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
                node.scripts.clear();
            }
            tracing::debug!(
                context = ?id,
                ?parent,
                expressions = expressions.len(),
                "context invalidated"
            );
        });
    }

    fn destroy_node(&self, id: ContextId) {
        ensure_sufficient_stack(|| {
            let linked = match self.state().contexts.borrow_mut().get_mut(id) {
                Some(node) => node.linked.take(),
                None => return,
            };
            if let Some(linked) = linked {
                self.destroy_node(linked);
            }

            self.invalidate_node(id);

            let Some(node) = self.state().contexts.borrow_mut().remove(id) else {
                return;
            };
            {
                let mut owners = self.state().object_contexts.borrow_mut();
                for object in &node.objects {
                    if owners.get(object) == Some(&id) {
                        owners.remove(object);
                    }
                }
            }
            for entry in &node.names {
                // Already gone if the host destroyed it; nothing else to do.
                let _ = self.destroy_notifier(entry.notifier);
            }
            tracing::debug!(context = ?id, "context destroyed");
        });
    }

    /// Run `handler` when the context is invalidated, after its children
    /// and before its own state is cleared.
    pub fn on_destruction(
        &self,
        id: ContextId,
        handler: impl FnOnce(&Engine, ContextId) + 'static,
    ) -> EngineResult<()> {
        self.check_context(id)?;
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
            node.on_destruction.push(Box::new(handler));
        }
        Ok(())
    }

    // Name lookup

    /// Re-run the expressions whose name lookups a structural change may
    /// have affected.
    ///
    /// Refreshing from a root reruns only the expressions whose last
    /// evaluation hit an unresolved name. Refreshing from any other context
    /// reruns every expression in its subtree. Children go before the
    /// node's own expressions.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn refresh_expressions(&self, id: ContextId) -> EngineResult<()> {
        self.check_context(id)?;
        let is_global = self.context_parent(id).is_none();
        self.refresh_node(id, is_global);
        Ok(())
    }

    fn refresh_node(&self, id: ContextId, is_global: bool) {
        ensure_sufficient_stack(|| {
            let (children, run_local) = match self.state().contexts.borrow().get(id) {
                Some(node) if node.is_valid() => {
                    if node.expressions.is_empty() && node.children.is_empty() {
                        return;
                    }
                    let run_local = !node.expressions.is_empty()
                        && (!is_global || node.flags.contains(ContextFlags::UNRESOLVED_NAMES));
                    (node.children.to_vec(), run_local)
                }
                _ => return,
            };
            for child in children {
                if self.is_context_valid(child) {
                    self.refresh_node(child, is_global);
                }
            }
            if !run_local {
                return;
            }
            let expressions = self.context_expressions(id);
            for expr in expressions {
                if !self.is_context_valid(id) {
                    return;
                }
                if self.expression_context(expr) != Some(id) {
                    continue;
                }
                if !is_global || self.has_unresolved_names(expr) {
                    self.refresh(expr);
                }
            }
        });
    }

    /// Clear the context's unresolved-names flag once none of its
    /// expressions still depends on a failed lookup.
    pub(crate) fn sync_unresolved_flag(&self, id: ContextId) {
        let still_unresolved = {
            let contexts = self.state().contexts.borrow();
            let Some(node) = contexts.get(id) else {
                return;
            };
            if !node.flags.contains(ContextFlags::UNRESOLVED_NAMES) {
                return;
            }
            let expressions = self.state().expressions.borrow();
            node.expressions.iter().any(|expr| {
                expressions
                    .get(*expr)
                    .is_some_and(|slot| slot.unresolved_names)
            })
        };
        if !still_unresolved {
            self.set_context_flag(id, ContextFlags::UNRESOLVED_NAMES, false);
        }
    }

    /// Index of `name` among the context's named entries. The first query
    /// builds the index.
    pub fn property_index(&self, id: ContextId, name: &str) -> Option<usize> {
        let name = self.interner().get(name)?;
        self.state()
            .contexts
            .borrow_mut()
            .get_mut(id)
            .and_then(|node| node.property_index(name))
    }

    /// Append a named entry with an undefined value. Returns its index, or
    /// the existing index if the name is already present.
    pub fn add_name(&self, id: ContextId, name: &str) -> EngineResult<usize> {
        self.check_context(id)?;
        let key = self.interner().intern(name);
        if let Some(index) = self
            .state()
            .contexts
            .borrow_mut()
            .get_mut(id)
            .and_then(|node| node.property_index(key))
        {
            return Ok(index);
        }
        let notifier = self.create_notifier(name);
        let mut contexts = self.state().contexts.borrow_mut();
        let node = contexts.get_mut(id).ok_or(EngineError::StaleContext(id))?;
        Ok(node.push_name(NamedEntry {
            name: key,
            value: Value::Undefined,
            notifier,
        }))
    }

    /// Set a named value visible to expressions in this subtree.
    ///
    /// Changing an existing value invalidates expressions that read it. A
    /// new name refreshes the subtree's name-sensitive expressions.
    pub fn set_context_property(
        &self,
        id: ContextId,
        name: &str,
        value: Value,
    ) -> EngineResult<()> {
        self.check_context(id)?;
        let key = self.interner().intern(name);
        let existing = self
            .state()
            .contexts
            .borrow_mut()
            .get_mut(id)
            .and_then(|node| node.property_index(key));
        let index = match existing {
            Some(index) => index,
            None => self.add_name(id, name)?,
        };
        let notifier = {
            let mut contexts = self.state().contexts.borrow_mut();
            let node = contexts.get_mut(id).ok_or(EngineError::StaleContext(id))?;
            let entry = &mut node.names[index];
            entry.value = value;
            entry.notifier
        };
        if existing.is_some() {
            self.emit(notifier)?;
        } else {
            self.refresh_expressions(id)?;
        }
        Ok(())
    }

    /// Value of a named entry of this context (parents are not searched).
    pub fn context_property(&self, id: ContextId, name: &str) -> Option<Value> {
        let key = self.interner().get(name)?;
        let mut contexts = self.state().contexts.borrow_mut();
        let node = contexts.get_mut(id)?;
        let index = node.property_index(key)?;
        Some(node.names[index].value.clone())
    }

    pub(crate) fn lookup_step(&self, id: ContextId, name: Option<Name>) -> Option<LookupStep> {
        let mut contexts = self.state().contexts.borrow_mut();
        let node = contexts.get_mut(id)?;
        let index = name.and_then(|name| node.property_index(name));
        let entry = index.map(|index| {
            let entry = &node.names[index];
            (entry.value.clone(), entry.notifier)
        });
        Some(LookupStep {
            entry,
            context_object: node.context_object,
            parent: node.parent,
        })
    }

    pub fn set_context_object(&self, id: ContextId, object: Option<ObjectId>) -> EngineResult<()> {
        self.check_context(id)?;
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
            node.context_object = object;
        }
        Ok(())
    }

    pub fn context_object(&self, id: ContextId) -> Option<ObjectId> {
        self.state().contexts.borrow().get(id).and_then(|n| n.context_object)
    }

    // Urls

    pub fn set_context_url(&self, id: ContextId, url: Option<Url>) -> EngineResult<()> {
        self.check_context(id)?;
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
            node.url = url;
        }
        Ok(())
    }

    pub fn context_url(&self, id: ContextId) -> Option<Url> {
        self.state().contexts.borrow().get(id).and_then(|n| n.url.clone())
    }

    /// Resolve `relative` against the nearest ancestor url, falling back to
    /// the configured base url. Absolute input is returned as is.
    pub fn resolved_url(&self, id: ContextId, relative: &str) -> Option<Url> {
        if let Ok(absolute) = Url::parse(relative) {
            return Some(absolute);
        }
        let contexts = self.state().contexts.borrow();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|ctx| contexts.get(ctx)) {
            if let Some(base) = &node.url {
                return base.join(relative).ok();
            }
            current = node.parent;
        }
        self.config().base_url.as_ref()?.join(relative).ok()
    }

    // Objects

    /// Attach a newly created object.
    ///
    /// A document root that already belongs to another context keeps its
    /// owner; this context is appended to the owner's linked chain instead,
    /// so every object has exactly one owning context.
    pub fn install_object(
        &self,
        id: ContextId,
        object: ObjectId,
        document_root: bool,
    ) -> EngineResult<InstallOutcome> {
        self.check_context(id)?;
        let mut contexts = self.state().contexts.borrow_mut();
        if contexts
            .get(id)
            .is_some_and(|n| n.flags.contains(ContextFlags::ROOT_IN_CREATION))
        {
            if let Some(node) = contexts.get_mut(id) {
                node.flags.remove(ContextFlags::ROOT_IN_CREATION);
            }
            self.state().roots_in_creation.borrow_mut().insert(object);
        }

        let owner = self.state().object_contexts.borrow().get(&object).copied();
        let outcome = match owner {
            Some(owner) if owner == id => InstallOutcome::AlreadyOwned { owner },
            Some(owner) if document_root => {
                let mut tail = owner;
                let mut already_linked = false;
                while let Some(next) = contexts.get(tail).and_then(|n| n.linked) {
                    if next == id {
                        already_linked = true;
                        break;
                    }
                    tail = next;
                }
                if !already_linked {
                    if let Some(node) = contexts.get_mut(tail) {
                        node.linked = Some(id);
                    }
                }
                InstallOutcome::Linked { owner }
            }
            Some(owner) => InstallOutcome::AlreadyOwned { owner },
            None => {
                if let Some(node) = contexts.get_mut(id) {
                    node.objects.push(object);
                }
                self.state().object_contexts.borrow_mut().insert(object, id);
                InstallOutcome::Added
            }
        };
        tracing::trace!(context = ?id, ?object, ?outcome, "object installed");
        Ok(outcome)
    }

    /// Owning context of an installed object.
    pub fn context_for_object(&self, object: ObjectId) -> Option<ContextId> {
        self.state().object_contexts.borrow().get(&object).copied()
    }

    /// Flag the context so the next object installed into it is recorded as
    /// a root in creation until the outermost construction batch ends.
    pub fn begin_root_creation(&self, id: ContextId) -> EngineResult<()> {
        self.check_context(id)?;
        self.set_context_flag(id, ContextFlags::ROOT_IN_CREATION, true);
        Ok(())
    }

    pub fn is_root_in_creation(&self, object: ObjectId) -> bool {
        self.state().roots_in_creation.borrow().contains(&object)
    }

    // Imported scripts

    pub fn set_imported_scripts(&self, id: ContextId, scripts: Vec<Value>) -> EngineResult<()> {
        self.check_context(id)?;
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(id) {
            node.scripts = scripts;
        }
        Ok(())
    }

    pub fn imported_scripts(&self, id: ContextId) -> Rc<[Value]> {
        self.state()
            .contexts
            .borrow()
            .get(id)
            .map(|n| Rc::from(n.scripts.as_slice()))
            .unwrap_or_else(|| Rc::from(Vec::new()))
    }
}
