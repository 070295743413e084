//! Dependency guards and the pool they are recycled through.
//!
//! A guard is one edge "expression E depends on source S". Guards live in a
//! generational arena whose free list is the pool: recycling a guard frees
//! its slot (bumping the generation, so stale [`GuardId`]s stop resolving)
//! and the next acquisition reuses it.
//!
//! # States
//!
//! ```text
//!   acquire ──► Armed ──notify──► Fired ──re-capture──► Armed
//!                 │                 │
//!                 └──source gone──► Detached ──next scan──► recycled
//! ```
//!
//! Only `Armed` guards fire. A `Fired` guard keeps its source so the next
//! evaluation can re-capture it without a new allocation.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tether_ir::{Arena, Handle, NotifyIndex, ObjectId, PropertyIndex};

use crate::engine::NotifierId;
use crate::expression::ExprId;

/// Handle to a pooled guard.
pub type GuardId = Handle<Guard>;

/// What a guard is connected to.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DependencySource {
    /// Notify-index path: fires on `Engine::notify_property(object, notify)`.
    Property { object: ObjectId, notify: NotifyIndex },
    /// Bindable path: the reflection layer calls back through an `ObserveSink`.
    Bindable {
        object: ObjectId,
        property: PropertyIndex,
    },
    /// Free-standing notifier owned by the engine.
    Notifier(NotifierId),
}

impl DependencySource {
    /// Host object this source belongs to, if any.
    pub fn object(&self) -> Option<ObjectId> {
        match *self {
            DependencySource::Property { object, .. }
            | DependencySource::Bindable { object, .. } => Some(object),
            DependencySource::Notifier(_) => None,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum GuardState {
    Armed,
    Fired,
    Detached,
}

/// One dependency edge.
#[derive(Debug)]
pub struct Guard {
    owner: ExprId,
    source: Option<DependencySource>,
    state: GuardState,
    /// Set while a notification that includes this guard is being delivered.
    pending_notify: bool,
    /// Bindable path only: a one-shot observation is registered with the host.
    observing: bool,
}

impl Guard {
    pub fn owner(&self) -> ExprId {
        self.owner
    }

    pub fn source(&self) -> Option<DependencySource> {
        self.source
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.state == GuardState::Armed
    }
}

/// Counters for pool behaviour.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Guards handed out since the pool was created.
    pub acquired: u64,
    /// Guards returned to the pool.
    pub recycled: u64,
    /// Guards currently in use.
    pub live: usize,
    /// Slots ever created (in use + free).
    pub slots: usize,
}

/// Guard storage plus the source → guards connection table.
#[derive(Debug, Default)]
pub struct GuardPool {
    guards: Arena<Guard>,
    connections: FxHashMap<DependencySource, SmallVec<[GuardId; 2]>>,
    by_object: FxHashMap<ObjectId, SmallVec<[DependencySource; 4]>>,
    acquired: u64,
    recycled: u64,
}

impl GuardPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        GuardPool {
            guards: Arena::with_capacity(capacity),
            ..Self::default()
        }
    }

    #[inline]
    pub fn get(&self, id: GuardId) -> Option<&Guard> {
        self.guards.get(id)
    }

    /// Take a guard from the pool and connect it to `source`.
    pub fn acquire(&mut self, owner: ExprId, source: DependencySource) -> GuardId {
        let id = self.guards.insert(Guard {
            owner,
            source: Some(source),
            state: GuardState::Armed,
            pending_notify: false,
            observing: false,
        });
        self.acquired += 1;
        self.link(id, source);
        tracing::trace!(guard = ?id, ?owner, ?source, "guard acquired");
        id
    }

    /// Disconnect `id` and return it to the pool. Stale ids are ignored.
    pub fn recycle(&mut self, id: GuardId) -> bool {
        let Some(guard) = self.guards.remove(id) else {
            return false;
        };
        if let Some(source) = guard.source {
            self.unlink(id, source);
        }
        self.recycled += 1;
        tracing::trace!(guard = ?id, "guard recycled");
        true
    }

    /// Whether `id` is connected to exactly `source` (armed or fired).
    #[inline]
    pub fn is_connected(&self, id: GuardId, source: &DependencySource) -> bool {
        self.guards
            .get(id)
            .is_some_and(|g| g.source.as_ref() == Some(source))
    }

    /// Re-attach a guard matched by a capture: cancel any in-flight
    /// notification and arm it again.
    ///
    /// Returns `true` when a bindable guard needs a fresh observation
    /// registered with the host.
    pub fn reattach(&mut self, id: GuardId) -> bool {
        let Some(guard) = self.guards.get_mut(id) else {
            return false;
        };
        guard.pending_notify = false;
        guard.state = GuardState::Armed;
        matches!(guard.source, Some(DependencySource::Bindable { .. })) && !guard.observing
    }

    /// Record that a bindable guard has an observation registered.
    pub fn mark_observing(&mut self, id: GuardId) {
        if let Some(guard) = self.guards.get_mut(id) {
            guard.observing = true;
        }
    }

    /// Start delivering a notification for `source`.
    ///
    /// Flags every armed guard connected to it as pending and returns them.
    /// Each one must then go through [`take_fire`](Self::take_fire), which
    /// skips guards re-captured in the meantime.
    pub fn begin_notify(&mut self, source: &DependencySource) -> SmallVec<[GuardId; 4]> {
        let mut targets = SmallVec::new();
        let Some(connected) = self.connections.get(source) else {
            return targets;
        };
        for &id in connected {
            if let Some(guard) = self.guards.get_mut(id) {
                if guard.state == GuardState::Armed {
                    guard.pending_notify = true;
                    targets.push(id);
                }
            }
        }
        targets
    }

    /// Fire one guard of an in-flight notification.
    ///
    /// Returns the owning expression if the guard is still armed, still
    /// connected to `source` and still pending. The guard is left `Fired`.
    pub fn take_fire(&mut self, id: GuardId, source: &DependencySource) -> Option<ExprId> {
        let guard = self.guards.get_mut(id)?;
        if guard.source.as_ref() != Some(source)
            || guard.state != GuardState::Armed
            || !guard.pending_notify
        {
            return None;
        }
        guard.pending_notify = false;
        guard.state = GuardState::Fired;
        Some(guard.owner)
    }

    /// Fire a bindable guard from a host observation callback.
    pub fn take_observed(&mut self, id: GuardId, source: &DependencySource) -> Option<ExprId> {
        let guard = self.guards.get_mut(id)?;
        if guard.source.as_ref() != Some(source)
            || guard.state != GuardState::Armed
            || !guard.observing
        {
            return None;
        }
        guard.observing = false;
        guard.state = GuardState::Fired;
        Some(guard.owner)
    }

    /// Detach every guard connected to `source`. They become inert and are
    /// recycled by their owner's next evaluation or teardown.
    pub fn detach_source(&mut self, source: &DependencySource) -> usize {
        let Some(connected) = self.connections.remove(source) else {
            return 0;
        };
        if let Some(object) = source.object() {
            if let Some(sources) = self.by_object.get_mut(&object) {
                sources.retain(|s| s != source);
                if sources.is_empty() {
                    self.by_object.remove(&object);
                }
            }
        }
        for &id in &connected {
            if let Some(guard) = self.guards.get_mut(id) {
                guard.source = None;
                guard.state = GuardState::Detached;
                guard.pending_notify = false;
                guard.observing = false;
            }
        }
        connected.len()
    }

    /// Detach every guard connected to any source of `object`.
    pub fn detach_object(&mut self, object: ObjectId) -> usize {
        let Some(sources) = self.by_object.remove(&object) else {
            return 0;
        };
        sources.iter().map(|source| self.detach_source(source)).sum()
    }

    /// Number of guards currently connected to `source`.
    pub fn connection_count(&self, source: &DependencySource) -> usize {
        self.connections.get(source).map_or(0, SmallVec::len)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired,
            recycled: self.recycled,
            live: self.guards.len(),
            slots: self.guards.slot_count(),
        }
    }

    fn link(&mut self, id: GuardId, source: DependencySource) {
        let connected = self.connections.entry(source).or_default();
        if connected.is_empty() {
            if let Some(object) = source.object() {
                self.by_object.entry(object).or_default().push(source);
            }
        }
        connected.push(id);
    }

    fn unlink(&mut self, id: GuardId, source: DependencySource) {
        let Some(connected) = self.connections.get_mut(&source) else {
            return;
        };
        connected.retain(|g| *g != id);
        if connected.is_empty() {
            self.connections.remove(&source);
            if let Some(object) = source.object() {
                if let Some(sources) = self.by_object.get_mut(&object) {
                    sources.retain(|s| *s != source);
                    if sources.is_empty() {
                        self.by_object.remove(&object);
                    }
                }
            }
        }
    }
}
