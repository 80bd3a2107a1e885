//! Shared resource scope
//!
//! Named sources visible to every graph built with the same scope. Graphs
//! publish their shared outputs here and resolve shared inputs against it; the
//! renderer can also provide values directly.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::definition::ErasedValue;
use crate::render_graph::ticket::TicketId;

/// Identifies the graph that published a shared source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A named source in the scope.
#[derive(Clone)]
pub struct SharedEntry {
    /// Publishing graph, `None` for values provided by the renderer.
    pub owner: Option<GraphId>,
    /// Publishing ticket within the owner graph.
    pub ticket: Option<TicketId>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Latest exported or provided value.
    pub value: Option<ErasedValue>,
}

impl fmt::Debug for SharedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEntry")
            .field("owner", &self.owner)
            .field("ticket", &self.ticket)
            .field("type", &self.type_name)
            .field("has_value", &self.value.is_some())
            .finish()
    }
}

/// Cloneable handle to a set of shared sources.
#[derive(Clone, Default)]
pub struct SharedScope {
    entries: Arc<RwLock<HashMap<String, SharedEntry>>>,
}

impl SharedScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph's shared output.
    pub(crate) fn publish(
        &self,
        name: &str,
        owner: GraphId,
        ticket: TicketId,
        type_id: TypeId,
        type_name: &'static str,
    ) -> FrameGraphResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(FrameGraphError::DuplicateSharedSource(name.to_string()));
        }
        entries.insert(
            name.to_string(),
            SharedEntry {
                owner: Some(owner),
                ticket: Some(ticket),
                type_id,
                type_name,
                value: None,
            },
        );
        log::debug!("Published shared source '{}'", name);
        Ok(())
    }

    /// Remove a source previously published by `owner`.
    pub(crate) fn unpublish(&self, name: &str, owner: GraphId) {
        let mut entries = self.entries.write();
        if entries.get(name).is_some_and(|e| e.owner == Some(owner)) {
            entries.remove(name);
        }
    }

    /// Provide a value from outside any graph, replacing an earlier provided
    /// value. Fails if a graph publishes the name.
    pub fn provide<T: Send + Sync + 'static>(&self, name: &str, value: T) -> FrameGraphResult<()> {
        let mut entries = self.entries.write();
        if entries.get(name).is_some_and(|e| e.owner.is_some()) {
            return Err(FrameGraphError::DuplicateSharedSource(name.to_string()));
        }
        entries.insert(
            name.to_string(),
            SharedEntry {
                owner: None,
                ticket: None,
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                value: Some(Arc::new(value)),
            },
        );
        Ok(())
    }

    /// Remove a provided value. Published sources are left alone.
    pub fn withdraw(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        if entries.get(name).is_some_and(|e| e.owner.is_none()) {
            entries.remove(name);
            return true;
        }
        false
    }

    pub(crate) fn store_value(&self, name: &str, value: ErasedValue) {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.value = Some(value);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<SharedEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn value(&self, name: &str) -> Option<ErasedValue> {
        self.entries.read().get(name).and_then(|e| e.value.clone())
    }

    /// Typed copy of the latest value.
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        self.value(name)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for SharedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        f.debug_struct("SharedScope").field("sources", &names).finish()
    }
}
