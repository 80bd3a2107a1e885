//! Resource tickets
//!
//! A ticket names a resource slot. Passes hold typed [`ResourceTicket`] handles;
//! the slots behind them live in a [`TicketTable`] arena so that aliasing
//! (a sink ticket pointing at a source ticket) is plain index bookkeeping.

use std::any::{type_name, TypeId};
use std::fmt;
use std::marker::PhantomData;

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::object::ObjectId;
use crate::render_graph::pass::PassId;

/// Index of a ticket slot in the [`TicketTable`].
///
/// Retired slots are reused; `generation` tells a reused slot apart from the
/// ticket that held it before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TicketId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Location of a resource in a frame's resource list.
///
/// `generation` identifies the frame the index was handed out in, so indices
/// left over from earlier frames are rejected instead of aliasing new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceIndex {
    pub generation: u32,
    pub index: u32,
}

/// Typed, copyable handle to a ticket slot.
pub struct ResourceTicket<T> {
    id: TicketId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceTicket<T> {
    pub(crate) fn new(id: TicketId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TicketId {
        self.id
    }
}

impl<T> Clone for ResourceTicket<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceTicket<T> {}

impl<T> PartialEq for ResourceTicket<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ResourceTicket<T> {}

impl<T> fmt::Debug for ResourceTicket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceTicket<{}>({})", type_name::<T>(), self.id)
    }
}

/// How a pass uses a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketRole {
    /// A sink. `source` names the source to link against: `"pass.output"`,
    /// or a bare output name searched among earlier passes.
    Input {
        source: String,
        required: bool,
        shared: bool,
    },
    /// A source. Shared outputs are published to the graph's shared scope.
    Output { shared: bool },
    /// A ticket created outside of any pass, e.g. for imported resources.
    Free,
}

#[derive(Debug, Clone)]
pub(crate) struct TicketSlot {
    pub(crate) name: String,
    pub(crate) owner: Option<PassId>,
    pub(crate) role: TicketRole,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) local: Option<ResourceIndex>,
    pub(crate) source: Option<TicketId>,
    pub(crate) targets: Vec<TicketId>,
    pub(crate) object: Option<ObjectId>,
    /// Shared-scope entry this sink imports from another graph.
    pub(crate) import: Option<String>,
    pub(crate) generation: u32,
    pub(crate) retired: bool,
}

/// Arena of ticket slots. Slots of retired tickets are handed out again.
#[derive(Debug, Default)]
pub struct TicketTable {
    slots: Vec<TicketSlot>,
    free: Vec<u32>,
}

impl TicketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new typed ticket slot.
    pub fn create<T: 'static>(
        &mut self,
        name: impl Into<String>,
        owner: Option<PassId>,
        role: TicketRole,
    ) -> ResourceTicket<T> {
        let (index, generation) = match self.free.pop() {
            Some(index) => (index, self.slots[index as usize].generation),
            None => (self.slots.len() as u32, 0),
        };
        let slot = TicketSlot {
            name: name.into(),
            owner,
            role,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            local: None,
            source: None,
            targets: Vec::new(),
            object: None,
            import: None,
            generation,
            retired: false,
        };
        match self.slots.get_mut(index as usize) {
            Some(reused) => *reused = slot,
            None => self.slots.push(slot),
        }
        ResourceTicket::new(TicketId::new(index, generation))
    }

    pub(crate) fn slot(&self, id: TicketId) -> Option<&TicketSlot> {
        self.slots
            .get(id.index())
            .filter(|s| !s.retired && s.generation == id.generation)
    }

    pub(crate) fn slot_mut(&mut self, id: TicketId) -> Option<&mut TicketSlot> {
        self.slots
            .get_mut(id.index())
            .filter(|s| !s.retired && s.generation == id.generation)
    }

    /// Live tickets
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Slots allocated, live or waiting for reuse
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display name of a ticket, `"?"` for unknown ids.
    pub fn name(&self, id: TicketId) -> &str {
        self.slot(id).map_or("?", |s| s.name.as_str())
    }

    pub fn local_index(&self, id: TicketId) -> Option<ResourceIndex> {
        self.slot(id).and_then(|s| s.local)
    }

    pub(crate) fn set_local_index(&mut self, id: TicketId, index: Option<ResourceIndex>) {
        if let Some(slot) = self.slot_mut(id) {
            slot.local = index;
        }
    }

    /// Resolved index: the source's world index when it has one, otherwise the
    /// ticket's own local index.
    pub fn world_index(&self, id: TicketId) -> Option<ResourceIndex> {
        let slot = self.slot(id)?;
        if let Some(source) = slot.source {
            if let Some(index) = self.world_index(source) {
                return Some(index);
            }
        }
        slot.local
    }

    pub fn object_id(&self, id: TicketId) -> Option<ObjectId> {
        self.slot(id).and_then(|s| s.object)
    }

    pub(crate) fn set_object_id(&mut self, id: TicketId, object: Option<ObjectId>) {
        if let Some(slot) = self.slot_mut(id) {
            slot.object = object;
        }
    }

    pub fn source(&self, id: TicketId) -> Option<TicketId> {
        self.slot(id).and_then(|s| s.source)
    }

    pub fn has_source(&self, id: TicketId) -> bool {
        self.source(id).is_some()
    }

    pub fn targets(&self, id: TicketId) -> &[TicketId] {
        self.slot(id).map_or(&[], |s| s.targets.as_slice())
    }

    /// Alias `target` to `source`, keeping the reverse edge on the source.
    ///
    /// Fails if the types differ or the link would close an aliasing cycle.
    pub fn set_source(&mut self, target: TicketId, source: Option<TicketId>) -> FrameGraphResult<()> {
        if let Some(src) = source {
            let (src_type, src_type_name) = match self.slot(src) {
                Some(s) => (s.type_id, s.type_name),
                None => return Err(FrameGraphError::InvalidTicket(src.to_string())),
            };
            let slot = self
                .slot(target)
                .ok_or_else(|| FrameGraphError::InvalidTicket(target.to_string()))?;
            if slot.type_id != src_type {
                return Err(FrameGraphError::TypeMismatch {
                    pass: String::new(),
                    input: slot.name.clone(),
                    expected: slot.type_name,
                    found: src_type_name,
                });
            }
            let mut cursor = Some(src);
            while let Some(current) = cursor {
                if current == target {
                    return Err(FrameGraphError::CyclicAlias(slot.name.clone()));
                }
                cursor = self.source(current);
            }
        }

        if let Some(old) = self.source(target) {
            if let Some(old_slot) = self.slot_mut(old) {
                old_slot.targets.retain(|&t| t != target);
            }
        }
        if let Some(slot) = self.slot_mut(target) {
            slot.source = source;
        }
        if let Some(src) = source {
            if let Some(src_slot) = self.slot_mut(src) {
                src_slot.targets.push(target);
            }
            log::trace!("Linked ticket '{}' to '{}'", self.name(target), self.name(src));
        }
        Ok(())
    }

    /// Retire a ticket: disconnect it from its source and detach every target
    /// that aliases it. Returns the detached targets.
    pub(crate) fn retire(&mut self, id: TicketId) -> Vec<TicketId> {
        // Unlinking an existing source cannot fail.
        let _ = self.set_source(id, None);
        let targets = match self.slot_mut(id) {
            Some(slot) => std::mem::take(&mut slot.targets),
            None => return Vec::new(),
        };
        for &target in &targets {
            if let Some(slot) = self.slot_mut(target) {
                slot.source = None;
            }
        }
        let Some(slot) = self.slot_mut(id) else {
            return targets;
        };
        slot.retired = true;
        slot.generation = slot.generation.wrapping_add(1);
        slot.import = None;
        self.free.push(id.index);
        targets
    }

    /// Tickets owned by `pass`
    pub(crate) fn owned_by(&self, pass: PassId) -> impl Iterator<Item = TicketId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(move |(_, s)| !s.retired && s.owner == Some(pass))
            .map(|(i, s)| TicketId::new(i as u32, s.generation))
    }

    /// Find an output ticket of `pass` by name.
    pub(crate) fn find_output(&self, pass: PassId, name: &str) -> Option<TicketId> {
        self.owned_by(pass).find(|&id| {
            self.slot(id)
                .is_some_and(|s| s.name == name && matches!(s.role, TicketRole::Output { .. }))
        })
    }

    pub(crate) fn role(&self, id: TicketId) -> Option<&TicketRole> {
        self.slot(id).map(|s| &s.role)
    }

    pub(crate) fn type_info(&self, id: TicketId) -> Option<(TypeId, &'static str)> {
        self.slot(id).map(|s| (s.type_id, s.type_name))
    }

    pub(crate) fn set_import(&mut self, id: TicketId, import: Option<String>) {
        if let Some(slot) = self.slot_mut(id) {
            slot.import = import;
        }
    }

    pub(crate) fn import(&self, id: TicketId) -> Option<&str> {
        self.slot(id).and_then(|s| s.import.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(generation: u32, index: u32) -> ResourceIndex {
        ResourceIndex { generation, index }
    }

    #[test]
    fn test_world_index_without_source() {
        let mut table = TicketTable::new();
        let t = table.create::<u32>("a", None, TicketRole::Free);
        assert_eq!(table.world_index(t.id()), None);
        table.set_local_index(t.id(), Some(index(1, 3)));
        assert_eq!(table.world_index(t.id()), Some(index(1, 3)));
    }

    #[test]
    fn test_world_index_inherits_from_source() {
        let mut table = TicketTable::new();
        let src = table.create::<u32>("src", None, TicketRole::Free);
        let dst = table.create::<u32>("dst", None, TicketRole::Free);
        table.set_local_index(dst.id(), Some(index(1, 7)));
        table.set_source(dst.id(), Some(src.id())).unwrap();

        // Source unresolved: fall back to the local index.
        assert_eq!(table.world_index(dst.id()), Some(index(1, 7)));

        table.set_local_index(src.id(), Some(index(1, 2)));
        assert_eq!(table.world_index(dst.id()), table.world_index(src.id()));
        assert_eq!(table.targets(src.id()), &[dst.id()]);
    }

    #[test]
    fn test_alias_chain_resolves_to_root() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        let b = table.create::<u32>("b", None, TicketRole::Free);
        let c = table.create::<u32>("c", None, TicketRole::Free);
        table.set_source(b.id(), Some(a.id())).unwrap();
        table.set_source(c.id(), Some(b.id())).unwrap();
        table.set_local_index(a.id(), Some(index(4, 0)));
        assert_eq!(table.world_index(c.id()), Some(index(4, 0)));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        let b = table.create::<u32>("b", None, TicketRole::Free);
        table.set_source(b.id(), Some(a.id())).unwrap();
        let err = table.set_source(a.id(), Some(b.id())).unwrap_err();
        assert!(matches!(err, FrameGraphError::CyclicAlias(_)));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        let b = table.create::<f32>("b", None, TicketRole::Free);
        assert!(matches!(
            table.set_source(b.id(), Some(a.id())),
            Err(FrameGraphError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_relink_moves_reverse_edge() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        let b = table.create::<u32>("b", None, TicketRole::Free);
        let sink = table.create::<u32>("sink", None, TicketRole::Free);
        table.set_source(sink.id(), Some(a.id())).unwrap();
        table.set_source(sink.id(), Some(b.id())).unwrap();
        assert!(table.targets(a.id()).is_empty());
        assert_eq!(table.targets(b.id()), &[sink.id()]);
    }

    #[test]
    fn test_retire_detaches_targets() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        let b = table.create::<u32>("b", None, TicketRole::Free);
        table.set_source(b.id(), Some(a.id())).unwrap();
        let detached = table.retire(a.id());
        assert_eq!(detached, vec![b.id()]);
        assert!(!table.has_source(b.id()));
        assert_eq!(table.world_index(a.id()), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_retired_slot_is_reused() {
        let mut table = TicketTable::new();
        let a = table.create::<u32>("a", None, TicketRole::Free);
        table.set_local_index(a.id(), Some(index(1, 0)));
        table.retire(a.id());

        let b = table.create::<f32>("b", None, TicketRole::Free);
        assert_eq!(b.id().index(), a.id().index());
        assert_ne!(b.id(), a.id());
        assert_eq!(table.capacity(), 1);

        // The old id no longer reaches the slot.
        assert_eq!(table.name(a.id()), "?");
        assert_eq!(table.world_index(a.id()), None);
        assert_eq!(table.name(b.id()), "b");
        assert_eq!(table.local_index(b.id()), None);
        assert!(table.set_source(b.id(), Some(a.id())).is_err());
    }
}
