//! Render objects and the pool that recycles them across frames

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::RenderDevice;
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::definition::{ErasedValue, SharedDef};
use crate::render_graph::index::{PassIndex, TimeFrame};

/// Unique identifier of a render object, stable across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pin on an object for the pass at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub index: PassIndex,
    pub claimed: bool,
}

/// A concrete, pooled object behind a render resource.
pub struct RenderObject {
    id: ObjectId,
    value: ErasedValue,
    def: SharedDef,
    acquired: bool,
    constant: bool,
    reservations: Vec<Reservation>,
    timeout: u32,
    idle_frames_left: u32,
    used_since_flush: bool,
}

impl RenderObject {
    fn new(id: ObjectId, value: ErasedValue, def: SharedDef, timeout: u32) -> Self {
        Self {
            id,
            value,
            def,
            acquired: false,
            constant: false,
            reservations: Vec::new(),
            timeout,
            idle_frames_left: timeout,
            used_since_flush: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn value(&self) -> &ErasedValue {
        &self.value
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    pub fn idle_frames_left(&self) -> u32 {
        self.idle_frames_left
    }

    /// Free to be handed to a new resource.
    pub fn is_available(&self) -> bool {
        !self.acquired && !self.constant
    }

    /// Whether an unclaimed reservation sits exactly at `index`.
    pub fn is_reserved_at(&self, index: PassIndex) -> bool {
        self.reservations
            .iter()
            .any(|r| !r.claimed && r.index == index)
    }

    /// Whether handing the object to a resource living over `lifetime` would
    /// steal it from a pass that reserved it.
    pub fn violates_reservations(&self, lifetime: &TimeFrame) -> bool {
        self.reservations
            .iter()
            .any(|r| !r.claimed && lifetime.conflicts_with_reservation(r.index))
    }

    fn acquire(&mut self) -> FrameGraphResult<()> {
        if self.acquired {
            return Err(FrameGraphError::ObjectAlreadyAcquired(self.id));
        }
        self.acquired = true;
        self.used_since_flush = true;
        self.idle_frames_left = self.timeout;
        Ok(())
    }

    fn claim(&mut self, index: PassIndex) {
        if let Some(r) = self
            .reservations
            .iter_mut()
            .find(|r| !r.claimed && r.index == index)
        {
            r.claimed = true;
        }
    }

    /// Advance the idle counter by one frame. Returns `false` once expired.
    fn tick(&mut self) -> bool {
        if self.acquired || self.used_since_flush {
            self.used_since_flush = false;
            self.idle_frames_left = self.timeout;
            return true;
        }
        self.idle_frames_left = self.idle_frames_left.saturating_sub(1);
        self.idle_frames_left > 0
    }

    fn dispose(&self, device: &dyn RenderDevice) {
        self.def.dispose_erased(self.value.as_ref(), device);
    }
}

impl fmt::Debug for RenderObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderObject")
            .field("id", &self.id)
            .field("type", &self.def.object_type_name())
            .field("acquired", &self.acquired)
            .field("constant", &self.constant)
            .field("reservations", &self.reservations)
            .field("idle_frames_left", &self.idle_frames_left)
            .finish()
    }
}

/// How an allocation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// The ticket's object from the previous frame was handed back.
    Sticky,
    /// A pooled object matched the definition exactly.
    Direct,
    /// A pooled object was accepted in coerced form.
    Indirect,
    /// Nothing matched; a new object was created.
    Created,
}

/// Result of [`RenderObjectMap::allocate`].
#[derive(Debug, Clone)]
pub struct Allocation {
    pub id: ObjectId,
    pub value: ErasedValue,
    pub kind: AllocationKind,
}

/// Allocation counters. Per-frame counters reset on [`RenderObjectMap::new_frame`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStatistics {
    pub objects_created: u32,
    pub objects_reallocated: u32,
    pub objects_disposed: u32,
    pub total_objects: usize,
    pub acquired_objects: usize,
}

/// Owns every render object and decides which one backs each resource.
///
/// Shared by all pass queues behind a mutex.
pub struct RenderObjectMap {
    device: Arc<dyn RenderDevice>,
    objects: BTreeMap<ObjectId, RenderObject>,
    next_id: u64,
    default_timeout: u32,
    objects_created: u32,
    objects_reallocated: u32,
    objects_disposed: u32,
}

impl RenderObjectMap {
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self {
            device,
            objects: BTreeMap::new(),
            next_id: 0,
            default_timeout: 1,
            objects_created: 0,
            objects_reallocated: 0,
            objects_disposed: 0,
        }
    }

    /// Frames an idle object survives unless its definition overrides it.
    pub fn with_default_timeout(mut self, frames: u32) -> Self {
        self.default_timeout = frames.max(1);
        self
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn get(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderObject> {
        self.objects.values()
    }

    /// Find or create an object for a resource defined by `def` that must stay
    /// valid over `lifetime`. `hint` is the object the resource's ticket held
    /// last frame.
    pub fn allocate(
        &mut self,
        def: &SharedDef,
        lifetime: &TimeFrame,
        hint: Option<ObjectId>,
    ) -> FrameGraphResult<Allocation> {
        if def.reusable() {
            if let Some(allocation) = self.allocate_sticky(def, lifetime, hint)? {
                return Ok(allocation);
            }

            let mut direct = None;
            let mut indirect = None;
            for (&id, object) in &self.objects {
                if !object.is_available() || object.violates_reservations(lifetime) {
                    continue;
                }
                if def.accepts_direct_erased(object.value.as_ref()) {
                    direct = Some(id);
                    break;
                }
                if indirect.is_none() && def.accepts_indirect_erased(object.value.as_ref()) {
                    indirect = Some(id);
                }
            }
            if let Some(id) = direct {
                return self.hand_out(id, def, None, AllocationKind::Direct);
            }
            if let Some(id) = indirect {
                return self.hand_out(id, def, None, AllocationKind::Indirect);
            }
        }
        self.create(def)
    }

    fn allocate_sticky(
        &mut self,
        def: &SharedDef,
        lifetime: &TimeFrame,
        hint: Option<ObjectId>,
    ) -> FrameGraphResult<Option<Allocation>> {
        let Some(id) = hint else {
            return Ok(None);
        };
        let Some(object) = self.objects.get(&id) else {
            return Ok(None);
        };
        if !object.is_available() || !def.accepts_direct_erased(object.value.as_ref()) {
            return Ok(None);
        }
        let own = lifetime.start_index();
        if object.is_reserved_at(own) {
            return self
                .hand_out(id, def, Some(own), AllocationKind::Sticky)
                .map(Some);
        }
        if !object.violates_reservations(lifetime) {
            return self.hand_out(id, def, None, AllocationKind::Sticky).map(Some);
        }
        Ok(None)
    }

    fn hand_out(
        &mut self,
        id: ObjectId,
        def: &SharedDef,
        claim: Option<PassIndex>,
        kind: AllocationKind,
    ) -> FrameGraphResult<Allocation> {
        let timeout = def.object_idle_timeout().unwrap_or(self.default_timeout).max(1);
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(FrameGraphError::UnknownObject(id))?;
        object.acquire()?;
        object.def = Arc::clone(def);
        object.timeout = timeout;
        object.idle_frames_left = timeout;
        if let Some(index) = claim {
            object.claim(index);
            log::trace!("Object {} claimed its reservation at {:?}", id, index);
        }
        self.objects_reallocated += 1;
        log::trace!("Reallocated object {} ({:?})", id, kind);
        Ok(Allocation {
            id,
            value: Arc::clone(&object.value),
            kind,
        })
    }

    fn create(&mut self, def: &SharedDef) -> FrameGraphResult<Allocation> {
        let value = def.create_erased(self.device.as_ref())?;
        self.next_id += 1;
        let id = ObjectId(self.next_id);
        let timeout = def.object_idle_timeout().unwrap_or(self.default_timeout).max(1);
        let mut object = RenderObject::new(id, Arc::clone(&value), Arc::clone(def), timeout);
        object.acquire()?;
        self.objects.insert(id, object);
        self.objects_created += 1;
        log::trace!("Created object {} ({})", id, def.object_type_name());
        Ok(Allocation {
            id,
            value,
            kind: AllocationKind::Created,
        })
    }

    /// Mark an object as acquired outside of [`allocate`](Self::allocate).
    pub fn acquire(&mut self, id: ObjectId) -> FrameGraphResult<()> {
        self.objects
            .get_mut(&id)
            .ok_or(FrameGraphError::UnknownObject(id))?
            .acquire()
    }

    /// Return an object to the pool, or destroy it when `dispose` is set.
    pub fn release(&mut self, id: ObjectId, dispose: bool) -> FrameGraphResult<()> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(FrameGraphError::UnknownObject(id))?;
        if !object.acquired {
            log::warn!("Releasing object {} which is not acquired", id);
        }
        object.acquired = false;
        if dispose {
            if let Some(object) = self.objects.remove(&id) {
                object.dispose(self.device.as_ref());
                self.objects_disposed += 1;
                log::trace!("Disposed object {} on release", id);
            }
        }
        Ok(())
    }

    /// Pin an object for the pass at `index`. Returns `false` for unknown ids.
    pub fn reserve(&mut self, id: ObjectId, index: PassIndex) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) => {
                object.reservations.push(Reservation {
                    index,
                    claimed: false,
                });
                log::trace!("Reserved object {} at {:?}", id, index);
                true
            }
            None => false,
        }
    }

    /// Exempt an object from reallocation until the end of the frame.
    pub fn set_constant(&mut self, id: ObjectId) -> FrameGraphResult<()> {
        self.objects
            .get_mut(&id)
            .ok_or(FrameGraphError::UnknownObject(id))?
            .constant = true;
        Ok(())
    }

    /// Reset the per-frame counters.
    pub fn new_frame(&mut self) {
        self.objects_created = 0;
        self.objects_reallocated = 0;
        self.objects_disposed = 0;
    }

    /// Age every object by one frame and dispose the ones that stayed idle
    /// past their timeout. Survivors lose their constant flag and reservations.
    pub fn flush_map(&mut self) {
        let mut expired = Vec::new();
        for (&id, object) in self.objects.iter_mut() {
            if object.tick() {
                object.constant = false;
                object.reservations.clear();
            } else {
                expired.push(id);
            }
        }
        for id in expired {
            if let Some(object) = self.objects.remove(&id) {
                object.dispose(self.device.as_ref());
                self.objects_disposed += 1;
            }
        }
        log::debug!(
            "Flushed render objects: created {}, reallocated {}, disposed {}, live {}",
            self.objects_created,
            self.objects_reallocated,
            self.objects_disposed,
            self.objects.len()
        );
    }

    /// Destroy every object regardless of state.
    pub fn dispose_all(&mut self) {
        let objects = std::mem::take(&mut self.objects);
        self.objects_disposed += objects.len() as u32;
        for object in objects.values() {
            object.dispose(self.device.as_ref());
        }
    }

    pub fn statistics(&self) -> MapStatistics {
        MapStatistics {
            objects_created: self.objects_created,
            objects_reallocated: self.objects_reallocated,
            objects_disposed: self.objects_disposed,
            total_objects: self.objects.len(),
            acquired_objects: self.objects.values().filter(|o| o.acquired).count(),
        }
    }
}

impl fmt::Debug for RenderObjectMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderObjectMap")
            .field("device", &self.device.name())
            .field("objects", &self.objects.len())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
