//! Per-frame resource registry
//!
//! Every frame, passes declare the resources they produce and reference the
//! ones they consume. The [`ResourceList`] keeps the bookkeeping record behind
//! each ticket, culls work nobody consumes, and binds virtual resources to
//! pooled render objects when a pass acquires them.

use std::any::{type_name, Any};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::definition::{ErasedValue, SharedDef};
use crate::render_graph::index::{PassIndex, TimeFrame};
use crate::render_graph::object::{ObjectId, RenderObjectMap};
use crate::render_graph::pass::PassId;
use crate::render_graph::ticket::{ResourceIndex, ResourceTicket, TicketId, TicketTable};

/// Binding state of a render resource. Exactly one holds at any time.
#[derive(Clone)]
pub enum ResourceState {
    /// Declared but not bound to an object yet.
    Virtual,
    /// Bound to a pooled render object.
    Bound { object: ObjectId, value: ErasedValue },
    /// Holds a concrete value without a pooled object.
    Primitive(ErasedValue),
    /// Deliberately resource-less. Acquiring it is an error.
    Undefined,
}

impl fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => write!(f, "Virtual"),
            Self::Bound { object, .. } => write!(f, "Bound({})", object),
            Self::Primitive(_) => write!(f, "Primitive"),
            Self::Undefined => write!(f, "Undefined"),
        }
    }
}

/// Bookkeeping record behind a ticket for one frame.
#[derive(Debug)]
pub struct RenderResource {
    producer: Option<PassId>,
    def: Option<SharedDef>,
    value_type: &'static str,
    ticket: TicketId,
    lifetime: TimeFrame,
    refs: u32,
    state: ResourceState,
    released: bool,
    ready: bool,
    constant: bool,
    survives_cull: bool,
}

impl RenderResource {
    pub fn producer(&self) -> Option<PassId> {
        self.producer
    }

    pub fn ticket(&self) -> TicketId {
        self.ticket
    }

    pub fn lifetime(&self) -> &TimeFrame {
        &self.lifetime
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.state, ResourceState::Virtual)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.state, ResourceState::Undefined)
    }

    /// Still part of this frame: not released and not culled.
    pub fn is_used(&self) -> bool {
        !self.released
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn survives_cull(&self) -> bool {
        self.survives_cull
    }
}

/// Per-frame usage of a pass.
#[derive(Debug, Default, Clone)]
struct PassUsage {
    /// Outputs still alive. The pass is culled when this reaches zero.
    refs: u32,
    inputs: Vec<TicketId>,
    outputs: Vec<usize>,
    used: bool,
}

/// Result of a culling sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullSummary {
    pub resources_culled: usize,
    pub passes_culled: usize,
}

/// Readiness of a pass input while a frame runs asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputStatus {
    pub ready: bool,
    /// Queue the resource is produced on.
    pub thread: usize,
}

/// Pooled object held for a shared output after its frame ended
#[derive(Debug, Clone, Copy)]
struct ExportedObject {
    object: ObjectId,
    dispose: bool,
}

/// Registry of the current frame's render resources.
pub struct ResourceList {
    tickets: TicketTable,
    resources: Vec<RenderResource>,
    passes: HashMap<PassId, PassUsage>,
    /// Inputs of passes that ran before their producer finished
    deferred: Vec<TicketId>,
    /// Kept across frames until replaced or withdrawn
    exported: HashMap<TicketId, ExportedObject>,
    generation: u32,
    objects: Arc<Mutex<RenderObjectMap>>,
}

impl ResourceList {
    pub fn new(objects: Arc<Mutex<RenderObjectMap>>) -> Self {
        Self {
            tickets: TicketTable::new(),
            resources: Vec::new(),
            passes: HashMap::new(),
            deferred: Vec::new(),
            exported: HashMap::new(),
            generation: 0,
            objects,
        }
    }

    pub fn tickets(&self) -> &TicketTable {
        &self.tickets
    }

    pub fn tickets_mut(&mut self) -> &mut TicketTable {
        &mut self.tickets
    }

    pub fn objects(&self) -> &Arc<Mutex<RenderObjectMap>> {
        &self.objects
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Resources declared this frame, including released ones.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources still in use this frame.
    pub fn live_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_used()).count()
    }

    /// Start a new frame. Indices handed out in earlier frames become stale.
    pub fn begin_frame(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.resources.clear();
        self.passes.clear();
        self.deferred.clear();
    }

    /// Register a pass taking part in this frame.
    pub fn begin_pass(&mut self, pass: PassId) {
        self.passes.insert(
            pass,
            PassUsage {
                used: true,
                ..PassUsage::default()
            },
        );
    }

    /// Release every resource still alive and forget the frame's passes.
    pub fn end_frame(&mut self) -> FrameGraphResult<()> {
        let mut first_error = None;
        for index in 0..self.resources.len() {
            if self.resources[index].released {
                continue;
            }
            if let Err(err) = self.remove(index) {
                log::error!("Failed to release resource at frame end: {}", err);
                first_error.get_or_insert(err);
            }
        }
        self.passes.clear();
        self.deferred.clear();
        first_error.map_or(Ok(()), Err)
    }

    fn locate(&self, id: TicketId) -> FrameGraphResult<usize> {
        let name = || self.tickets.name(id).to_string();
        let index = self
            .tickets
            .world_index(id)
            .ok_or_else(|| FrameGraphError::InvalidTicket(name()))?;
        if index.generation != self.generation {
            return Err(FrameGraphError::StaleTicket(name()));
        }
        let index = index.index as usize;
        if index >= self.resources.len() {
            return Err(FrameGraphError::InvalidTicket(name()));
        }
        Ok(index)
    }

    fn locate_used(&self, id: TicketId) -> FrameGraphResult<usize> {
        let index = self.locate(id)?;
        if self.resources[index].released {
            return Err(FrameGraphError::ResourceUnused(
                self.tickets.name(id).to_string(),
            ));
        }
        Ok(index)
    }

    /// Whether `id` locates a resource declared this frame.
    pub fn is_declared(&self, id: TicketId) -> bool {
        self.locate(id).is_ok()
    }

    pub fn resource(&self, id: TicketId) -> FrameGraphResult<&RenderResource> {
        self.locate(id).map(|i| &self.resources[i])
    }

    fn push(&mut self, ticket: TicketId, resource: RenderResource) -> FrameGraphResult<usize> {
        if let Some(local) = self.tickets.local_index(ticket) {
            if local.generation == self.generation {
                return Err(FrameGraphError::AlreadyDeclared(
                    self.tickets.name(ticket).to_string(),
                ));
            }
        }
        let index = self.resources.len();
        self.resources.push(resource);
        self.tickets.set_local_index(
            ticket,
            Some(ResourceIndex {
                generation: self.generation,
                index: index as u32,
            }),
        );
        Ok(index)
    }

    /// Declare a resource produced at `index` and bind it to `ticket`.
    pub fn declare(
        &mut self,
        producer: Option<PassId>,
        index: PassIndex,
        ticket: TicketId,
        def: SharedDef,
    ) -> FrameGraphResult<()> {
        let (type_id, ticket_type) = self
            .tickets
            .type_info(ticket)
            .ok_or_else(|| FrameGraphError::InvalidTicket(ticket.to_string()))?;
        if type_id != def.object_type_id() {
            return Err(FrameGraphError::ResourceTypeMismatch {
                name: self.tickets.name(ticket).to_string(),
                expected: ticket_type,
                found: def.object_type_name(),
            });
        }

        let value_type = def.object_type_name();
        let slot = self.push(
            ticket,
            RenderResource {
                producer,
                def: Some(def),
                value_type,
                ticket,
                lifetime: TimeFrame::new(index),
                refs: 0,
                state: ResourceState::Virtual,
                released: false,
                ready: false,
                constant: false,
                survives_cull: false,
            },
        )?;
        if let Some(pass) = producer {
            let usage = self.passes.entry(pass).or_insert_with(|| PassUsage {
                used: true,
                ..PassUsage::default()
            });
            usage.refs += 1;
            usage.outputs.push(slot);
        }
        log::trace!("Declared '{}' at {:?}", self.tickets.name(ticket), index);
        Ok(())
    }

    /// Declare a producer-less resource holding a concrete value.
    pub fn import<T: Send + Sync + 'static>(
        &mut self,
        index: PassIndex,
        ticket: &ResourceTicket<T>,
        value: T,
    ) -> FrameGraphResult<()> {
        self.import_erased(index, ticket.id(), Arc::new(value), type_name::<T>())
    }

    pub(crate) fn import_erased(
        &mut self,
        index: PassIndex,
        ticket: TicketId,
        value: ErasedValue,
        value_type: &'static str,
    ) -> FrameGraphResult<()> {
        if let Some((type_id, expected)) = self.tickets.type_info(ticket) {
            if type_id != (*value).type_id() {
                return Err(FrameGraphError::ResourceTypeMismatch {
                    name: self.tickets.name(ticket).to_string(),
                    expected,
                    found: value_type,
                });
            }
        }
        self.push(
            ticket,
            RenderResource {
                producer: None,
                def: None,
                value_type,
                ticket,
                lifetime: TimeFrame::new(index),
                refs: 0,
                state: ResourceState::Primitive(value),
                released: false,
                ready: true,
                constant: false,
                survives_cull: false,
            },
        )?;
        log::trace!("Imported '{}'", self.tickets.name(ticket));
        Ok(())
    }

    /// Record that the pass `consumer` at `index` uses the resource.
    pub fn reference(
        &mut self,
        consumer: PassId,
        index: PassIndex,
        ticket: TicketId,
    ) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket)?;
        let resource = &mut self.resources[slot];
        resource.refs += 1;
        resource.lifetime.extend_to(index);
        self.passes
            .entry(consumer)
            .or_insert_with(|| PassUsage {
                used: true,
                ..PassUsage::default()
            })
            .inputs
            .push(ticket);
        Ok(())
    }

    /// Pin the object the ticket held last frame for the pass at `index`.
    /// Returns `false` when there is nothing to pin.
    pub fn reserve(&mut self, index: PassIndex, ticket: TicketId) -> FrameGraphResult<bool> {
        let slot = self.locate_used(ticket)?;
        let owner = self.resources[slot].ticket;
        match self.tickets.object_id(owner) {
            Some(object) => Ok(self.objects.lock().reserve(object, index)),
            None => Ok(false),
        }
    }

    /// Return the resource's value, binding a render object first if the
    /// resource is still virtual. Repeated acquires return the same value.
    pub fn acquire_erased(&mut self, ticket: TicketId) -> FrameGraphResult<ErasedValue> {
        let slot = self.locate_used(ticket)?;
        let resource = &self.resources[slot];
        let def = match &resource.state {
            ResourceState::Bound { value, .. } | ResourceState::Primitive(value) => {
                return Ok(Arc::clone(value));
            }
            ResourceState::Undefined => {
                return Err(FrameGraphError::UndefinedResource(
                    self.tickets.name(ticket).to_string(),
                ));
            }
            ResourceState::Virtual => match &resource.def {
                Some(def) => Arc::clone(def),
                None => {
                    return Err(FrameGraphError::UndefinedResource(
                        self.tickets.name(ticket).to_string(),
                    ))
                }
            },
        };
        let owner = resource.ticket;
        let lifetime = resource.lifetime;
        let constant = resource.constant;
        let hint = self.tickets.object_id(owner);

        let allocation = {
            let mut objects = self.objects.lock();
            let allocation = objects.allocate(&def, &lifetime, hint)?;
            if constant {
                objects.set_constant(allocation.id)?;
            }
            allocation
        };
        self.tickets.set_object_id(owner, Some(allocation.id));
        log::trace!(
            "Bound '{}' to object {} ({:?})",
            self.tickets.name(owner),
            allocation.id,
            allocation.kind
        );
        self.resources[slot].state = ResourceState::Bound {
            object: allocation.id,
            value: Arc::clone(&allocation.value),
        };
        Ok(allocation.value)
    }

    /// Typed [`acquire_erased`](Self::acquire_erased).
    pub fn acquire<T: Clone + 'static>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<T> {
        let value = self.acquire_erased(ticket.id())?;
        let found = self.resource(ticket.id()).map_or("?", |r| r.value_type);
        downcast_value::<T>(value.as_ref()).ok_or_else(|| FrameGraphError::ResourceTypeMismatch {
            name: self.tickets.name(ticket.id()).to_string(),
            expected: type_name::<T>(),
            found,
        })
    }

    /// Current value of a bound or primitive resource, without allocating.
    pub fn value(&self, ticket: TicketId) -> Option<ErasedValue> {
        let slot = self.locate(ticket).ok()?;
        let resource = &self.resources[slot];
        if resource.released {
            return None;
        }
        match &resource.state {
            ResourceState::Bound { value, .. } | ResourceState::Primitive(value) => {
                Some(Arc::clone(value))
            }
            _ => None,
        }
    }

    /// Value of a shared output, handed to the shared scope.
    ///
    /// A pooled object behind the output stays acquired past the end of the
    /// frame, so no other resource is bound to it while other graphs read
    /// it. The object exported earlier for the same ticket goes back to the
    /// pool.
    pub fn export(&mut self, ticket: TicketId) -> Option<ErasedValue> {
        let slot = self.locate_used(ticket).ok()?;
        let resource = &mut self.resources[slot];
        let (object, value) = match &resource.state {
            ResourceState::Bound { object, value } => (*object, Arc::clone(value)),
            ResourceState::Primitive(value) => return Some(Arc::clone(value)),
            _ => return None,
        };
        let dispose = resource
            .def
            .as_ref()
            .is_some_and(|def| def.disposes_on_release());
        resource.state = ResourceState::Primitive(Arc::clone(&value));
        log::trace!("Exported object {} for '{}'", object, self.tickets.name(ticket));
        if let Some(previous) = self.exported.insert(ticket, ExportedObject { object, dispose }) {
            self.release_exported(previous);
        }
        Some(value)
    }

    /// Return the object held for a shared output that is no longer published.
    pub fn withdraw_export(&mut self, ticket: TicketId) {
        if let Some(exported) = self.exported.remove(&ticket) {
            self.release_exported(exported);
        }
    }

    /// Objects held for shared outputs
    pub fn exported_count(&self) -> usize {
        self.exported.len()
    }

    fn release_exported(&self, exported: ExportedObject) {
        // Gone already when the pool was disposed.
        if let Err(err) = self.objects.lock().release(exported.object, exported.dispose) {
            log::debug!("Exported object {} not released: {}", exported.object, err);
        }
    }

    /// Drop one reference. The resource is removed once none remain.
    pub fn release(&mut self, ticket: TicketId) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket)?;
        let resource = &mut self.resources[slot];
        resource.refs = resource.refs.saturating_sub(1);
        if resource.refs == 0 {
            self.remove(slot)?;
        }
        Ok(())
    }

    fn remove(&mut self, slot: usize) -> FrameGraphResult<()> {
        let resource = &mut self.resources[slot];
        if resource.released {
            return Ok(());
        }
        resource.released = true;
        if let ResourceState::Bound { object, .. } = resource.state {
            let dispose = resource
                .def
                .as_ref()
                .is_some_and(|def| def.disposes_on_release());
            self.objects.lock().release(object, dispose)?;
        }
        Ok(())
    }

    pub fn set_undefined(&mut self, ticket: TicketId) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket)?;
        let resource = &mut self.resources[slot];
        match resource.state {
            ResourceState::Virtual | ResourceState::Undefined => {
                resource.state = ResourceState::Undefined;
                Ok(())
            }
            _ => Err(FrameGraphError::DefinedAndUndefined(
                self.tickets.name(ticket).to_string(),
            )),
        }
    }

    /// Give a declared resource a concrete value instead of a pooled object.
    pub fn set_primitive<T: Send + Sync + 'static>(
        &mut self,
        ticket: &ResourceTicket<T>,
        value: T,
    ) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket.id())?;
        let resource = &mut self.resources[slot];
        match resource.state {
            ResourceState::Undefined => Err(FrameGraphError::DefinedAndUndefined(
                self.tickets.name(ticket.id()).to_string(),
            )),
            ResourceState::Bound { .. } => Err(FrameGraphError::AlreadyDeclared(
                self.tickets.name(ticket.id()).to_string(),
            )),
            _ => {
                resource.state = ResourceState::Primitive(Arc::new(value));
                resource.value_type = type_name::<T>();
                Ok(())
            }
        }
    }

    /// Keep the backing object out of reallocation until the frame ends.
    pub fn set_constant(&mut self, ticket: TicketId) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket)?;
        let resource = &mut self.resources[slot];
        resource.constant = true;
        if let ResourceState::Bound { object, .. } = resource.state {
            self.objects.lock().set_constant(object)?;
        }
        Ok(())
    }

    pub fn set_survives_reference_cull(&mut self, ticket: TicketId) -> FrameGraphResult<()> {
        let slot = self.locate_used(ticket)?;
        self.resources[slot].survives_cull = true;
        Ok(())
    }

    /// Remove every resource nobody references, cascading backwards through
    /// producers that lose their last output. Runs to a fixed point.
    pub fn cull_unreferenced(&mut self) -> FrameGraphResult<CullSummary> {
        let mut summary = CullSummary::default();
        let mut queue: VecDeque<usize> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.released && r.refs == 0 && !r.survives_cull)
            .map(|(i, _)| i)
            .collect();

        while let Some(slot) = queue.pop_front() {
            if self.resources[slot].released {
                continue;
            }
            self.remove(slot)?;
            summary.resources_culled += 1;

            let Some(producer) = self.resources[slot].producer else {
                continue;
            };
            let Some(usage) = self.passes.get_mut(&producer) else {
                continue;
            };
            if !usage.used {
                continue;
            }
            usage.refs = usage.refs.saturating_sub(1);
            if usage.refs > 0 {
                continue;
            }
            usage.used = false;
            summary.passes_culled += 1;
            let inputs = std::mem::take(&mut usage.inputs);
            let outputs = usage.outputs.clone();

            for input in inputs {
                let Ok(index) = self.locate(input) else {
                    continue;
                };
                let resource = &mut self.resources[index];
                if resource.released {
                    continue;
                }
                resource.refs = resource.refs.saturating_sub(1);
                if resource.refs == 0 && !resource.survives_cull {
                    queue.push_back(index);
                }
            }
            queue.extend(outputs.into_iter().filter(|&o| !self.resources[o].released));
        }

        if summary.resources_culled > 0 {
            log::debug!(
                "Culled {} resources and {} passes",
                summary.resources_culled,
                summary.passes_culled
            );
        }
        Ok(summary)
    }

    /// Whether the pass survived culling this frame.
    pub fn is_pass_used(&self, pass: PassId) -> bool {
        self.passes.get(&pass).is_some_and(|u| u.used)
    }

    /// Tickets the pass referenced this frame.
    pub fn pass_inputs(&self, pass: PassId) -> &[TicketId] {
        self.passes.get(&pass).map_or(&[], |u| u.inputs.as_slice())
    }

    pub fn input_status(&self, ticket: TicketId) -> InputStatus {
        match self.locate(ticket) {
            Ok(slot) => {
                let resource = &self.resources[slot];
                InputStatus {
                    ready: resource.ready || resource.released || resource.producer.is_none(),
                    thread: resource.lifetime.thread(),
                }
            }
            // Nothing to wait for; acquiring it reports the problem.
            Err(_) => InputStatus {
                ready: true,
                thread: 0,
            },
        }
    }

    /// Mark the pass's outputs ready and drop the references it held.
    ///
    /// An input whose producer has not finished yet keeps its reference until
    /// the producer completes, so its object is not recycled while written.
    pub fn complete_pass(&mut self, pass: PassId) -> FrameGraphResult<()> {
        let Some(usage) = self.passes.get_mut(&pass) else {
            return Ok(());
        };
        let inputs = std::mem::take(&mut usage.inputs);
        let outputs = usage.outputs.clone();
        for slot in outputs {
            self.resources[slot].ready = true;
        }
        let deferred = std::mem::take(&mut self.deferred);
        for input in inputs.into_iter().chain(deferred) {
            let pending = self.locate(input).is_ok_and(|slot| {
                let resource = &self.resources[slot];
                !resource.ready && !resource.released && resource.producer.is_some()
            });
            if pending {
                self.deferred.push(input);
            } else {
                self.release(input)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceList")
            .field("generation", &self.generation)
            .field("resources", &self.resources.len())
            .field("live", &self.live_count())
            .field("passes", &self.passes.len())
            .finish()
    }
}

fn downcast_value<T: Clone + 'static>(value: &(dyn Any + Send + Sync)) -> Option<T> {
    value.downcast_ref::<T>().cloned()
}

/// Resource list shared by the pass queues of a running frame, paired with
/// the condition variable queues wait on for input readiness.
#[derive(Debug)]
pub struct FrameResources {
    list: Mutex<ResourceList>,
    ready: Condvar,
}

impl FrameResources {
    pub fn new(list: ResourceList) -> Self {
        Self {
            list: Mutex::new(list),
            ready: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ResourceList> {
        self.list.lock()
    }

    /// Wake every queue waiting for inputs.
    pub fn notify(&self) {
        self.ready.notify_all();
    }

    /// Block until notified or `deadline` passes. Returns `true` if the wait
    /// timed out.
    pub fn wait_until(&self, guard: &mut MutexGuard<'_, ResourceList>, deadline: Instant) -> bool {
        self.ready.wait_until(guard, deadline).timed_out()
    }
}
