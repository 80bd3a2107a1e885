//! Render pass definitions for the frame graph

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::backend::RenderDevice;
use crate::error::FrameGraphResult;
use crate::render_graph::binding::{Bindable, MaterialBinder};
use crate::render_graph::definition::{ResourceDef, SharedDef};
use crate::render_graph::index::PassIndex;
use crate::render_graph::resource::{FrameResources, ResourceList};
use crate::render_graph::ticket::{ResourceTicket, TicketId, TicketRole, TicketTable};

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Geometry and material submission surface handed to pass bodies.
///
/// The graph only decides when a pass runs; what it draws goes through here.
pub trait GeometryHandler: Send + Sync {
    /// Submit the geometry for `pass`.
    fn render(&self, pass: &str, device: &dyn RenderDevice) -> FrameGraphResult<()>;
}

/// Context for registering a pass's tickets
pub struct PassBuilder<'a> {
    tickets: &'a mut TicketTable,
    pass: PassId,
    inputs: Vec<TicketId>,
    outputs: Vec<TicketId>,
}

impl<'a> PassBuilder<'a> {
    pub(crate) fn new(tickets: &'a mut TicketTable, pass: PassId) -> Self {
        Self {
            tickets,
            pass,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> (Vec<TicketId>, Vec<TicketId>) {
        (self.inputs, self.outputs)
    }

    fn input<T: 'static>(&mut self, source: &str, required: bool, shared: bool) -> ResourceTicket<T> {
        let ticket = self.tickets.create::<T>(
            source,
            Some(self.pass),
            TicketRole::Input {
                source: source.to_string(),
                required,
                shared,
            },
        );
        self.inputs.push(ticket.id());
        ticket
    }

    fn output<T: 'static>(&mut self, name: &str, shared: bool) -> ResourceTicket<T> {
        let ticket = self
            .tickets
            .create::<T>(name, Some(self.pass), TicketRole::Output { shared });
        self.outputs.push(ticket.id());
        ticket
    }

    /// Declare an output the pass produces
    pub fn add_output<T: 'static>(&mut self, name: &str) -> ResourceTicket<T> {
        self.output(name, false)
    }

    /// Declare an output published to the shared scope under `name`
    pub fn add_shared_output<T: 'static>(&mut self, name: &str) -> ResourceTicket<T> {
        self.output(name, true)
    }

    /// Declare a required input linked to `source`.
    ///
    /// `source` is either `"pass.output"` or a bare output name, which is
    /// looked up among the passes added earlier, latest first, and then in the
    /// shared scope.
    pub fn add_input<T: 'static>(&mut self, source: &str) -> ResourceTicket<T> {
        self.input(source, true, false)
    }

    /// Like [`add_input`](Self::add_input), but the pass runs without it when
    /// no source exists.
    pub fn add_optional_input<T: 'static>(&mut self, source: &str) -> ResourceTicket<T> {
        self.input(source, false, false)
    }

    /// Declare a required input resolved against the shared scope at finalize.
    pub fn add_shared_input<T: 'static>(&mut self, name: &str) -> ResourceTicket<T> {
        self.input(name, true, true)
    }

    pub fn add_optional_shared_input<T: 'static>(&mut self, name: &str) -> ResourceTicket<T> {
        self.input(name, false, true)
    }
}

/// Context for declaring and referencing resources each frame
pub struct PrepareContext<'a> {
    pub(crate) list: &'a mut ResourceList,
    pub(crate) pass: PassId,
    pub(crate) index: PassIndex,
    pub(crate) name: &'a str,
}

impl<'a> PrepareContext<'a> {
    pub fn index(&self) -> PassIndex {
        self.index
    }

    pub fn pass_name(&self) -> &str {
        self.name
    }

    /// Declare the resource behind one of this pass's outputs
    pub fn declare<D: ResourceDef>(
        &mut self,
        ticket: &ResourceTicket<D::Object>,
        def: D,
    ) -> FrameGraphResult<()> {
        self.declare_with(ticket, Arc::new(def))
    }

    /// Declare with a definition shared across frames
    pub fn declare_with<T>(&mut self, ticket: &ResourceTicket<T>, def: SharedDef) -> FrameGraphResult<()> {
        self.list
            .declare(Some(self.pass), self.index, ticket.id(), def)
    }

    /// Declare a producer-less resource from a concrete value
    pub fn import<T: Send + Sync + 'static>(
        &mut self,
        ticket: &ResourceTicket<T>,
        value: T,
    ) -> FrameGraphResult<()> {
        self.list.import(self.index, ticket, value)
    }

    /// Record that this pass uses the resource
    pub fn reference<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<()> {
        self.list.reference(self.pass, self.index, ticket.id())
    }

    /// Reference the resource if it exists this frame
    pub fn reference_optional<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<bool> {
        if !self.list.is_declared(ticket.id()) {
            return Ok(false);
        }
        self.reference(ticket)?;
        Ok(true)
    }

    /// Pin the object this ticket held last frame until this pass claims it
    pub fn reserve<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<bool> {
        self.list.reserve(self.index, ticket.id())
    }

    pub fn set_undefined<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<()> {
        self.list.set_undefined(ticket.id())
    }

    pub fn set_primitive<T: Send + Sync + 'static>(
        &mut self,
        ticket: &ResourceTicket<T>,
        value: T,
    ) -> FrameGraphResult<()> {
        self.list.set_primitive(ticket, value)
    }

    pub fn set_constant<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<()> {
        self.list.set_constant(ticket.id())
    }

    pub fn set_survives_reference_cull<T>(&mut self, ticket: &ResourceTicket<T>) -> FrameGraphResult<()> {
        self.list.set_survives_reference_cull(ticket.id())
    }

    pub fn is_declared<T>(&self, ticket: &ResourceTicket<T>) -> bool {
        self.list.is_declared(ticket.id())
    }
}

/// Context for executing a render pass
pub struct ExecuteContext<'a> {
    pub(crate) resources: &'a FrameResources,
    pub(crate) device: &'a dyn RenderDevice,
    pub(crate) geometry: Option<&'a dyn GeometryHandler>,
    pub(crate) index: PassIndex,
    pub(crate) name: &'a str,
}

impl<'a> ExecuteContext<'a> {
    /// Get the resource behind a ticket, allocating it on first use
    pub fn acquire<T: Clone + 'static>(&self, ticket: &ResourceTicket<T>) -> FrameGraphResult<T> {
        self.resources.lock().acquire(ticket)
    }

    /// Get the resource if it exists this frame and is not undefined
    pub fn acquire_optional<T: Clone + 'static>(
        &self,
        ticket: &ResourceTicket<T>,
    ) -> FrameGraphResult<Option<T>> {
        let mut list = self.resources.lock();
        let available = list
            .resource(ticket.id())
            .is_ok_and(|r| r.is_used() && !r.is_undefined());
        if !available {
            return Ok(None);
        }
        list.acquire(ticket).map(Some)
    }

    /// Acquire a resource and bind it as the material parameter `param`
    pub fn bind<T: Clone + Into<Bindable> + 'static>(
        &self,
        ticket: &ResourceTicket<T>,
        param: &str,
        binder: &mut dyn MaterialBinder,
    ) -> FrameGraphResult<()> {
        self.acquire(ticket)?.into().bind(param, binder)
    }

    pub fn device(&self) -> &dyn RenderDevice {
        self.device
    }

    pub fn geometry_handler(&self) -> Option<&dyn GeometryHandler> {
        self.geometry
    }

    /// Forward to the attached geometry handler, if any
    pub fn render_geometry(&self) -> FrameGraphResult<()> {
        match self.geometry {
            Some(handler) => handler.render(self.name, self.device),
            None => Ok(()),
        }
    }

    pub fn index(&self) -> PassIndex {
        self.index
    }

    pub fn pass_name(&self) -> &str {
        self.name
    }
}

/// Trait for render passes
///
/// A pass registers its tickets once in [`init`](Self::init), declares and
/// references resources every frame in [`prepare`](Self::prepare), and does its
/// work in [`execute`](Self::execute).
pub trait RenderPass: Send {
    /// Get the pass name, unique within a graph
    fn name(&self) -> &str;

    /// Create the pass's input and output tickets
    fn init(&mut self, builder: &mut PassBuilder<'_>) -> FrameGraphResult<()>;

    /// Declare outputs and reference inputs for this frame
    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> FrameGraphResult<()>;

    /// Execute phase
    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> FrameGraphResult<()>;

    /// Clear transient per-frame state
    fn reset(&mut self) {}

    /// Called once when the pass leaves the graph
    fn cleanup(&mut self) {}

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A pass registered in a graph
pub struct PassNode {
    pub(crate) id: PassId,
    pub(crate) name: String,
    /// Addition order, which is also the order passes are prepared in
    pub(crate) seq: u64,
    pub(crate) index: PassIndex,
    pub(crate) enabled: bool,
    pub(crate) inputs: Vec<TicketId>,
    pub(crate) outputs: Vec<TicketId>,
    pub(crate) pass: Box<dyn RenderPass>,
}

impl PassNode {
    pub fn id(&self) -> PassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> PassIndex {
        self.index
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn inputs(&self) -> &[TicketId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TicketId] {
        &self.outputs
    }

    pub fn pass(&self) -> &dyn RenderPass {
        self.pass.as_ref()
    }

    pub fn pass_mut(&mut self) -> &mut dyn RenderPass {
        self.pass.as_mut()
    }

    pub fn reads_ticket(&self, ticket: TicketId) -> bool {
        self.inputs.contains(&ticket)
    }

    pub fn writes_ticket(&self, ticket: TicketId) -> bool {
        self.outputs.contains(&ticket)
    }
}

impl fmt::Debug for PassNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("index", &self.index)
            .field("enabled", &self.enabled)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_roles() {
        let mut table = TicketTable::new();
        let pass = PassId(3);
        let mut builder = PassBuilder::new(&mut table, pass);
        let color = builder.add_output::<u32>("color");
        let depth = builder.add_input::<u32>("gbuffer.depth");
        let lights = builder.add_optional_shared_input::<u32>("lights");
        let (inputs, outputs) = builder.finish();

        assert_eq!(outputs, vec![color.id()]);
        assert_eq!(inputs, vec![depth.id(), lights.id()]);
        assert_eq!(table.find_output(pass, "color"), Some(color.id()));
        assert_eq!(
            table.role(lights.id()),
            Some(&TicketRole::Input {
                source: "lights".to_string(),
                required: false,
                shared: true,
            })
        );
    }
}
