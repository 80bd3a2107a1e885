//! Common utilities for frame graph integration tests.
//!
//! Provides configurable test passes that record what they did, so tests can
//! check execution order, culling and object reuse without a GPU.

use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use redlilium_framegraph::backend::{DummyDevice, RenderDevice, Texture, TextureFormat};
use redlilium_framegraph::{
    ExecuteContext, FrameGraph, FrameGraphConfig, FrameGraphError, FrameGraphResult,
    GeometryHandler, PassBuilder, PrepareContext, RenderPass, ResourceTicket, SharedScope,
    TextureDef, ValueDef,
};

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Names of executed passes, in execution order.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Position of `name` in the log.
#[allow(dead_code)]
pub fn position(log: &ExecutionLog, name: &str) -> Option<usize> {
    log.lock().iter().position(|entry| entry == name)
}

/// A graph on a fresh dummy device.
pub fn graph_with(config: FrameGraphConfig) -> (FrameGraph, Arc<DummyDevice>) {
    init_logging();
    let device = Arc::new(DummyDevice::new());
    let graph = FrameGraph::new(device.clone(), SharedScope::new(), config);
    (graph, device)
}

#[allow(dead_code)]
pub fn graph() -> (FrameGraph, Arc<DummyDevice>) {
    graph_with(FrameGraphConfig::default())
}

/// Run one full frame: lifecycle hooks, finalize and execute.
#[allow(dead_code)]
pub fn run_frame(graph: &mut FrameGraph) -> FrameGraphResult<redlilium_framegraph::FrameReport> {
    graph.begin_render_frame();
    graph.finalize()?;
    let report = graph.execute();
    graph.end_render_frame();
    report
}

struct OutputDesc {
    name: String,
    size: u32,
    shared: bool,
}

struct InputDesc {
    source: String,
    optional: bool,
    shared: bool,
}

/// Texture pass with configurable inputs, outputs and behaviour.
pub struct TestPass {
    name: String,
    outputs: Vec<OutputDesc>,
    inputs: Vec<InputDesc>,
    survives: bool,
    reserves: bool,
    draws: bool,
    fails: bool,
    panics: bool,
    delay: Option<Duration>,
    log: ExecutionLog,
    output_tickets: Vec<ResourceTicket<Texture>>,
    input_tickets: Vec<ResourceTicket<Texture>>,
    /// Every output texture acquired, across frames
    pub acquired: Arc<Mutex<Vec<Texture>>>,
    /// Every input texture read, across frames
    pub read: Arc<Mutex<Vec<Texture>>>,
}

#[allow(dead_code)]
impl TestPass {
    pub fn new(name: &str, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            survives: false,
            reserves: false,
            draws: false,
            fails: false,
            panics: false,
            delay: None,
            log: Arc::clone(log),
            output_tickets: Vec::new(),
            input_tickets: Vec::new(),
            acquired: Arc::new(Mutex::new(Vec::new())),
            read: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn output(mut self, name: &str, size: u32) -> Self {
        self.outputs.push(OutputDesc {
            name: name.to_string(),
            size,
            shared: false,
        });
        self
    }

    pub fn shared_output(mut self, name: &str, size: u32) -> Self {
        self.outputs.push(OutputDesc {
            name: name.to_string(),
            size,
            shared: true,
        });
        self
    }

    pub fn input(mut self, source: &str) -> Self {
        self.inputs.push(InputDesc {
            source: source.to_string(),
            optional: false,
            shared: false,
        });
        self
    }

    pub fn optional_input(mut self, source: &str) -> Self {
        self.inputs.push(InputDesc {
            source: source.to_string(),
            optional: true,
            shared: false,
        });
        self
    }

    /// Read a texture published to the shared scope.
    pub fn shared_input(mut self, name: &str) -> Self {
        self.inputs.push(InputDesc {
            source: name.to_string(),
            optional: false,
            shared: true,
        });
        self
    }

    /// Keep every output alive even when nobody consumes it.
    pub fn survives(mut self) -> Self {
        self.survives = true;
        self
    }

    /// Reserve the objects the outputs held last frame.
    pub fn reserves(mut self) -> Self {
        self.reserves = true;
        self
    }

    pub fn draws(mut self) -> Self {
        self.draws = true;
        self
    }

    pub fn fails(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn sleeps(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl RenderPass for TestPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, builder: &mut PassBuilder<'_>) -> FrameGraphResult<()> {
        for output in &self.outputs {
            self.output_tickets.push(if output.shared {
                builder.add_shared_output(&output.name)
            } else {
                builder.add_output(&output.name)
            });
        }
        for input in &self.inputs {
            self.input_tickets.push(if input.shared {
                builder.add_shared_input(&input.source)
            } else if input.optional {
                builder.add_optional_input(&input.source)
            } else {
                builder.add_input(&input.source)
            });
        }
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> FrameGraphResult<()> {
        for (ticket, desc) in self.output_tickets.iter().zip(&self.outputs) {
            ctx.declare(
                ticket,
                TextureDef::new(desc.size, desc.size, 1, TextureFormat::Rgba8Unorm),
            )?;
            if self.survives {
                ctx.set_survives_reference_cull(ticket)?;
            }
            if self.reserves {
                ctx.reserve(ticket)?;
            }
        }
        for (ticket, desc) in self.input_tickets.iter().zip(&self.inputs) {
            if desc.optional {
                ctx.reference_optional(ticket)?;
            } else {
                ctx.reference(ticket)?;
            }
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> FrameGraphResult<()> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.fails {
            return Err(FrameGraphError::pass_failed(&self.name, "boom"));
        }
        if self.panics {
            panic!("{} blew up", self.name);
        }
        for ticket in &self.input_tickets {
            if let Some(texture) = ctx.acquire_optional(ticket)? {
                self.read.lock().push(texture);
            }
        }
        for ticket in &self.output_tickets {
            let texture = ctx.acquire(ticket)?;
            self.acquired.lock().push(texture);
        }
        if self.draws {
            ctx.render_geometry()?;
        }
        self.log.lock().push(self.name.clone());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Publishes a plain value as a shared output.
pub struct ValueProducer {
    name: String,
    output: String,
    value: f32,
    ticket: Option<ResourceTicket<f32>>,
}

#[allow(dead_code)]
impl ValueProducer {
    pub fn new(name: &str, output: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            output: output.to_string(),
            value,
            ticket: None,
        }
    }
}

impl RenderPass for ValueProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, builder: &mut PassBuilder<'_>) -> FrameGraphResult<()> {
        self.ticket = Some(builder.add_shared_output(&self.output));
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> FrameGraphResult<()> {
        let value = self.value;
        if let Some(ticket) = &self.ticket {
            ctx.declare(ticket, ValueDef::new(move || value))?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> FrameGraphResult<()> {
        if let Some(ticket) = &self.ticket {
            ctx.acquire(ticket)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Reads a shared value and records what it saw.
pub struct ValueConsumer {
    name: String,
    source: String,
    ticket: Option<ResourceTicket<f32>>,
    pub seen: Arc<Mutex<Vec<f32>>>,
}

#[allow(dead_code)]
impl ValueConsumer {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            ticket: None,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl RenderPass for ValueConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, builder: &mut PassBuilder<'_>) -> FrameGraphResult<()> {
        self.ticket = Some(builder.add_shared_input(&self.source));
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> FrameGraphResult<()> {
        if let Some(ticket) = &self.ticket {
            ctx.reference(ticket)?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> FrameGraphResult<()> {
        if let Some(ticket) = &self.ticket {
            let value = ctx.acquire(ticket)?;
            self.seen.lock().push(value);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Geometry handler counting the passes that drew through it.
#[derive(Default)]
pub struct CountingGeometry {
    pub drawn: Mutex<Vec<String>>,
}

impl GeometryHandler for CountingGeometry {
    fn render(&self, pass: &str, _device: &dyn RenderDevice) -> FrameGraphResult<()> {
        self.drawn.lock().push(pass.to_string());
        Ok(())
    }
}
