//! Frame graph construction, linking and per-frame execution

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::RenderDevice;
use crate::config::FrameGraphConfig;
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::executor::{execute_queues, ExecutionState, FrameContext, PassQueue};
use crate::render_graph::index::PassIndex;
use crate::render_graph::object::{MapStatistics, RenderObjectMap};
use crate::render_graph::pass::*;
use crate::render_graph::resource::{FrameResources, ResourceList};
use crate::render_graph::shared::{GraphId, SharedScope};
use crate::render_graph::ticket::{TicketId, TicketRole, TicketTable};

/// Summary of one executed frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub passes_executed: usize,
    pub passes_culled: usize,
    pub resources_declared: usize,
    pub resources_culled: usize,
}

/// The main frame graph structure
///
/// Passes are added once and executed every frame. The graph is a small state
/// machine: it must be finalized before each [`execute`](Self::execute), which
/// clears the flag again so the same instance can be rebuilt and reused.
pub struct FrameGraph {
    id: GraphId,
    device: Arc<dyn RenderDevice>,
    objects: Arc<Mutex<RenderObjectMap>>,
    resources: FrameResources,
    scope: SharedScope,
    config: FrameGraphConfig,
    queues: Vec<PassQueue>,
    geometry: Option<Arc<dyn GeometryHandler>>,
    next_pass_id: u32,
    next_seq: u64,
    finalized: bool,
}

enum SourceLookup {
    Found(TicketId),
    Missing,
    Unknown,
}

impl FrameGraph {
    /// Create a graph with its own render object pool.
    pub fn new(device: Arc<dyn RenderDevice>, scope: SharedScope, config: FrameGraphConfig) -> Self {
        let objects = RenderObjectMap::new(Arc::clone(&device))
            .with_default_timeout(config.object_idle_timeout);
        Self::with_object_map(device, Arc::new(Mutex::new(objects)), scope, config)
    }

    /// Create a graph sharing an existing render object pool.
    pub fn with_object_map(
        device: Arc<dyn RenderDevice>,
        objects: Arc<Mutex<RenderObjectMap>>,
        scope: SharedScope,
        config: FrameGraphConfig,
    ) -> Self {
        let resources = FrameResources::new(ResourceList::new(Arc::clone(&objects)));
        Self {
            id: GraphId::next(),
            device,
            objects,
            resources,
            scope,
            config,
            queues: vec![PassQueue::new(PassIndex::MAIN)],
            geometry: None,
            next_pass_id: 0,
            next_seq: 0,
            finalized: false,
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn scope(&self) -> &SharedScope {
        &self.scope
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    pub fn object_map(&self) -> &Arc<Mutex<RenderObjectMap>> {
        &self.objects
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Add a pass at the end of the main queue
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> FrameGraphResult<PassId> {
        self.add_pass_to_queue(PassIndex::MAIN, pass)
    }

    /// Add a pass at the end of queue `thread`, creating the queue if needed
    pub fn add_pass_to_queue<P: RenderPass + 'static>(
        &mut self,
        thread: usize,
        pass: P,
    ) -> FrameGraphResult<PassId> {
        let position = self.queues.get(thread).map_or(0, PassQueue::len);
        self.insert_boxed(PassIndex::new(thread, position), Box::new(pass))
    }

    /// Insert a pass at an explicit coordinate. Later passes in the queue
    /// shift one position back.
    pub fn insert_pass<P: RenderPass + 'static>(
        &mut self,
        index: PassIndex,
        pass: P,
    ) -> FrameGraphResult<PassId> {
        self.insert_boxed(index, Box::new(pass))
    }

    fn insert_boxed(&mut self, index: PassIndex, mut pass: Box<dyn RenderPass>) -> FrameGraphResult<PassId> {
        let len = self.queues.get(index.thread).map_or(0, PassQueue::len);
        if index.position > len {
            return Err(FrameGraphError::InvalidPassIndex {
                thread: index.thread,
                position: index.position,
            });
        }
        let name = pass.name().to_string();
        if self.locate_pass(&name).is_some() {
            return Err(FrameGraphError::DuplicatePassName(name));
        }

        let id = PassId(self.next_pass_id);
        let (inputs, outputs) = {
            let mut list = self.resources.lock();
            let mut builder = PassBuilder::new(list.tickets_mut(), id);
            let init = pass.init(&mut builder);
            let (inputs, outputs) = builder.finish();
            let linked = init
                .and_then(|()| self.link_inputs(list.tickets_mut(), &name, &inputs))
                .and_then(|()| self.publish_outputs(list.tickets(), &outputs));
            if let Err(err) = linked {
                self.unpublish_outputs(list.tickets(), &outputs);
                for &ticket in inputs.iter().chain(&outputs) {
                    list.tickets_mut().retire(ticket);
                }
                return Err(err);
            }
            (inputs, outputs)
        };

        while self.queues.len() <= index.thread {
            let thread = self.queues.len();
            self.queues.push(PassQueue::new(thread));
        }
        let queue = &mut self.queues[index.thread];
        queue.passes.insert(
            index.position,
            PassNode {
                id,
                name,
                seq: self.next_seq,
                index,
                enabled: true,
                inputs,
                outputs,
                pass,
            },
        );
        queue.reindex();
        self.next_pass_id += 1;
        self.next_seq += 1;
        self.finalized = false;
        log::debug!(
            "Added pass '{}' at {:?}",
            self.queues[index.thread].passes[index.position].name,
            index
        );
        Ok(id)
    }

    /// Remove a pass by name. Inputs linked to its outputs are disconnected.
    pub fn remove_pass(&mut self, name: &str) -> FrameGraphResult<()> {
        let (thread, position) = self
            .locate_pass(name)
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))?;
        let mut node = self.queues[thread].passes.remove(position);
        self.queues[thread].reindex();
        self.detach_node(&node);
        node.pass.cleanup();
        self.finalized = false;
        log::debug!("Removed pass '{}'", name);
        Ok(())
    }

    /// Remove every pass
    pub fn clear(&mut self) {
        let queues = std::mem::replace(&mut self.queues, vec![PassQueue::new(PassIndex::MAIN)]);
        for queue in queues {
            for mut node in queue.passes {
                self.detach_node(&node);
                node.pass.cleanup();
            }
        }
        self.finalized = false;
    }

    fn detach_node(&self, node: &PassNode) {
        let mut list = self.resources.lock();
        self.unpublish_outputs(list.tickets(), &node.outputs);
        for &output in &node.outputs {
            list.withdraw_export(output);
            for target in list.tickets_mut().retire(output) {
                log::debug!(
                    "Disconnected input '{}' from removed pass '{}'",
                    list.tickets().name(target),
                    node.name
                );
            }
        }
        for &input in &node.inputs {
            list.tickets_mut().retire(input);
        }
    }

    /// Enable or disable a pass. Disabled passes are neither prepared nor run.
    pub fn set_pass_enabled(&mut self, name: &str, enabled: bool) -> FrameGraphResult<()> {
        let (thread, position) = self
            .locate_pass(name)
            .ok_or_else(|| FrameGraphError::UnknownPass(name.to_string()))?;
        self.queues[thread].passes[position].enabled = enabled;
        Ok(())
    }

    fn locate_pass(&self, name: &str) -> Option<(usize, usize)> {
        self.queues.iter().enumerate().find_map(|(thread, queue)| {
            queue
                .passes
                .iter()
                .position(|node| node.name == name)
                .map(|position| (thread, position))
        })
    }

    fn node(&self, name: &str) -> Option<&PassNode> {
        self.locate_pass(name)
            .map(|(thread, position)| &self.queues[thread].passes[position])
    }

    /// Schedule coordinate of a pass
    pub fn pass_index(&self, name: &str) -> Option<PassIndex> {
        self.node(name).map(PassNode::index)
    }

    /// Downcast a registered pass
    pub fn pass<P: RenderPass + 'static>(&self, name: &str) -> Option<&P> {
        self.node(name)?.pass.as_any().downcast_ref::<P>()
    }

    pub fn pass_mut<P: RenderPass + 'static>(&mut self, name: &str) -> Option<&mut P> {
        let (thread, position) = self.locate_pass(name)?;
        self.queues[thread].passes[position]
            .pass
            .as_any_mut()
            .downcast_mut::<P>()
    }

    pub fn queues(&self) -> &[PassQueue] {
        &self.queues
    }

    pub fn pass_count(&self) -> usize {
        self.queues.iter().map(PassQueue::len).sum()
    }

    /// Pass names in addition order
    pub fn pass_names(&self) -> Vec<&str> {
        let mut nodes: Vec<&PassNode> = self.queues.iter().flat_map(|q| q.passes.iter()).collect();
        nodes.sort_by_key(|node| node.seq);
        nodes.into_iter().map(|node| node.name.as_str()).collect()
    }

    /// Find the output a sink names: `"pass.output"`, or a bare output name
    /// searched among registered passes, latest first.
    fn find_source(&self, tickets: &TicketTable, source: &str) -> SourceLookup {
        if let Some((pass, output)) = source.split_once('.') {
            return match self
                .node(pass)
                .and_then(|node| tickets.find_output(node.id, output))
            {
                Some(ticket) => SourceLookup::Found(ticket),
                None => SourceLookup::Unknown,
            };
        }
        let mut nodes: Vec<&PassNode> = self.queues.iter().flat_map(|q| q.passes.iter()).collect();
        nodes.sort_by_key(|node| std::cmp::Reverse(node.seq));
        nodes
            .into_iter()
            .find_map(|node| tickets.find_output(node.id, source))
            .map_or(SourceLookup::Missing, SourceLookup::Found)
    }

    fn link_inputs(&self, tickets: &mut TicketTable, pass: &str, inputs: &[TicketId]) -> FrameGraphResult<()> {
        for &input in inputs {
            let Some(TicketRole::Input {
                source,
                required,
                shared: false,
            }) = tickets.role(input).cloned()
            else {
                continue;
            };
            match self.find_source(tickets, &source) {
                SourceLookup::Found(found) => tickets
                    .set_source(input, Some(found))
                    .map_err(|err| attribute_to_pass(err, pass))?,
                SourceLookup::Unknown => {
                    return Err(FrameGraphError::UnknownSource {
                        pass: pass.to_string(),
                        input: tickets.name(input).to_string(),
                        source_name: source,
                    })
                }
                // Resolved against the shared scope at finalize.
                SourceLookup::Missing if self.scope.contains(&source) => {}
                SourceLookup::Missing if required => {
                    return Err(FrameGraphError::UnresolvedSink {
                        pass: pass.to_string(),
                        input: tickets.name(input).to_string(),
                    })
                }
                SourceLookup::Missing => {}
            }
        }
        Ok(())
    }

    fn publish_outputs(&self, tickets: &TicketTable, outputs: &[TicketId]) -> FrameGraphResult<()> {
        for &output in outputs {
            if !matches!(tickets.role(output), Some(TicketRole::Output { shared: true })) {
                continue;
            }
            if let Some((type_id, type_name)) = tickets.type_info(output) {
                self.scope
                    .publish(tickets.name(output), self.id, output, type_id, type_name)?;
            }
        }
        Ok(())
    }

    fn unpublish_outputs(&self, tickets: &TicketTable, outputs: &[TicketId]) {
        for &output in outputs {
            if matches!(tickets.role(output), Some(TicketRole::Output { shared: true })) {
                self.scope.unpublish(tickets.name(output), self.id);
            }
        }
    }

    /// Validate links and resolve inputs against the shared scope.
    ///
    /// Every required input must end up linked to a source or imported from
    /// the scope.
    pub fn finalize(&mut self) -> FrameGraphResult<()> {
        if self.finalized {
            return Err(FrameGraphError::AlreadyFinalized);
        }
        {
            let mut list = self.resources.lock();
            for queue in &self.queues {
                for node in &queue.passes {
                    for &input in &node.inputs {
                        self.resolve_input(list.tickets_mut(), node, input)?;
                    }
                }
            }
        }
        self.finalized = true;
        log::debug!("Finalized frame graph with {} passes", self.pass_count());
        Ok(())
    }

    fn resolve_input(&self, tickets: &mut TicketTable, node: &PassNode, input: TicketId) -> FrameGraphResult<()> {
        let Some(TicketRole::Input {
            source,
            required,
            shared,
        }) = tickets.role(input).cloned()
        else {
            return Ok(());
        };
        if !shared && tickets.has_source(input) {
            return Ok(());
        }

        let input_name = tickets.name(input).to_string();
        let Some(entry) = self.scope.lookup(&source) else {
            if required {
                return Err(FrameGraphError::UnresolvedSink {
                    pass: node.name.clone(),
                    input: input_name,
                });
            }
            tickets.set_import(input, None);
            return tickets.set_source(input, None);
        };

        let Some((type_id, expected)) = tickets.type_info(input) else {
            return Ok(());
        };
        if type_id != entry.type_id {
            return Err(FrameGraphError::TypeMismatch {
                pass: node.name.clone(),
                input: input_name,
                expected,
                found: entry.type_name,
            });
        }
        match (entry.owner, entry.ticket) {
            (Some(owner), Some(ticket)) if owner == self.id => {
                tickets.set_import(input, None);
                tickets
                    .set_source(input, Some(ticket))
                    .map_err(|err| attribute_to_pass(err, &node.name))
            }
            _ => {
                tickets.set_source(input, None)?;
                tickets.set_import(input, Some(source));
                Ok(())
            }
        }
    }

    /// Passes in addition order, skipping disabled ones
    fn prepare_order(&self) -> Vec<(usize, usize)> {
        let mut order: Vec<(u64, usize, usize)> = self
            .queues
            .iter()
            .enumerate()
            .flat_map(|(thread, queue)| {
                queue
                    .passes
                    .iter()
                    .enumerate()
                    .filter(|(_, node)| node.enabled)
                    .map(move |(position, node)| (node.seq, thread, position))
            })
            .collect();
        order.sort_unstable();
        order.into_iter().map(|(_, t, p)| (t, p)).collect()
    }

    fn prepare_frame(&mut self, report: &mut FrameReport) -> FrameGraphResult<()> {
        let order = self.prepare_order();
        let mut list = self.resources.lock();
        list.begin_frame();

        for (thread, position) in order {
            let node = &mut self.queues[thread].passes[position];
            list.begin_pass(node.id);
            import_shared_inputs(&mut list, &self.scope, node)?;
            {
                let mut ctx = PrepareContext {
                    list: &mut list,
                    pass: node.id,
                    index: node.index,
                    name: &node.name,
                };
                node.pass.prepare(&mut ctx)?;
            }
            // Consumed by other graphs, so never culled here.
            for &output in &node.outputs {
                let shared = matches!(list.tickets().role(output), Some(TicketRole::Output { shared: true }));
                if shared && list.is_declared(output) {
                    list.set_survives_reference_cull(output)?;
                }
            }
        }

        let summary = list.cull_unreferenced()?;
        report.passes_culled = summary.passes_culled;
        report.resources_culled = summary.resources_culled;
        report.resources_declared = list.len();
        Ok(())
    }

    /// Prepare, cull and run every pass for one frame.
    pub fn execute(&mut self) -> FrameGraphResult<FrameReport> {
        if !self.finalized {
            return Err(FrameGraphError::NotFinalized);
        }
        self.finalized = false;

        let mut report = FrameReport::default();
        if let Err(err) = self.prepare_frame(&mut report) {
            if let Err(end) = self.resources.lock().end_frame() {
                log::error!("Failed to end frame after prepare error: {}", end);
            }
            self.reset_passes();
            return Err(err);
        }

        let active_queues = {
            let list = self.resources.lock();
            self.queues
                .iter()
                .filter(|q| q.passes.iter().any(|n| n.enabled && list.is_pass_used(n.id)))
                .count()
        };
        let state = ExecutionState::new(self.queues.len(), active_queues > 1);
        let ctx = FrameContext {
            resources: &self.resources,
            state: &state,
            device: self.device.as_ref(),
            geometry: self.geometry.as_deref(),
            scope: &self.scope,
            config: &self.config,
        };
        report.passes_executed = execute_queues(&mut self.queues, &ctx);

        let ended = self.resources.lock().end_frame();
        self.reset_passes();
        if let Some(err) = state.take_error() {
            return Err(err);
        }
        ended?;
        log::debug!("Executed frame: {:?}", report);
        Ok(report)
    }

    fn reset_passes(&mut self) {
        for queue in &mut self.queues {
            for node in &mut queue.passes {
                node.pass.reset();
            }
        }
    }

    /// Reset every pass and detach the geometry handler
    pub fn reset(&mut self) -> FrameGraphResult<()> {
        if self.finalized {
            return Err(FrameGraphError::AlreadyFinalized);
        }
        self.reset_passes();
        self.geometry = None;
        Ok(())
    }

    pub fn set_geometry_handler(&mut self, handler: Arc<dyn GeometryHandler>) {
        self.geometry = Some(handler);
    }

    pub fn geometry_handler(&self) -> Option<&Arc<dyn GeometryHandler>> {
        self.geometry.as_ref()
    }

    /// Reset the render object pool's per-frame counters
    pub fn begin_render_frame(&self) {
        self.objects.lock().new_frame();
    }

    /// Dispose render objects that stayed idle past their timeout
    pub fn end_render_frame(&self) {
        self.objects.lock().flush_map();
    }

    /// Destroy every pooled render object
    pub fn dispose_all(&self) {
        self.objects.lock().dispose_all();
    }

    pub fn statistics(&self) -> MapStatistics {
        self.objects.lock().statistics()
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        self.clear();
    }
}

fn import_shared_inputs(list: &mut ResourceList, scope: &SharedScope, node: &PassNode) -> FrameGraphResult<()> {
    for &input in &node.inputs {
        let Some(name) = list.tickets().import(input).map(str::to_owned) else {
            continue;
        };
        if list.is_declared(input) {
            continue;
        }
        let required = matches!(
            list.tickets().role(input),
            Some(TicketRole::Input { required: true, .. })
        );
        match scope.lookup(&name).and_then(|e| e.value.map(|v| (v, e.type_name))) {
            Some((value, type_name)) => list.import_erased(node.index, input, value, type_name)?,
            None if required => {
                return Err(FrameGraphError::UnresolvedSink {
                    pass: node.name.clone(),
                    input: name,
                })
            }
            None => {}
        }
    }
    Ok(())
}

fn attribute_to_pass(err: FrameGraphError, pass: &str) -> FrameGraphError {
    match err {
        FrameGraphError::TypeMismatch {
            input,
            expected,
            found,
            ..
        } => FrameGraphError::TypeMismatch {
            pass: pass.to_string(),
            input,
            expected,
            found,
        },
        other => other,
    }
}
