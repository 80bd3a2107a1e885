//! Pass queue execution
//!
//! Queue 0 runs on the calling thread. Every other queue gets a scoped worker
//! thread. When more than one queue has work the frame is asynchronous and a
//! queue waits for a pass's inputs to become ready before running it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::RenderDevice;
use crate::config::{FrameGraphConfig, WaitTimeoutPolicy};
use crate::error::{FrameGraphError, FrameGraphResult};
use crate::render_graph::pass::{ExecuteContext, GeometryHandler, PassNode};
use crate::render_graph::resource::FrameResources;
use crate::render_graph::shared::SharedScope;
use crate::render_graph::ticket::TicketRole;

/// Ordered passes sharing one thread coordinate
#[derive(Debug, Default)]
pub struct PassQueue {
    pub(crate) thread: usize,
    pub(crate) passes: Vec<PassNode>,
}

impl PassQueue {
    pub fn new(thread: usize) -> Self {
        Self {
            thread,
            passes: Vec::new(),
        }
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Rewrite every pass's coordinate after an insert or removal
    pub(crate) fn reindex(&mut self) {
        let thread = self.thread;
        for (position, node) in self.passes.iter_mut().enumerate() {
            node.index.thread = thread;
            node.index.position = position;
        }
    }
}

#[derive(Debug)]
struct QueueState {
    asynchronous: AtomicBool,
    interrupted: AtomicBool,
    done: AtomicBool,
}

/// Cross-queue state of a running frame
#[derive(Debug)]
pub(crate) struct ExecutionState {
    queues: Vec<QueueState>,
    remaining: AtomicUsize,
    error: Mutex<Option<FrameGraphError>>,
}

impl ExecutionState {
    pub(crate) fn new(queue_count: usize, asynchronous: bool) -> Self {
        Self {
            queues: (0..queue_count)
                .map(|_| QueueState {
                    asynchronous: AtomicBool::new(asynchronous),
                    interrupted: AtomicBool::new(false),
                    done: AtomicBool::new(false),
                })
                .collect(),
            remaining: AtomicUsize::new(queue_count),
            error: Mutex::new(None),
        }
    }

    pub(crate) fn is_async(&self, thread: usize) -> bool {
        self.queues
            .get(thread)
            .is_some_and(|q| q.asynchronous.load(Ordering::Acquire))
    }

    pub(crate) fn is_interrupted(&self, thread: usize) -> bool {
        self.queues
            .get(thread)
            .is_some_and(|q| q.interrupted.load(Ordering::Acquire))
    }

    pub(crate) fn is_done(&self, thread: usize) -> bool {
        self.queues
            .get(thread)
            .map_or(true, |q| q.done.load(Ordering::Acquire))
    }

    /// Record `error` (the first one wins) and stop every queue before its next pass.
    pub(crate) fn interrupt_rendering(&self, error: FrameGraphError, resources: &FrameResources) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                log::warn!("Interrupting frame: {}", error);
                *slot = Some(error);
            }
        }
        for queue in &self.queues {
            queue.interrupted.store(true, Ordering::Release);
        }
        resources.notify();
    }

    /// Mark `thread` finished. The last queue still running stops waiting.
    pub(crate) fn notify_complete(&self, thread: usize, resources: &FrameResources) {
        if let Some(queue) = self.queues.get(thread) {
            if queue.done.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        if remaining == 1 {
            if let Some(last) = self.queues.iter().find(|q| !q.done.load(Ordering::Acquire)) {
                last.asynchronous.store(false, Ordering::Release);
            }
        }
        resources.notify();
    }

    pub(crate) fn take_error(&self) -> Option<FrameGraphError> {
        self.error.lock().take()
    }
}

/// Everything a queue needs while running a frame
pub(crate) struct FrameContext<'a> {
    pub(crate) resources: &'a FrameResources,
    pub(crate) state: &'a ExecutionState,
    pub(crate) device: &'a dyn RenderDevice,
    pub(crate) geometry: Option<&'a dyn GeometryHandler>,
    pub(crate) scope: &'a SharedScope,
    pub(crate) config: &'a FrameGraphConfig,
}

/// Run every queue to completion. Returns the number of passes executed.
pub(crate) fn execute_queues(queues: &mut [PassQueue], ctx: &FrameContext<'_>) -> usize {
    let Some((main, workers)) = queues.split_first_mut() else {
        return 0;
    };

    std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers.len());
        for queue in workers.iter_mut() {
            let thread = queue.thread;
            let name = format!("{}-{}", ctx.config.worker_thread_prefix, thread);
            let spawned = std::thread::Builder::new()
                .name(name)
                .spawn_scoped(s, move || run_queue(queue, ctx));
            match spawned {
                Ok(handle) => handles.push((thread, handle)),
                Err(err) => {
                    ctx.state.interrupt_rendering(
                        FrameGraphError::pass_failed(
                            format!("queue {}", thread),
                            format!("failed to spawn worker thread: {}", err),
                        ),
                        ctx.resources,
                    );
                    ctx.state.notify_complete(thread, ctx.resources);
                }
            }
        }

        let mut executed = run_queue(main, ctx);
        for (thread, handle) in handles {
            match handle.join() {
                Ok(count) => executed += count,
                Err(_) => {
                    ctx.state.interrupt_rendering(
                        FrameGraphError::pass_failed(
                            format!("queue {}", thread),
                            "worker thread panicked",
                        ),
                        ctx.resources,
                    );
                    ctx.state.notify_complete(thread, ctx.resources);
                }
            }
        }
        executed
    })
}

/// Run one queue's passes in order. Returns the number of passes executed.
pub(crate) fn run_queue(queue: &mut PassQueue, ctx: &FrameContext<'_>) -> usize {
    let thread = queue.thread;
    let mut executed = 0;

    for node in queue.passes.iter_mut() {
        if ctx.state.is_interrupted(thread) {
            log::debug!("Queue {} interrupted before '{}'", thread, node.name);
            break;
        }
        if !node.enabled || !ctx.resources.lock().is_pass_used(node.id) {
            continue;
        }
        if let Err(err) = wait_for_inputs(node, thread, ctx) {
            ctx.state.interrupt_rendering(err, ctx.resources);
            break;
        }

        let result = {
            let mut exec = ExecuteContext {
                resources: ctx.resources,
                device: ctx.device,
                geometry: ctx.geometry,
                index: node.index,
                name: &node.name,
            };
            let pass = &mut node.pass;
            panic::catch_unwind(AssertUnwindSafe(|| pass.execute(&mut exec)))
                .unwrap_or_else(|payload| {
                    Err(FrameGraphError::pass_failed(
                        &node.name,
                        format!("panicked: {}", panic_message(&*payload)),
                    ))
                })
        };
        if let Err(err) = result.and_then(|()| finish_pass(node, ctx)) {
            log::error!("Pass '{}' failed: {}", node.name, err);
            ctx.state.interrupt_rendering(err, ctx.resources);
            break;
        }
        executed += 1;
    }

    ctx.state.notify_complete(thread, ctx.resources);
    executed
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Export shared outputs, mark outputs ready and release the pass's inputs.
fn finish_pass(node: &PassNode, ctx: &FrameContext<'_>) -> FrameGraphResult<()> {
    let mut exports = Vec::new();
    {
        let mut list = ctx.resources.lock();
        for &output in &node.outputs {
            let shared = matches!(list.tickets().role(output), Some(TicketRole::Output { shared: true }));
            if !shared {
                continue;
            }
            if let Some(value) = list.export(output) {
                exports.push((list.tickets().name(output).to_string(), value));
            }
        }
        list.complete_pass(node.id)?;
    }
    ctx.resources.notify();

    for (name, value) in exports {
        ctx.scope.store_value(&name, value);
    }
    Ok(())
}

/// Block until every input of `node` produced on another queue is ready.
///
/// The wait is split into `async_wait_attempts` slices of the configured
/// timeout and never outlasts the timeout itself, however often other queues
/// wake it.
fn wait_for_inputs(node: &PassNode, thread: usize, ctx: &FrameContext<'_>) -> FrameGraphResult<()> {
    if !ctx.state.is_async(thread) {
        return Ok(());
    }
    let slice = ctx.config.wait_slice();
    let started = Instant::now();
    let deadline = started + ctx.config.async_wait_timeout;
    let mut list = ctx.resources.lock();
    let inputs = list.pass_inputs(node.id).to_vec();

    loop {
        let pending = inputs.iter().copied().find(|&ticket| {
            let status = list.input_status(ticket);
            !status.ready && status.thread != thread && !ctx.state.is_done(status.thread)
        });
        let Some(pending) = pending else {
            return Ok(());
        };
        if ctx.state.is_interrupted(thread) {
            return Err(FrameGraphError::Interrupted);
        }
        if !ctx.state.is_async(thread) {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            let waited = now.duration_since(started);
            let input = list.tickets().name(pending).to_string();
            return match ctx.config.wait_timeout_policy {
                WaitTimeoutPolicy::Fail => Err(FrameGraphError::InputTimeout {
                    pass: node.name.clone(),
                    input,
                    waited,
                }),
                WaitTimeoutPolicy::Degrade => {
                    log::warn!(
                        "Pass '{}' gave up waiting {:?} for '{}', running anyway",
                        node.name,
                        waited,
                        input
                    );
                    Ok(())
                }
            };
        }
        if ctx.resources.wait_until(&mut list, (now + slice).min(deadline)) {
            log::trace!("Pass '{}' still waiting for '{}'", node.name, list.tickets().name(pending));
        }
    }
}
