use std::any::Any;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use redlilium_framegraph::backend::{DummyDevice, Texture, TextureFormat};
use redlilium_framegraph::render_graph::{SharedDef, TimeFrame};
use redlilium_framegraph::{
    ExecuteContext, FrameGraph, FrameGraphConfig, FrameGraphResult, PassBuilder, PassIndex,
    PrepareContext, RenderObjectMap, RenderPass, ResourceTicket, SharedScope, TextureDef,
};

/// Reads the previous pass's output and writes one of its own.
struct ChainPass {
    name: String,
    source: Option<String>,
    input: Option<ResourceTicket<Texture>>,
    output: Option<ResourceTicket<Texture>>,
}

impl ChainPass {
    fn new(index: usize) -> Self {
        Self {
            name: format!("pass_{index}"),
            source: index.checked_sub(1).map(|prev| format!("pass_{prev}.color")),
            input: None,
            output: None,
        }
    }
}

impl RenderPass for ChainPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, builder: &mut PassBuilder<'_>) -> FrameGraphResult<()> {
        if let Some(source) = &self.source {
            self.input = Some(builder.add_input(source));
        }
        self.output = Some(builder.add_output("color"));
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> FrameGraphResult<()> {
        if let Some(output) = &self.output {
            ctx.declare(output, TextureDef::new(256, 256, 1, TextureFormat::Rgba8Unorm))?;
            ctx.set_survives_reference_cull(output)?;
        }
        if let Some(input) = &self.input {
            ctx.reference(input)?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> FrameGraphResult<()> {
        if let Some(input) = &self.input {
            black_box(ctx.acquire(input)?);
        }
        if let Some(output) = &self.output {
            black_box(ctx.acquire(output)?);
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

fn chain_graph(passes: usize, queues: usize) -> FrameGraph {
    let mut graph = FrameGraph::new(
        Arc::new(DummyDevice::new()),
        SharedScope::new(),
        FrameGraphConfig::default(),
    );
    for i in 0..passes {
        graph.add_pass_to_queue(i % queues, ChainPass::new(i)).unwrap();
    }
    graph
}

fn run_frame(graph: &mut FrameGraph) {
    graph.begin_render_frame();
    graph.finalize().unwrap();
    black_box(graph.execute().unwrap());
    graph.end_render_frame();
}

// ---------------------------------------------------------------------------
// Frame graph construction
// ---------------------------------------------------------------------------

fn bench_graph_build_chain(c: &mut Criterion) {
    c.bench_function("frame_graph_build_32_passes_chain", |b| {
        b.iter(|| {
            let graph = chain_graph(32, 1);
            black_box(graph.pass_count());
        });
    });
}

// ---------------------------------------------------------------------------
// Frame execution
// ---------------------------------------------------------------------------

fn bench_frame_single_queue(c: &mut Criterion) {
    let mut graph = chain_graph(32, 1);
    run_frame(&mut graph);

    c.bench_function("frame_graph_execute_32_passes", |b| {
        b.iter(|| run_frame(&mut graph));
    });
}

fn bench_frame_two_queues(c: &mut Criterion) {
    let mut graph = chain_graph(16, 2);
    run_frame(&mut graph);

    c.bench_function("frame_graph_execute_16_passes_2_queues", |b| {
        b.iter(|| run_frame(&mut graph));
    });
}

// ---------------------------------------------------------------------------
// Render object pool
// ---------------------------------------------------------------------------

fn bench_object_map_reuse(c: &mut Criterion) {
    let mut map = RenderObjectMap::new(Arc::new(DummyDevice::new()));
    let def: SharedDef = Arc::new(TextureDef::new(512, 512, 1, TextureFormat::Rgba8Unorm));
    let lifetime = TimeFrame::new(PassIndex::new(0, 0));

    c.bench_function("object_map_allocate_release_512x512", |b| {
        b.iter(|| {
            let allocation = map.allocate(&def, &lifetime, None).unwrap();
            map.release(black_box(allocation.id), false).unwrap();
        });
    });
}

fn bench_object_map_flush(c: &mut Criterion) {
    c.bench_function("object_map_flush_64_objects", |b| {
        b.iter_with_setup(
            || {
                let mut map = RenderObjectMap::new(Arc::new(DummyDevice::new()));
                let lifetime = TimeFrame::new(PassIndex::new(0, 0));
                for size in 1..=64 {
                    let def: SharedDef =
                        Arc::new(TextureDef::new(size, size, 1, TextureFormat::Rgba8Unorm));
                    let allocation = map.allocate(&def, &lifetime, None).unwrap();
                    map.release(allocation.id, false).unwrap();
                }
                map
            },
            |mut map| {
                map.flush_map();
                map.flush_map();
                black_box(map.len());
            },
        );
    });
}

criterion_group!(
    benches,
    bench_graph_build_chain,
    bench_frame_single_queue,
    bench_frame_two_queues,
    bench_object_map_reuse,
    bench_object_map_flush,
);
criterion_main!(benches);
