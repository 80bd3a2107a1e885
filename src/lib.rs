//! RedLilium Frame Graph - scheduling and resource lifetimes for render passes
//!
//! A frame graph holds named render passes whose inputs and outputs are
//! linked by name. Every frame it:
//! - prepares each pass, which declares and references virtual resources
//! - culls passes and resources nobody consumes
//! - runs the remaining passes, on the calling thread or on per-queue worker threads
//! - binds virtual resources to pooled textures and framebuffers when acquired,
//!   recycling them across passes and frames
//!
//! The device is abstracted by [`backend::RenderDevice`]; [`backend::DummyDevice`]
//! runs everything without a GPU.

pub mod backend;
pub mod config;
pub mod error;
pub mod render_graph;

pub use config::{FrameGraphConfig, WaitTimeoutPolicy};
pub use error::{FrameGraphError, FrameGraphResult};
pub use render_graph::{
    Bindable, ExecuteContext, FrameBufferDef, FrameGraph, FrameReport, GeometryHandler,
    MapStatistics, MaterialBinder, ParamValue, PassBuilder, PassId, PassIndex, PrepareContext,
    RenderObjectMap, RenderPass, ResourceDef, ResourceTicket, SharedScope, TextureDef, ValueDef,
};
