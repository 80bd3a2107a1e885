//! Core device abstraction traits
//!
//! The frame graph never talks to a graphics API directly. Everything it needs
//! from the surrounding renderer goes through [`RenderDevice`].

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FrameBufferCreationFailed(String),
    #[error("Unknown framebuffer handle {0:?}")]
    UnknownFrameBuffer(FrameBufferHandle),
    #[error("Unknown texture handle {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

impl TextureHandle {
    /// Wrap a raw backend id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle to a GPU framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameBufferHandle(pub(crate) u64);

impl FrameBufferHandle {
    /// Wrap a raw backend id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A texture together with the descriptor it was created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Texture {
    pub handle: TextureHandle,
    pub desc: TextureDescriptor,
}

/// A framebuffer together with the descriptor it was created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pub handle: FrameBufferHandle,
    pub desc: FrameBufferDescriptor,
}

/// Device interface consumed by the frame graph.
///
/// Implementations must be callable from every pass queue thread, so all
/// methods take `&self`; backends synchronise internally.
pub trait RenderDevice: Send + Sync {
    /// Human readable backend name, used in logs.
    fn name(&self) -> &str;

    // Resource creation

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_framebuffer(&self, desc: &FrameBufferDescriptor) -> BackendResult<FrameBufferHandle>;

    // Render target operations

    /// Bind a framebuffer as the active render target and clear it.
    /// `None` binds the default (window) framebuffer.
    fn bind_framebuffer(
        &self,
        framebuffer: Option<FrameBufferHandle>,
        clear: ClearOps,
    ) -> BackendResult<()>;

    /// Copy the content of one framebuffer into another.
    /// `None` as destination copies to the default framebuffer.
    fn copy_framebuffer(
        &self,
        src: FrameBufferHandle,
        dst: Option<FrameBufferHandle>,
        copy_color: bool,
        copy_depth: bool,
    ) -> BackendResult<()>;

    /// Set the depth-range mapping of the active viewport.
    fn set_depth_range(&self, range: DepthRange);

    // Cleanup

    fn destroy_texture(&self, texture: TextureHandle);

    fn destroy_framebuffer(&self, framebuffer: FrameBufferHandle);
}
