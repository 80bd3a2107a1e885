//! Dummy device backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but hands out unique
//! handles and records every call, so tests can verify what the frame graph
//! asked of the device.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::traits::*;
use super::types::*;

/// A device call recorded by [`DummyDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateTexture(TextureHandle),
    CreateFrameBuffer(FrameBufferHandle),
    BindFrameBuffer(Option<FrameBufferHandle>, ClearOps),
    CopyFrameBuffer {
        src: FrameBufferHandle,
        dst: Option<FrameBufferHandle>,
        color: bool,
        depth: bool,
    },
    SetDepthRange(DepthRange),
    DestroyTexture(TextureHandle),
    DestroyFrameBuffer(FrameBufferHandle),
}

#[derive(Debug, Default)]
struct DummyState {
    live_textures: HashSet<TextureHandle>,
    live_framebuffers: HashSet<FrameBufferHandle>,
    calls: Vec<DeviceCall>,
}

/// Dummy render device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    next_id: AtomicU64,
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_raw(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of textures created and not yet destroyed.
    pub fn live_textures(&self) -> usize {
        self.state.lock().live_textures.len()
    }

    /// Number of framebuffers created and not yet destroyed.
    pub fn live_framebuffers(&self) -> usize {
        self.state.lock().live_framebuffers.len()
    }

    /// Snapshot of every call made so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    /// Count recorded calls matching a predicate.
    pub fn count_calls(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }
}

impl RenderDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy Device"
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "zero-sized texture {:?}",
                desc.label
            )));
        }
        let handle = TextureHandle(self.next_raw());
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{}, {} samples, {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.samples,
            desc.format
        );
        let mut state = self.state.lock();
        state.live_textures.insert(handle);
        state.calls.push(DeviceCall::CreateTexture(handle));
        Ok(handle)
    }

    fn create_framebuffer(&self, desc: &FrameBufferDescriptor) -> BackendResult<FrameBufferHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::FrameBufferCreationFailed(format!(
                "zero-sized framebuffer {:?}",
                desc.label
            )));
        }
        let handle = FrameBufferHandle(self.next_raw());
        log::trace!(
            "DummyDevice: creating framebuffer {:?} ({}x{}, {} color targets)",
            desc.label,
            desc.width,
            desc.height,
            desc.color_formats.len()
        );
        let mut state = self.state.lock();
        state.live_framebuffers.insert(handle);
        state.calls.push(DeviceCall::CreateFrameBuffer(handle));
        Ok(handle)
    }

    fn bind_framebuffer(
        &self,
        framebuffer: Option<FrameBufferHandle>,
        clear: ClearOps,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(fb) = framebuffer {
            if !state.live_framebuffers.contains(&fb) {
                return Err(BackendError::UnknownFrameBuffer(fb));
            }
        }
        state.calls.push(DeviceCall::BindFrameBuffer(framebuffer, clear));
        Ok(())
    }

    fn copy_framebuffer(
        &self,
        src: FrameBufferHandle,
        dst: Option<FrameBufferHandle>,
        copy_color: bool,
        copy_depth: bool,
    ) -> BackendResult<()> {
        let mut state = self.state.lock();
        for fb in std::iter::once(src).chain(dst) {
            if !state.live_framebuffers.contains(&fb) {
                return Err(BackendError::UnknownFrameBuffer(fb));
            }
        }
        state.calls.push(DeviceCall::CopyFrameBuffer {
            src,
            dst,
            color: copy_color,
            depth: copy_depth,
        });
        Ok(())
    }

    fn set_depth_range(&self, range: DepthRange) {
        self.state.lock().calls.push(DeviceCall::SetDepthRange(range));
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        if !state.live_textures.remove(&texture) {
            log::warn!("DummyDevice: destroying unknown texture {:?}", texture);
        }
        state.calls.push(DeviceCall::DestroyTexture(texture));
    }

    fn destroy_framebuffer(&self, framebuffer: FrameBufferHandle) {
        let mut state = self.state.lock();
        if !state.live_framebuffers.remove(&framebuffer) {
            log::warn!("DummyDevice: destroying unknown framebuffer {:?}", framebuffer);
        }
        state.calls.push(DeviceCall::DestroyFrameBuffer(framebuffer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let device = DummyDevice::new();
        let desc = TextureDescriptor::new(4, 4, 1, TextureFormat::Rgba8Unorm);
        let a = device.create_texture(&desc).unwrap();
        let b = device.create_texture(&desc).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.live_textures(), 2);
        device.destroy_texture(a);
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn test_zero_sized_texture_fails() {
        let device = DummyDevice::new();
        let desc = TextureDescriptor::new(0, 4, 1, TextureFormat::Rgba8Unorm);
        assert!(matches!(
            device.create_texture(&desc),
            Err(BackendError::TextureCreationFailed(_))
        ));
    }

    #[test]
    fn test_bind_unknown_framebuffer() {
        let device = DummyDevice::new();
        let result = device.bind_framebuffer(Some(FrameBufferHandle(99)), ClearOps::NONE);
        assert_eq!(
            result,
            Err(BackendError::UnknownFrameBuffer(FrameBufferHandle(99)))
        );
        assert!(device.bind_framebuffer(None, ClearOps::NONE).is_ok());
    }

    #[test]
    fn test_copy_records_call() {
        let device = DummyDevice::new();
        let desc = FrameBufferDescriptor::new(8, 8, 1).with_color(TextureFormat::Rgba8Unorm);
        let src = device.create_framebuffer(&desc).unwrap();
        let dst = device.create_framebuffer(&desc).unwrap();
        device.copy_framebuffer(src, Some(dst), true, false).unwrap();
        assert_eq!(
            device.count_calls(|c| matches!(c, DeviceCall::CopyFrameBuffer { .. })),
            1
        );
    }
}
