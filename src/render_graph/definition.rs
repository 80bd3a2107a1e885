//! Resource definitions
//!
//! A definition is the factory and recycling policy for one kind of resource.
//! The render object map only sees definitions through the object-safe
//! [`AnyResourceDef`], which every [`ResourceDef`] implements.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::backend::*;

/// Type-erased resource value stored in render objects and resources.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Factory and recycling policy for resources of type [`ResourceDef::Object`].
///
/// `accepts_direct` and `accepts_indirect` must be pure compatibility checks:
/// they are evaluated on pooled objects before any hand-off happens.
pub trait ResourceDef: Send + Sync + 'static {
    type Object: Clone + Send + Sync + 'static;

    /// Create a brand new object.
    fn create(&self, device: &dyn RenderDevice) -> BackendResult<Self::Object>;

    /// Whether an existing object can be handed out unchanged.
    fn accepts_direct(&self, _object: &Self::Object) -> bool {
        false
    }

    /// Whether an existing object can be handed out in a coerced form, used
    /// only when no direct match exists.
    fn accepts_indirect(&self, _object: &Self::Object) -> bool {
        false
    }

    /// Release backend storage held by an object.
    fn dispose(&self, _object: &Self::Object, _device: &dyn RenderDevice) {}

    /// Whether objects created by this definition may be pooled across frames.
    fn is_reusable(&self) -> bool {
        true
    }

    /// Whether releasing the resource destroys its object instead of returning
    /// it to the pool.
    fn dispose_on_release(&self) -> bool {
        false
    }

    /// Idle-frame timeout overriding the map's default.
    fn idle_timeout(&self) -> Option<u32> {
        None
    }
}

/// Object-safe view of a [`ResourceDef`].
pub trait AnyResourceDef: Send + Sync {
    fn create_erased(&self, device: &dyn RenderDevice) -> BackendResult<ErasedValue>;
    fn accepts_direct_erased(&self, object: &(dyn Any + Send + Sync)) -> bool;
    fn accepts_indirect_erased(&self, object: &(dyn Any + Send + Sync)) -> bool;
    fn dispose_erased(&self, object: &(dyn Any + Send + Sync), device: &dyn RenderDevice);
    fn reusable(&self) -> bool;
    fn disposes_on_release(&self) -> bool;
    fn object_idle_timeout(&self) -> Option<u32>;
    fn object_type_name(&self) -> &'static str;
    fn object_type_id(&self) -> TypeId;
}

impl<D: ResourceDef> AnyResourceDef for D {
    fn create_erased(&self, device: &dyn RenderDevice) -> BackendResult<ErasedValue> {
        Ok(Arc::new(self.create(device)?))
    }

    fn accepts_direct_erased(&self, object: &(dyn Any + Send + Sync)) -> bool {
        object
            .downcast_ref::<D::Object>()
            .is_some_and(|o| self.accepts_direct(o))
    }

    fn accepts_indirect_erased(&self, object: &(dyn Any + Send + Sync)) -> bool {
        object
            .downcast_ref::<D::Object>()
            .is_some_and(|o| self.accepts_indirect(o))
    }

    fn dispose_erased(&self, object: &(dyn Any + Send + Sync), device: &dyn RenderDevice) {
        match object.downcast_ref::<D::Object>() {
            Some(o) => self.dispose(o, device),
            None => log::warn!(
                "Definition for {} asked to dispose a foreign object",
                type_name::<D::Object>()
            ),
        }
    }

    fn reusable(&self) -> bool {
        self.is_reusable()
    }

    fn disposes_on_release(&self) -> bool {
        self.dispose_on_release()
    }

    fn object_idle_timeout(&self) -> Option<u32> {
        self.idle_timeout()
    }

    fn object_type_name(&self) -> &'static str {
        type_name::<D::Object>()
    }

    fn object_type_id(&self) -> TypeId {
        TypeId::of::<D::Object>()
    }
}

impl fmt::Debug for dyn AnyResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceDef<{}>", self.object_type_name())
    }
}

/// Shared, type-erased definition handle.
pub type SharedDef = Arc<dyn AnyResourceDef>;

/// Definition for pooled textures.
#[derive(Debug, Clone)]
pub struct TextureDef {
    pub desc: TextureDescriptor,
    /// Allow reusing larger textures of the same format and sample count when
    /// no exact match is pooled. The pass renders into a sub-region.
    pub allow_oversized: bool,
    pub idle_timeout: Option<u32>,
}

impl TextureDef {
    pub fn new(width: u32, height: u32, samples: u32, format: TextureFormat) -> Self {
        Self {
            desc: TextureDescriptor::new(width, height, samples, format),
            allow_oversized: false,
            idle_timeout: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.desc.label = Some(label.into());
        self
    }

    pub fn allow_oversized(mut self, allow: bool) -> Self {
        self.allow_oversized = allow;
        self
    }

    pub fn with_idle_timeout(mut self, frames: u32) -> Self {
        self.idle_timeout = Some(frames);
        self
    }
}

impl ResourceDef for TextureDef {
    type Object = Texture;

    fn create(&self, device: &dyn RenderDevice) -> BackendResult<Texture> {
        let handle = device.create_texture(&self.desc)?;
        Ok(Texture {
            handle,
            desc: self.desc.clone(),
        })
    }

    fn accepts_direct(&self, object: &Texture) -> bool {
        object.desc.matches(&self.desc)
    }

    fn accepts_indirect(&self, object: &Texture) -> bool {
        self.allow_oversized
            && object.desc.format == self.desc.format
            && object.desc.samples == self.desc.samples
            && object.desc.width >= self.desc.width
            && object.desc.height >= self.desc.height
    }

    fn dispose(&self, object: &Texture, device: &dyn RenderDevice) {
        device.destroy_texture(object.handle);
    }

    fn idle_timeout(&self) -> Option<u32> {
        self.idle_timeout
    }
}

/// Definition for pooled framebuffers.
#[derive(Debug, Clone)]
pub struct FrameBufferDef {
    pub desc: FrameBufferDescriptor,
    pub idle_timeout: Option<u32>,
}

impl FrameBufferDef {
    pub fn new(desc: FrameBufferDescriptor) -> Self {
        Self {
            desc,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, frames: u32) -> Self {
        self.idle_timeout = Some(frames);
        self
    }
}

impl ResourceDef for FrameBufferDef {
    type Object = FrameBuffer;

    fn create(&self, device: &dyn RenderDevice) -> BackendResult<FrameBuffer> {
        let handle = device.create_framebuffer(&self.desc)?;
        Ok(FrameBuffer {
            handle,
            desc: self.desc.clone(),
        })
    }

    fn accepts_direct(&self, object: &FrameBuffer) -> bool {
        object.desc.matches(&self.desc)
    }

    fn dispose(&self, object: &FrameBuffer, device: &dyn RenderDevice) {
        device.destroy_framebuffer(object.handle);
    }

    fn idle_timeout(&self) -> Option<u32> {
        self.idle_timeout
    }
}

/// Definition for plain per-frame values (light lists, camera data, ...)
/// built by a closure. Values are never pooled and are dropped on release.
pub struct ValueDef<T> {
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> ValueDef<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
        }
    }
}

impl<T: Default + 'static> Default for ValueDef<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T> fmt::Debug for ValueDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueDef")
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> ResourceDef for ValueDef<T> {
    type Object = T;

    fn create(&self, _device: &dyn RenderDevice) -> BackendResult<T> {
        Ok((self.factory)())
    }

    fn is_reusable(&self) -> bool {
        false
    }

    fn dispose_on_release(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_direct_match() {
        let def = TextureDef::new(512, 512, 1, TextureFormat::Rgba8Unorm);
        let same = Texture {
            handle: TextureHandle(1),
            desc: TextureDescriptor::new(512, 512, 1, TextureFormat::Rgba8Unorm),
        };
        let other = Texture {
            handle: TextureHandle(2),
            desc: TextureDescriptor::new(512, 512, 4, TextureFormat::Rgba8Unorm),
        };
        assert!(def.accepts_direct(&same));
        assert!(!def.accepts_direct(&other));
        assert!(!def.accepts_indirect(&other));
    }

    #[test]
    fn test_texture_oversized_indirect() {
        let def = TextureDef::new(256, 256, 1, TextureFormat::Rgba16Float).allow_oversized(true);
        let bigger = Texture {
            handle: TextureHandle(1),
            desc: TextureDescriptor::new(512, 512, 1, TextureFormat::Rgba16Float),
        };
        let smaller = Texture {
            handle: TextureHandle(2),
            desc: TextureDescriptor::new(128, 512, 1, TextureFormat::Rgba16Float),
        };
        assert!(!def.accepts_direct(&bigger));
        assert!(def.accepts_indirect(&bigger));
        assert!(!def.accepts_indirect(&smaller));
    }

    #[test]
    fn test_erased_rejects_foreign_types() {
        let def: SharedDef = Arc::new(TextureDef::new(4, 4, 1, TextureFormat::Rgba8Unorm));
        let value: ErasedValue = Arc::new(42u32);
        assert!(!def.accepts_direct_erased(value.as_ref()));
        assert!(!def.accepts_indirect_erased(value.as_ref()));
        assert!(def.object_type_name().ends_with("Texture"));
    }

    #[test]
    fn test_value_def_policy() {
        let def = ValueDef::new(|| vec![1.0f32, 2.0]);
        let device = DummyDevice::new();
        assert_eq!(def.create(&device).unwrap(), vec![1.0, 2.0]);
        assert!(!def.is_reusable());
        assert!(def.dispose_on_release());
    }
}
