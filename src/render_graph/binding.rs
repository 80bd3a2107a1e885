//! Bindable resources
//!
//! Pass outputs that end up as material parameters (a lighting pass reading the
//! G-buffer textures, a light list uploaded as uniforms) are bound through
//! [`Bindable`] instead of inspecting concrete types at the call site.

use crate::backend::{FrameBuffer, Texture};
use crate::error::FrameGraphResult;

/// Scalar and vector parameter values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<[f32; 2]> for ParamValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 3]> for ParamValue {
    fn from(v: [f32; 3]) -> Self {
        Self::Vec3(v)
    }
}

impl From<[f32; 4]> for ParamValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

impl From<[[f32; 4]; 4]> for ParamValue {
    fn from(v: [[f32; 4]; 4]) -> Self {
        Self::Mat4(v)
    }
}

/// Receives material parameters. Implemented by the material system.
pub trait MaterialBinder {
    fn set_texture(&mut self, param: &str, texture: &Texture) -> FrameGraphResult<()>;
    fn set_framebuffer(&mut self, param: &str, framebuffer: &FrameBuffer) -> FrameGraphResult<()>;
    fn set_value(&mut self, param: &str, value: ParamValue) -> FrameGraphResult<()>;
}

/// A resource that can be bound as a material parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Bindable {
    Texture(Texture),
    FrameBuffer(FrameBuffer),
    Value(ParamValue),
}

impl Bindable {
    pub fn bind(&self, param: &str, binder: &mut dyn MaterialBinder) -> FrameGraphResult<()> {
        match self {
            Self::Texture(texture) => binder.set_texture(param, texture),
            Self::FrameBuffer(framebuffer) => binder.set_framebuffer(param, framebuffer),
            Self::Value(value) => binder.set_value(param, *value),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Texture(_) => "texture",
            Self::FrameBuffer(_) => "framebuffer",
            Self::Value(_) => "value",
        }
    }
}

impl From<Texture> for Bindable {
    fn from(texture: Texture) -> Self {
        Self::Texture(texture)
    }
}

impl From<FrameBuffer> for Bindable {
    fn from(framebuffer: FrameBuffer) -> Self {
        Self::FrameBuffer(framebuffer)
    }
}

impl From<ParamValue> for Bindable {
    fn from(value: ParamValue) -> Self {
        Self::Value(value)
    }
}
