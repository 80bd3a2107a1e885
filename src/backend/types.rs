//! Common types shared between the frame graph and device backends

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32, samples: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            samples,
            format,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Size of the texture storage in bytes, ignoring driver padding.
    pub fn byte_size(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.samples.max(1) as u64
            * self.format.bytes_per_pixel() as u64
    }

    /// Whether the two descriptors describe the same storage, labels aside.
    pub fn matches(&self, other: &TextureDescriptor) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.samples == other.samples
            && self.format == other.format
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            samples: 1,
            format: TextureFormat::Rgba8Unorm,
        }
    }
}

/// Framebuffer descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

impl FrameBufferDescriptor {
    pub fn new(width: u32, height: u32, samples: u32) -> Self {
        Self {
            label: None,
            width,
            height,
            samples,
            color_formats: Vec::new(),
            depth_format: None,
        }
    }

    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        self.depth_format = Some(format);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn matches(&self, other: &FrameBufferDescriptor) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.samples == other.samples
            && self.color_formats == other.color_formats
            && self.depth_format == other.depth_format
    }
}

/// Which parts of a render target are cleared when it is bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearOps {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearOps {
    pub const NONE: Self = Self {
        color: None,
        depth: None,
        stencil: None,
    };

    pub fn all(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }

    pub fn is_none(&self) -> bool {
        self.color.is_none() && self.depth.is_none() && self.stencil.is_none()
    }
}

impl Default for ClearOps {
    fn default() -> Self {
        Self::NONE
    }
}

/// Depth-range mapping applied to the active viewport
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl DepthRange {
    pub const FULL: Self = Self {
        near: 0.0,
        far: 1.0,
    };

    pub fn new(near: f32, far: f32) -> Self {
        Self { near, far }
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_byte_size() {
        let desc = TextureDescriptor::new(512, 256, 4, TextureFormat::Rgba16Float);
        assert_eq!(desc.byte_size(), 512 * 256 * 4 * 8);
    }

    #[test]
    fn test_descriptor_match_ignores_label() {
        let a = TextureDescriptor::new(64, 64, 1, TextureFormat::Rgba8Unorm).with_label("a");
        let b = TextureDescriptor::new(64, 64, 1, TextureFormat::Rgba8Unorm);
        assert!(a.matches(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_framebuffer_match() {
        let a = FrameBufferDescriptor::new(128, 128, 1)
            .with_color(TextureFormat::Rgba8Unorm)
            .with_depth(TextureFormat::Depth32Float);
        let b = a.clone().with_label("gbuffer");
        let c = FrameBufferDescriptor::new(128, 128, 1).with_color(TextureFormat::Rgba8Unorm);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
