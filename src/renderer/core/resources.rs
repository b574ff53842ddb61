//! Device Resource Descriptions
//!
//! Handle types and plain-data descriptions of the resources a
//! [`RenderDevice`](super::RenderDevice) manages: textures, framebuffers and
//! shader programs.
//!
//! Handles are [`slotmap`] keys. A key is never reused after its resource is
//! destroyed, so comparing two handles compares allocation identity: a
//! reallocated texture always gets a new [`TextureId`].

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a device texture.
    pub struct TextureId;
    /// Handle to a device framebuffer.
    pub struct FramebufferId;
    /// Handle to a resolved shader program.
    pub struct ShaderId;
}

/// Maximum number of color attachments on one framebuffer.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

// ─── Attachments ──────────────────────────────────────────────────────────────

/// An attachment slot on a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    /// Color render target `n` (`0..MAX_COLOR_ATTACHMENTS`).
    Color(u8),
    /// The depth (and stencil) attachment.
    Depth,
}

impl AttachmentPoint {
    pub const COLOR0: Self = Self::Color(0);
    pub const COLOR1: Self = Self::Color(1);
    pub const COLOR2: Self = Self::Color(2);
    pub const COLOR3: Self = Self::Color(3);

    /// Color attachment index, or `None` for the depth slot.
    #[inline]
    #[must_use]
    pub fn color_index(self) -> Option<usize> {
        match self {
            Self::Color(i) => Some(i as usize),
            Self::Depth => None,
        }
    }
}

bitflags::bitflags! {
    /// Which buffers a blit copies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlitMask: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

// ─── Textures ─────────────────────────────────────────────────────────────────

/// Description of a 2D texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

impl TextureDesc {
    #[must_use]
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Returns `true` for formats with more than 8 bits per channel of float
/// storage in every color channel.
#[must_use]
pub fn is_high_precision_float(format: wgpu::TextureFormat) -> bool {
    use wgpu::TextureFormat as F;
    matches!(
        format,
        F::R32Float | F::Rg32Float | F::Rgba32Float
    )
}

/// Returns `true` for depth or depth-stencil formats.
#[must_use]
pub fn is_depth_format(format: wgpu::TextureFormat) -> bool {
    use wgpu::TextureFormat as F;
    matches!(
        format,
        F::Depth16Unorm | F::Depth24Plus | F::Depth24PlusStencil8 | F::Depth32Float | F::Depth32FloatStencil8
    )
}

// ─── Framebuffers ─────────────────────────────────────────────────────────────

/// A named set of color and depth attachments with per-attachment clear
/// values.
///
/// Framebuffers do not own their textures: the same texture may be attached
/// to several framebuffers (the main depth buffer is routinely shared).
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pub label: String,
    pub color: [Option<TextureId>; MAX_COLOR_ATTACHMENTS],
    pub depth: Option<TextureId>,
    pub clear_color: [wgpu::Color; MAX_COLOR_ATTACHMENTS],
    pub clear_depth: f32,
}

impl Framebuffer {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            color: [None; MAX_COLOR_ATTACHMENTS],
            depth: None,
            clear_color: [wgpu::Color::TRANSPARENT; MAX_COLOR_ATTACHMENTS],
            clear_depth: 1.0,
        }
    }

    /// Texture bound at `point`, if any.
    #[must_use]
    pub fn get(&self, point: AttachmentPoint) -> Option<TextureId> {
        match point {
            AttachmentPoint::Color(i) => self.color.get(i as usize).copied().flatten(),
            AttachmentPoint::Depth => self.depth,
        }
    }

    /// Every bound attachment, color targets first.
    pub fn attachments(&self) -> impl Iterator<Item = (AttachmentPoint, TextureId)> + '_ {
        self.color
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|t| (AttachmentPoint::Color(i as u8), t)))
            .chain(self.depth.map(|t| (AttachmentPoint::Depth, t)))
    }

    /// The attachment whose texture defines the framebuffer size: color 0
    /// when present, otherwise the first bound attachment.
    #[must_use]
    pub fn primary_attachment(&self) -> Option<TextureId> {
        self.color[0].or_else(|| self.attachments().next().map(|(_, t)| t))
    }
}
