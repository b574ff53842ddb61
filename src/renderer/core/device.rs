//! Render Device Abstraction
//!
//! [`RenderDevice`] is the command and resource surface the renderer records
//! against. It mirrors the immediate-mode model the frame algorithm is
//! written for:
//!
//! - A **bound draw framebuffer** plus a stack of saved states
//!   ([`push_state`](RenderDevice::push_state) / [`pop_state`](RenderDevice::pop_state)).
//! - **Per-attachment blend state** scoped to the bound framebuffer: binding a
//!   framebuffer resets every attachment to "no blending".
//! - **2D mode** ([`push_2d`](RenderDevice::push_2d)) for full-screen program
//!   launches: depth test always passes, depth writes off, blending off.
//!
//! # Data Flow
//! ```text
//! Renderer ──(state, draws, launches)──▶ RenderDevice ──▶ framebuffer textures
//!              ▲                                │
//!              └──────(texture / fb info)───────┘
//! ```
//!
//! Nested passes always pair their pushes and pops. [`scoped_state`] and
//! [`scoped_2d`] guarantee the pop on every exit path, including early `?`
//! returns.

use glam::{Mat4, UVec2, Vec2, Vec4};
use smallvec::SmallVec;

use super::{Args, AttachmentPoint, BlitMask, Framebuffer, FramebufferId, ShaderId, TextureDesc, TextureId};
use crate::errors::Result;

/// A screen-aligned rectangle in normalized viewport coordinates.
///
/// `(0, 0)` is the top-left corner and `(1, 1)` the bottom-right corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ScreenRect {
    pub const FULL: Self = Self {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    #[must_use]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// `true` when the pixel centered at `p` (normalized) lies inside.
    #[inline]
    #[must_use]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }
}

/// A rasterized primitive: a rectangle at constant depth with one constant
/// fragment value per color attachment.
///
/// Depth-only draws carry no color outputs. Outputs addressed to attachments
/// the bound framebuffer lacks are dropped.
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub label: String,
    pub rect: ScreenRect,
    /// Normalized device depth in `[0, 1]`.
    pub depth: f32,
    pub outputs: SmallVec<[(AttachmentPoint, Vec4); 4]>,
}

impl DrawCall {
    #[must_use]
    pub fn new(label: impl Into<String>, rect: ScreenRect, depth: f32) -> Self {
        Self {
            label: label.into(),
            rect,
            depth,
            outputs: SmallVec::new(),
        }
    }

    #[must_use]
    pub fn with_output(mut self, point: AttachmentPoint, value: Vec4) -> Self {
        self.outputs.push((point, value));
        self
    }
}

/// Second-layer depth capture: draws keep only fragments lying at least
/// `min_separation` camera-space units behind the depth stored in
/// `first_layer` at the same pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthPeel {
    pub first_layer: TextureId,
    pub min_separation: f32,
}

/// Camera-space distance of NDC depth `ndc_z` under `projection`.
#[must_use]
pub fn camera_space_depth(projection: Mat4, ndc_z: f32) -> f32 {
    let p = projection.inverse() * Vec4::new(0.0, 0.0, ndc_z, 1.0);
    if p.w.abs() <= f32::EPSILON {
        return f32::INFINITY;
    }
    -p.z / p.w
}

/// Command and resource interface the renderer records against.
///
/// Implementations are single-threaded: every call is issued from the render
/// thread in frame order.
pub trait RenderDevice {
    // ─── Resources ────────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;

    fn destroy_texture(&mut self, texture: TextureId);

    fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc>;

    /// Resizes a texture in place. Contents are discarded; the handle is kept.
    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> Result<()>;

    /// Reads back one texel (clamped to the texture bounds).
    fn read_texel(&self, texture: TextureId, x: u32, y: u32) -> Result<Vec4>;

    fn create_framebuffer(&mut self, label: &str) -> FramebufferId;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId);

    fn framebuffer(&self, framebuffer: FramebufferId) -> Option<&Framebuffer>;

    /// Binds (or with `None`, detaches) `texture` at `point`.
    fn set_attachment(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        texture: Option<TextureId>,
    ) -> Result<()>;

    fn set_clear_color(&mut self, framebuffer: FramebufferId, index: u8, color: wgpu::Color) -> Result<()>;

    /// Resizes every attached texture. Handles stay stable.
    fn resize_framebuffer(&mut self, framebuffer: FramebufferId, width: u32, height: u32) -> Result<()>;

    // ─── State ────────────────────────────────────────────────────────────────

    /// Saves the current state and, when `Some`, binds `framebuffer`.
    fn push_state(&mut self, framebuffer: Option<FramebufferId>);

    fn pop_state(&mut self);

    /// Saves the current state and enters 2D mode.
    fn push_2d(&mut self, framebuffer: Option<FramebufferId>);

    fn pop_2d(&mut self);

    /// Binds `framebuffer` and resets per-attachment blend state.
    fn set_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn draw_framebuffer(&self) -> Option<FramebufferId>;

    /// Width of the bound framebuffer in pixels (0 when none is bound).
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Clears the bound framebuffer to its per-attachment clear values.
    fn clear(&mut self, color: bool, depth: bool) -> Result<()>;

    fn set_blend(&mut self, point: AttachmentPoint, blend: Option<wgpu::BlendState>);

    fn blend(&self, point: AttachmentPoint) -> Option<wgpu::BlendState>;

    fn set_depth_test(&mut self, test: wgpu::CompareFunction);

    fn depth_test(&self) -> wgpu::CompareFunction;

    fn set_depth_write(&mut self, enabled: bool);

    fn depth_write(&self) -> bool;

    /// Enables depth peeling for subsequent draws. Launches ignore it, and
    /// 2D mode turns it off.
    fn set_depth_peel(&mut self, peel: Option<DepthPeel>);

    fn depth_peel(&self) -> Option<DepthPeel>;

    /// Excludes a band of `pixels` around the viewport edge from 2D launches.
    fn set_guard_band_clip_2d(&mut self, pixels: u32);

    fn set_projection_and_camera_matrix(&mut self, projection: Mat4, view: Mat4);

    fn projection_matrix(&self) -> Mat4;

    fn view_matrix(&self) -> Mat4;

    // ─── Commands ─────────────────────────────────────────────────────────────

    /// Copies the buffers selected by `mask` from `src` to `dst`.
    fn blit(&mut self, src: FramebufferId, dst: FramebufferId, mask: BlitMask) -> Result<()>;

    /// Nearest-neighbor copy where destination texel `p` reads source texel
    /// `p * factor`.
    fn copy_texture_nearest(&mut self, src: TextureId, dst: TextureId, factor: u32) -> Result<()>;

    /// Looks up a full-screen program by name.
    fn resolve_shader(&mut self, name: &str) -> Result<ShaderId>;

    /// Runs a program over every pixel of the bound framebuffer's clip region.
    fn launch_shader(&mut self, shader: ShaderId, args: &Args) -> Result<()>;

    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    fn push_debug_group(&mut self, label: &str);

    fn pop_debug_group(&mut self);

    // ─── Provided ─────────────────────────────────────────────────────────────

    /// Size of the bound framebuffer.
    fn viewport(&self) -> UVec2 {
        UVec2::new(self.width(), self.height())
    }

    /// Dimensions of `framebuffer`, taken from its primary attachment.
    fn framebuffer_size(&self, framebuffer: FramebufferId) -> Option<UVec2> {
        let fb = self.framebuffer(framebuffer)?;
        let desc = self.texture_desc(fb.primary_attachment()?)?;
        Some(UVec2::new(desc.width, desc.height))
    }

    /// Texture attached to `framebuffer` at `point`.
    fn attachment(&self, framebuffer: FramebufferId, point: AttachmentPoint) -> Option<TextureId> {
        self.framebuffer(framebuffer)?.get(point)
    }
}

/// Runs `f` with `framebuffer` bound inside a saved state.
pub fn scoped_state<R>(
    rd: &mut dyn RenderDevice,
    framebuffer: Option<FramebufferId>,
    f: impl FnOnce(&mut dyn RenderDevice) -> Result<R>,
) -> Result<R> {
    rd.push_state(framebuffer);
    let result = f(&mut *rd);
    rd.pop_state();
    result
}

/// Runs `f` in 2D mode with `framebuffer` bound.
pub fn scoped_2d<R>(
    rd: &mut dyn RenderDevice,
    framebuffer: Option<FramebufferId>,
    f: impl FnOnce(&mut dyn RenderDevice) -> Result<R>,
) -> Result<R> {
    rd.push_2d(framebuffer);
    let result = f(&mut *rd);
    rd.pop_2d();
    result
}

/// Runs `f` inside a named debug group.
pub fn debug_group<R>(
    rd: &mut dyn RenderDevice,
    label: &str,
    f: impl FnOnce(&mut dyn RenderDevice) -> Result<R>,
) -> Result<R> {
    rd.push_debug_group(label);
    let result = f(&mut *rd);
    rd.pop_debug_group();
    result
}
