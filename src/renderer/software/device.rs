//! Software Render Device
//!
//! [`SoftwareDevice`] is a CPU implementation of [`RenderDevice`]. It
//! executes every command immediately against in-memory textures, which
//! makes it the reference backend for tests and offline rendering.
//!
//! Besides producing pixels it keeps an ordered [`DeviceEvent`] log and
//! [`DeviceStats`] counters so callers can inspect exactly which passes ran,
//! in what order, against which framebuffer.
//!
//! # Rasterization
//!
//! | Command                | Coverage                                        |
//! |------------------------|-------------------------------------------------|
//! | [`DrawCall`]           | pixels whose centers lie inside the rectangle,  |
//! |                        | minus pixels rejected by the depth peel         |
//! | program launch         | viewport minus 2D guard band, ∩ `Args::rect`    |
//! | blit / nearest copy    | whole texture                                   |
//!
//! Launches evaluate every pixel before writing any of them, so a program
//! never observes its own output.

use glam::{IVec2, Mat4, UVec2, Vec4};
use slotmap::SlotMap;

use super::blend::{apply_blend, depth_compare};
use super::program::{FragmentContext, FragmentOutput, PixelProgram, ShaderLibrary};
use super::texture::CpuTexture;
use crate::errors::{RenderError, Result};
use crate::renderer::core::{
    Args, AttachmentPoint, BlitMask, DepthPeel, DrawCall, Framebuffer, FramebufferId, MAX_COLOR_ATTACHMENTS, PixelRect,
    RenderDevice, ShaderId, TextureDesc, TextureId, camera_space_depth,
};

// ─── Event Log ────────────────────────────────────────────────────────────────

/// One recorded device operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    CreateTexture { texture: TextureId, label: String },
    DestroyTexture { texture: TextureId },
    ResizeFramebuffer { framebuffer: FramebufferId, width: u32, height: u32 },
    Clear { framebuffer: FramebufferId, color: bool, depth: bool },
    Draw { label: String, framebuffer: FramebufferId, group: Option<String> },
    ResolveShader { name: String },
    LaunchShader { name: String, framebuffer: FramebufferId, group: Option<String> },
    Blit { src: FramebufferId, dst: FramebufferId, mask: BlitMask },
    CopyTexture { src: TextureId, dst: TextureId, factor: u32 },
}

/// Running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub textures_created: u32,
    pub textures_destroyed: u32,
    pub draws: u32,
    pub launches: u32,
    pub fragments_written: u64,
}

// ─── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackKind {
    State,
    TwoD,
}

#[derive(Debug, Clone)]
struct DeviceState {
    framebuffer: Option<FramebufferId>,
    blend: [Option<wgpu::BlendState>; MAX_COLOR_ATTACHMENTS],
    depth_test: wgpu::CompareFunction,
    depth_write: bool,
    guard_band: u32,
    depth_peel: Option<DepthPeel>,
    projection: Mat4,
    view: Mat4,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            framebuffer: None,
            blend: [None; MAX_COLOR_ATTACHMENTS],
            depth_test: wgpu::CompareFunction::LessEqual,
            depth_write: true,
            guard_band: 0,
            depth_peel: None,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

struct ShaderEntry {
    name: String,
    program: std::sync::Arc<dyn PixelProgram>,
}

/// CPU reference implementation of [`RenderDevice`].
pub struct SoftwareDevice {
    textures: SlotMap<TextureId, CpuTexture>,
    framebuffers: SlotMap<FramebufferId, Framebuffer>,
    shaders: SlotMap<ShaderId, ShaderEntry>,
    library: ShaderLibrary,
    state: DeviceState,
    stack: Vec<(StackKind, DeviceState)>,
    groups: Vec<String>,
    events: Vec<DeviceEvent>,
    stats: DeviceStats,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    /// A device with the built-in program library.
    #[must_use]
    pub fn new() -> Self {
        Self::with_library(ShaderLibrary::with_builtins())
    }

    #[must_use]
    pub fn with_library(library: ShaderLibrary) -> Self {
        Self {
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            library,
            state: DeviceState::default(),
            stack: Vec::new(),
            groups: Vec::new(),
            events: Vec::new(),
            stats: DeviceStats::default(),
        }
    }

    pub fn library_mut(&mut self) -> &mut ShaderLibrary {
        &mut self.library
    }

    #[must_use]
    pub fn events(&self) -> &[DeviceEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    #[must_use]
    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    /// Number of saved states (`push_state` / `push_2d`) not yet popped.
    #[must_use]
    pub fn state_depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// CPU texture behind `texture`.
    #[must_use]
    pub fn texture(&self, texture: TextureId) -> Option<&CpuTexture> {
        self.textures.get(texture)
    }

    /// Overwrites one texel, bypassing blend and depth state.
    pub fn write_texel(&mut self, texture: TextureId, x: u32, y: u32, value: Vec4) -> Result<()> {
        self.textures
            .get_mut(texture)
            .ok_or(RenderError::UnknownTexture(texture))?
            .store(x, y, value);
        Ok(())
    }

    fn record(&mut self, event: DeviceEvent) {
        log::trace!("{event:?}");
        self.events.push(event);
    }

    fn current_group(&self) -> Option<String> {
        self.groups.last().cloned()
    }

    fn bound(&self, what: &'static str) -> Result<(FramebufferId, Framebuffer)> {
        let id = self.state.framebuffer.ok_or(RenderError::NoFramebufferBound(what))?;
        let fb = self
            .framebuffers
            .get(id)
            .ok_or(RenderError::UnknownFramebuffer(id))?
            .clone();
        Ok((id, fb))
    }

    fn size_of(&self, fb: &Framebuffer) -> UVec2 {
        fb.primary_attachment()
            .and_then(|t| self.textures.get(t))
            .map_or(UVec2::ZERO, CpuTexture::size)
    }

    /// Depth test, depth write and blended color writes for one fragment.
    fn write_fragment(
        &mut self,
        fb: &Framebuffer,
        x: u32,
        y: u32,
        depth: Option<f32>,
        outputs: &[(usize, Vec4)],
    ) {
        if let (Some(z), Some(depth_tex)) = (depth, fb.depth) {
            if let Some(tex) = self.textures.get_mut(depth_tex) {
                let stored = tex.fetch(IVec2::new(x as i32, y as i32)).x;
                if !depth_compare(self.state.depth_test, z, stored) {
                    return;
                }
                if self.state.depth_write {
                    tex.store(x, y, Vec4::new(z, 0.0, 0.0, 1.0));
                }
            }
        }

        for &(index, value) in outputs {
            let Some(Some(target)) = fb.color.get(index) else {
                continue;
            };
            let blend = self.state.blend[index];
            if let Some(tex) = self.textures.get_mut(*target) {
                let dst = tex.fetch(IVec2::new(x as i32, y as i32));
                tex.store(x, y, apply_blend(blend.as_ref(), value, dst));
                self.stats.fragments_written += 1;
            }
        }
    }

    fn copy_attachment(&mut self, src: TextureId, dst: TextureId) -> Result<()> {
        let source = self.textures.get(src).ok_or(RenderError::UnknownTexture(src))?.clone();
        let target = self.textures.get_mut(dst).ok_or(RenderError::UnknownTexture(dst))?;
        if source.size() != target.size() {
            return Err(RenderError::DimensionMismatch {
                context: "blit",
                expected: (target.desc.width, target.desc.height),
                actual: (source.desc.width, source.desc.height),
            });
        }
        target.copy_from(&source);
        Ok(())
    }
}

impl RenderDevice for SoftwareDevice {
    // ─── Resources ────────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let id = self.textures.insert(CpuTexture::new(desc.clone()));
        self.stats.textures_created += 1;
        self.record(DeviceEvent::CreateTexture {
            texture: id,
            label: desc.label.clone(),
        });
        id
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            self.stats.textures_destroyed += 1;
            self.record(DeviceEvent::DestroyTexture { texture });
        }
    }

    fn texture_desc(&self, texture: TextureId) -> Option<&TextureDesc> {
        self.textures.get(texture).map(|t| &t.desc)
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> Result<()> {
        self.textures
            .get_mut(texture)
            .ok_or(RenderError::UnknownTexture(texture))?
            .resize(width, height);
        Ok(())
    }

    fn read_texel(&self, texture: TextureId, x: u32, y: u32) -> Result<Vec4> {
        let tex = self.textures.get(texture).ok_or(RenderError::UnknownTexture(texture))?;
        Ok(tex.fetch(IVec2::new(x as i32, y as i32)))
    }

    fn create_framebuffer(&mut self, label: &str) -> FramebufferId {
        self.framebuffers.insert(Framebuffer::new(label))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffers.remove(framebuffer);
    }

    fn framebuffer(&self, framebuffer: FramebufferId) -> Option<&Framebuffer> {
        self.framebuffers.get(framebuffer)
    }

    fn set_attachment(
        &mut self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
        texture: Option<TextureId>,
    ) -> Result<()> {
        if let Some(t) = texture {
            if !self.textures.contains_key(t) {
                return Err(RenderError::UnknownTexture(t));
            }
        }
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(framebuffer))?;
        match point {
            AttachmentPoint::Color(i) => {
                let slot = fb.color.get_mut(i as usize).ok_or_else(|| RenderError::MissingAttachment {
                    framebuffer: fb.label.clone(),
                    attachment: point,
                })?;
                *slot = texture;
            }
            AttachmentPoint::Depth => fb.depth = texture,
        }
        Ok(())
    }

    fn set_clear_color(&mut self, framebuffer: FramebufferId, index: u8, color: wgpu::Color) -> Result<()> {
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(framebuffer))?;
        if let Some(slot) = fb.clear_color.get_mut(index as usize) {
            *slot = color;
        }
        Ok(())
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferId, width: u32, height: u32) -> Result<()> {
        let fb = self
            .framebuffers
            .get(framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(framebuffer))?;
        let attached: Vec<TextureId> = fb.attachments().map(|(_, t)| t).collect();
        for t in attached {
            self.resize_texture(t, width, height)?;
        }
        self.record(DeviceEvent::ResizeFramebuffer {
            framebuffer,
            width,
            height,
        });
        Ok(())
    }

    // ─── State ────────────────────────────────────────────────────────────────

    fn push_state(&mut self, framebuffer: Option<FramebufferId>) {
        self.stack.push((StackKind::State, self.state.clone()));
        if framebuffer.is_some() {
            self.set_framebuffer(framebuffer);
        }
    }

    fn pop_state(&mut self) {
        match self.stack.pop() {
            Some((kind, state)) => {
                debug_assert_eq!(kind, StackKind::State, "pop_state paired with push_2d");
                self.state = state;
            }
            None => log::error!("pop_state with an empty state stack"),
        }
    }

    fn push_2d(&mut self, framebuffer: Option<FramebufferId>) {
        self.stack.push((StackKind::TwoD, self.state.clone()));
        if framebuffer.is_some() {
            self.set_framebuffer(framebuffer);
        }
        self.state.blend = [None; MAX_COLOR_ATTACHMENTS];
        self.state.depth_test = wgpu::CompareFunction::Always;
        self.state.depth_write = false;
        self.state.guard_band = 0;
        self.state.depth_peel = None;
        self.state.projection = Mat4::IDENTITY;
        self.state.view = Mat4::IDENTITY;
    }

    fn pop_2d(&mut self) {
        match self.stack.pop() {
            Some((kind, state)) => {
                debug_assert_eq!(kind, StackKind::TwoD, "pop_2d paired with push_state");
                self.state = state;
            }
            None => log::error!("pop_2d with an empty state stack"),
        }
    }

    fn set_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.state.framebuffer = framebuffer;
        self.state.blend = [None; MAX_COLOR_ATTACHMENTS];
    }

    fn draw_framebuffer(&self) -> Option<FramebufferId> {
        self.state.framebuffer
    }

    fn width(&self) -> u32 {
        self.state
            .framebuffer
            .and_then(|id| self.framebuffers.get(id))
            .map_or(0, |fb| self.size_of(fb).x)
    }

    fn height(&self) -> u32 {
        self.state
            .framebuffer
            .and_then(|id| self.framebuffers.get(id))
            .map_or(0, |fb| self.size_of(fb).y)
    }

    fn clear(&mut self, color: bool, depth: bool) -> Result<()> {
        let (id, fb) = self.bound("clear")?;
        if color {
            for (i, target) in fb.color.iter().enumerate() {
                let Some(target) = target else { continue };
                let c = fb.clear_color[i];
                let v = Vec4::new(c.r as f32, c.g as f32, c.b as f32, c.a as f32);
                if let Some(tex) = self.textures.get_mut(*target) {
                    tex.fill(v);
                }
            }
        }
        if depth {
            if let Some(tex) = fb.depth.and_then(|t| self.textures.get_mut(t)) {
                tex.fill(Vec4::new(fb.clear_depth, 0.0, 0.0, 1.0));
            }
        }
        self.record(DeviceEvent::Clear {
            framebuffer: id,
            color,
            depth,
        });
        Ok(())
    }

    fn set_blend(&mut self, point: AttachmentPoint, blend: Option<wgpu::BlendState>) {
        if let Some(slot) = point.color_index().and_then(|i| self.state.blend.get_mut(i)) {
            *slot = blend;
        }
    }

    fn blend(&self, point: AttachmentPoint) -> Option<wgpu::BlendState> {
        point.color_index().and_then(|i| self.state.blend.get(i).copied().flatten())
    }

    fn set_depth_test(&mut self, test: wgpu::CompareFunction) {
        self.state.depth_test = test;
    }

    fn depth_test(&self) -> wgpu::CompareFunction {
        self.state.depth_test
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.state.depth_write = enabled;
    }

    fn depth_write(&self) -> bool {
        self.state.depth_write
    }

    fn set_depth_peel(&mut self, peel: Option<DepthPeel>) {
        self.state.depth_peel = peel;
    }

    fn depth_peel(&self) -> Option<DepthPeel> {
        self.state.depth_peel
    }

    fn set_guard_band_clip_2d(&mut self, pixels: u32) {
        self.state.guard_band = pixels;
    }

    fn set_projection_and_camera_matrix(&mut self, projection: Mat4, view: Mat4) {
        self.state.projection = projection;
        self.state.view = view;
    }

    fn projection_matrix(&self) -> Mat4 {
        self.state.projection
    }

    fn view_matrix(&self) -> Mat4 {
        self.state.view
    }

    // ─── Commands ─────────────────────────────────────────────────────────────

    fn blit(&mut self, src: FramebufferId, dst: FramebufferId, mask: BlitMask) -> Result<()> {
        let s = self
            .framebuffers
            .get(src)
            .ok_or(RenderError::UnknownFramebuffer(src))?
            .clone();
        let d = self
            .framebuffers
            .get(dst)
            .ok_or(RenderError::UnknownFramebuffer(dst))?
            .clone();

        if mask.contains(BlitMask::COLOR) {
            for (from, to) in s.color.iter().zip(d.color.iter()) {
                if let (Some(from), Some(to)) = (from, to) {
                    self.copy_attachment(*from, *to)?;
                }
            }
        }
        if mask.contains(BlitMask::DEPTH) {
            let from = s.depth.ok_or_else(|| RenderError::MissingAttachment {
                framebuffer: s.label.clone(),
                attachment: AttachmentPoint::Depth,
            })?;
            let to = d.depth.ok_or_else(|| RenderError::MissingAttachment {
                framebuffer: d.label.clone(),
                attachment: AttachmentPoint::Depth,
            })?;
            self.copy_attachment(from, to)?;
        }
        self.record(DeviceEvent::Blit { src, dst, mask });
        Ok(())
    }

    fn copy_texture_nearest(&mut self, src: TextureId, dst: TextureId, factor: u32) -> Result<()> {
        let factor = factor.max(1);
        let source = self.textures.get(src).ok_or(RenderError::UnknownTexture(src))?.clone();
        let target = self.textures.get_mut(dst).ok_or(RenderError::UnknownTexture(dst))?;
        let size = target.size();
        for y in 0..size.y {
            for x in 0..size.x {
                let p = IVec2::new((x * factor) as i32, (y * factor) as i32);
                target.store(x, y, source.fetch(p));
            }
        }
        self.record(DeviceEvent::CopyTexture { src, dst, factor });
        Ok(())
    }

    fn resolve_shader(&mut self, name: &str) -> Result<ShaderId> {
        let program = self
            .library
            .get(name)
            .ok_or_else(|| RenderError::ShaderNotFound(name.to_owned()))?;
        log::debug!("Resolved shader program '{name}'");
        self.record(DeviceEvent::ResolveShader { name: name.to_owned() });
        Ok(self.shaders.insert(ShaderEntry {
            name: name.to_owned(),
            program,
        }))
    }

    fn launch_shader(&mut self, shader: ShaderId, args: &Args) -> Result<()> {
        let entry = self.shaders.get(shader).ok_or(RenderError::StaleShader)?;
        let program = entry.program.clone();
        let name = entry.name.clone();
        let (id, fb) = self.bound("launch_shader")?;
        let size = self.size_of(&fb);

        let mut region = PixelRect::from_size(size).inset(self.state.guard_band);
        if let Some(rect) = args.rect() {
            region = region.intersect(rect);
        }

        // Evaluate everything first; writes happen afterwards.
        let mut results: Vec<(UVec2, FragmentOutput)> = Vec::new();
        for y in region.min.y..region.max.y {
            for x in region.min.x..region.max.x {
                let pixel = UVec2::new(x as u32, y as u32);
                let frag = FragmentContext::new(pixel, size, args, &self.textures);
                if let Some(out) = program.shade(&frag) {
                    results.push((pixel, out));
                }
            }
        }

        for (pixel, out) in results {
            let outputs: Vec<(usize, Vec4)> = out.colors.iter().map(|(i, v)| (*i as usize, *v)).collect();
            self.write_fragment(&fb, pixel.x, pixel.y, out.depth, &outputs);
        }

        self.stats.launches += 1;
        let group = self.current_group();
        self.record(DeviceEvent::LaunchShader {
            name,
            framebuffer: id,
            group,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let (id, fb) = self.bound("draw")?;
        let size = self.size_of(&fb).as_vec2();

        let outputs: Vec<(usize, Vec4)> = call
            .outputs
            .iter()
            .filter_map(|(p, v)| p.color_index().map(|i| (i, *v)))
            .collect();

        let x0 = (call.rect.min.x * size.x - 0.5).ceil().max(0.0) as u32;
        let x1 = (call.rect.max.x * size.x - 0.5).ceil().clamp(0.0, size.x) as u32;
        let y0 = (call.rect.min.y * size.y - 0.5).ceil().max(0.0) as u32;
        let y1 = (call.rect.max.y * size.y - 0.5).ceil().clamp(0.0, size.y) as u32;

        let peel = match self.state.depth_peel {
            Some(peel) => {
                let first = self
                    .textures
                    .get(peel.first_layer)
                    .ok_or(RenderError::UnknownTexture(peel.first_layer))?
                    .clone();
                Some((first, peel.min_separation))
            }
            None => None,
        };
        let projection = self.state.projection;
        let fragment_distance = camera_space_depth(projection, call.depth);

        for y in y0..y1 {
            for x in x0..x1 {
                if let Some((first, separation)) = &peel {
                    let front = first.fetch(IVec2::new(x as i32, y as i32)).x;
                    if fragment_distance <= camera_space_depth(projection, front) + separation {
                        continue;
                    }
                }
                self.write_fragment(&fb, x, y, Some(call.depth), &outputs);
            }
        }

        self.stats.draws += 1;
        let group = self.current_group();
        self.record(DeviceEvent::Draw {
            label: call.label.clone(),
            framebuffer: id,
            group,
        });
        Ok(())
    }

    fn push_debug_group(&mut self, label: &str) {
        self.groups.push(label.to_owned());
    }

    fn pop_debug_group(&mut self) {
        if self.groups.pop().is_none() {
            log::error!("pop_debug_group without a matching push");
        }
    }
}
