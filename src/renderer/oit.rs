//! Weighted-Blended Order-Independent Transparency
//!
//! Blended surfaces are accumulated without sorting into three targets and
//! resolved over a snapshot of the opaque frame. Surfaces that tolerate it
//! accumulate at reduced resolution and are bilaterally upsampled into the
//! full-resolution targets before the resolve.
//!
//! # Data Flow
//! ```text
//!                      ┌──────────── hi-res surfaces ────────────┐
//! destination color ──blit──▶ background      ▼                  │
//! destination depth ──alias──▶ hi-res OIT [A | B,D | Δ] ◀──upsample── lo-res OIT [A | B,D | Δ]
//!        │                                    │                       ▲
//!        └──nearest copy (÷factor)──▶ lo-res depth ───────────────────┤
//! CS normals ──downsampleNormal──▶ lo-res octahedral normals ─────────┘
//!                                             │
//!                    background + hi-res OIT ─┴─composite──▶ destination color
//! ```
//!
//! # Targets
//!
//! | Target | Contents                         | High precision | Low precision |
//! |--------|----------------------------------|----------------|---------------|
//! | RT0    | weighted premultiplied color `A` | `Rgba16Float`  | `Rgba16Float` |
//! | RT1    | modulation `B` (rgb), diffusion `D` (a) | `Rgba16Float` | `Rgba8Unorm` |
//! | RT2    | refraction offset `Δ`            | `Rg16Float`    | `Rg8Snorm`    |
//!
//! RT1's color and alpha blend differently (`dst · (1 − src)` vs. `src + dst`),
//! which `wgpu::BlendState` expresses as separate color and alpha components.

use std::sync::Arc;

use glam::{UVec2, Vec2, Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::renderer::classify::{SortOrder, partition_by_resolution};
use crate::renderer::core::{
    Args, AttachmentPoint, BlitMask, FramebufferId, RenderDevice, Sampler, TextureDesc, TextureId, debug_group,
    scoped_2d, scoped_state,
};
use crate::renderer::forward::{RenderPassType, forward_shade};
use crate::renderer::settings::RendererSettings;
use crate::renderer::shader_cache::ShaderCache;
use crate::renderer::software::programs::DOWNSAMPLE_NORMAL;
use crate::scene::camera::Camera;
use crate::scene::lighting::LightingEnvironment;
use crate::scene::surface::Surface;

// ─── Accumulation Write ───────────────────────────────────────────────────────

/// One transparent fragment as seen by the accumulation write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OitFragment {
    /// Shaded color premultiplied by coverage (rgb), coverage (a).
    pub premultiplied_reflect: Vec4,
    /// Per-channel transmission through the covered part.
    pub transmission: Vec3,
    pub diffusion: f32,
    /// Screen-space refraction offset.
    pub refraction_offset: Vec2,
    /// NDC depth in `[0, 1]`.
    pub depth: f32,
}

/// Values written to RT0, RT1 and RT2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OitOutputs {
    pub accum: Vec4,
    pub modulation_diffusion: Vec4,
    pub delta: Vec4,
}

/// Per-algorithm accumulation write.
pub trait OitWritePixel: Send + Sync {
    fn write(&self, fragment: &OitFragment) -> OitOutputs;
}

/// McGuire-Bavoil depth weighting with phenomenological transmission.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedBlendedWritePixel;

impl WeightedBlendedWritePixel {
    /// Depth- and coverage-based weight, clamped to `[1e-2, 3e2]`.
    #[inline]
    #[must_use]
    pub fn weight(net_coverage: f32, depth: f32) -> f32 {
        let a = net_coverage.min(1.0) * 8.0 + 0.01;
        let b = 1.0 - 0.95 * depth.clamp(0.0, 1.0);
        (a * a * a * 1e8 * b * b * b).clamp(1e-2, 3e2)
    }
}

impl OitWritePixel for WeightedBlendedWritePixel {
    fn write(&self, f: &OitFragment) -> OitOutputs {
        let coverage = f.premultiplied_reflect.w;
        let net_coverage = coverage * (1.0 - f.transmission.dot(Vec3::splat(1.0 / 3.0)));
        let w = Self::weight(net_coverage, f.depth);
        OitOutputs {
            accum: f.premultiplied_reflect.truncate().extend(net_coverage) * w,
            modulation_diffusion: (coverage * (Vec3::ONE - f.transmission))
                .extend(net_coverage * f.diffusion * f.diffusion),
            delta: (f.refraction_offset * net_coverage).extend(0.0).extend(0.0),
        }
    }
}

// ─── Blend Configuration ──────────────────────────────────────────────────────

const ADDITIVE: wgpu::BlendComponent = wgpu::BlendComponent {
    src_factor: wgpu::BlendFactor::One,
    dst_factor: wgpu::BlendFactor::One,
    operation: wgpu::BlendOperation::Add,
};

/// RT0 and RT2: `src + dst`.
pub const ACCUMULATE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: ADDITIVE,
    alpha: ADDITIVE,
};

/// RT1: color `dst · (1 − src)`, alpha `src + dst`.
pub const MODULATE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrc,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: ADDITIVE,
};

/// Applies the three accumulation blend equations to the bound framebuffer.
/// Binding a framebuffer resets blend state, so call after every bind.
pub fn apply_accumulation_blend(rd: &mut dyn RenderDevice) {
    rd.set_blend(AttachmentPoint::COLOR0, Some(ACCUMULATE_BLEND));
    rd.set_blend(AttachmentPoint::COLOR1, Some(MODULATE_BLEND));
    rd.set_blend(AttachmentPoint::COLOR2, Some(ACCUMULATE_BLEND));
}

// ─── Buffers ──────────────────────────────────────────────────────────────────

/// One three-target accumulation framebuffer.
#[derive(Debug, Clone, Copy)]
pub struct AccumulationTargets {
    pub framebuffer: FramebufferId,
    pub accum: TextureId,
    pub modulation_diffusion: TextureId,
    pub delta: TextureId,
}

/// Renderer-owned OIT resources. Sizes move together.
#[derive(Debug, Clone, Copy)]
pub struct OitBuffers {
    pub hi_res: AccumulationTargets,
    pub lo_res: AccumulationTargets,
    pub lo_res_depth: TextureId,
    pub normal_framebuffer: FramebufferId,
    pub normal: TextureId,
    pub background_framebuffer: FramebufferId,
    pub background: TextureId,
}

impl OitBuffers {
    fn allocate(
        rd: &mut dyn RenderDevice,
        prefix: &str,
        size: UVec2,
        low_res_size: UVec2,
        high_precision: bool,
        depth_format: wgpu::TextureFormat,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let hi_res = create_accumulation(rd, &format!("{prefix}oitFramebuffer"), size, high_precision)?;
        let lo_res = create_accumulation(rd, &format!("{prefix}oitLowResFramebuffer"), low_res_size, high_precision)?;

        let lo_res_depth = rd.create_texture(&TextureDesc::new(
            format!("{prefix}lowResDepth"),
            low_res_size.x,
            low_res_size.y,
            depth_format,
        ));
        rd.set_attachment(lo_res.framebuffer, AttachmentPoint::Depth, Some(lo_res_depth))?;

        let normal_framebuffer = rd.create_framebuffer(&format!("{prefix}csOctLowResNormalFramebuffer"));
        let normal = rd.create_texture(&TextureDesc::new(
            format!("{prefix}csOctLowResNormal"),
            low_res_size.x,
            low_res_size.y,
            wgpu::TextureFormat::Rg8Snorm,
        ));
        rd.set_attachment(normal_framebuffer, AttachmentPoint::COLOR0, Some(normal))?;

        let background_framebuffer = rd.create_framebuffer(&format!("{prefix}backgroundFramebuffer"));
        let background = rd.create_texture(&TextureDesc::new(
            format!("{prefix}backgroundTexture"),
            size.x,
            size.y,
            color_format,
        ));
        rd.set_attachment(background_framebuffer, AttachmentPoint::COLOR0, Some(background))?;

        Ok(Self {
            hi_res,
            lo_res,
            lo_res_depth,
            normal_framebuffer,
            normal,
            background_framebuffer,
            background,
        })
    }

    fn release(self, rd: &mut dyn RenderDevice) {
        for targets in [self.hi_res, self.lo_res] {
            rd.destroy_texture(targets.accum);
            rd.destroy_texture(targets.modulation_diffusion);
            rd.destroy_texture(targets.delta);
            rd.destroy_framebuffer(targets.framebuffer);
        }
        rd.destroy_texture(self.lo_res_depth);
        rd.destroy_texture(self.normal);
        rd.destroy_framebuffer(self.normal_framebuffer);
        rd.destroy_texture(self.background);
        rd.destroy_framebuffer(self.background_framebuffer);
    }

    /// Whether the buffers were allocated with 16-bit float RT1.
    #[must_use]
    pub fn is_high_precision(&self, rd: &dyn RenderDevice) -> bool {
        rd.texture_desc(self.hi_res.modulation_diffusion)
            .is_some_and(|d| d.format == wgpu::TextureFormat::Rgba16Float)
    }

    /// Resizes all four framebuffers when either resolution is stale.
    fn resize_if_needed(&self, rd: &mut dyn RenderDevice, size: UVec2, low_res_size: UVec2) -> Result<()> {
        let hi = rd.framebuffer_size(self.hi_res.framebuffer);
        let lo = rd.framebuffer_size(self.lo_res.framebuffer);
        if hi == Some(size) && lo == Some(low_res_size) {
            return Ok(());
        }
        log::info!("Resizing OIT buffers to {}x{} (low-res {}x{})", size.x, size.y, low_res_size.x, low_res_size.y);
        rd.resize_framebuffer(self.hi_res.framebuffer, size.x, size.y)?;
        rd.resize_framebuffer(self.lo_res.framebuffer, low_res_size.x, low_res_size.y)?;
        rd.resize_framebuffer(self.normal_framebuffer, low_res_size.x, low_res_size.y)?;
        rd.resize_framebuffer(self.background_framebuffer, size.x, size.y)
    }
}

fn create_accumulation(
    rd: &mut dyn RenderDevice,
    name: &str,
    size: UVec2,
    high_precision: bool,
) -> Result<AccumulationTargets> {
    let (rt1, rt2) = if high_precision {
        (wgpu::TextureFormat::Rgba16Float, wgpu::TextureFormat::Rg16Float)
    } else {
        (wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Rg8Snorm)
    };
    let framebuffer = rd.create_framebuffer(name);
    let attach = |rd: &mut dyn RenderDevice, index: u8, label: &str, format, clear: wgpu::Color| {
        let texture = rd.create_texture(&TextureDesc::new(format!("{name}/{label}"), size.x, size.y, format));
        rd.set_attachment(framebuffer, AttachmentPoint::Color(index), Some(texture))?;
        rd.set_clear_color(framebuffer, index, clear)?;
        Ok::<_, RenderError>(texture)
    };
    let accum = attach(rd, 0, "RT0 (A)", wgpu::TextureFormat::Rgba16Float, wgpu::Color::TRANSPARENT)?;
    let modulation_diffusion = attach(
        rd,
        1,
        "RT1 (Brgb, D)",
        rt1,
        wgpu::Color {
            r: 1.0,
            g: 1.0,
            b: 1.0,
            a: 0.0,
        },
    )?;
    let delta = attach(rd, 2, "RT2 (delta)", rt2, wgpu::Color::TRANSPARENT)?;
    Ok(AccumulationTargets {
        framebuffer,
        accum,
        modulation_diffusion,
        delta,
    })
}

// ─── Pass ─────────────────────────────────────────────────────────────────────

/// Frame inputs to [`OitPass::render`].
pub struct OitFrame<'a> {
    pub renderer_name: &'a str,
    pub texture_name_prefix: &'a str,
    pub settings: &'a RendererSettings,
    pub camera: &'a Camera,
    pub framebuffer: FramebufferId,
    pub lighting: &'a LightingEnvironment,
    pub writer: &'a dyn OitWritePixel,
    /// Full-resolution camera-space normals, when a GBuffer provides them.
    pub cs_normal: Option<TextureId>,
    pub trim_band_thickness: u32,
}

/// Persistent OIT state: owned buffers plus reusable partition lists.
#[derive(Debug, Default)]
pub struct OitPass {
    buffers: Option<OitBuffers>,
    hi_res_surfaces: Vec<usize>,
    lo_res_surfaces: Vec<usize>,
}

impl OitPass {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn buffers(&self) -> Option<&OitBuffers> {
        self.buffers.as_ref()
    }

    /// Frees every owned resource.
    pub fn release(&mut self, rd: &mut dyn RenderDevice) {
        if let Some(buffers) = self.buffers.take() {
            buffers.release(rd);
        }
    }

    /// Accumulates and composites `indices` of `surfaces` into
    /// `frame.framebuffer`. An empty list does nothing.
    pub fn render(
        &mut self,
        rd: &mut dyn RenderDevice,
        shaders: &mut ShaderCache,
        frame: &OitFrame<'_>,
        surfaces: &[Arc<dyn Surface>],
        indices: &[usize],
    ) -> Result<()> {
        if indices.is_empty() {
            return Ok(());
        }
        let factor = frame.settings.oit_low_res_downsample_factor;
        assert!(factor >= 1, "OIT low-resolution downsample factor must be at least 1");

        partition_by_resolution(surfaces, indices, factor, &mut self.hi_res_surfaces, &mut self.lo_res_surfaces);

        let size = rd
            .framebuffer_size(frame.framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(frame.framebuffer))?;
        let low_res_size = (size / factor).max(UVec2::ONE);
        let buffers = self.ensure_buffers(rd, frame, size, low_res_size)?;

        let main_depth = rd.attachment(frame.framebuffer, AttachmentPoint::Depth);
        rd.set_attachment(buffers.hi_res.framebuffer, AttachmentPoint::Depth, main_depth)?;
        rd.blit(frame.framebuffer, buffers.background_framebuffer, BlitMask::COLOR)?;

        let result = self.accumulate_and_composite(rd, shaders, frame, surfaces, &buffers, main_depth, factor);

        // The main depth is borrowed for this call only.
        rd.set_attachment(buffers.hi_res.framebuffer, AttachmentPoint::Depth, None)?;
        self.hi_res_surfaces.clear();
        self.lo_res_surfaces.clear();
        result
    }

    fn ensure_buffers(
        &mut self,
        rd: &mut dyn RenderDevice,
        frame: &OitFrame<'_>,
        size: UVec2,
        low_res_size: UVec2,
    ) -> Result<OitBuffers> {
        let high_precision = frame.settings.oit_high_precision;
        if let Some(buffers) = self.buffers {
            if buffers.is_high_precision(rd) == high_precision {
                buffers.resize_if_needed(rd, size, low_res_size)?;
                return Ok(buffers);
            }
            buffers.release(rd);
            self.buffers = None;
        }

        let depth_format = rd
            .attachment(frame.framebuffer, AttachmentPoint::Depth)
            .and_then(|t| rd.texture_desc(t))
            .map_or(wgpu::TextureFormat::Depth32Float, |d| d.format);
        let color_format = rd
            .attachment(frame.framebuffer, AttachmentPoint::COLOR0)
            .and_then(|t| rd.texture_desc(t))
            .map_or(wgpu::TextureFormat::Rgba16Float, |d| d.format);

        log::info!(
            "Allocating OIT buffers {}x{} ({} precision)",
            size.x,
            size.y,
            if high_precision { "high" } else { "low" }
        );
        let buffers = OitBuffers::allocate(
            rd,
            frame.texture_name_prefix,
            size,
            low_res_size,
            high_precision,
            depth_format,
            color_format,
        )?;
        self.buffers = Some(buffers);
        Ok(buffers)
    }

    fn accumulate_and_composite(
        &self,
        rd: &mut dyn RenderDevice,
        shaders: &mut ShaderCache,
        frame: &OitFrame<'_>,
        surfaces: &[Arc<dyn Surface>],
        buffers: &OitBuffers,
        main_depth: Option<TextureId>,
        factor: u32,
    ) -> Result<()> {
        debug_group(rd, "OIT Hi-Res", |rd| {
            clear_and_accumulate(rd, frame, surfaces, &self.hi_res_surfaces, &buffers.hi_res)
        })?;

        if !self.lo_res_surfaces.is_empty() {
            debug_group(rd, "OIT Lo-Res", |rd| {
                match main_depth {
                    Some(depth) => rd.copy_texture_nearest(depth, buffers.lo_res_depth, factor)?,
                    None => scoped_state(rd, Some(buffers.lo_res.framebuffer), |rd| rd.clear(false, true))?,
                }
                if let Some(normal) = frame.cs_normal {
                    let shader = shaders.get_or_resolve(rd, DOWNSAMPLE_NORMAL)?;
                    let mut args = Args::new();
                    args.set_texture("csHighResNormalTexture", normal, Sampler::Nearest);
                    args.set_int("lowResDownsampleFactor", factor as i32);
                    scoped_2d(rd, Some(buffers.normal_framebuffer), |rd| rd.launch_shader(shader, &args))?;
                }
                clear_and_accumulate(rd, frame, surfaces, &self.lo_res_surfaces, &buffers.lo_res)
            })?;

            debug_group(rd, "OIT Upsample", |rd| {
                upsample(rd, shaders, frame, buffers, main_depth, factor)
            })?;
        }

        debug_group(rd, "OIT Composite", |rd| composite(rd, shaders, frame, buffers))
    }
}

/// Clears the color targets of `targets` and accumulates `indices` into them.
fn clear_and_accumulate(
    rd: &mut dyn RenderDevice,
    frame: &OitFrame<'_>,
    surfaces: &[Arc<dyn Surface>],
    indices: &[usize],
    targets: &AccumulationTargets,
) -> Result<()> {
    scoped_state(rd, Some(targets.framebuffer), |rd| {
        rd.clear(true, false)?;
        apply_accumulation_blend(rd);
        rd.set_depth_write(false);
        forward_shade(
            rd,
            surfaces,
            indices,
            frame.camera,
            frame.lighting,
            frame.writer,
            RenderPassType::SinglePassUnorderedBlendedSamples,
            SortOrder::Arbitrary,
        )
    })
}

/// Adds the low-resolution accumulation into the high-resolution targets.
fn upsample(
    rd: &mut dyn RenderDevice,
    shaders: &mut ShaderCache,
    frame: &OitFrame<'_>,
    buffers: &OitBuffers,
    main_depth: Option<TextureId>,
    factor: u32,
) -> Result<()> {
    let shader = shaders.get_or_resolve(rd, &format!("{}_upsampleOIT", frame.renderer_name))?;
    let source_size = rd
        .framebuffer_size(buffers.lo_res.framebuffer)
        .unwrap_or(UVec2::ONE)
        .as_vec2();

    let mut args = Args::new();
    args.set_macro("FILTER_RADIUS", frame.settings.oit_upsample_filter_radius as i32);
    args.set_texture("sourceDepth", buffers.lo_res_depth, Sampler::Nearest);
    if let Some(depth) = main_depth {
        args.set_texture("destDepth", depth, Sampler::Nearest);
    }
    args.set_vec2("sourceSize", source_size);
    args.set_texture("accumTexture", buffers.lo_res.accum, Sampler::Nearest);
    args.set_texture(
        "backgroundModulationAndDiffusionTexture",
        buffers.lo_res.modulation_diffusion,
        Sampler::Nearest,
    );
    args.set_texture("deltaTexture", buffers.lo_res.delta, Sampler::Nearest);
    args.set_int("downsampleFactor", factor as i32);
    if let Some(normal) = frame.cs_normal {
        args.set_macro("HAS_NORMALS", 1);
        args.set_texture("destNormal", normal, Sampler::Nearest);
        args.set_texture("sourceOctNormal", buffers.normal, Sampler::Nearest);
    }

    scoped_2d(rd, Some(buffers.hi_res.framebuffer), |rd| {
        apply_accumulation_blend(rd);
        rd.launch_shader(shader, &args)
    })
}

/// Resolves the high-resolution targets over the background snapshot.
fn composite(
    rd: &mut dyn RenderDevice,
    shaders: &mut ShaderCache,
    frame: &OitFrame<'_>,
    buffers: &OitBuffers,
) -> Result<()> {
    let shader = shaders.get_or_resolve(rd, &format!("{}_compositeWeightedBlendedOIT", frame.renderer_name))?;
    let viewport = rd
        .framebuffer_size(frame.framebuffer)
        .ok_or(RenderError::UnknownFramebuffer(frame.framebuffer))?;
    let fov = frame.camera.field_of_view_angles(viewport);
    let pixels_per_diffusion = 0.05 * viewport.y as f32 / fov.y.tan();

    let mut args = Args::new();
    args.set_texture("backgroundTexture", buffers.background, Sampler::Bilinear);
    args.set_float("pixelsPerDiffusion2", pixels_per_diffusion * pixels_per_diffusion);
    args.set_vec2("trimBandThickness", Vec2::splat(frame.trim_band_thickness as f32));
    args.set_texture("accumTexture", buffers.hi_res.accum, Sampler::Nearest);
    args.set_texture(
        "backgroundModulationAndDiffusionTexture",
        buffers.hi_res.modulation_diffusion,
        Sampler::Nearest,
    );
    args.set_texture("deltaTexture", buffers.hi_res.delta, Sampler::Nearest);

    scoped_2d(rd, Some(frame.framebuffer), |rd| {
        rd.set_depth_test(wgpu::CompareFunction::Always);
        rd.launch_shader(shader, &args)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_clamped_and_favours_near_coverage() {
        assert!((WeightedBlendedWritePixel::weight(1.0, 0.0) - 3e2).abs() < 1e-3);
        let faint_far = WeightedBlendedWritePixel::weight(0.0, 1.0);
        assert!(faint_far >= 1e-2 && faint_far < 0.02);
    }

    #[test]
    fn opaque_coverage_fully_modulates_background() {
        let out = WeightedBlendedWritePixel.write(&OitFragment {
            premultiplied_reflect: Vec4::new(0.5, 0.0, 0.0, 1.0),
            transmission: Vec3::ZERO,
            diffusion: 0.0,
            refraction_offset: Vec2::ZERO,
            depth: 0.5,
        });
        assert_eq!(out.modulation_diffusion.truncate(), Vec3::ONE);
        assert!((out.accum.x / out.accum.w - 0.5).abs() < 1e-6);
    }

    #[test]
    fn modulate_blend_splits_color_and_alpha() {
        assert_eq!(MODULATE_BLEND.color.dst_factor, wgpu::BlendFactor::OneMinusSrc);
        assert_eq!(MODULATE_BLEND.alpha.dst_factor, wgpu::BlendFactor::One);
    }
}
