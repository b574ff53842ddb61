//! Default Renderer
//!
//! [`DefaultRenderer`] sequences one frame of hybrid deferred/forward shading
//! with order-independent or sorted transparency.
//!
//! # Frame
//! ```text
//! surfaces ─▶ cull & sort ─▶ GBuffer ─▶ shadows / AO ─▶ deferred shade
//!                                                          │
//!     OIT or sorted blend ◀─ refraction ◀─ screen copy ◀─ forward opaque
//! ```
//!
//! | Stage                     | Debug group                 | Runs when                      |
//! |---------------------------|-----------------------------|--------------------------------|
//! | geometry pass             | `GBuffer`                   | a GBuffer is supplied          |
//! | second depth layer        | `Depth Peel`                | GBuffer + AO with depth peel   |
//! | shadow maps, AO           | `Shadowing`                 | always                         |
//! | deferred shading          | `Deferred Shading`          | deferred enabled + GBuffer     |
//! | forward opaque            | `Forward Opaque`            | always                         |
//! | refraction                | `Screen-Space Refraction`   | always                         |
//! | transparency              | `OIT` / `Sorted Blending`   | always                         |
//!
//! The destination framebuffer is bound inside a saved state for the whole
//! frame, so caller state is restored on every exit path.

use std::sync::Arc;

use crate::errors::{RenderError, Result};
use crate::renderer::classify::{RenderLists, SortOrder};
use crate::renderer::core::{
    AttachmentPoint, DepthPeel, FramebufferId, RenderDevice, TextureId, debug_group, scoped_state,
};
use crate::renderer::deferred::render_deferred_shading;
use crate::renderer::forward::{RenderPassType, forward_shade};
use crate::renderer::gbuffer::{GBuffer, GBufferField};
use crate::renderer::oit::{OitFrame, OitPass, OitWritePixel, WeightedBlendedWritePixel};
use crate::renderer::settings::RendererSettings;
use crate::renderer::shader_cache::ShaderCache;
use crate::renderer::shading::{DefaultShadingPolicy, ShadingPolicy};
use crate::renderer::shadow::compute_shadowing;
use crate::scene::camera::{Camera, aspect_ratio};
use crate::scene::lighting::LightingEnvironment;
use crate::scene::surface::Surface;

/// Surface counts at or above this indicate corrupted input.
pub const MAX_PLAUSIBLE_SURFACES: usize = 500_000;

pub struct DefaultRenderer {
    name: String,
    texture_name_prefix: String,
    settings: RendererSettings,
    shaders: ShaderCache,
    lists: RenderLists,
    oit: OitPass,
    policy: Box<dyn ShadingPolicy>,
    oit_writer: Box<dyn OitWritePixel>,
}

impl Default for DefaultRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "DefaultRenderer".to_string(),
            texture_name_prefix: "DefaultRenderer::".to_string(),
            settings: RendererSettings::default(),
            shaders: ShaderCache::new(),
            lists: RenderLists::new(),
            oit: OitPass::new(),
            policy: Box::new(DefaultShadingPolicy),
            oit_writer: Box::new(WeightedBlendedWritePixel),
        }
    }

    pub fn with_settings(settings: RendererSettings) -> Result<Self> {
        let mut renderer = Self::new();
        renderer.set_settings(settings)?;
        Ok(renderer)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the renderer. Program names derive from it, so cached
    /// handles are dropped.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.shaders.reset();
    }

    #[must_use]
    pub fn texture_name_prefix(&self) -> &str {
        &self.texture_name_prefix
    }

    /// Prefix for internal texture labels; applies to buffers allocated
    /// afterwards.
    pub fn set_texture_name_prefix(&mut self, prefix: impl Into<String>) {
        self.texture_name_prefix = prefix.into();
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RendererSettings) -> Result<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn set_shading_policy(&mut self, policy: Box<dyn ShadingPolicy>) {
        self.policy = policy;
    }

    pub fn set_oit_write_pixel(&mut self, writer: Box<dyn OitWritePixel>) {
        self.oit_writer = writer;
    }

    /// Classification of the most recent frame.
    #[must_use]
    pub fn lists(&self) -> &RenderLists {
        &self.lists
    }

    #[must_use]
    pub fn oit(&self) -> &OitPass {
        &self.oit
    }

    #[must_use]
    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shaders
    }

    /// Frees renderer-owned device resources.
    pub fn release(&mut self, rd: &mut dyn RenderDevice) {
        self.oit.release(rd);
    }

    /// Renders `surfaces` into `framebuffer`.
    ///
    /// With a GBuffer, the destination's depth attachment is rebound to the
    /// GBuffer's depth and stays that way after the call.
    ///
    /// # Panics
    /// When ambient occlusion is enabled without a bound AO object, or when
    /// the surface count is implausibly large.
    pub fn render(
        &mut self,
        rd: &mut dyn RenderDevice,
        camera: &Camera,
        framebuffer: FramebufferId,
        depth_peel_framebuffer: Option<FramebufferId>,
        lighting: &mut LightingEnvironment,
        gbuffer: Option<&GBuffer>,
        surfaces: &[Arc<dyn Surface>],
    ) -> Result<()> {
        assert!(
            !lighting.ambient_occlusion_settings.enabled || lighting.ambient_occlusion.is_some(),
            "Ambient occlusion is enabled but no ambient occlusion object is bound to the lighting environment"
        );
        assert!(
            surfaces.len() < MAX_PLAUSIBLE_SURFACES,
            "It is very unlikely that you intended to draw {} surfaces. There is probably heap corruption.",
            surfaces.len()
        );

        if let Some(gbuffer) = gbuffer {
            rd.set_attachment(framebuffer, AttachmentPoint::Depth, Some(gbuffer.depth_texture()?))?;
        }

        let size = rd
            .framebuffer_size(framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(framebuffer))?;
        if let Some(peel) = depth_peel_framebuffer {
            if rd.framebuffer_size(peel) != Some(size) {
                rd.resize_framebuffer(peel, size.x, size.y)?;
            }
        }

        self.lists
            .cull_and_sort(surfaces, camera, size, gbuffer.map(GBuffer::specification));

        let projection = camera.projection_matrix(aspect_ratio(size));
        let view = camera.view_matrix();
        log::trace!("Rendering '{}' with {} surfaces", self.name, surfaces.len());

        scoped_state(rd, Some(framebuffer), |rd| {
            rd.clear(true, true)?;
            rd.set_projection_and_camera_matrix(projection, view);
            self.render_passes(rd, camera, framebuffer, depth_peel_framebuffer, lighting, gbuffer, surfaces)
        })
    }

    fn render_passes(
        &mut self,
        rd: &mut dyn RenderDevice,
        camera: &Camera,
        framebuffer: FramebufferId,
        depth_peel_framebuffer: Option<FramebufferId>,
        lighting: &mut LightingEnvironment,
        gbuffer: Option<&GBuffer>,
        surfaces: &[Arc<dyn Surface>],
    ) -> Result<()> {
        let ao = lighting.ambient_occlusion_settings;
        let peel = depth_peel_framebuffer.filter(|_| ao.enabled && ao.use_depth_peel_buffer);

        if let Some(gbuffer) = gbuffer {
            debug_group(rd, "GBuffer", |rd| render_gbuffer(rd, gbuffer, surfaces, &self.lists))?;
            if let (Some(peel), Some(first_layer)) = (peel, gbuffer.texture(GBufferField::DepthAndStencil)) {
                let min_separation = ao.depth_peel_separation_hint;
                debug_group(rd, "Depth Peel", |rd| {
                    render_depth_peel(rd, peel, first_layer, min_separation, surfaces, &self.lists)
                })?;
            }
        }

        let depth = rd.attachment(framebuffer, AttachmentPoint::Depth);
        // The second layer is only peeled against GBuffer depth.
        let peel_depth = peel
            .filter(|_| gbuffer.is_some())
            .and_then(|p| rd.attachment(p, AttachmentPoint::Depth));
        debug_group(rd, "Shadowing", |rd| {
            compute_shadowing(rd, lighting, surfaces, camera, depth, peel_depth)
        })?;

        let deferred = match (self.settings.deferred_shading, gbuffer) {
            (true, Some(gbuffer)) => Some(gbuffer),
            (true, None) => {
                log::warn!("Deferred shading requested without a GBuffer; forward shading everything");
                None
            }
            (false, _) => None,
        };

        if let Some(gbuffer) = deferred {
            let policy = self.policy.as_ref();
            let shaders = &mut self.shaders;
            let name = self.name.as_str();
            let lighting: &LightingEnvironment = lighting;
            debug_group(rd, "Deferred Shading", |rd| {
                policy.compute_indirect_illumination(rd, lighting, gbuffer)?;
                render_deferred_shading(rd, shaders, name, policy, lighting, gbuffer)
            })?;
        }

        let opaque = if deferred.is_some() {
            &self.lists.forward_opaque
        } else {
            &self.lists.sorted_visible
        };
        let writer = self.oit_writer.as_ref();

        debug_group(rd, "Forward Opaque", |rd| {
            forward_shade(
                rd,
                surfaces,
                opaque,
                camera,
                lighting,
                writer,
                RenderPassType::OpaqueSamples,
                SortOrder::Arbitrary,
            )
        })?;

        // Refracting surfaces must not see themselves.
        let (color_guard_band, depth_guard_band) = guard_bands(gbuffer);
        lighting.copy_screen_space_buffers(rd, framebuffer, color_guard_band, depth_guard_band)?;
        let lighting: &LightingEnvironment = lighting;

        debug_group(rd, "Screen-Space Refraction", |rd| {
            forward_shade(
                rd,
                surfaces,
                opaque,
                camera,
                lighting,
                writer,
                RenderPassType::UnblendedScreenSpaceRefractionSamples,
                SortOrder::Arbitrary,
            )
        })?;

        let blended = &self.lists.forward_blended;
        if self.settings.order_independent_transparency {
            let frame = OitFrame {
                renderer_name: &self.name,
                texture_name_prefix: &self.texture_name_prefix,
                settings: &self.settings,
                camera,
                framebuffer,
                lighting,
                writer,
                cs_normal: cs_normal(gbuffer),
                trim_band_thickness: gbuffer.map_or(0, GBuffer::trim_band_thickness),
            };
            let oit = &mut self.oit;
            let shaders = &mut self.shaders;
            debug_group(rd, "OIT", |rd| oit.render(rd, shaders, &frame, surfaces, blended))
        } else {
            debug_group(rd, "Sorted Blending", |rd| {
                forward_shade(
                    rd,
                    surfaces,
                    blended,
                    camera,
                    lighting,
                    writer,
                    RenderPassType::MultipassBlendedSamples,
                    SortOrder::BackToFront,
                )
            })
        }
    }
}

/// Geometry pass: representable surfaces write every field; other opaque
/// surfaces contribute depth only.
fn render_gbuffer(
    rd: &mut dyn RenderDevice,
    gbuffer: &GBuffer,
    surfaces: &[Arc<dyn Surface>],
    lists: &RenderLists,
) -> Result<()> {
    let spec = gbuffer.specification();
    scoped_state(rd, Some(gbuffer.framebuffer()), |rd| {
        rd.clear(true, true)?;
        rd.set_depth_write(true);
        for &i in &lists.sorted_visible {
            let surface = &surfaces[i];
            if surface.can_be_fully_represented_in_gbuffer(spec) {
                surface.render_into_gbuffer(rd, gbuffer)?;
            } else if !surface.has_blended_transparency() && !surface.has_screen_space_refraction() {
                surface.render_depth_only(rd)?;
            }
        }
        Ok(())
    })
}

/// Second depth layer: the nearest opaque surface at least `min_separation`
/// behind the GBuffer depth, per pixel.
fn render_depth_peel(
    rd: &mut dyn RenderDevice,
    peel: FramebufferId,
    first_layer: TextureId,
    min_separation: f32,
    surfaces: &[Arc<dyn Surface>],
    lists: &RenderLists,
) -> Result<()> {
    scoped_state(rd, Some(peel), |rd| {
        rd.clear(false, true)?;
        rd.set_depth_test(wgpu::CompareFunction::LessEqual);
        rd.set_depth_write(true);
        rd.set_depth_peel(Some(DepthPeel {
            first_layer,
            min_separation,
        }));
        for &i in &lists.sorted_visible {
            let surface = &surfaces[i];
            if !surface.has_blended_transparency() && !surface.has_screen_space_refraction() {
                surface.render_depth_only(rd)?;
            }
        }
        Ok(())
    })
}

/// Guard bands of `gbuffer`, or none.
fn guard_bands(gbuffer: Option<&GBuffer>) -> (u32, u32) {
    gbuffer.map_or((0, 0), |g| (g.color_guard_band(), g.depth_guard_band()))
}

fn cs_normal(gbuffer: Option<&GBuffer>) -> Option<TextureId> {
    gbuffer.and_then(|g| g.texture(GBufferField::CsNormal))
}
