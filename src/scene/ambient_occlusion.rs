//! Ambient occlusion.
//!
//! [`AmbientOcclusion`] is the collaborator the lighting environment binds
//! when [`AmbientOcclusionSettings::enabled`] is set. The renderer calls
//! [`AmbientOcclusion::update`] once per frame after the geometry pass; the
//! resulting texture is read by deferred shading.

use serde::{Deserialize, Serialize};

use crate::errors::{RenderError, Result};
use crate::renderer::core::{
    Args, AttachmentPoint, FramebufferId, RenderDevice, Sampler, ShaderId, TextureDesc, TextureId, scoped_2d,
};
use crate::renderer::software::programs::AMBIENT_OCCLUSION;
use crate::scene::camera::Camera;

/// Ambient occlusion configuration.
///
/// | Field                       | Default |
/// |-----------------------------|---------|
/// | `enabled`                   | `false` |
/// | `use_depth_peel_buffer`     | `true`  |
/// | `depth_peel_separation_hint`| `0.01`  |
/// | `radius`                    | `4.0`   |
/// | `bias`                      | `0.05`  |
/// | `range`                     | `2.0`   |
/// | `intensity`                 | `1.0`   |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientOcclusionSettings {
    pub enabled: bool,
    /// Request a second depth layer for the estimator.
    pub use_depth_peel_buffer: bool,
    /// Minimum camera-space gap between the two depth layers.
    pub depth_peel_separation_hint: f32,
    /// Sampling radius in pixels.
    pub radius: f32,
    /// Camera-space depth bias below which neighbors do not occlude.
    pub bias: f32,
    /// Camera-space distance beyond which a closer neighbor no longer
    /// occludes.
    pub range: f32,
    pub intensity: f32,
}

impl Default for AmbientOcclusionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            use_depth_peel_buffer: true,
            depth_peel_separation_hint: 0.01,
            radius: 4.0,
            bias: 0.05,
            range: 2.0,
            intensity: 1.0,
        }
    }
}

/// Per-frame ambient occlusion estimator.
pub trait AmbientOcclusion: Send + Sync {
    /// Recomputes the AO texture from this frame's depth.
    fn update(
        &mut self,
        rd: &mut dyn RenderDevice,
        settings: &AmbientOcclusionSettings,
        camera: &Camera,
        depth: TextureId,
        peel_depth: Option<TextureId>,
    ) -> Result<()>;

    /// Most recent result (`R` channel = visibility), if computed.
    fn texture(&self) -> Option<TextureId>;
}

/// Screen-space obscurance estimator backed by the `AmbientOcclusion_estimate`
/// program.
#[derive(Debug, Default)]
pub struct ScreenSpaceAmbientOcclusion {
    framebuffer: Option<FramebufferId>,
    result: Option<TextureId>,
    shader: Option<ShaderId>,
}

impl ScreenSpaceAmbientOcclusion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_target(&mut self, rd: &mut dyn RenderDevice, width: u32, height: u32) -> Result<FramebufferId> {
        if let (Some(fb), Some(tex)) = (self.framebuffer, self.result) {
            let current = rd.texture_desc(tex).map(TextureDesc::size);
            if current != Some((width, height)) {
                rd.resize_framebuffer(fb, width, height)?;
            }
            return Ok(fb);
        }

        let tex = rd.create_texture(&TextureDesc::new(
            "AmbientOcclusion::result",
            width,
            height,
            wgpu::TextureFormat::R8Unorm,
        ));
        let fb = rd.create_framebuffer("AmbientOcclusion");
        rd.set_attachment(fb, AttachmentPoint::COLOR0, Some(tex))?;
        rd.set_clear_color(fb, 0, wgpu::Color::WHITE)?;
        self.framebuffer = Some(fb);
        self.result = Some(tex);
        Ok(fb)
    }
}

impl AmbientOcclusion for ScreenSpaceAmbientOcclusion {
    fn update(
        &mut self,
        rd: &mut dyn RenderDevice,
        settings: &AmbientOcclusionSettings,
        camera: &Camera,
        depth: TextureId,
        peel_depth: Option<TextureId>,
    ) -> Result<()> {
        let (width, height) = rd
            .texture_desc(depth)
            .map(TextureDesc::size)
            .ok_or(RenderError::UnknownTexture(depth))?;
        let fb = self.ensure_target(rd, width, height)?;

        let shader = match self.shader {
            Some(s) => s,
            None => {
                let s = rd.resolve_shader(AMBIENT_OCCLUSION)?;
                self.shader = Some(s);
                s
            }
        };

        let mut args = Args::new();
        args.set_texture("depth", depth, Sampler::Nearest);
        if let Some(peel) = peel_depth {
            args.set_texture("peelDepth", peel, Sampler::Nearest);
        }
        args.set_float("nearPlane", camera.near);
        args.set_float("farPlane", camera.far);
        args.set_float("radius", settings.radius);
        args.set_float("bias", settings.bias);
        args.set_float("range", settings.range);
        args.set_float("intensity", settings.intensity);

        scoped_2d(rd, Some(fb), |rd| rd.launch_shader(shader, &args))
    }

    fn texture(&self) -> Option<TextureId> {
        self.result
    }
}
