//! Deferred Shading Stage
//!
//! One full-screen launch of `<renderer>_deferredShade` over the bound
//! framebuffer. The 2D state is clipped by the GBuffer's trim band and the
//! arguments come from the [`ShadingPolicy`].

use crate::errors::Result;
use crate::renderer::core::{Args, PixelRect, RenderDevice, scoped_2d};
use crate::renderer::gbuffer::GBuffer;
use crate::renderer::shader_cache::ShaderCache;
use crate::renderer::shading::ShadingPolicy;
use crate::scene::lighting::LightingEnvironment;

pub fn render_deferred_shading(
    rd: &mut dyn RenderDevice,
    shaders: &mut ShaderCache,
    renderer_name: &str,
    policy: &dyn ShadingPolicy,
    lighting: &LightingEnvironment,
    gbuffer: &GBuffer,
) -> Result<()> {
    let shader = shaders.get_or_resolve(rd, &format!("{renderer_name}_deferredShade"))?;

    // 2D mode replaces the camera matrices.
    let view = rd.view_matrix();
    let view_projection = rd.projection_matrix() * view;

    let mut args = Args::new();
    policy.configure_deferred_args(lighting, gbuffer, &mut args);
    args.set_mat4("invViewProjection", view_projection.inverse());
    args.set_mat4("cameraToWorld", view.inverse());

    scoped_2d(rd, None, |rd| {
        rd.set_guard_band_clip_2d(gbuffer.trim_band_thickness());
        args.set_rect(PixelRect::from_size(rd.viewport()));
        log::trace!("Deferred shading {}x{}", rd.width(), rd.height());
        rd.launch_shader(shader, &args)
    })
}
