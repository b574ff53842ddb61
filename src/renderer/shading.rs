//! Shading policy hooks.
//!
//! [`ShadingPolicy`] is injected into the renderer to customise how the
//! deferred pass is parameterised and what runs as indirect illumination
//! before it. [`DefaultShadingPolicy`] binds the lighting environment and the
//! GBuffer and has no indirect pass.

use crate::errors::Result;
use crate::renderer::core::{Args, RenderDevice};
use crate::renderer::gbuffer::GBuffer;
use crate::scene::lighting::LightingEnvironment;

/// Prefix under which GBuffer fields are bound for deferred shading.
pub const GBUFFER_ARG_PREFIX: &str = "gbuffer_";

pub trait ShadingPolicy: Send + Sync {
    /// Fills the deferred shading program's arguments.
    fn configure_deferred_args(&self, lighting: &LightingEnvironment, gbuffer: &GBuffer, args: &mut Args) {
        lighting.set_shader_args(args);
        gbuffer.set_shader_args_read(args, GBUFFER_ARG_PREFIX);
    }

    /// Runs before deferred shading, with the destination bound.
    fn compute_indirect_illumination(
        &self,
        _rd: &mut dyn RenderDevice,
        _lighting: &LightingEnvironment,
        _gbuffer: &GBuffer,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultShadingPolicy;

impl ShadingPolicy for DefaultShadingPolicy {}
