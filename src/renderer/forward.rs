//! Forward Shading
//!
//! One routine drives every forward pass; the [`RenderPassType`] decides the
//! output state and which samples each surface contributes.
//!
//! | Pass                                     | Blend                  | Depth write |
//! |------------------------------------------|------------------------|-------------|
//! | `OpaqueSamples`                          | none                   | on          |
//! | `UnblendedScreenSpaceRefractionSamples`  | none                   | on          |
//! | `MultipassBlendedSamples`                | premultiplied over     | off         |
//! | `SinglePassUnorderedBlendedSamples`      | caller-configured      | off         |
//!
//! The unordered pass keeps whatever per-attachment blend the caller set up
//! on the bound framebuffer (the OIT accumulation equations).

use std::sync::Arc;

use crate::errors::Result;
use crate::renderer::classify::{SortOrder, sort_indices};
use crate::renderer::core::{AttachmentPoint, RenderDevice, scoped_state};
use crate::renderer::oit::OitWritePixel;
use crate::scene::camera::Camera;
use crate::scene::lighting::LightingEnvironment;
use crate::scene::surface::{Surface, SurfacePassContext};

/// Which samples a forward pass shades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPassType {
    OpaqueSamples,
    UnblendedScreenSpaceRefractionSamples,
    MultipassBlendedSamples,
    SinglePassUnorderedBlendedSamples,
}

impl RenderPassType {
    #[must_use]
    pub fn writes_depth(self) -> bool {
        matches!(
            self,
            Self::OpaqueSamples | Self::UnblendedScreenSpaceRefractionSamples
        )
    }
}

/// Shades `indices` of `surfaces` into the bound framebuffer.
pub fn forward_shade(
    rd: &mut dyn RenderDevice,
    surfaces: &[Arc<dyn Surface>],
    indices: &[usize],
    camera: &Camera,
    lighting: &LightingEnvironment,
    oit_writer: &dyn OitWritePixel,
    pass: RenderPassType,
    order: SortOrder,
) -> Result<()> {
    if indices.is_empty() {
        return Ok(());
    }

    let mut ordered = indices.to_vec();
    sort_indices(surfaces, &mut ordered, camera, order);
    log::trace!("Forward {pass:?}: {} surfaces ({order:?})", ordered.len());

    let ctx = SurfacePassContext {
        pass,
        lighting,
        oit_writer,
    };

    scoped_state(rd, None, |rd| {
        rd.set_depth_write(pass.writes_depth());
        match pass {
            RenderPassType::OpaqueSamples | RenderPassType::UnblendedScreenSpaceRefractionSamples => {
                rd.set_blend(AttachmentPoint::COLOR0, None);
            }
            RenderPassType::MultipassBlendedSamples => {
                rd.set_blend(AttachmentPoint::COLOR0, Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING));
            }
            RenderPassType::SinglePassUnorderedBlendedSamples => {}
        }
        for &i in &ordered {
            surfaces[i].render(rd, &ctx)?;
        }
        Ok(())
    })
}
