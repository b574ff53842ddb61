//! Geometry Buffer
//!
//! A [`GBuffer`] is one framebuffer whose attachments hold per-pixel material
//! and geometry terms. The set of fields is fixed by the
//! [`GBufferSpecification`] it was created with; surfaces may only write
//! declared fields.
//!
//! | Field               | Shader name          | Format                     |
//! |---------------------|----------------------|----------------------------|
//! | `DepthAndStencil`   | `DEPTH_AND_STENCIL`  | `spec.depth_format`        |
//! | `CsNormal`          | `CS_NORMAL`          | `Rgba16Float`              |
//! | `Lambertian`        | `LAMBERTIAN`         | `Rgba8Unorm`               |
//! | `Glossy`            | `GLOSSY`             | `Rgba8Unorm`               |
//! | `Emissive`          | `EMISSIVE`           | `Rgba16Float`              |
//! | `WsPosition`        | `WS_POSITION`        | `Rgba32Float`              |
//!
//! Color fields take consecutive color attachments in table order.

use bitflags::bitflags;

use crate::errors::{RenderError, Result};
use crate::renderer::core::{
    Args, AttachmentPoint, FramebufferId, RenderDevice, Sampler, TextureDesc, TextureId,
};

bitflags! {
    /// Set of declared GBuffer fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GBufferFields: u8 {
        const DEPTH_AND_STENCIL = 1 << 0;
        const CS_NORMAL         = 1 << 1;
        const LAMBERTIAN        = 1 << 2;
        const GLOSSY            = 1 << 3;
        const EMISSIVE          = 1 << 4;
        const WS_POSITION       = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GBufferField {
    DepthAndStencil,
    CsNormal,
    Lambertian,
    Glossy,
    Emissive,
    WsPosition,
}

impl GBufferField {
    pub const ALL: [Self; 6] = [
        Self::DepthAndStencil,
        Self::CsNormal,
        Self::Lambertian,
        Self::Glossy,
        Self::Emissive,
        Self::WsPosition,
    ];

    #[must_use]
    pub fn flag(self) -> GBufferFields {
        match self {
            Self::DepthAndStencil => GBufferFields::DEPTH_AND_STENCIL,
            Self::CsNormal => GBufferFields::CS_NORMAL,
            Self::Lambertian => GBufferFields::LAMBERTIAN,
            Self::Glossy => GBufferFields::GLOSSY,
            Self::Emissive => GBufferFields::EMISSIVE,
            Self::WsPosition => GBufferFields::WS_POSITION,
        }
    }

    /// Name under which the field is bound to programs, after the prefix.
    #[must_use]
    pub fn shader_name(self) -> &'static str {
        match self {
            Self::DepthAndStencil => "DEPTH_AND_STENCIL",
            Self::CsNormal => "CS_NORMAL",
            Self::Lambertian => "LAMBERTIAN",
            Self::Glossy => "GLOSSY",
            Self::Emissive => "EMISSIVE",
            Self::WsPosition => "WS_POSITION",
        }
    }

    fn format(self, depth_format: wgpu::TextureFormat) -> wgpu::TextureFormat {
        match self {
            Self::DepthAndStencil => depth_format,
            Self::CsNormal | Self::Emissive => wgpu::TextureFormat::Rgba16Float,
            Self::Lambertian | Self::Glossy => wgpu::TextureFormat::Rgba8Unorm,
            Self::WsPosition => wgpu::TextureFormat::Rgba32Float,
        }
    }
}

/// Field set, depth format and guard bands of a [`GBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferSpecification {
    pub fields: GBufferFields,
    pub depth_format: wgpu::TextureFormat,
    /// Pixels around the edge without valid color.
    pub color_guard_band: u32,
    /// Pixels around the edge without valid depth.
    pub depth_guard_band: u32,
}

impl Default for GBufferSpecification {
    fn default() -> Self {
        Self {
            fields: GBufferFields::DEPTH_AND_STENCIL
                | GBufferFields::CS_NORMAL
                | GBufferFields::LAMBERTIAN
                | GBufferFields::EMISSIVE,
            depth_format: wgpu::TextureFormat::Depth32Float,
            color_guard_band: 0,
            depth_guard_band: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GBuffer {
    name: String,
    spec: GBufferSpecification,
    framebuffer: FramebufferId,
    textures: [Option<(TextureId, AttachmentPoint)>; 6],
}

impl GBuffer {
    /// Allocates one texture per declared field.
    pub fn create(
        rd: &mut dyn RenderDevice,
        name: &str,
        spec: GBufferSpecification,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let framebuffer = rd.create_framebuffer(name);
        let mut textures = [None; 6];
        let mut next_color = 0u8;

        for (slot, field) in GBufferField::ALL.into_iter().enumerate() {
            if !spec.fields.contains(field.flag()) {
                continue;
            }
            let point = if field == GBufferField::DepthAndStencil {
                AttachmentPoint::Depth
            } else {
                next_color += 1;
                AttachmentPoint::Color(next_color - 1)
            };
            let texture = rd.create_texture(&TextureDesc::new(
                format!("{name}/{}", field.shader_name()),
                width,
                height,
                field.format(spec.depth_format),
            ));
            rd.set_attachment(framebuffer, point, Some(texture))?;
            textures[slot] = Some((texture, point));
        }

        log::debug!("Created GBuffer '{name}' ({width}x{height}, {:?})", spec.fields);
        Ok(Self {
            name: name.to_owned(),
            spec,
            framebuffer,
            textures,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn specification(&self) -> &GBufferSpecification {
        &self.spec
    }

    #[must_use]
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    #[inline]
    #[must_use]
    pub fn has(&self, field: GBufferField) -> bool {
        self.spec.fields.contains(field.flag())
    }

    #[must_use]
    pub fn texture(&self, field: GBufferField) -> Option<TextureId> {
        self.entry(field).map(|(t, _)| t)
    }

    #[must_use]
    pub fn attachment_for(&self, field: GBufferField) -> Option<AttachmentPoint> {
        self.entry(field).map(|(_, p)| p)
    }

    fn entry(&self, field: GBufferField) -> Option<(TextureId, AttachmentPoint)> {
        let slot = GBufferField::ALL.iter().position(|f| *f == field)?;
        self.textures[slot]
    }

    /// Depth texture shared with the destination framebuffer.
    pub fn depth_texture(&self) -> Result<TextureId> {
        self.texture(GBufferField::DepthAndStencil)
            .ok_or_else(|| RenderError::MissingAttachment {
                framebuffer: self.name.clone(),
                attachment: AttachmentPoint::Depth,
            })
    }

    pub fn resize(&self, rd: &mut dyn RenderDevice, width: u32, height: u32) -> Result<()> {
        if rd.framebuffer_size(self.framebuffer) == Some(glam::UVec2::new(width, height)) {
            return Ok(());
        }
        rd.resize_framebuffer(self.framebuffer, width, height)
    }

    /// Binds every declared field as `<prefix><SHADER_NAME>`.
    pub fn set_shader_args_read(&self, args: &mut Args, prefix: &str) {
        for field in GBufferField::ALL {
            if let Some(texture) = self.texture(field) {
                args.set_texture(format!("{prefix}{}", field.shader_name()), texture, Sampler::Nearest);
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn color_guard_band(&self) -> u32 {
        self.spec.color_guard_band
    }

    #[inline]
    #[must_use]
    pub fn depth_guard_band(&self) -> u32 {
        self.spec.depth_guard_band
    }

    /// Width of the band that has valid depth but no displayed color.
    #[inline]
    #[must_use]
    pub fn trim_band_thickness(&self) -> u32 {
        self.spec.depth_guard_band.saturating_sub(self.spec.color_guard_band)
    }
}
