//! Surfaces
//!
//! A [`Surface`] is the renderer's view of one renderable batch. The renderer
//! never inspects geometry: it asks capability questions (blended? refractive?
//! representable in this GBuffer?) and then delegates drawing back to the
//! surface for the pass being executed.
//!
//! | Call                     | Issued by                      |
//! |--------------------------|--------------------------------|
//! | [`Surface::render`]      | forward passes (all four kinds)|
//! | `render_into_gbuffer`    | geometry pass                  |
//! | `render_depth_only`      | shadow maps, GBuffer prepass   |
//!
//! [`QuadSurface`] is the concrete camera-facing quad used for particles,
//! glass panes and tests.

use glam::{Vec2, Vec3, Vec4};

use crate::errors::Result;
use crate::renderer::core::{AttachmentPoint, DrawCall, RenderDevice, ScreenRect};
use crate::renderer::forward::RenderPassType;
use crate::renderer::gbuffer::{GBuffer, GBufferField, GBufferFields, GBufferSpecification};
use crate::renderer::oit::{OitFragment, OitWritePixel};
use crate::scene::lighting::LightingEnvironment;

// ─── Bounds ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Smallest sphere enclosing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        let d = other.center - self.center;
        let dist = d.length();
        if dist + other.radius <= self.radius {
            return self;
        }
        if dist + self.radius <= other.radius {
            return other;
        }
        let radius = (dist + self.radius + other.radius) * 0.5;
        let center = self.center + d * ((radius - self.radius) / dist);
        Self { center, radius }
    }
}

// ─── Material Capability ──────────────────────────────────────────────────────

/// Material terms a surface can express in GBuffer fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GBufferMaterial {
    pub lambertian: Vec3,
    /// Glossy reflectance (RGB) and smoothness (A).
    pub glossy: Vec4,
    pub emissive: Vec3,
}

impl GBufferMaterial {
    /// Fields needed to reproduce this material without loss.
    #[must_use]
    pub fn required_fields(&self) -> GBufferFields {
        let mut fields = GBufferFields::DEPTH_AND_STENCIL | GBufferFields::CS_NORMAL | GBufferFields::LAMBERTIAN;
        if self.glossy != Vec4::ZERO {
            fields |= GBufferFields::GLOSSY;
        }
        if self.emissive != Vec3::ZERO {
            fields |= GBufferFields::EMISSIVE;
        }
        fields
    }
}

// ─── Surface ──────────────────────────────────────────────────────────────────

/// Per-pass inputs handed to [`Surface::render`].
pub struct SurfacePassContext<'a> {
    pub pass: RenderPassType,
    pub lighting: &'a LightingEnvironment,
    /// Accumulation write used by [`RenderPassType::SinglePassUnorderedBlendedSamples`].
    pub oit_writer: &'a dyn OitWritePixel,
}

pub trait Surface: Send + Sync {
    fn name(&self) -> &str;

    /// World-space bounds used for culling, sorting and shadow fitting.
    fn bounds(&self) -> BoundingSphere;

    fn has_blended_transparency(&self) -> bool;

    fn has_screen_space_refraction(&self) -> bool {
        false
    }

    fn casts_shadows(&self) -> bool {
        true
    }

    /// Accepts accumulation at reduced resolution in the OIT pass.
    fn prefer_low_resolution_transparency(&self) -> bool {
        false
    }

    fn gbuffer_material(&self) -> Option<GBufferMaterial> {
        None
    }

    fn can_be_fully_represented_in_gbuffer(&self, spec: &GBufferSpecification) -> bool {
        !self.has_blended_transparency()
            && !self.has_screen_space_refraction()
            && self
                .gbuffer_material()
                .is_some_and(|m| spec.fields.contains(m.required_fields()))
    }

    /// Draws the samples belonging to `ctx.pass`; surfaces with nothing to
    /// contribute to that pass draw nothing.
    fn render(&self, rd: &mut dyn RenderDevice, ctx: &SurfacePassContext<'_>) -> Result<()>;

    fn render_into_gbuffer(&self, rd: &mut dyn RenderDevice, gbuffer: &GBuffer) -> Result<()>;

    fn render_depth_only(&self, rd: &mut dyn RenderDevice) -> Result<()>;
}

// ─── QuadSurface ──────────────────────────────────────────────────────────────

/// A camera-facing square of side `2 * half_size`.
///
/// The quad is projected through the device's current projection and view
/// matrices and rasterized at the depth of its center.
#[derive(Debug, Clone)]
pub struct QuadSurface {
    pub name: String,
    pub center: Vec3,
    pub half_size: f32,
    pub color: Vec3,
    /// Coverage; `1` is opaque.
    pub alpha: f32,
    pub emissive: Vec3,
    pub glossy: Vec4,
    pub transmission: Vec3,
    pub diffusion: f32,
    pub refraction_offset: Vec2,
    low_resolution: bool,
    refraction: bool,
    casts_shadows: bool,
    gbuffer_support: bool,
}

impl QuadSurface {
    #[must_use]
    pub fn opaque(name: impl Into<String>, center: Vec3, half_size: f32, color: Vec3) -> Self {
        Self {
            name: name.into(),
            center,
            half_size,
            color,
            alpha: 1.0,
            emissive: Vec3::ZERO,
            glossy: Vec4::ZERO,
            transmission: Vec3::ZERO,
            diffusion: 0.0,
            refraction_offset: Vec2::ZERO,
            low_resolution: false,
            refraction: false,
            casts_shadows: true,
            gbuffer_support: true,
        }
    }

    #[must_use]
    pub fn transparent(name: impl Into<String>, center: Vec3, half_size: f32, color: Vec3, alpha: f32) -> Self {
        Self {
            alpha,
            casts_shadows: false,
            ..Self::opaque(name, center, half_size, color)
        }
    }

    #[must_use]
    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    #[must_use]
    pub fn with_low_resolution(mut self, enabled: bool) -> Self {
        self.low_resolution = enabled;
        self
    }

    /// Marks the quad as refracting the screen behind it by `transmission`.
    #[must_use]
    pub fn with_refraction(mut self, transmission: Vec3) -> Self {
        self.refraction = true;
        self.transmission = transmission;
        self
    }

    #[must_use]
    pub fn with_casts_shadows(mut self, enabled: bool) -> Self {
        self.casts_shadows = enabled;
        self
    }

    #[must_use]
    pub fn with_transmission(mut self, transmission: Vec3) -> Self {
        self.transmission = transmission;
        self
    }

    #[must_use]
    pub fn with_diffusion(mut self, diffusion: f32) -> Self {
        self.diffusion = diffusion;
        self
    }

    #[must_use]
    pub fn with_refraction_offset(mut self, offset: Vec2) -> Self {
        self.refraction_offset = offset;
        self
    }

    /// Whether the material is offered to the GBuffer at all.
    #[must_use]
    pub fn with_gbuffer_support(mut self, enabled: bool) -> Self {
        self.gbuffer_support = enabled;
        self
    }

    /// Screen rectangle and NDC depth under the device's current matrices,
    /// or `None` when the center is behind the eye or outside `[0, 1]` depth.
    fn project(&self, rd: &dyn RenderDevice) -> Option<(ScreenRect, f32)> {
        let view = rd.view_matrix();
        let view_projection = rd.projection_matrix() * view;
        let camera_to_world = view.inverse();
        let right = camera_to_world.transform_vector3(Vec3::X).normalize_or_zero() * self.half_size;
        let up = camera_to_world.transform_vector3(Vec3::Y).normalize_or_zero() * self.half_size;

        let to_ndc = |p: Vec3| {
            let clip = view_projection * p.extend(1.0);
            (clip.w > 0.0).then(|| clip.truncate() / clip.w)
        };

        let center = to_ndc(self.center)?;
        if !(0.0..=1.0).contains(&center.z) {
            return None;
        }

        let mut min = Vec2::splat(f32::INFINITY);
        let mut max = Vec2::splat(f32::NEG_INFINITY);
        for corner in [-right - up, right - up, right + up, -right + up] {
            let ndc = to_ndc(self.center + corner)?;
            let screen = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            min = min.min(screen);
            max = max.max(screen);
        }
        Some((ScreenRect::new(min, max), center.z))
    }

    /// World-space normal facing back along the view axis.
    fn facing_normal(rd: &dyn RenderDevice) -> Vec3 {
        rd.view_matrix().inverse().transform_vector3(Vec3::Z).normalize_or_zero()
    }

    fn shaded_color(&self, rd: &dyn RenderDevice, lighting: &LightingEnvironment) -> Vec3 {
        lighting.shade(rd, self.center, Self::facing_normal(rd), self.color, self.emissive, 1.0)
    }
}

impl Surface for QuadSurface {
    fn name(&self) -> &str {
        &self.name
    }

    fn bounds(&self) -> BoundingSphere {
        BoundingSphere::new(self.center, self.half_size * std::f32::consts::SQRT_2)
    }

    fn has_blended_transparency(&self) -> bool {
        self.alpha < 1.0
    }

    fn has_screen_space_refraction(&self) -> bool {
        self.refraction
    }

    fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    fn prefer_low_resolution_transparency(&self) -> bool {
        self.low_resolution
    }

    fn gbuffer_material(&self) -> Option<GBufferMaterial> {
        self.gbuffer_support.then_some(GBufferMaterial {
            lambertian: self.color,
            glossy: self.glossy,
            emissive: self.emissive,
        })
    }

    fn render(&self, rd: &mut dyn RenderDevice, ctx: &SurfacePassContext<'_>) -> Result<()> {
        let blended = self.has_blended_transparency();
        let outputs: Vec<(AttachmentPoint, Vec4)> = match ctx.pass {
            RenderPassType::OpaqueSamples if !blended && !self.refraction => {
                vec![(AttachmentPoint::COLOR0, self.shaded_color(rd, ctx.lighting).extend(1.0))]
            }
            RenderPassType::UnblendedScreenSpaceRefractionSamples if !blended && self.refraction => {
                let Some((rect, _)) = self.project(rd) else {
                    return Ok(());
                };
                let shaded = self.shaded_color(rd, ctx.lighting);
                let behind = match ctx.lighting.screen_space_color() {
                    Some(tex) => {
                        let c = (rect.min + rect.max) * 0.5 * rd.viewport().as_vec2();
                        rd.read_texel(tex, c.x.max(0.0) as u32, c.y.max(0.0) as u32)?.truncate()
                    }
                    None => Vec3::ZERO,
                };
                let color = shaded * (Vec3::ONE - self.transmission) + behind * self.transmission;
                vec![(AttachmentPoint::COLOR0, color.extend(1.0))]
            }
            RenderPassType::MultipassBlendedSamples if blended => {
                let shaded = self.shaded_color(rd, ctx.lighting);
                vec![(AttachmentPoint::COLOR0, (shaded * self.alpha).extend(self.alpha))]
            }
            RenderPassType::SinglePassUnorderedBlendedSamples if blended => {
                let Some((_, depth)) = self.project(rd) else {
                    return Ok(());
                };
                let shaded = self.shaded_color(rd, ctx.lighting);
                let written = ctx.oit_writer.write(&OitFragment {
                    premultiplied_reflect: (shaded * self.alpha).extend(self.alpha),
                    transmission: self.transmission,
                    diffusion: self.diffusion,
                    refraction_offset: self.refraction_offset,
                    depth,
                });
                vec![
                    (AttachmentPoint::COLOR0, written.accum),
                    (AttachmentPoint::COLOR1, written.modulation_diffusion),
                    (AttachmentPoint::COLOR2, written.delta),
                ]
            }
            _ => return Ok(()),
        };

        let Some((rect, depth)) = self.project(rd) else {
            return Ok(());
        };
        let mut call = DrawCall::new(&self.name, rect, depth);
        for (point, value) in outputs {
            call = call.with_output(point, value);
        }
        rd.draw(&call)
    }

    fn render_into_gbuffer(&self, rd: &mut dyn RenderDevice, gbuffer: &GBuffer) -> Result<()> {
        let Some(material) = self.gbuffer_material() else {
            return self.render_depth_only(rd);
        };
        let Some((rect, depth)) = self.project(rd) else {
            return Ok(());
        };

        let mut call = DrawCall::new(&self.name, rect, depth);
        for field in GBufferField::ALL {
            let Some(point @ AttachmentPoint::Color(_)) = gbuffer.attachment_for(field) else {
                continue;
            };
            let value = match field {
                GBufferField::CsNormal => Vec4::new(0.0, 0.0, 1.0, 0.0),
                GBufferField::Lambertian => material.lambertian.extend(1.0),
                GBufferField::Glossy => material.glossy,
                GBufferField::Emissive => material.emissive.extend(1.0),
                GBufferField::WsPosition => self.center.extend(1.0),
                GBufferField::DepthAndStencil => continue,
            };
            call = call.with_output(point, value);
        }
        rd.draw(&call)
    }

    fn render_depth_only(&self, rd: &mut dyn RenderDevice) -> Result<()> {
        match self.project(rd) {
            Some((rect, depth)) => rd.draw(&DrawCall::new(&self.name, rect, depth)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_union_contains_both() {
        let a = BoundingSphere::new(Vec3::ZERO, 1.0);
        let b = BoundingSphere::new(Vec3::new(4.0, 0.0, 0.0), 1.0);
        let u = a.union(b);
        assert!((u.center - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
        assert!((u.radius - 3.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_union_keeps_enclosing_sphere() {
        let big = BoundingSphere::new(Vec3::ZERO, 5.0);
        let small = BoundingSphere::new(Vec3::X, 1.0);
        assert_eq!(big.union(small), big);
        assert_eq!(small.union(big), big);
    }

    #[test]
    fn emissive_material_requires_emissive_field() {
        let m = GBufferMaterial {
            lambertian: Vec3::ONE,
            glossy: Vec4::ZERO,
            emissive: Vec3::X,
        };
        assert!(m.required_fields().contains(GBufferFields::EMISSIVE));
        assert!(!m.required_fields().contains(GBufferFields::GLOSSY));
    }

    #[test]
    fn blended_quads_never_fit_the_gbuffer() {
        let spec = GBufferSpecification::default();
        let glass = QuadSurface::transparent("glass", Vec3::ZERO, 1.0, Vec3::ONE, 0.5);
        let wall = QuadSurface::opaque("wall", Vec3::ZERO, 1.0, Vec3::ONE);
        assert!(!glass.can_be_fully_represented_in_gbuffer(&spec));
        assert!(wall.can_be_fully_represented_in_gbuffer(&spec));
    }
}
