//! Lighting Environment
//!
//! Lights, ambient term, ambient occlusion and the screen-space buffers kept
//! from the previous frame. The renderer reads it for every shading pass and
//! mutates it in three places only:
//!
//! - shadow maps are re-rendered for shadow-casting directional lights
//! - the bound [`AmbientOcclusion`] object is updated
//! - [`LightingEnvironment::copy_screen_space_buffers`] snapshots the opaque
//!   frame for next frame's screen-space lookups
//!
//! [`shade_lambertian`] is the shared lighting model: forward-shaded surfaces
//! and the deferred program evaluate the same expression.

use glam::{IVec2, Mat4, UVec2, Vec3, Vec4};

use crate::errors::{RenderError, Result};
use crate::renderer::core::{
    Args, AttachmentPoint, BlitMask, FramebufferId, RenderDevice, Sampler, TextureDesc, TextureId,
};
use crate::scene::ambient_occlusion::{AmbientOcclusion, AmbientOcclusionSettings};

// ─── Lights ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Parallel light travelling along `direction`.
    Directional { direction: Vec3 },
    /// Omni light with inverse-square falloff.
    Point { position: Vec3 },
}

/// Depth map rendered from a light.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    pub framebuffer: FramebufferId,
    pub depth: TextureId,
    pub size: u32,
    /// Depth bias applied in the comparison.
    pub bias: f32,
    /// World → light clip space of the most recent render.
    pub view_projection: Mat4,
}

impl ShadowMap {
    pub fn create(rd: &mut dyn RenderDevice, name: &str, size: u32) -> Result<Self> {
        let depth = rd.create_texture(&TextureDesc::new(
            format!("{name}/depth"),
            size,
            size,
            wgpu::TextureFormat::Depth32Float,
        ));
        let framebuffer = rd.create_framebuffer(name);
        rd.set_attachment(framebuffer, AttachmentPoint::Depth, Some(depth))?;
        Ok(Self {
            framebuffer,
            depth,
            size,
            bias: 0.005,
            view_projection: Mat4::IDENTITY,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub color: Vec3,
    pub casts_shadows: bool,
    pub shadow_map: Option<ShadowMap>,
}

impl Light {
    #[must_use]
    pub fn directional(name: impl Into<String>, direction: Vec3, color: Vec3) -> Self {
        Self {
            name: name.into(),
            kind: LightKind::Directional {
                direction: direction.normalize_or_zero(),
            },
            color,
            casts_shadows: false,
            shadow_map: None,
        }
    }

    #[must_use]
    pub fn point(name: impl Into<String>, position: Vec3, color: Vec3) -> Self {
        Self {
            name: name.into(),
            kind: LightKind::Point { position },
            color,
            casts_shadows: false,
            shadow_map: None,
        }
    }

    /// Enables shadows using `shadow_map`.
    #[must_use]
    pub fn with_shadow_map(mut self, shadow_map: ShadowMap) -> Self {
        self.casts_shadows = true;
        self.shadow_map = Some(shadow_map);
        self
    }

    /// Unit vector toward the light and incident radiance at `point`.
    #[must_use]
    pub fn incidence(&self, point: Vec3) -> (Vec3, Vec3) {
        match self.kind {
            LightKind::Directional { direction } => (-direction, self.color),
            LightKind::Point { position } => {
                let d = position - point;
                (d.normalize_or_zero(), self.color / d.length_squared().max(1e-4))
            }
        }
    }
}

// ─── Shading Model ────────────────────────────────────────────────────────────

/// One light's contribution at a shading point.
#[derive(Debug, Clone, Copy)]
pub struct LightContribution {
    pub to_light: Vec3,
    pub radiance: Vec3,
    /// `0` fully shadowed, `1` unshadowed.
    pub visibility: f32,
}

/// `emissive + lambertian · (ambient + Σ radiance · max(n·l, 0) · visibility)`
#[must_use]
pub fn shade_lambertian(
    normal: Vec3,
    lambertian: Vec3,
    emissive: Vec3,
    ambient: Vec3,
    lights: impl IntoIterator<Item = LightContribution>,
) -> Vec3 {
    let mut irradiance = ambient;
    for light in lights {
        irradiance += light.radiance * normal.dot(light.to_light).max(0.0) * light.visibility;
    }
    emissive + lambertian * irradiance
}

/// Shadow-map test of `world` against a depth map of `size` texels.
/// Points outside the map are lit.
#[must_use]
pub fn shadow_visibility(
    light_view_projection: Mat4,
    world: Vec3,
    bias: f32,
    size: UVec2,
    fetch_depth: impl Fn(IVec2) -> f32,
) -> f32 {
    let clip = light_view_projection * world.extend(1.0);
    if clip.w <= 0.0 {
        return 1.0;
    }
    let ndc = clip.truncate() / clip.w;
    let uv = glam::Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) || !(0.0..=1.0).contains(&ndc.z) {
        return 1.0;
    }
    let texel = (uv * size.as_vec2()).floor().as_ivec2();
    if ndc.z - bias > fetch_depth(texel) { 0.0 } else { 1.0 }
}

// ─── Environment ──────────────────────────────────────────────────────────────

/// Previous-frame color and depth.
#[derive(Debug, Clone, Copy)]
struct ScreenSpaceBuffers {
    framebuffer: FramebufferId,
    color: TextureId,
    depth: Option<TextureId>,
    color_guard_band: u32,
    depth_guard_band: u32,
}

#[derive(Default)]
pub struct LightingEnvironment {
    pub lights: Vec<Light>,
    pub ambient: Vec3,
    pub ambient_occlusion_settings: AmbientOcclusionSettings,
    pub ambient_occlusion: Option<Box<dyn AmbientOcclusion>>,
    screen_space: Option<ScreenSpaceBuffers>,
}

impl LightingEnvironment {
    #[must_use]
    pub fn new(ambient: Vec3) -> Self {
        Self {
            ambient,
            ..Default::default()
        }
    }

    /// AO result texture when ambient occlusion is enabled and computed.
    #[must_use]
    pub fn ambient_occlusion_texture(&self) -> Option<TextureId> {
        if !self.ambient_occlusion_settings.enabled {
            return None;
        }
        self.ambient_occlusion.as_ref().and_then(|ao| ao.texture())
    }

    /// Previous frame's opaque color, if one has been captured.
    #[must_use]
    pub fn screen_space_color(&self) -> Option<TextureId> {
        self.screen_space.map(|s| s.color)
    }

    /// Previous frame's depth, if one has been captured.
    #[must_use]
    pub fn screen_space_depth(&self) -> Option<TextureId> {
        self.screen_space.and_then(|s| s.depth)
    }

    /// Appends ambient, light, shadow and AO arguments.
    pub fn set_shader_args(&self, args: &mut Args) {
        args.set_vec3("ambient", self.ambient);
        args.set_int("numLights", self.lights.len() as i32);
        for (i, light) in self.lights.iter().enumerate() {
            args.set_vec3(format!("light{i}_color"), light.color);
            match light.kind {
                LightKind::Directional { direction } => {
                    args.set_int(format!("light{i}_type"), 0);
                    args.set_vec3(format!("light{i}_direction"), -direction);
                }
                LightKind::Point { position } => {
                    args.set_int(format!("light{i}_type"), 1);
                    args.set_vec3(format!("light{i}_position"), position);
                }
            }
            if let (true, Some(map)) = (light.casts_shadows, &light.shadow_map) {
                args.set_texture(format!("light{i}_shadowMap"), map.depth, Sampler::Nearest);
                args.set_mat4(format!("light{i}_shadowMatrix"), map.view_projection);
                args.set_float(format!("light{i}_shadowBias"), map.bias);
            }
        }
        if let Some(ao) = self.ambient_occlusion_texture() {
            args.set_texture("ambientOcclusion_texture", ao, Sampler::Bilinear);
        }
        if let Some(color) = self.screen_space_color() {
            args.set_texture("screenSpaceColor", color, Sampler::Bilinear);
        }
    }

    /// Forward evaluation of [`shade_lambertian`] at `position`, reading
    /// shadow maps back from the device.
    pub fn shade(
        &self,
        rd: &dyn RenderDevice,
        position: Vec3,
        normal: Vec3,
        lambertian: Vec3,
        emissive: Vec3,
        ambient_visibility: f32,
    ) -> Vec3 {
        let lights = self.lights.iter().map(|light| {
            let (to_light, radiance) = light.incidence(position);
            let visibility = match (&light.shadow_map, light.casts_shadows) {
                (Some(map), true) if matches!(light.kind, LightKind::Directional { .. }) => shadow_visibility(
                    map.view_projection,
                    position,
                    map.bias,
                    UVec2::splat(map.size),
                    |q| {
                        rd.read_texel(map.depth, q.x.max(0) as u32, q.y.max(0) as u32)
                            .map_or(1.0, |t: Vec4| t.x)
                    },
                ),
                _ => 1.0,
            };
            LightContribution {
                to_light,
                radiance,
                visibility,
            }
        });
        shade_lambertian(normal, lambertian, emissive, self.ambient * ambient_visibility, lights)
    }

    /// Copies `framebuffer`'s color and depth for the next frame's
    /// screen-space lookups, (re)allocating the copies to match.
    pub fn copy_screen_space_buffers(
        &mut self,
        rd: &mut dyn RenderDevice,
        framebuffer: FramebufferId,
        color_guard_band: u32,
        depth_guard_band: u32,
    ) -> Result<()> {
        let source = rd
            .framebuffer(framebuffer)
            .ok_or(RenderError::UnknownFramebuffer(framebuffer))?
            .clone();
        let source_color = source.get(AttachmentPoint::COLOR0).ok_or_else(|| RenderError::MissingAttachment {
            framebuffer: source.label.clone(),
            attachment: AttachmentPoint::COLOR0,
        })?;
        let color_desc = rd
            .texture_desc(source_color)
            .ok_or(RenderError::UnknownTexture(source_color))?
            .clone();
        let depth_desc = source.depth.and_then(|d| rd.texture_desc(d).cloned());

        let buffers = match self.screen_space {
            Some(buffers) if screen_space_matches(rd, &buffers, &color_desc, depth_desc.as_ref()) => buffers,
            stale => {
                if let Some(old) = stale {
                    rd.destroy_texture(old.color);
                    if let Some(d) = old.depth {
                        rd.destroy_texture(d);
                    }
                    rd.destroy_framebuffer(old.framebuffer);
                }
                let fb = rd.create_framebuffer("LightingEnvironment::screenSpace");
                let color = rd.create_texture(&TextureDesc::new(
                    "LightingEnvironment::screenColor",
                    color_desc.width,
                    color_desc.height,
                    color_desc.format,
                ));
                rd.set_attachment(fb, AttachmentPoint::COLOR0, Some(color))?;
                let depth = match &depth_desc {
                    Some(desc) => {
                        let d = rd.create_texture(&TextureDesc::new(
                            "LightingEnvironment::screenDepth",
                            desc.width,
                            desc.height,
                            desc.format,
                        ));
                        rd.set_attachment(fb, AttachmentPoint::Depth, Some(d))?;
                        Some(d)
                    }
                    None => None,
                };
                ScreenSpaceBuffers {
                    framebuffer: fb,
                    color,
                    depth,
                    color_guard_band,
                    depth_guard_band,
                }
            }
        };

        let mask = if buffers.depth.is_some() {
            BlitMask::COLOR | BlitMask::DEPTH
        } else {
            BlitMask::COLOR
        };
        rd.blit(framebuffer, buffers.framebuffer, mask)?;
        self.screen_space = Some(ScreenSpaceBuffers {
            color_guard_band,
            depth_guard_band,
            ..buffers
        });
        Ok(())
    }

    /// Guard bands recorded with the last screen-space copy.
    #[must_use]
    pub fn screen_space_guard_bands(&self) -> Option<(u32, u32)> {
        self.screen_space.map(|s| (s.color_guard_band, s.depth_guard_band))
    }
}

fn screen_space_matches(
    rd: &dyn RenderDevice,
    buffers: &ScreenSpaceBuffers,
    color: &TextureDesc,
    depth: Option<&TextureDesc>,
) -> bool {
    let same = |id: TextureId, want: &TextureDesc| {
        rd.texture_desc(id)
            .is_some_and(|d| d.size() == want.size() && d.format == want.format)
    };
    let depth_ok = match (buffers.depth, depth) {
        (Some(id), Some(want)) => same(id, want),
        (None, None) => true,
        _ => false,
    };
    same(buffers.color, color) && depth_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambertian_sums_ambient_and_lights() {
        let c = shade_lambertian(
            Vec3::Z,
            Vec3::splat(0.5),
            Vec3::new(0.1, 0.0, 0.0),
            Vec3::splat(0.2),
            [LightContribution {
                to_light: Vec3::Z,
                radiance: Vec3::ONE,
                visibility: 1.0,
            }],
        );
        assert!((c - Vec3::new(0.7, 0.6, 0.6)).length() < 1e-6);
    }

    #[test]
    fn back_facing_light_contributes_nothing() {
        let c = shade_lambertian(
            Vec3::Z,
            Vec3::ONE,
            Vec3::ZERO,
            Vec3::ZERO,
            [LightContribution {
                to_light: Vec3::NEG_Z,
                radiance: Vec3::ONE,
                visibility: 1.0,
            }],
        );
        assert_eq!(c, Vec3::ZERO);
    }

    #[test]
    fn points_outside_shadow_map_are_lit() {
        let v = shadow_visibility(Mat4::IDENTITY, Vec3::new(5.0, 0.0, 0.5), 0.0, UVec2::splat(4), |_| 0.0);
        assert_eq!(v, 1.0);
        let v = shadow_visibility(Mat4::IDENTITY, Vec3::new(0.0, 0.0, 0.5), 0.0, UVec2::splat(4), |_| 0.1);
        assert_eq!(v, 0.0);
    }
}
