//! `<renderer>_deferredShade`: per-pixel lighting from GBuffer fields.
//!
//! # Inputs
//! - `gbuffer_DEPTH_AND_STENCIL`, `gbuffer_CS_NORMAL`, `gbuffer_LAMBERTIAN`,
//!   `gbuffer_EMISSIVE` (optional)
//! - `invViewProjection`, `cameraToWorld`
//! - lighting environment arguments (`ambient`, `numLights`, `light{i}_*`,
//!   `ambientOcclusion_texture`)
//!
//! Pixels whose depth is at the far plane keep their background.

use glam::{IVec2, Mat4, Vec3, Vec4};

use crate::renderer::software::program::{FragmentContext, FragmentOutput};
use crate::scene::lighting::{LightContribution, shade_lambertian, shadow_visibility};

pub(crate) fn shade(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let p = frag.pixel.as_ivec2();
    let depth = frag.fetch("gbuffer_DEPTH_AND_STENCIL", p).x;
    if depth >= 1.0 {
        return None;
    }

    let args = frag.args;
    let inv_vp = args.mat4("invViewProjection").unwrap_or(Mat4::IDENTITY);
    let camera_to_world = args.mat4("cameraToWorld").unwrap_or(Mat4::IDENTITY);

    let uv = frag.uv();
    let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = inv_vp * ndc;
    let world = world.truncate() / world.w;

    let cs_normal = frag.fetch("gbuffer_CS_NORMAL", p).truncate();
    let normal = camera_to_world.transform_vector3(cs_normal).normalize_or_zero();
    let lambertian = frag.fetch("gbuffer_LAMBERTIAN", p).truncate();
    let emissive = frag.fetch("gbuffer_EMISSIVE", p).truncate();

    let ao = if frag.has_texture("ambientOcclusion_texture") {
        frag.sample("ambientOcclusion_texture", uv).x
    } else {
        1.0
    };
    let ambient = args.vec3("ambient").unwrap_or(Vec3::ZERO) * ao;

    let count = args.int("numLights").unwrap_or(0).max(0);
    let lights = (0..count).map(|i| light_contribution(frag, i, world));

    let color = shade_lambertian(normal, lambertian, emissive, ambient, lights);
    Some(FragmentOutput::color(color.extend(1.0)))
}

fn light_contribution(frag: &FragmentContext<'_>, i: i32, world: Vec3) -> LightContribution {
    let args = frag.args;
    let color = args.vec3(&format!("light{i}_color")).unwrap_or(Vec3::ZERO);
    let (to_light, radiance) = if args.int(&format!("light{i}_type")).unwrap_or(0) == 0 {
        let dir = args.vec3(&format!("light{i}_direction")).unwrap_or(Vec3::Z);
        (dir.normalize_or_zero(), color)
    } else {
        let pos = args.vec3(&format!("light{i}_position")).unwrap_or(Vec3::ZERO);
        let d = pos - world;
        (d.normalize_or_zero(), color / d.length_squared().max(1e-4))
    };

    let map_name = format!("light{i}_shadowMap");
    let visibility = match (frag.texture(&map_name), args.mat4(&format!("light{i}_shadowMatrix"))) {
        (Some(map), Some(matrix)) => {
            let bias = args.float(&format!("light{i}_shadowBias")).unwrap_or(0.0);
            shadow_visibility(matrix, world, bias, map.size(), |q: IVec2| map.fetch(q).x)
        }
        _ => 1.0,
    };

    LightContribution {
        to_light,
        radiance,
        visibility,
    }
}
