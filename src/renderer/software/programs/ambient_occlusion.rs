//! `AmbientOcclusion_estimate`: screen-space obscurance from depth.
//!
//! Eight taps on a ring of `radius` pixels. A tap occludes when its
//! camera-space depth lies in front of the center by more than `bias` and
//! less than `range`. With a peeled second layer bound, a tap whose front
//! layer is out of range can still occlude through the surface behind it.

use glam::{IVec2, Vec2, Vec4};

use crate::renderer::software::program::{FragmentContext, FragmentOutput};

const TAPS: [Vec2; 8] = [
    Vec2::new(1.0, 0.0),
    Vec2::new(-1.0, 0.0),
    Vec2::new(0.0, 1.0),
    Vec2::new(0.0, -1.0),
    Vec2::new(0.707, 0.707),
    Vec2::new(-0.707, 0.707),
    Vec2::new(0.707, -0.707),
    Vec2::new(-0.707, -0.707),
];

/// Camera-space distance for a `[0, 1]` perspective depth.
#[inline]
fn linearize(depth: f32, near: f32, far: f32) -> f32 {
    near * far / (far - depth * (far - near)).max(1e-6)
}

pub(crate) fn estimate(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let args = frag.args;
    let p = frag.pixel.as_ivec2();
    let depth = frag.fetch("depth", p).x;
    if depth >= 1.0 {
        return Some(FragmentOutput::color(Vec4::ONE));
    }

    let near = args.float("nearPlane").unwrap_or(0.1);
    let far = args.float("farPlane").unwrap_or(100.0);
    let radius = args.float("radius").unwrap_or(4.0);
    let bias = args.float("bias").unwrap_or(0.05);
    let range = args.float("range").unwrap_or(2.0);
    let intensity = args.float("intensity").unwrap_or(1.0);
    let peel = frag.has_texture("peelDepth");

    let center = linearize(depth, near, far);
    let occludes = |z: f32| {
        let gap = center - z;
        gap > bias && gap < range
    };

    let mut occluded = 0u32;
    for tap in TAPS {
        let q: IVec2 = (frag.pixel.as_vec2() + tap * radius).round().as_ivec2();
        let mut hit = occludes(linearize(frag.fetch("depth", q).x, near, far));
        if peel && !hit {
            hit = occludes(linearize(frag.fetch("peelDepth", q).x, near, far));
        }
        if hit {
            occluded += 1;
        }
    }

    let ao = (1.0 - intensity * occluded as f32 / TAPS.len() as f32).clamp(0.0, 1.0);
    Some(FragmentOutput::color(Vec4::new(ao, ao, ao, 1.0)))
}
