//! Shadow & Occlusion Stage
//!
//! Runs over the full surface list, not the culled one: occluders outside
//! the view still cast shadows.
//!
//! 1. Each shadow-casting directional light gets an orthographic depth map
//!    fitted to the bounding sphere of all shadow casters.
//! 2. The bound [`AmbientOcclusion`](crate::scene::AmbientOcclusion) object,
//!    when enabled, is updated from this frame's depth.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::errors::Result;
use crate::renderer::core::{RenderDevice, TextureId, scoped_state};
use crate::scene::camera::Camera;
use crate::scene::lighting::{LightKind, LightingEnvironment};
use crate::scene::surface::{BoundingSphere, Surface};

/// Renders shadow maps and updates ambient occlusion.
pub fn compute_shadowing(
    rd: &mut dyn RenderDevice,
    lighting: &mut LightingEnvironment,
    surfaces: &[Arc<dyn Surface>],
    camera: &Camera,
    depth: Option<TextureId>,
    peel_depth: Option<TextureId>,
) -> Result<()> {
    let casters: Vec<&Arc<dyn Surface>> = surfaces.iter().filter(|s| s.casts_shadows()).collect();
    let scene_bounds = casters
        .iter()
        .map(|s| s.bounds())
        .reduce(BoundingSphere::union);

    for light in &mut lighting.lights {
        if !light.casts_shadows {
            continue;
        }
        let Some(map) = light.shadow_map.as_mut() else {
            continue;
        };
        let LightKind::Directional { direction } = light.kind else {
            log::warn!("Light '{}': only directional lights cast shadows", light.name);
            continue;
        };
        let Some(bounds) = scene_bounds else {
            continue;
        };

        let (projection, view) = fit_directional(direction, bounds);
        map.view_projection = projection * view;

        scoped_state(rd, Some(map.framebuffer), |rd| {
            rd.clear(false, true)?;
            rd.set_projection_and_camera_matrix(projection, view);
            rd.set_depth_test(wgpu::CompareFunction::LessEqual);
            rd.set_depth_write(true);
            for caster in &casters {
                caster.render_depth_only(rd)?;
            }
            Ok(())
        })?;
        log::trace!("Shadow map '{}': {} casters", light.name, casters.len());
    }

    if lighting.ambient_occlusion_settings.enabled {
        if let (Some(ao), Some(depth)) = (lighting.ambient_occlusion.as_mut(), depth) {
            ao.update(rd, &lighting.ambient_occlusion_settings, camera, depth, peel_depth)?;
        }
    }
    Ok(())
}

/// Orthographic projection and view enclosing `bounds`, looking along
/// `direction`.
#[must_use]
pub fn fit_directional(direction: Vec3, bounds: BoundingSphere) -> (Mat4, Mat4) {
    let dir = direction.normalize_or_zero();
    let r = bounds.radius.max(1e-3);
    let eye = bounds.center - dir * (2.0 * r);
    let up = if dir.cross(Vec3::Y).length_squared() < 1e-6 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let view = Mat4::look_at_rh(eye, bounds.center, up);
    let projection = Mat4::orthographic_rh(-r, r, -r, r, r, 3.0 * r);
    (projection, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitted_projection_covers_bounds_depth_range() {
        let bounds = BoundingSphere::new(Vec3::new(0.0, 0.0, 1.0), 2.0);
        let (projection, view) = fit_directional(Vec3::NEG_Z, bounds);
        let vp = projection * view;
        let near = vp.project_point3(Vec3::new(0.0, 0.0, 3.0));
        let far = vp.project_point3(Vec3::new(0.0, 0.0, -1.0));
        assert!(near.z.abs() < 1e-4);
        assert!((far.z - 1.0).abs() < 1e-4);
    }
}
