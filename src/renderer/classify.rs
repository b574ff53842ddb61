//! Surface Classifier
//!
//! Turns the caller's flat surface list into the three index lists the
//! frame works from:
//!
//! | List              | Contents                                               |
//! |-------------------|--------------------------------------------------------|
//! | `sorted_visible`  | every surface intersecting the frustum, front to back  |
//! | `forward_opaque`  | visible, not blended, not representable in the GBuffer |
//! | `forward_blended` | visible with blended transparency                      |
//!
//! `forward_opaque` and `forward_blended` are disjoint subsets of
//! `sorted_visible`. The lists are owned by the renderer and reused across
//! frames, so one [`RenderLists`] must not serve concurrent frames.

use std::sync::Arc;

use glam::UVec2;

use crate::renderer::gbuffer::GBufferSpecification;
use crate::scene::camera::{Camera, aspect_ratio};
use crate::scene::surface::Surface;

/// Ordering applied before a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Arbitrary,
    FrontToBack,
    BackToFront,
}

#[derive(Debug, Default)]
pub struct RenderLists {
    pub sorted_visible: Vec<usize>,
    pub forward_opaque: Vec<usize>,
    pub forward_blended: Vec<usize>,
}

impl RenderLists {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.sorted_visible.clear();
        self.forward_opaque.clear();
        self.forward_blended.clear();
    }

    /// Frustum-culls `surfaces` and fills all three lists.
    ///
    /// With `gbuffer == None` no surface is representable, so every visible
    /// non-blended surface lands in `forward_opaque`.
    pub fn cull_and_sort(
        &mut self,
        surfaces: &[Arc<dyn Surface>],
        camera: &Camera,
        viewport: UVec2,
        gbuffer: Option<&GBufferSpecification>,
    ) {
        self.clear();
        let frustum = camera.frustum(aspect_ratio(viewport));

        self.sorted_visible.extend((0..surfaces.len()).filter(|&i| {
            let b = surfaces[i].bounds();
            frustum.intersects_sphere(b.center, b.radius)
        }));
        sort_indices(surfaces, &mut self.sorted_visible, camera, SortOrder::FrontToBack);

        for &i in &self.sorted_visible {
            let surface = &surfaces[i];
            if surface.has_blended_transparency() {
                self.forward_blended.push(i);
            } else if !gbuffer.is_some_and(|spec| surface.can_be_fully_represented_in_gbuffer(spec)) {
                self.forward_opaque.push(i);
            }
        }

        log::debug!(
            "Classified {} surfaces: {} visible, {} forward opaque, {} blended",
            surfaces.len(),
            self.sorted_visible.len(),
            self.forward_opaque.len(),
            self.forward_blended.len()
        );
    }
}

/// Stable sort of `indices` by camera-space depth of each surface's bounds.
pub fn sort_indices(surfaces: &[Arc<dyn Surface>], indices: &mut [usize], camera: &Camera, order: SortOrder) {
    let depth = |i: usize| camera.camera_space_depth(surfaces[i].bounds().center);
    match order {
        SortOrder::Arbitrary => {}
        SortOrder::FrontToBack => indices.sort_by(|&a, &b| depth(a).total_cmp(&depth(b))),
        SortOrder::BackToFront => indices.sort_by(|&a, &b| depth(b).total_cmp(&depth(a))),
    }
}

/// Splits `indices` into full- and reduced-resolution OIT lists.
///
/// A surface goes to `lo_res` only when it prefers low resolution and
/// `downsample_factor != 1`. Both outputs are cleared first; together they
/// hold exactly the input.
pub fn partition_by_resolution(
    surfaces: &[Arc<dyn Surface>],
    indices: &[usize],
    downsample_factor: u32,
    hi_res: &mut Vec<usize>,
    lo_res: &mut Vec<usize>,
) {
    hi_res.clear();
    lo_res.clear();
    for &i in indices {
        if downsample_factor != 1 && surfaces[i].prefer_low_resolution_transparency() {
            lo_res.push(i);
        } else {
            hi_res.push(i);
        }
    }
}
