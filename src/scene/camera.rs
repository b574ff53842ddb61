//! Camera and view frustum.
//!
//! The camera is a perspective projection plus a rigid world frame. It looks
//! down its local −Z axis; depth maps to `[0, 1]` (wgpu convention).

use glam::{Affine3A, Mat4, UVec2, Vec2, Vec3, Vec4};

#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Camera-to-world transform.
    pub frame: Affine3A,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new_perspective(60.0, 0.1, 100.0)
    }
}

impl Camera {
    /// `fov` is the vertical field of view in degrees.
    #[must_use]
    pub fn new_perspective(fov: f32, near: f32, far: f32) -> Self {
        Self {
            name: "Camera".to_string(),
            fov: fov.to_radians(),
            near,
            far,
            frame: Affine3A::IDENTITY,
        }
    }

    /// Places the camera at `eye` looking at `target`.
    #[must_use]
    pub fn looking_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.frame = Affine3A::look_at_rh(eye, target, up).inverse();
        self
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.frame.translation)
    }

    /// Unit view direction in world space.
    #[inline]
    #[must_use]
    pub fn look_vector(&self) -> Vec3 {
        self.frame.transform_vector3(Vec3::NEG_Z).normalize()
    }

    /// Distance of `point` in front of the camera along the look vector.
    #[inline]
    #[must_use]
    pub fn camera_space_depth(&self, point: Vec3) -> f32 {
        (point - self.position()).dot(self.look_vector())
    }

    #[must_use]
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from(self.frame).inverse()
    }

    #[must_use]
    pub fn view_projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    #[must_use]
    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_matrix(self.view_projection_matrix(aspect))
    }

    /// Full (horizontal, vertical) field-of-view angles for `viewport`.
    #[must_use]
    pub fn field_of_view_angles(&self, viewport: UVec2) -> Vec2 {
        let aspect = aspect_ratio(viewport);
        let horizontal = 2.0 * ((self.fov * 0.5).tan() * aspect).atan();
        Vec2::new(horizontal, self.fov)
    }
}

/// Width / height, or 1 for an empty viewport.
#[inline]
#[must_use]
pub fn aspect_ratio(viewport: UVec2) -> f32 {
    if viewport.y == 0 {
        1.0
    } else {
        viewport.x as f32 / viewport.y as f32
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann plane extraction for a `[0, 1]` depth range.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
            rows[3] - rows[2],
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > 0.0 {
                *plane /= length;
            }
        }

        Self { planes }
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }
}
