//! Shader Arguments
//!
//! [`Args`] is the named argument table handed to a full-screen program
//! launch: uniforms, texture bindings, preprocessor macros and an optional
//! output rectangle.
//!
//! Collaborators append their arguments under a prefix (`gbuffer_`,
//! `ambientOcclusion_`, ...) so several providers can fill one table without
//! collisions.

use glam::{IVec2, Mat4, UVec2, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use super::TextureId;

/// Texture filtering used when a program samples a bound texture.
/// Addressing is always clamp-to-edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sampler {
    #[default]
    Nearest,
    Bilinear,
}

/// A single uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Texture { texture: TextureId, sampler: Sampler },
}

/// Pixel-space rectangle `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub min: IVec2,
    pub max: IVec2,
}

impl PixelRect {
    #[must_use]
    pub fn from_size(size: UVec2) -> Self {
        Self {
            min: IVec2::ZERO,
            max: size.as_ivec2(),
        }
    }

    /// Shrinks the rectangle by `band` pixels on every side.
    #[must_use]
    pub fn inset(self, band: u32) -> Self {
        let b = band as i32;
        Self {
            min: self.min + IVec2::splat(b),
            max: (self.max - IVec2::splat(b)).max(self.min + IVec2::splat(b)),
        }
    }

    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        let min = self.min.max(other.min);
        Self {
            min,
            max: self.max.min(other.max).max(min),
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }
}

/// Named argument table for a program launch.
#[derive(Debug, Clone, Default)]
pub struct Args {
    uniforms: FxHashMap<String, Uniform>,
    macros: FxHashMap<String, i32>,
    rect: Option<PixelRect>,
}

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: Uniform) {
        self.uniforms.insert(name.into(), value);
    }

    pub fn set_float(&mut self, name: impl Into<String>, v: f32) {
        self.set_uniform(name, Uniform::Float(v));
    }

    pub fn set_int(&mut self, name: impl Into<String>, v: i32) {
        self.set_uniform(name, Uniform::Int(v));
    }

    pub fn set_vec2(&mut self, name: impl Into<String>, v: Vec2) {
        self.set_uniform(name, Uniform::Vec2(v));
    }

    pub fn set_vec3(&mut self, name: impl Into<String>, v: Vec3) {
        self.set_uniform(name, Uniform::Vec3(v));
    }

    pub fn set_vec4(&mut self, name: impl Into<String>, v: Vec4) {
        self.set_uniform(name, Uniform::Vec4(v));
    }

    pub fn set_mat4(&mut self, name: impl Into<String>, v: Mat4) {
        self.set_uniform(name, Uniform::Mat4(v));
    }

    pub fn set_texture(&mut self, name: impl Into<String>, texture: TextureId, sampler: Sampler) {
        self.set_uniform(name, Uniform::Texture { texture, sampler });
    }

    pub fn set_macro(&mut self, name: impl Into<String>, value: i32) {
        self.macros.insert(name.into(), value);
    }

    /// Restricts the launch to `rect` (intersected with the clip region).
    pub fn set_rect(&mut self, rect: PixelRect) {
        self.rect = Some(rect);
    }

    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&Uniform> {
        self.uniforms.get(name)
    }

    #[must_use]
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.uniforms.get(name)? {
            Uniform::Float(v) => Some(*v),
            Uniform::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    #[must_use]
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.uniforms.get(name)? {
            Uniform::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn vec2(&self, name: &str) -> Option<Vec2> {
        match self.uniforms.get(name)? {
            Uniform::Vec2(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn vec3(&self, name: &str) -> Option<Vec3> {
        match self.uniforms.get(name)? {
            Uniform::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn vec4(&self, name: &str) -> Option<Vec4> {
        match self.uniforms.get(name)? {
            Uniform::Vec4(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn mat4(&self, name: &str) -> Option<Mat4> {
        match self.uniforms.get(name)? {
            Uniform::Mat4(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn texture(&self, name: &str) -> Option<(TextureId, Sampler)> {
        match self.uniforms.get(name)? {
            Uniform::Texture { texture, sampler } => Some((*texture, *sampler)),
            _ => None,
        }
    }

    #[must_use]
    pub fn macro_value(&self, name: &str) -> Option<i32> {
        self.macros.get(name).copied()
    }

    /// `true` when the macro is defined and non-zero.
    #[must_use]
    pub fn has_macro(&self, name: &str) -> bool {
        self.macros.get(name).is_some_and(|v| *v != 0)
    }

    #[must_use]
    pub fn rect(&self) -> Option<PixelRect> {
        self.rect
    }

    /// Every texture bound in this table.
    pub fn textures(&self) -> impl Iterator<Item = (&str, TextureId)> {
        self.uniforms.iter().filter_map(|(k, v)| match v {
            Uniform::Texture { texture, .. } => Some((k.as_str(), *texture)),
            _ => None,
        })
    }
}
