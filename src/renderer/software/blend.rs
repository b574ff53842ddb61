//! Fixed-function blend and depth-compare arithmetic.
//!
//! Implements the `wgpu::BlendState` equations so the color and alpha
//! components of one attachment can use different factors. The
//! order-independent transparency targets rely on that split.

use glam::{Vec3, Vec4};
use wgpu::{BlendComponent, BlendFactor, BlendOperation, BlendState, CompareFunction};

fn color_factor(factor: BlendFactor, src: Vec4, dst: Vec4) -> Vec3 {
    match factor {
        BlendFactor::Zero | BlendFactor::OneMinusConstant => Vec3::ZERO,
        BlendFactor::Src => src.truncate(),
        BlendFactor::OneMinusSrc => Vec3::ONE - src.truncate(),
        BlendFactor::SrcAlpha => Vec3::splat(src.w),
        BlendFactor::OneMinusSrcAlpha => Vec3::splat(1.0 - src.w),
        BlendFactor::Dst => dst.truncate(),
        BlendFactor::OneMinusDst => Vec3::ONE - dst.truncate(),
        BlendFactor::DstAlpha => Vec3::splat(dst.w),
        BlendFactor::OneMinusDstAlpha => Vec3::splat(1.0 - dst.w),
        BlendFactor::SrcAlphaSaturated => Vec3::splat(src.w.min(1.0 - dst.w)),
        _ => Vec3::ONE,
    }
}

fn alpha_factor(factor: BlendFactor, src: Vec4, dst: Vec4) -> f32 {
    match factor {
        BlendFactor::Zero | BlendFactor::OneMinusConstant => 0.0,
        BlendFactor::Src | BlendFactor::SrcAlpha => src.w,
        BlendFactor::OneMinusSrc | BlendFactor::OneMinusSrcAlpha => 1.0 - src.w,
        BlendFactor::Dst | BlendFactor::DstAlpha => dst.w,
        BlendFactor::OneMinusDst | BlendFactor::OneMinusDstAlpha => 1.0 - dst.w,
        _ => 1.0,
    }
}

fn combine<T>(op: BlendOperation, s: T, d: T) -> T
where
    T: std::ops::Add<Output = T> + std::ops::Sub<Output = T> + MinMax,
{
    match op {
        BlendOperation::Add => s + d,
        BlendOperation::Subtract => s - d,
        BlendOperation::ReverseSubtract => d - s,
        BlendOperation::Min => s.min_of(d),
        BlendOperation::Max => s.max_of(d),
    }
}

trait MinMax {
    fn min_of(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
}

impl MinMax for f32 {
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl MinMax for Vec3 {
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

fn blend_color(c: &BlendComponent, src: Vec4, dst: Vec4) -> Vec3 {
    // Min/Max ignore the factors.
    if matches!(c.operation, BlendOperation::Min | BlendOperation::Max) {
        return combine(c.operation, src.truncate(), dst.truncate());
    }
    let s = src.truncate() * color_factor(c.src_factor, src, dst);
    let d = dst.truncate() * color_factor(c.dst_factor, src, dst);
    combine(c.operation, s, d)
}

fn blend_alpha(c: &BlendComponent, src: Vec4, dst: Vec4) -> f32 {
    if matches!(c.operation, BlendOperation::Min | BlendOperation::Max) {
        return combine(c.operation, src.w, dst.w);
    }
    let s = src.w * alpha_factor(c.src_factor, src, dst);
    let d = dst.w * alpha_factor(c.dst_factor, src, dst);
    combine(c.operation, s, d)
}

/// Combines a fragment value with the stored value. `None` replaces.
#[must_use]
pub fn apply_blend(state: Option<&BlendState>, src: Vec4, dst: Vec4) -> Vec4 {
    match state {
        None => src,
        Some(state) => blend_color(&state.color, src, dst).extend(blend_alpha(&state.alpha, src, dst)),
    }
}

/// Evaluates `fragment <func> stored`.
#[inline]
#[must_use]
pub fn depth_compare(func: CompareFunction, fragment: f32, stored: f32) -> bool {
    match func {
        CompareFunction::Never => false,
        CompareFunction::Less => fragment < stored,
        CompareFunction::Equal => fragment == stored,
        CompareFunction::LessEqual => fragment <= stored,
        CompareFunction::Greater => fragment > stored,
        CompareFunction::NotEqual => fragment != stored,
        CompareFunction::GreaterEqual => fragment >= stored,
        CompareFunction::Always => true,
    }
}
