//! Weighted-blended OIT resolve programs.
//!
//! # Data Flow
//! ```text
//! hi-res CS normals ──downsampleNormal──▶ low-res octahedral normals
//!                                                  │
//! low-res A / (Bβ, D) / Δ ──upsampleOIT (bilateral)┴──▶ hi-res A / (Bβ, D) / Δ
//!                                                                │
//! background snapshot ──────────compositeWeightedBlendedOIT──────┴──▶ destination
//! ```

use glam::{IVec2, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::renderer::software::program::{FragmentContext, FragmentOutput};

/// Largest blur radius, in pixels, the composite applies for diffusion.
const MAX_DIFFUSION_PIXELS: f32 = 16.0;

// ─── Octahedral normals ───────────────────────────────────────────────────────

#[inline]
fn sign_not_zero(v: Vec2) -> Vec2 {
    Vec2::new(
        if v.x >= 0.0 { 1.0 } else { -1.0 },
        if v.y >= 0.0 { 1.0 } else { -1.0 },
    )
}

/// Maps a unit vector onto the `[-1, 1]²` octahedral square.
#[must_use]
pub fn oct_encode(n: Vec3) -> Vec2 {
    let l1 = n.x.abs() + n.y.abs() + n.z.abs();
    if l1 <= 0.0 {
        return Vec2::ZERO;
    }
    let p = Vec2::new(n.x, n.y) / l1;
    if n.z < 0.0 {
        (Vec2::ONE - Vec2::new(p.y.abs(), p.x.abs())) * sign_not_zero(p)
    } else {
        p
    }
}

/// Inverse of [`oct_encode`].
#[must_use]
pub fn oct_decode(e: Vec2) -> Vec3 {
    let mut n = Vec3::new(e.x, e.y, 1.0 - e.x.abs() - e.y.abs());
    if n.z < 0.0 {
        let xy = (Vec2::ONE - Vec2::new(n.y.abs(), n.x.abs())) * sign_not_zero(Vec2::new(n.x, n.y));
        n.x = xy.x;
        n.y = xy.y;
    }
    n.normalize_or_zero()
}

// ─── DefaultRenderer_downsampleNormal ─────────────────────────────────────────

/// Nearest-neighbor downsample of camera-space normals into octahedral RG.
pub(crate) fn downsample_normal(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let factor = frag.args.int("lowResDownsampleFactor").unwrap_or(1).max(1);
    let src = frag.pixel.as_ivec2() * factor;
    let n = frag.fetch("csHighResNormalTexture", src).truncate();
    let e = oct_encode(n.normalize_or_zero());
    Some(FragmentOutput::color(Vec4::new(e.x, e.y, 0.0, 1.0)))
}

// ─── DefaultRenderer_upsampleOIT ──────────────────────────────────────────────

/// Bilateral upsample of the low-res accumulation targets.
///
/// Each low-res texel within `FILTER_RADIUS` contributes with a tent weight
/// in low-res space, scaled by depth similarity and (with `HAS_NORMALS`)
/// normal similarity to the destination pixel. Texels outside the source
/// contribute nothing; a pixel with no in-range tap takes the nearest texel.
pub(crate) fn upsample(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let args = frag.args;
    let radius = args.macro_value("FILTER_RADIUS").unwrap_or(2).max(0);
    let factor = args.int("downsampleFactor").unwrap_or(1).max(1) as f32;
    let source_size = args.vec2("sourceSize").unwrap_or(Vec2::ONE).max(Vec2::ONE);
    let source_max = source_size.as_ivec2() - IVec2::ONE;
    let has_normals = args.has_macro("HAS_NORMALS");

    let p = frag.pixel.as_ivec2();
    let dest_depth = frag.fetch("destDepth", p).x;
    let dest_normal = if has_normals {
        frag.fetch("destNormal", p).truncate().normalize_or_zero()
    } else {
        Vec3::ZERO
    };

    let lo = (frag.pixel.as_vec2() + Vec2::splat(0.5)) / factor - Vec2::splat(0.5);
    let base = lo.floor().as_ivec2();
    let extent = radius as f32 + 1.0;

    let mut total = 0.0_f32;
    let mut accum = Vec4::ZERO;
    let mut modulation = Vec3::ZERO;
    let mut diffusion = 0.0_f32;
    let mut delta = Vec2::ZERO;

    let mut taps: SmallVec<[(IVec2, f32); 25]> = SmallVec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let q = base + IVec2::new(dx, dy);
            // Off-source taps are dropped rather than clamped onto the border.
            if q.cmplt(IVec2::ZERO).any() || q.cmpgt(source_max).any() {
                continue;
            }
            let offset = (q.as_vec2() - lo).abs();
            let spatial = (1.0 - offset.x / extent).max(0.0) * (1.0 - offset.y / extent).max(0.0);
            if spatial > 0.0 {
                taps.push((q, spatial));
            }
        }
    }
    if taps.is_empty() {
        taps.push((lo.round().as_ivec2().clamp(IVec2::ZERO, source_max), 1.0));
    }

    for (q, spatial) in taps {
        let source_depth = frag.fetch("sourceDepth", q).x;
        let depth_weight = 1.0 / (1e-4 + (dest_depth - source_depth).abs());

        let normal_weight = if has_normals {
            let n = oct_decode(frag.fetch("sourceOctNormal", q).truncate().truncate());
            n.dot(dest_normal).max(0.0).powi(8) + 1e-3
        } else {
            1.0
        };

        let w = spatial * depth_weight * normal_weight;
        total += w;
        accum += w * frag.fetch("accumTexture", q);
        let bd = frag.fetch("backgroundModulationAndDiffusionTexture", q);
        modulation += w * bd.truncate();
        diffusion += w * bd.w;
        delta += w * frag.fetch("deltaTexture", q).truncate().truncate();
    }

    if total <= 0.0 {
        return None;
    }
    let inv = 1.0 / total;
    Some(
        FragmentOutput::color(accum * inv)
            .with(1, (Vec3::ONE - modulation * inv).extend(diffusion * inv))
            .with(2, (delta * inv).extend(0.0).extend(0.0)),
    )
}

// ─── DefaultRenderer_compositeWeightedBlendedOIT ──────────────────────────────

/// Resolves the accumulation targets over the background snapshot.
///
/// `result = background · B + (1 − B) · A.rgb / max(A.a, 1e-5)`, where the
/// background is fetched at the refraction-offset position and blurred by the
/// accumulated diffusion.
pub(crate) fn composite(frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
    let args = frag.args;
    let p = frag.pixel.as_ivec2();
    let size = frag.size.as_vec2();

    let accum = frag.fetch("accumTexture", p);
    let bd = frag.fetch("backgroundModulationAndDiffusionTexture", p);
    let delta = frag.fetch("deltaTexture", p).truncate().truncate();
    let modulation = bd.truncate();
    let diffusion = bd.w;

    let exact_background = frag.fetch("backgroundTexture", p);
    if modulation.min_element() >= 1.0 && accum.w <= 0.0 {
        return Some(FragmentOutput::color(exact_background));
    }

    let trim = args.vec2("trimBandThickness").unwrap_or(Vec2::ZERO);
    let lo = trim + Vec2::splat(0.5);
    let hi = (size - trim - Vec2::splat(0.5)).max(lo);
    let center = (frag.pixel.as_vec2() + Vec2::splat(0.5) + delta * size * 0.125).clamp(lo, hi);

    let background = if diffusion > 0.0 {
        let ppd2 = args.float("pixelsPerDiffusion2").unwrap_or(0.0);
        let radius = (diffusion * ppd2).sqrt().min(MAX_DIFFUSION_PIXELS);
        let mut sum = Vec4::ZERO;
        for j in -1..=1 {
            for i in -1..=1 {
                let c = (center + Vec2::new(i as f32, j as f32) * radius).clamp(lo, hi);
                sum += frag.sample("backgroundTexture", c / size);
            }
        }
        sum / 9.0
    } else if delta == Vec2::ZERO {
        exact_background
    } else {
        frag.sample("backgroundTexture", center / size)
    };

    let reflect = accum.truncate() / accum.w.max(1e-5);
    let result = background.truncate() * modulation + (Vec3::ONE - modulation) * reflect;
    Some(FragmentOutput::color(result.extend(exact_background.w)))
}
