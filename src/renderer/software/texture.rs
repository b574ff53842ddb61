//! CPU texture storage.
//!
//! Texels are held as `Vec4` and quantized on every write to the precision
//! of the texture format, so 8-bit, 16-bit float and 24-bit depth targets
//! behave like their GPU counterparts.

use glam::{IVec2, UVec2, Vec2, Vec4};

use crate::renderer::core::{Sampler, TextureDesc};

/// Storage class of a texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Unorm8,
    Snorm8,
    Half,
    Unorm16,
    Unorm24,
    Float,
}

fn storage(format: wgpu::TextureFormat) -> Storage {
    use wgpu::TextureFormat as F;
    match format {
        F::R8Unorm | F::Rg8Unorm | F::Rgba8Unorm | F::Rgba8UnormSrgb | F::Bgra8Unorm | F::Bgra8UnormSrgb => {
            Storage::Unorm8
        }
        F::R8Snorm | F::Rg8Snorm | F::Rgba8Snorm => Storage::Snorm8,
        F::R16Float | F::Rg16Float | F::Rgba16Float => Storage::Half,
        F::Depth16Unorm => Storage::Unorm16,
        F::Depth24Plus | F::Depth24PlusStencil8 => Storage::Unorm24,
        _ => Storage::Float,
    }
}

/// Number of stored channels; the rest read back as `(.., 0, 1)`.
fn channel_count(format: wgpu::TextureFormat) -> usize {
    use wgpu::TextureFormat as F;
    match format {
        F::R8Unorm
        | F::R8Snorm
        | F::R16Float
        | F::R32Float
        | F::Depth16Unorm
        | F::Depth24Plus
        | F::Depth24PlusStencil8
        | F::Depth32Float
        | F::Depth32FloatStencil8 => 1,
        F::Rg8Unorm | F::Rg8Snorm | F::Rg16Float | F::Rg32Float => 2,
        _ => 4,
    }
}

fn quantize_channel(storage: Storage, v: f32) -> f32 {
    match storage {
        Storage::Unorm8 => (v.clamp(0.0, 1.0) * 255.0).round() / 255.0,
        Storage::Snorm8 => (v.clamp(-1.0, 1.0) * 127.0).round() / 127.0,
        Storage::Half => half::f16::from_f32(v).to_f32(),
        Storage::Unorm16 => (v.clamp(0.0, 1.0) * 65535.0).round() / 65535.0,
        Storage::Unorm24 => {
            const MAX: f32 = 16_777_215.0;
            ((f64::from(v.clamp(0.0, 1.0)) * f64::from(MAX)).round() / f64::from(MAX)) as f32
        }
        Storage::Float => v,
    }
}

/// Converts `v` to what a texture of `format` would store and read back.
#[must_use]
pub fn quantize(format: wgpu::TextureFormat, v: Vec4) -> Vec4 {
    let storage = storage(format);
    let channels = channel_count(format);
    let defaults = [0.0, 0.0, 0.0, 1.0];
    let mut out = [0.0; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = if i < channels {
            quantize_channel(storage, v[i])
        } else {
            defaults[i]
        };
    }
    Vec4::from_array(out)
}

/// A 2D texture in CPU memory.
#[derive(Debug, Clone)]
pub struct CpuTexture {
    pub desc: TextureDesc,
    texels: Vec<Vec4>,
}

impl CpuTexture {
    #[must_use]
    pub fn new(desc: TextureDesc) -> Self {
        let fill = quantize(desc.format, Vec4::ZERO);
        let texels = vec![fill; (desc.width as usize) * (desc.height as usize)];
        Self { desc, texels }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.desc.width, self.desc.height)
    }

    /// Reallocates storage at the new size. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.desc.width = width;
        self.desc.height = height;
        let fill = quantize(self.desc.format, Vec4::ZERO);
        self.texels = vec![fill; (width as usize) * (height as usize)];
    }

    /// Texel at `p`, clamped to the edge. Empty textures read as zero.
    #[must_use]
    pub fn fetch(&self, p: IVec2) -> Vec4 {
        if self.texels.is_empty() {
            return Vec4::ZERO;
        }
        let x = p.x.clamp(0, self.desc.width as i32 - 1) as usize;
        let y = p.y.clamp(0, self.desc.height as i32 - 1) as usize;
        self.texels[y * self.desc.width as usize + x]
    }

    /// Stores `v` at `(x, y)` with format quantization. Out-of-range writes
    /// are dropped.
    pub fn store(&mut self, x: u32, y: u32, v: Vec4) {
        if x >= self.desc.width || y >= self.desc.height {
            return;
        }
        let idx = y as usize * self.desc.width as usize + x as usize;
        self.texels[idx] = quantize(self.desc.format, v);
    }

    /// Fills every texel with `v`.
    pub fn fill(&mut self, v: Vec4) {
        let q = quantize(self.desc.format, v);
        self.texels.fill(q);
    }

    /// Samples at normalized `uv` with clamp-to-edge addressing.
    #[must_use]
    pub fn sample(&self, uv: Vec2, sampler: Sampler) -> Vec4 {
        let size = self.size().as_vec2();
        match sampler {
            Sampler::Nearest => self.fetch((uv * size).floor().as_ivec2()),
            Sampler::Bilinear => {
                let p = uv * size - Vec2::splat(0.5);
                let base = p.floor();
                let f = p - base;
                let b = base.as_ivec2();
                let t00 = self.fetch(b);
                let t10 = self.fetch(b + IVec2::X);
                let t01 = self.fetch(b + IVec2::Y);
                let t11 = self.fetch(b + IVec2::ONE);
                let top = t00.lerp(t10, f.x);
                let bottom = t01.lerp(t11, f.x);
                top.lerp(bottom, f.y)
            }
        }
    }

    /// Raw texel slice in row-major order.
    #[must_use]
    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    /// Copies `other`'s texels, requantizing to this texture's format.
    pub(crate) fn copy_from(&mut self, other: &CpuTexture) {
        let format = self.desc.format;
        for (dst, src) in self.texels.iter_mut().zip(other.texels.iter()) {
            *dst = quantize(format, *src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unorm8_rounds_to_255ths() {
        let v = quantize(wgpu::TextureFormat::Rgba8Unorm, Vec4::new(0.5, 1.5, -0.2, 0.2));
        assert!((v.x - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(v.y, 1.0);
        assert_eq!(v.z, 0.0);
        assert!((v.w - 51.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn two_channel_formats_fill_blue_and_alpha() {
        let v = quantize(wgpu::TextureFormat::Rg8Snorm, Vec4::new(-0.5, 0.25, 0.7, 0.3));
        assert!(v.x < 0.0);
        assert_eq!(v.z, 0.0);
        assert_eq!(v.w, 1.0);
    }

    #[test]
    fn bilinear_at_texel_center_matches_fetch() {
        let mut t = CpuTexture::new(TextureDesc::new("t", 4, 4, wgpu::TextureFormat::Rgba32Float));
        t.store(1, 2, Vec4::new(0.25, 0.5, 0.75, 1.0));
        let uv = Vec2::new(1.5, 2.5) / 4.0;
        let s = t.sample(uv, Sampler::Bilinear);
        assert!((s - Vec4::new(0.25, 0.5, 0.75, 1.0)).abs().max_element() < 1e-5);
    }
}
