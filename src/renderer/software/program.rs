//! Pixel Programs
//!
//! A [`PixelProgram`] is the CPU stand-in for a full-screen fragment shader:
//! it is evaluated once per pixel of the launch region and returns the values
//! written to each color target (or `None` to discard).
//!
//! Programs are registered by name in a [`ShaderLibrary`], which is what
//! [`RenderDevice::resolve_shader`](crate::renderer::core::RenderDevice::resolve_shader)
//! looks up.

use std::sync::Arc;

use glam::{IVec2, UVec2, Vec2, Vec4};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::texture::CpuTexture;
use crate::renderer::core::{Args, TextureId};

/// Per-pixel evaluation context.
pub struct FragmentContext<'a> {
    /// Pixel coordinate inside the bound framebuffer.
    pub pixel: UVec2,
    /// Size of the bound framebuffer.
    pub size: UVec2,
    pub args: &'a Args,
    textures: &'a SlotMap<TextureId, CpuTexture>,
}

impl<'a> FragmentContext<'a> {
    pub(crate) fn new(
        pixel: UVec2,
        size: UVec2,
        args: &'a Args,
        textures: &'a SlotMap<TextureId, CpuTexture>,
    ) -> Self {
        Self {
            pixel,
            size,
            args,
            textures,
        }
    }

    /// Normalized coordinate of the pixel center.
    #[inline]
    #[must_use]
    pub fn uv(&self) -> Vec2 {
        (self.pixel.as_vec2() + Vec2::splat(0.5)) / self.size.as_vec2()
    }

    /// Texture bound under `name`.
    #[must_use]
    pub fn texture(&self, name: &str) -> Option<&'a CpuTexture> {
        let (id, _) = self.args.texture(name)?;
        self.textures.get(id)
    }

    #[must_use]
    pub fn has_texture(&self, name: &str) -> bool {
        self.texture(name).is_some()
    }

    #[must_use]
    pub fn texture_size(&self, name: &str) -> Option<UVec2> {
        self.texture(name).map(CpuTexture::size)
    }

    /// Texel fetch; unbound textures read as zero.
    #[must_use]
    pub fn fetch(&self, name: &str, p: IVec2) -> Vec4 {
        self.texture(name).map_or(Vec4::ZERO, |t| t.fetch(p))
    }

    /// Filtered sample with the sampler bound alongside the texture.
    #[must_use]
    pub fn sample(&self, name: &str, uv: Vec2) -> Vec4 {
        match self.args.texture(name) {
            Some((id, sampler)) => self.textures.get(id).map_or(Vec4::ZERO, |t| t.sample(uv, sampler)),
            None => Vec4::ZERO,
        }
    }
}

/// Values a program writes for one pixel.
#[derive(Debug, Clone, Default)]
pub struct FragmentOutput {
    pub colors: SmallVec<[(u8, Vec4); 4]>,
    pub depth: Option<f32>,
}

impl FragmentOutput {
    #[must_use]
    pub fn color(value: Vec4) -> Self {
        Self::default().with(0, value)
    }

    #[must_use]
    pub fn with(mut self, target: u8, value: Vec4) -> Self {
        self.colors.push((target, value));
        self
    }
}

/// A CPU full-screen fragment program.
pub trait PixelProgram: Send + Sync {
    fn shade(&self, frag: &FragmentContext<'_>) -> Option<FragmentOutput>;
}

impl<F> PixelProgram for F
where
    F: Fn(&FragmentContext<'_>) -> Option<FragmentOutput> + Send + Sync,
{
    fn shade(&self, frag: &FragmentContext<'_>) -> Option<FragmentOutput> {
        self(frag)
    }
}

/// Name → program registry.
#[derive(Clone, Default)]
pub struct ShaderLibrary {
    programs: FxHashMap<String, Arc<dyn PixelProgram>>,
}

impl ShaderLibrary {
    /// An empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A library preloaded with the renderer's built-in programs.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut lib = Self::new();
        super::programs::register_builtins(&mut lib);
        lib
    }

    pub fn register(&mut self, name: impl Into<String>, program: impl PixelProgram + 'static) {
        self.programs.insert(name.into(), Arc::new(program));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn PixelProgram>> {
        self.programs.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }
}
