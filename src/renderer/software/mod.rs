//! CPU reference backend
//!
//! - [`SoftwareDevice`]: a [`RenderDevice`](crate::renderer::core::RenderDevice)
//!   that rasterizes into in-memory textures and logs every command
//! - [`ShaderLibrary`] / [`PixelProgram`]: named full-screen programs
//! - [`programs`]: the renderer's built-in programs

pub mod blend;
pub mod device;
pub mod program;
pub mod programs;
pub mod texture;

pub use device::{DeviceEvent, DeviceStats, SoftwareDevice};
pub use program::{FragmentContext, FragmentOutput, PixelProgram, ShaderLibrary};
pub use texture::CpuTexture;
