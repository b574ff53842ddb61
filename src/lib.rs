//! Hybrid deferred/forward renderer with weighted-blended order-independent
//! transparency.
//!
//! The renderer records against the [`RenderDevice`] trait; [`SoftwareDevice`]
//! is the CPU reference implementation.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use myth_hybrid::*;
//!
//! let mut rd = SoftwareDevice::new();
//! let mut renderer = DefaultRenderer::with_settings(RendererSettings {
//!     order_independent_transparency: true,
//!     ..Default::default()
//! })?;
//! renderer.render(&mut rd, &camera, framebuffer, None, &mut lighting, None, &surfaces)?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod scene;

pub use errors::{RenderError, Result};
pub use renderer::core::{
    Args, AttachmentPoint, BlitMask, DrawCall, FramebufferId, RenderDevice, Sampler, ScreenRect, TextureDesc,
    TextureId,
};
pub use renderer::software::{DeviceEvent, SoftwareDevice};
pub use renderer::{
    DefaultRenderer, GBuffer, GBufferField, GBufferFields, GBufferSpecification, RenderPassType, RendererSettings,
    ShadingPolicy, SortOrder,
};
pub use scene::{
    AmbientOcclusion, AmbientOcclusionSettings, Camera, Light, LightingEnvironment, QuadSurface,
    ScreenSpaceAmbientOcclusion, Surface,
};
