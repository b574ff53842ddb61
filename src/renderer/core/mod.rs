//! Device core
//!
//! Provides:
//! - [`RenderDevice`]: the command/resource interface frames are recorded against
//! - Resource handles and descriptions ([`TextureId`], [`Framebuffer`], ...)
//! - [`Args`]: named argument tables for full-screen program launches

pub mod args;
pub mod device;
pub mod resources;

pub use args::{Args, PixelRect, Sampler, Uniform};
pub use device::{
    DepthPeel, DrawCall, RenderDevice, ScreenRect, camera_space_depth, debug_group, scoped_2d, scoped_state,
};
pub use resources::{
    AttachmentPoint, BlitMask, Framebuffer, FramebufferId, MAX_COLOR_ATTACHMENTS, ShaderId, TextureDesc,
    TextureId, is_depth_format, is_high_precision_float,
};
