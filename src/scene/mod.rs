//! Scene inputs consumed by the renderer.
//!
//! - [`Camera`]: projection and view frame
//! - [`Surface`]: capability-query interface for renderable batches
//! - [`LightingEnvironment`]: lights, ambient term, AO and screen-space buffers
//! - [`AmbientOcclusion`]: per-frame AO estimator

pub mod ambient_occlusion;
pub mod camera;
pub mod lighting;
pub mod surface;

pub use ambient_occlusion::{AmbientOcclusion, AmbientOcclusionSettings, ScreenSpaceAmbientOcclusion};
pub use camera::{Camera, Frustum, aspect_ratio};
pub use lighting::{Light, LightKind, LightingEnvironment, ShadowMap};
pub use surface::{BoundingSphere, GBufferMaterial, QuadSurface, Surface, SurfacePassContext};
