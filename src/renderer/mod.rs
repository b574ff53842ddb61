//! Rendering System
//!
//! - [`core`]: device abstraction, resource handles, program arguments
//! - [`software`]: CPU reference device and built-in programs
//! - [`DefaultRenderer`]: frame orchestration over the stages below
//!
//! # Stages
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `classify`   | frustum culling, depth sorting, shading-path lists    |
//! | `gbuffer`    | geometry buffer fields and allocation                 |
//! | `shadow`     | directional shadow maps, AO update                    |
//! | `deferred`   | full-screen deferred lighting                         |
//! | `forward`    | per-surface forward passes                            |
//! | `oit`        | weighted-blended OIT at two resolutions               |

pub mod classify;
pub mod core;
pub mod default_renderer;
pub mod deferred;
pub mod forward;
pub mod gbuffer;
pub mod oit;
pub mod settings;
pub mod shader_cache;
pub mod shading;
pub mod shadow;
pub mod software;

pub use classify::{RenderLists, SortOrder, partition_by_resolution, sort_indices};
pub use default_renderer::{DefaultRenderer, MAX_PLAUSIBLE_SURFACES};
pub use forward::{RenderPassType, forward_shade};
pub use gbuffer::{GBuffer, GBufferField, GBufferFields, GBufferSpecification};
pub use oit::{OitBuffers, OitFragment, OitFrame, OitOutputs, OitPass, OitWritePixel, WeightedBlendedWritePixel};
pub use settings::RendererSettings;
pub use shader_cache::ShaderCache;
pub use shading::{DefaultShadingPolicy, ShadingPolicy};
