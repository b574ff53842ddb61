//! Built-in pixel programs.
//!
//! | Name                                          | Pass                      |
//! |-----------------------------------------------|---------------------------|
//! | `DefaultRenderer_deferredShade`               | deferred lighting         |
//! | `DefaultRenderer_downsampleNormal`            | OIT low-res normal cache  |
//! | `DefaultRenderer_upsampleOIT`                 | OIT bilateral upsample    |
//! | `DefaultRenderer_compositeWeightedBlendedOIT` | OIT resolve               |
//! | `AmbientOcclusion_estimate`                   | screen-space AO           |

mod ambient_occlusion;
mod deferred_shade;
pub mod oit;

use super::program::ShaderLibrary;

pub const DEFERRED_SHADE: &str = "DefaultRenderer_deferredShade";
pub const DOWNSAMPLE_NORMAL: &str = "DefaultRenderer_downsampleNormal";
pub const UPSAMPLE_OIT: &str = "DefaultRenderer_upsampleOIT";
pub const COMPOSITE_OIT: &str = "DefaultRenderer_compositeWeightedBlendedOIT";
pub const AMBIENT_OCCLUSION: &str = "AmbientOcclusion_estimate";

/// Registers every built-in program under its default name.
pub fn register_builtins(lib: &mut ShaderLibrary) {
    lib.register(DEFERRED_SHADE, deferred_shade::shade);
    lib.register(DOWNSAMPLE_NORMAL, oit::downsample_normal);
    lib.register(UPSAMPLE_OIT, oit::upsample);
    lib.register(COMPOSITE_OIT, oit::composite);
    lib.register(AMBIENT_OCCLUSION, ambient_occlusion::estimate);
}
