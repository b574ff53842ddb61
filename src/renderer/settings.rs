//! Renderer Settings
//!
//! [`RendererSettings`] selects the shading path for opaque surfaces and the
//! transparency technique for blended ones. Settings are plain data and can
//! be loaded from JSON:
//!
//! ```rust,ignore
//! use myth_hybrid::RendererSettings;
//!
//! let settings: RendererSettings = serde_json::from_str(r#"{
//!     "deferred_shading": true,
//!     "order_independent_transparency": true
//! }"#)?;
//! renderer.set_settings(settings)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{RenderError, Result};

/// Per-renderer configuration, applied from the next `render` call.
///
/// | Field                            | Default |
/// |----------------------------------|---------|
/// | `deferred_shading`               | `false` |
/// | `order_independent_transparency` | `false` |
/// | `oit_low_res_downsample_factor`  | `4`     |
/// | `oit_upsample_filter_radius`     | `2`     |
/// | `oit_high_precision`             | `true`  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Shade GBuffer-representable surfaces with one full-screen pass.
    pub deferred_shading: bool,

    /// Weighted-blended OIT instead of sorted back-to-front blending.
    pub order_independent_transparency: bool,

    /// Resolution divisor for surfaces preferring low-resolution
    /// transparency. `1` disables the low-resolution path.
    pub oit_low_res_downsample_factor: u32,

    /// Bilateral upsample radius, in low-resolution texels.
    pub oit_upsample_filter_radius: u32,

    /// 16-bit float accumulation targets instead of 8-bit.
    pub oit_high_precision: bool,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            deferred_shading: false,
            order_independent_transparency: false,
            oit_low_res_downsample_factor: 4,
            oit_upsample_filter_radius: 2,
            oit_high_precision: true,
        }
    }
}

impl RendererSettings {
    pub fn validate(&self) -> Result<()> {
        if self.oit_low_res_downsample_factor == 0 {
            return Err(RenderError::InvalidSettings(
                "oit_low_res_downsample_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_downsample_factor_is_rejected() {
        let settings = RendererSettings {
            oit_low_res_downsample_factor: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(RenderError::InvalidSettings(_))));
        assert!(RendererSettings::default().validate().is_ok());
    }
}
