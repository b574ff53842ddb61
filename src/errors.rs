//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! [`RenderError`] covers the recoverable failure modes of a frame:
//! - Shader program resolution failures
//! - Stale or unknown texture / framebuffer handles
//! - Framebuffer attachment mismatches
//! - Invalid renderer configuration
//!
//! Caller-contract violations (ambient occlusion enabled without an AO
//! object, absurd surface counts) are not represented here: they abort with
//! a diagnostic panic.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, RenderError>`.
//!
//! ```rust,ignore
//! use myth_hybrid::errors::Result;
//!
//! fn render_frame() -> Result<()> {
//!     renderer.render(&mut device, &camera, framebuffer, None, &mut lighting, None, &surfaces)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::renderer::core::{AttachmentPoint, FramebufferId, TextureId};

/// The main error type for the hybrid renderer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    // ========================================================================
    // Shader Errors
    // ========================================================================
    /// No program with the given name is known to the device.
    #[error("Shader program not found: {0}")]
    ShaderNotFound(String),

    /// The shader handle does not refer to a live program.
    #[error("Stale shader handle")]
    StaleShader,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The texture handle does not refer to a live texture.
    #[error("Unknown texture: {0:?}")]
    UnknownTexture(TextureId),

    /// The framebuffer handle does not refer to a live framebuffer.
    #[error("Unknown framebuffer: {0:?}")]
    UnknownFramebuffer(FramebufferId),

    /// A required attachment is not bound on the framebuffer.
    #[error("Framebuffer '{framebuffer}' has no {attachment:?} attachment")]
    MissingAttachment {
        /// Label of the framebuffer
        framebuffer: String,
        /// The attachment point that was expected
        attachment: AttachmentPoint,
    },

    /// Two resources that must agree in size do not.
    #[error("Dimension mismatch in {context}: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Operation being performed
        context: &'static str,
        /// Expected (width, height)
        expected: (u32, u32),
        /// Actual (width, height)
        actual: (u32, u32),
    },

    /// A draw or launch was issued with no framebuffer bound.
    #[error("No framebuffer bound for {0}")]
    NoFramebufferBound(&'static str),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Renderer settings failed validation.
    #[error("Invalid renderer settings: {0}")]
    InvalidSettings(String),
}

/// Alias for `Result<T, RenderError>`.
pub type Result<T> = std::result::Result<T, RenderError>;
