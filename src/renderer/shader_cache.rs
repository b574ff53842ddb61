//! Lazily resolved program handles, keyed by full program name.
//!
//! Entries live for the renderer's lifetime; [`ShaderCache::reset`] is the
//! only invalidation.

use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::renderer::core::{RenderDevice, ShaderId};

#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: FxHashMap<String, ShaderId>,
}

impl ShaderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for `name`, resolving it on first use.
    pub fn get_or_resolve(&mut self, rd: &mut dyn RenderDevice, name: &str) -> Result<ShaderId> {
        if let Some(id) = self.entries.get(name) {
            return Ok(*id);
        }
        let id = rd.resolve_shader(name)?;
        self.entries.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
