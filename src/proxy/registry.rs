//! Ordered proxy registry with a current-entry cursor

use tracing::{info, warn};

use crate::error::RotaError;
use crate::models::{ProxyEntry, ProxySpec};
use crate::proxy::parser;

/// Proxy entries in input order plus the cursor marking the current one
///
/// Duplicates are kept. The cursor only moves through [`ProxyRegistry::advance`]
/// and is reset by building a new registry. The generation tells registries apart
/// when one replaces another.
#[derive(Debug, Clone, Default)]
pub struct ProxyRegistry {
    entries: Vec<ProxyEntry>,
    cursor: usize,
    generation: u64,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and bind every spec, skipping the ones that fail
    ///
    /// Each failure is handed to `on_error`; building never fails as a whole.
    pub fn build<I, S>(specs: I, default_scheme: &str, on_error: &dyn Fn(&RotaError)) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ProxySpec>,
    {
        let mut entries = Vec::new();

        for spec in specs {
            let spec = spec.into();
            let result = parser::parse(spec.clone(), default_scheme).and_then(ProxyEntry::bind);
            match result {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Skipping proxy spec '{}': {}", spec, e);
                    on_error(&e);
                }
            }
        }

        info!("Loaded {} proxies", entries.len());
        Self {
            entries,
            cursor: 0,
            generation: 0,
        }
    }

    /// Swap in `next`, which takes the following generation number
    pub fn replace(&mut self, mut next: ProxyRegistry) {
        next.generation = self.generation.wrapping_add(1);
        *self = next;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[ProxyEntry] {
        &self.entries
    }

    /// Entry under the cursor, or `None` when there is no current proxy
    pub fn current(&self) -> Option<&ProxyEntry> {
        self.entries.get(self.cursor)
    }

    /// Move the cursor one step, wrapping around; returns the new position and entry
    pub fn advance(&mut self) -> Option<(usize, ProxyEntry)> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.entries.len();
        self.current().cloned().map(|entry| (self.cursor, entry))
    }

    /// Record the public IP of the entry at `index`
    ///
    /// Returns the updated entry, or `None` if `index` no longer exists.
    pub fn set_public_ip(&mut self, index: usize, ip: String) -> Option<ProxyEntry> {
        let entry = self.entries.get_mut(index)?;
        entry.set_public_ip(ip);
        Some(entry.clone())
    }
}
