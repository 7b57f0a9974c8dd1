//! Persona profile cache.
//!
//! Profiles are read from disk at most once per TTL; `refresh` forces a
//! reload after the files change. Loads run on the blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use doppel_core::{PersonaError, PersonaProfile, PersonaSource};
use moka::future::Cache;

/// How long a loaded profile is reused before the files are read again.
pub const DEFAULT_PERSONA_TTL: Duration = Duration::from_secs(3600);

/// A [`PersonaSource`] with a single-entry TTL cache in front of it.
pub struct CachedPersonaSource {
    source: Arc<dyn PersonaSource>,
    cache: Cache<(), PersonaProfile>,
}

impl CachedPersonaSource {
    pub fn new(source: Arc<dyn PersonaSource>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self { source, cache }
    }

    /// Cached profile, loading it on a miss.
    pub async fn profile(&self) -> Result<PersonaProfile, PersonaError> {
        if let Some(profile) = self.cache.get(&()).await {
            return Ok(profile);
        }
        self.load().await
    }

    /// Load the profile again, replacing the cached one. A failed reload
    /// leaves nothing cached.
    pub async fn refresh(&self) -> Result<PersonaProfile, PersonaError> {
        let result = self.load().await;
        if result.is_err() {
            self.cache.invalidate(&()).await;
        }
        result
    }

    /// Whether a profile is currently cached.
    pub fn is_loaded(&self) -> bool {
        self.cache.contains_key(&())
    }

    async fn load(&self) -> Result<PersonaProfile, PersonaError> {
        let source = Arc::clone(&self.source);
        let profile = tokio::task::spawn_blocking(move || source.load())
            .await
            .map_err(|e| PersonaError::Interrupted(e.to_string()))??;
        self.cache.insert((), profile.clone()).await;
        tracing::debug!(name = %profile.name, "Persona profile cached");
        Ok(profile)
    }
}

impl Default for CachedPersonaSource {
    fn default() -> Self {
        let fallback = doppel_core::StaticPersona::new(PersonaProfile::new("Assistant", "", ""));
        Self::new(Arc::new(fallback), DEFAULT_PERSONA_TTL)
    }
}
