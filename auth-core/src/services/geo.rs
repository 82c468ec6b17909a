//! IP-geolocation collaborator seam.
//!
//! Access events are stamped with a country code when the lookup yields one.
//! Implementations own their transport and timeouts; a lookup that fails or
//! times out resolves to `None` and never blocks the auth flow.

use async_trait::async_trait;

#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn country_code(&self, ip: &str) -> Option<String>;
}

/// Default implementation for environments without a geolocation provider.
pub struct NoopGeo;

#[async_trait]
impl GeoLookup for NoopGeo {
    async fn country_code(&self, _ip: &str) -> Option<String> {
        None
    }
}
