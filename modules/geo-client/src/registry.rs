//! Geocoding registry and fallback chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::{GeocodeResult, GeocodingProvider, MapboxGeocoder, NominatimGeocoder, ReverseGeocodeResult};

const PUBLIC_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

/// Order matters: `geocode_with_fallback` tries `local` then the public
/// API. Mapbox is available by explicit name only (it is paid).
pub struct GeocodingProviderRegistryService {
    local_base_url: String,
    mapbox_api_key: Option<String>,
    singletons: Mutex<HashMap<String, Arc<dyn GeocodingProvider>>>,
}

impl GeocodingProviderRegistryService {
    pub fn new(local_base_url: &str, mapbox_api_key: Option<String>) -> Self {
        Self {
            local_base_url: local_base_url.to_string(),
            mapbox_api_key,
            singletons: Mutex::new(HashMap::new()),
        }
    }

    pub fn available_providers(&self) -> Vec<&'static str> {
        vec!["local", "nominatim_api", "mapbox"]
    }

    pub fn create_provider(
        &self,
        provider_name: &str,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn GeocodingProvider>> {
        // Runtime-keyed Mapbox instances are built fresh, never cached.
        if provider_name == "mapbox" {
            let key = api_key
                .map(str::to_string)
                .or_else(|| self.mapbox_api_key.clone())
                .ok_or_else(|| anyhow!("Geocoding provider 'mapbox' requires an API key"))?;
            if api_key.is_some() {
                return Ok(Arc::new(MapboxGeocoder::new(&key)));
            }
        }

        if let Some(existing) = self
            .singletons
            .lock()
            .expect("singleton cache poisoned")
            .get(provider_name)
        {
            return Ok(existing.clone());
        }

        let provider: Arc<dyn GeocodingProvider> = match provider_name {
            "local" => Arc::new(NominatimGeocoder::new("local", &self.local_base_url)),
            "nominatim_api" => {
                Arc::new(NominatimGeocoder::new("nominatim_api", PUBLIC_NOMINATIM_URL))
            }
            "mapbox" => {
                let key = self
                    .mapbox_api_key
                    .clone()
                    .ok_or_else(|| anyhow!("Geocoding provider 'mapbox' requires an API key"))?;
                Arc::new(MapboxGeocoder::new(&key))
            }
            other => return Err(anyhow!("Unknown geocoding provider: {other}")),
        };
        self.singletons
            .lock()
            .expect("singleton cache poisoned")
            .insert(provider_name.to_string(), provider.clone());
        Ok(provider)
    }

    pub fn get_default_provider(&self) -> Result<Arc<dyn GeocodingProvider>> {
        self.create_provider("local", None)
    }

    fn fallback_chain(&self) -> Vec<&'static str> {
        vec!["local", "nominatim_api"]
    }

    /// Try providers in order and return the first non-null result with
    /// the answering provider stamped in.
    pub async fn geocode_with_fallback(
        &self,
        location: &str,
        language: Option<&str>,
    ) -> Option<GeocodeResult> {
        for name in self.fallback_chain() {
            let provider = match self.create_provider(name, None) {
                Ok(provider) => provider,
                Err(e) => {
                    debug!(provider = name, error = %e, "skipping geocoder");
                    continue;
                }
            };
            match provider.geocode(location, language).await {
                Ok(Some(mut result)) => {
                    result.provider = Some(name.to_string());
                    return Some(result);
                }
                Ok(None) => debug!(provider = name, location, "no geocoding result"),
                Err(e) => warn!(provider = name, error = %e, "geocoding failed"),
            }
        }
        None
    }

    /// Reverse geocoding mirrors the forward fallback contract.
    pub async fn reverse_geocode_with_fallback(
        &self,
        lat: f64,
        lon: f64,
        language: Option<&str>,
    ) -> Option<ReverseGeocodeResult> {
        for name in self.fallback_chain() {
            let provider = match self.create_provider(name, None) {
                Ok(provider) => provider,
                Err(e) => {
                    debug!(provider = name, error = %e, "skipping geocoder");
                    continue;
                }
            };
            match provider.reverse_geocode(lat, lon, language).await {
                Ok(Some(mut result)) => {
                    result.provider = Some(name.to_string());
                    return Some(result);
                }
                Ok(None) => debug!(provider = name, lat, lon, "no reverse geocoding result"),
                Err(e) => warn!(provider = name, error = %e, "reverse geocoding failed"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapbox_requires_key() {
        let registry = GeocodingProviderRegistryService::new("http://localhost:8080", None);
        assert!(registry.create_provider("mapbox", None).is_err());
        assert!(registry.create_provider("mapbox", Some("pk.test")).is_ok());
    }

    #[test]
    fn test_keyless_providers_are_singletons() {
        let registry = GeocodingProviderRegistryService::new("http://localhost:8080", None);
        let a = registry.create_provider("local", None).unwrap();
        let b = registry.create_provider("local", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
