//! Geocoding clients behind one provider trait, with a deterministic
//! fallback chain (local Nominatim first, then the public API).

pub mod mapbox;
pub mod nominatim;
pub mod registry;

pub use mapbox::MapboxGeocoder;
pub use nominatim::NominatimGeocoder;
pub use registry::GeocodingProviderRegistryService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Normalized geocoding result. `coordinates` is `[lon, lat]`; `bbox` is
/// `[min_lat, max_lat, min_lon, max_lon]`; `area` is in square degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub coordinates: [f64; 2],
    pub location_type: String,
    pub bbox: [f64; 4],
    pub area: f64,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
    /// Stamped by the fallback chain with the provider that answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseGeocodeResult {
    pub display_name: String,
    pub location_type: String,
    pub coordinates: [f64; 2],
    #[serde(default)]
    pub address: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Geocode a location string; `None` when the provider has no answer.
    async fn geocode(
        &self,
        location: &str,
        language: Option<&str>,
    ) -> anyhow::Result<Option<GeocodeResult>>;

    async fn reverse_geocode(
        &self,
        lat: f64,
        lon: f64,
        language: Option<&str>,
    ) -> anyhow::Result<Option<ReverseGeocodeResult>>;
}
