use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{GeocodeResult, GeocodingProvider, ReverseGeocodeResult};

/// Nominatim geocoder. Works against a self-hosted instance or the public
/// OSM API depending on `base_url`.
pub struct NominatimGeocoder {
    http: reqwest::Client,
    base_url: String,
    name: String,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(rename = "type", default)]
    place_type: Option<String>,
    #[serde(default)]
    boundingbox: Vec<String>,
    #[serde(default)]
    geojson: Option<serde_json::Value>,
    #[serde(default)]
    address: Option<serde_json::Map<String, serde_json::Value>>,
}

impl NominatimGeocoder {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        }
    }

    fn parse_bbox(raw: &[String]) -> [f64; 4] {
        if raw.len() == 4 {
            let parsed: Vec<f64> = raw.iter().filter_map(|s| s.parse().ok()).collect();
            if parsed.len() == 4 {
                return [parsed[0], parsed[1], parsed[2], parsed[3]];
            }
        }
        [0.0, 0.0, 0.0, 0.0]
    }
}

#[async_trait]
impl GeocodingProvider for NominatimGeocoder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn geocode(
        &self,
        location: &str,
        language: Option<&str>,
    ) -> Result<Option<GeocodeResult>> {
        let mut url = format!(
            "{}/search?q={}&format=json&limit=1&polygon_geojson=1",
            self.base_url,
            urlencoding::encode(location)
        );
        if let Some(lang) = language {
            url.push_str(&format!("&accept-language={lang}"));
        }

        debug!(provider = %self.name, location, "geocoding");
        let response = self
            .http
            .get(&url)
            .header("User-Agent", "skein/0.1")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Nominatim error ({}) from {}",
                response.status(),
                self.name
            ));
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let lat: f64 = place.lat.parse().unwrap_or(0.0);
        let lon: f64 = place.lon.parse().unwrap_or(0.0);
        let bbox = Self::parse_bbox(&place.boundingbox);
        let area = ((bbox[1] - bbox[0]) * (bbox[3] - bbox[2])).abs();

        Ok(Some(GeocodeResult {
            coordinates: [lon, lat],
            location_type: place.place_type.unwrap_or_else(|| "unknown".to_string()),
            bbox,
            area,
            display_name: place.display_name,
            geometry: place.geojson,
            provider: None,
        }))
    }

    async fn reverse_geocode(
        &self,
        lat: f64,
        lon: f64,
        language: Option<&str>,
    ) -> Result<Option<ReverseGeocodeResult>> {
        let mut url = format!(
            "{}/reverse?lat={lat}&lon={lon}&format=json",
            self.base_url
        );
        if let Some(lang) = language {
            url.push_str(&format!("&accept-language={lang}"));
        }

        debug!(provider = %self.name, lat, lon, "reverse geocoding");
        let response = self
            .http
            .get(&url)
            .header("User-Agent", "skein/0.1")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Nominatim error ({}) from {}",
                response.status(),
                self.name
            ));
        }

        let place: NominatimPlace = match response.json().await {
            Ok(place) => place,
            Err(_) => return Ok(None),
        };

        Ok(Some(ReverseGeocodeResult {
            display_name: place.display_name,
            location_type: place.place_type.unwrap_or_else(|| "unknown".to_string()),
            coordinates: [lon, lat],
            address: place.address.unwrap_or_default(),
            geometry: place.geojson,
            provider: None,
        }))
    }
}
