use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{GeocodeResult, GeocodingProvider, ReverseGeocodeResult};

const MAPBOX_API_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";

pub struct MapboxGeocoder {
    http: reqwest::Client,
    access_token: String,
}

#[derive(Deserialize)]
struct MapboxResponse {
    #[serde(default)]
    features: Vec<MapboxFeature>,
}

#[derive(Deserialize)]
struct MapboxFeature {
    center: Vec<f64>,
    #[serde(default)]
    place_type: Vec<String>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    place_name: String,
    #[serde(default)]
    geometry: Option<serde_json::Value>,
}

impl MapboxGeocoder {
    pub fn new(access_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.to_string(),
        }
    }

    async fn query(&self, query: &str, language: Option<&str>) -> Result<Option<MapboxFeature>> {
        let mut url = format!(
            "{}/{}.json?access_token={}&limit=1",
            MAPBOX_API_URL,
            urlencoding::encode(query),
            self.access_token
        );
        if let Some(lang) = language {
            url.push_str(&format!("&language={lang}"));
        }

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("Mapbox error ({})", response.status()));
        }
        let parsed: MapboxResponse = response.json().await?;
        Ok(parsed.features.into_iter().next())
    }

    fn to_result(feature: MapboxFeature) -> Option<GeocodeResult> {
        if feature.center.len() != 2 {
            return None;
        }
        // Mapbox bbox is [min_lon, min_lat, max_lon, max_lat].
        let bbox = match feature.bbox {
            Some(b) if b.len() == 4 => [b[1], b[3], b[0], b[2]],
            _ => [0.0, 0.0, 0.0, 0.0],
        };
        let area = ((bbox[1] - bbox[0]) * (bbox[3] - bbox[2])).abs();
        Some(GeocodeResult {
            coordinates: [feature.center[0], feature.center[1]],
            location_type: feature
                .place_type
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            bbox,
            area,
            display_name: feature.place_name,
            geometry: feature.geometry,
            provider: None,
        })
    }
}

#[async_trait]
impl GeocodingProvider for MapboxGeocoder {
    fn name(&self) -> &str {
        "mapbox"
    }

    async fn geocode(
        &self,
        location: &str,
        language: Option<&str>,
    ) -> Result<Option<GeocodeResult>> {
        debug!(provider = "mapbox", location, "geocoding");
        Ok(self
            .query(location, language)
            .await?
            .and_then(Self::to_result))
    }

    async fn reverse_geocode(
        &self,
        lat: f64,
        lon: f64,
        language: Option<&str>,
    ) -> Result<Option<ReverseGeocodeResult>> {
        debug!(provider = "mapbox", lat, lon, "reverse geocoding");
        let feature = self.query(&format!("{lon},{lat}"), language).await?;
        Ok(feature.map(|f| ReverseGeocodeResult {
            display_name: f.place_name,
            location_type: f
                .place_type
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            coordinates: [lon, lat],
            address: Default::default(),
            geometry: f.geometry,
            provider: None,
        }))
    }
}
