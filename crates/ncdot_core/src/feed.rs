use crate::config::FeedConfig;
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Source of raw feed payloads. Payloads are handed back untouched so they can
/// be snapshotted before ingestion.
pub trait FeedClient {
    fn fetch_incidents(&self) -> Result<Value>;
    fn fetch_cameras(&self) -> Result<Value>;
}

pub struct HttpFeed {
    agent: ureq::Agent,
    incidents_url: String,
    cameras_url: String,
}

impl HttpFeed {
    pub fn new(config: &FeedConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self {
            agent,
            incidents_url: config.incidents_url.clone(),
            cameras_url: config.cameras_url.clone(),
        }
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        debug!(url, "Fetching feed");
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("Request to {url} failed"))?;
        let payload: Value = response
            .into_json()
            .with_context(|| format!("Response from {url} is not JSON"))?;
        Ok(payload)
    }
}

impl FeedClient for HttpFeed {
    fn fetch_incidents(&self) -> Result<Value> {
        self.get_json(&self.incidents_url)
    }

    fn fetch_cameras(&self) -> Result<Value> {
        self.get_json(&self.cameras_url)
    }
}

/// Reads payloads saved to disk. A missing camera file yields an empty list.
pub struct FileFeed {
    pub incidents: PathBuf,
    pub cameras: Option<PathBuf>,
}

impl FeedClient for FileFeed {
    fn fetch_incidents(&self) -> Result<Value> {
        read_json(&self.incidents)
    }

    fn fetch_cameras(&self) -> Result<Value> {
        match &self.cameras {
            Some(path) => read_json(path),
            None => Ok(Value::Array(Vec::new())),
        }
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not JSON", path.display()))
}

/// Flattens a payload into flat records: a plain array passes through, a
/// GeoJSON FeatureCollection yields each feature's properties with
/// `longitude`/`latitude` filled from a point geometry.
pub fn records_from_payload(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(records) => Ok(records),
        Value::Object(mut object) => {
            let Some(Value::Array(features)) = object.remove("features") else {
                bail!("Feed payload is an object without a features array");
            };
            Ok(features.into_iter().filter_map(flatten_feature).collect())
        }
        other => Err(anyhow!("Unexpected feed payload: {}", kind_of(&other))),
    }
}

fn flatten_feature(feature: Value) -> Option<Value> {
    let Value::Object(mut feature) = feature else {
        return None;
    };
    let mut record = match feature.remove("properties") {
        Some(Value::Object(properties)) => properties,
        _ => Map::new(),
    };
    if !record.contains_key("id") {
        if let Some(id) = feature.remove("id") {
            record.insert("id".to_string(), id);
        }
    }
    let coordinates = feature
        .get("geometry")
        .and_then(|geometry| geometry.get("coordinates"))
        .and_then(Value::as_array);
    if let Some([lon, lat, ..]) = coordinates.map(Vec::as_slice) {
        record.entry("longitude").or_insert_with(|| lon.clone());
        record.entry("latitude").or_insert_with(|| lat.clone());
    }
    Some(Value::Object(record))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_pass_through() {
        let records = records_from_payload(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn feature_collections_are_flattened() {
        let payload = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "id": 77,
                    "geometry": {"type": "Point", "coordinates": [-78.6, 35.7]},
                    "properties": {"status": "ON", "imageURL": "https://example.test/77.jpg"}
                }
            ]
        });
        let records = records_from_payload(payload).unwrap();
        assert_eq!(records[0]["id"], json!(77));
        assert_eq!(records[0]["longitude"], json!(-78.6));
        assert_eq!(records[0]["latitude"], json!(35.7));
        assert_eq!(records[0]["status"], json!("ON"));
    }

    #[test]
    fn other_payloads_are_errors() {
        assert!(records_from_payload(json!("offline")).is_err());
        assert!(records_from_payload(json!({"error": "down"})).is_err());
    }

    #[test]
    fn file_feed_reads_saved_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.json");
        fs::write(&path, r#"[{"id": 5}]"#).unwrap();
        let feed = FileFeed {
            incidents: path,
            cameras: None,
        };
        assert_eq!(feed.fetch_incidents().unwrap(), json!([{"id": 5}]));
        assert_eq!(feed.fetch_cameras().unwrap(), json!([]));
    }
}
