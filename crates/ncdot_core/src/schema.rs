use crate::timestamp::Stamp;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawIncident {
    pub id: Option<Value>,           // number or string, normalized during ingestion
    pub road: Option<String>,        // e.g. "I-40", "SR-1100"
    pub common_name: Option<String>, // local alias, e.g. "Main St"
    pub condition: Option<String>,
    pub incident_type: Option<String>,
    pub city: Option<String>,
    pub county_name: Option<String>,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub direction: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub last_update: Option<String>,
    pub polyline: Option<String>, // JSON-encoded geometry, passed through untouched
    pub event: Option<String>,
    pub event_id: Option<i64>,
    pub construction_date_time: Option<String>,
    pub created_from_concurrent: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawCamera {
    pub id: Option<Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: Option<String>, // "ON" / "OFF"
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Closure,
    Excluded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentAttributes {
    pub road: String,
    pub common_name: Option<String>,
    pub road_full_name: String,
    pub condition: String,
    pub incident_type: Option<String>,
    pub city: Option<String>,
    pub county_name: Option<String>,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub direction: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub start: Option<Stamp>,
    pub end: Option<Stamp>,
    pub last_update: Stamp,
    pub polyline: Option<String>,
    pub event: Option<String>,
    pub event_id: Option<i64>,
    pub construction_date_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntity {
    pub id: String,
    pub attributes: IncidentAttributes,
    pub archived: bool,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraEntity {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub image_url: Option<String>,
    pub display_name: Option<String>,
    pub active: bool,
}

/// Normalizes a feed identifier. Numbers and non-blank strings are accepted.
pub fn feed_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feed_id_accepts_numbers_and_strings() {
        assert_eq!(feed_id(Some(&json!(712345))), Some("712345".to_string()));
        assert_eq!(feed_id(Some(&json!(" 42 "))), Some("42".to_string()));
        assert_eq!(feed_id(Some(&json!(""))), None);
        assert_eq!(feed_id(Some(&json!(null))), None);
        assert_eq!(feed_id(None), None);
    }

    #[test]
    fn raw_incident_reads_camel_case_fields() {
        let raw: RawIncident = serde_json::from_value(json!({
            "id": 7,
            "road": "SR-1100",
            "commonName": "Main St",
            "incidentType": "Other",
            "countyName": "Wake",
            "lastUpdate": "2024-01-01T10:00",
            "createdFromConcurrent": false,
            "somethingElse": [1, 2, 3]
        }))
        .unwrap();
        assert_eq!(raw.common_name.as_deref(), Some("Main St"));
        assert_eq!(raw.county_name.as_deref(), Some("Wake"));
        assert_eq!(raw.created_from_concurrent, Some(false));
    }

    #[test]
    fn raw_camera_reads_image_url() {
        let raw: RawCamera = serde_json::from_value(json!({
            "id": "C1",
            "imageURL": "https://example.test/cam.jpg",
            "displayName": "I-40 at Exit 289"
        }))
        .unwrap();
        assert_eq!(raw.image_url.as_deref(), Some("https://example.test/cam.jpg"));
    }
}
