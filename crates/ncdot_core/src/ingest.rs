use crate::schema::{
    feed_id, CameraEntity, Category, IncidentAttributes, RawCamera, RawIncident, ReportEntity,
};
use crate::settings::ArchiveSet;
use crate::timestamp::Stamp;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const TRUCK_CLOSURE: &str = "Truck Closure";

/// Conditions that count as a closure. Lane closures, congestion and cleared
/// entries are reported by the feed too but never make the working list.
pub const CLOSURE_CONDITIONS: [&str; 9] = [
    "Permanent Road Closure",
    "Ramp Closed",
    "Ferry Closed",
    "Local Traffic Only",
    "Rest Area Closed",
    "Road Closed",
    "Road Closed with Detour",
    "Road Impassable",
    TRUCK_CLOSURE,
];

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub reports: Vec<ReportEntity>,
    pub duplicates: usize,
    pub malformed: usize,
    pub excluded: usize,
    /// Archive entries dropped because the incident changed since archiving.
    pub evicted: Vec<String>,
}

/// Turns one feed payload into the working list.
///
/// The first record carrying an id wins, even if it is then dropped as
/// malformed or excluded. Archive entries whose snapshot no longer matches
/// the incident are removed from `archive`.
pub fn ingest(records: &[Value], archive: &mut ArchiveSet) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for record in records {
        let Some(id) = feed_id(record.get("id")) else {
            warn!("Skipping incident without an id");
            outcome.malformed += 1;
            continue;
        };
        if !seen.insert(id.clone()) {
            outcome.duplicates += 1;
            continue;
        }

        let raw = match RawIncident::deserialize(record) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%id, error = %err, "Skipping malformed incident");
                outcome.malformed += 1;
                continue;
            }
        };

        let category = classify(
            raw.condition.as_deref(),
            raw.incident_type.as_deref(),
            raw.created_from_concurrent,
        );
        if category == Category::Excluded {
            outcome.excluded += 1;
            continue;
        }

        let attributes = match build_attributes(raw) {
            Ok(attributes) => attributes,
            Err(err) => {
                warn!(%id, error = %err, "Skipping malformed incident");
                outcome.malformed += 1;
                continue;
            }
        };

        let archived = match resolve_archive(&id, &attributes.last_update, archive) {
            ArchiveState::Archived => true,
            ArchiveState::Evicted => {
                debug!(%id, "Archived incident changed upstream, unarchiving");
                outcome.evicted.push(id.clone());
                false
            }
            ArchiveState::Active => false,
        };

        outcome.reports.push(ReportEntity {
            id,
            attributes,
            archived,
            category,
        });
    }

    outcome.evicted.sort();
    debug!(
        kept = outcome.reports.len(),
        duplicates = outcome.duplicates,
        malformed = outcome.malformed,
        excluded = outcome.excluded,
        evicted = outcome.evicted.len(),
        "Incidents ingested"
    );
    outcome
}

/// A record is a closure when its effective condition is on the allow-list
/// and it was not merged in from a concurrent incident.
pub fn classify(
    condition: Option<&str>,
    incident_type: Option<&str>,
    created_from_concurrent: Option<bool>,
) -> Category {
    if created_from_concurrent == Some(true) {
        return Category::Excluded;
    }
    let effective = match incident_type {
        Some(TRUCK_CLOSURE) => Some(TRUCK_CLOSURE),
        _ => condition,
    };
    match effective {
        Some(condition) if CLOSURE_CONDITIONS.contains(&condition) => Category::Closure,
        _ => Category::Excluded,
    }
}

/// State routes read better by their local name; numbered highways by their
/// number.
pub fn road_full_name(road: &str, common_name: Option<&str>) -> String {
    let road = road.trim();
    let common = common_name.map(str::trim).filter(|name| !name.is_empty());
    if road.starts_with("SR-") {
        match common {
            Some(name) if name != road => format!("{name} ({road})"),
            Some(name) => name.to_string(),
            None => road.to_string(),
        }
    } else {
        match common {
            Some(name) if name != road => format!("{road} ({name})"),
            _ => road.to_string(),
        }
    }
}

fn build_attributes(raw: RawIncident) -> Result<IncidentAttributes> {
    let latitude = raw.latitude.ok_or_else(|| anyhow!("missing latitude"))?;
    let longitude = raw.longitude.ok_or_else(|| anyhow!("missing longitude"))?;
    let last_update = Stamp::parse_optional(raw.last_update.as_deref())?
        .ok_or_else(|| anyhow!("missing lastUpdate"))?;
    let start = Stamp::parse_optional(raw.start.as_deref())?;
    let end = Stamp::parse_optional(raw.end.as_deref())?;

    let road = raw.road.unwrap_or_default();
    let road_full_name = road_full_name(&road, raw.common_name.as_deref());
    let condition = match raw.incident_type.as_deref() {
        Some(TRUCK_CLOSURE) if raw.condition.is_none() => TRUCK_CLOSURE.to_string(),
        _ => raw.condition.unwrap_or_default(),
    };

    Ok(IncidentAttributes {
        road,
        common_name: raw.common_name,
        road_full_name,
        condition,
        incident_type: raw.incident_type,
        city: raw.city,
        county_name: raw.county_name,
        location: raw.location,
        reason: raw.reason,
        direction: raw.direction,
        latitude,
        longitude,
        start,
        end,
        last_update,
        polyline: raw.polyline,
        event: raw.event,
        event_id: raw.event_id,
        construction_date_time: raw.construction_date_time,
    })
}

enum ArchiveState {
    Active,
    Archived,
    Evicted,
}

fn resolve_archive(id: &str, last_update: &Stamp, archive: &mut ArchiveSet) -> ArchiveState {
    match archive.get(id) {
        Some(entry) if entry.last_updated == last_update.text => ArchiveState::Archived,
        Some(_) => {
            archive.remove(id);
            ArchiveState::Evicted
        }
        None => ArchiveState::Active,
    }
}

/// Cameras carry no archive state and no classification; duplicates and
/// records without an id or coordinates are dropped.
pub fn ingest_cameras(records: &[Value]) -> Vec<CameraEntity> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut cameras = Vec::new();
    for record in records {
        let Some(id) = feed_id(record.get("id")) else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let raw = match RawCamera::deserialize(record) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%id, error = %err, "Skipping malformed camera");
                continue;
            }
        };
        let (Some(latitude), Some(longitude)) = (raw.latitude, raw.longitude) else {
            warn!(%id, "Skipping camera without coordinates");
            continue;
        };
        cameras.push(CameraEntity {
            id,
            latitude,
            longitude,
            image_url: raw.image_url,
            display_name: raw.display_name,
            active: !raw
                .status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case("OFF")),
        });
    }
    debug!(count = cameras.len(), "Cameras ingested");
    cameras
}
