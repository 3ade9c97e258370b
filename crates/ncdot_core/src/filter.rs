use crate::schema::ReportEntity;
use crate::settings::Settings;
use time::{Duration, OffsetDateTime};

pub const WEATHER_EVENT: &str = "Weather Event";

/// A report is hidden as soon as one enabled hide toggle matches it.
pub fn is_visible(entity: &ReportEntity, settings: &Settings, now: OffsetDateTime) -> bool {
    !is_hidden(entity, settings, now)
}

fn is_hidden(entity: &ReportEntity, settings: &Settings, now: OffsetDateTime) -> bool {
    let attrs = &entity.attributes;
    let road = attrs.road.as_str();

    (settings.hide_archived_reports && entity.archived)
        || (settings.hide_all_but_weather_reports
            && attrs.incident_type.as_deref() != Some(WEATHER_EVENT))
        || (settings.hide_interstates_reports && road.starts_with("I-"))
        || (settings.hide_us_highways_reports && road.starts_with("US-"))
        || (settings.hide_nc_highways_reports && road.starts_with("NC-"))
        || (settings.hide_sr_highways_reports && road.starts_with("SR-"))
        || settings
            .stale_after_days()
            .and_then(|days| stale_cutoff(now, days))
            .is_some_and(|cutoff| attrs.last_update.at < cutoff)
}

// A window reaching past the earliest representable date marks nothing stale.
fn stale_cutoff(now: OffsetDateTime, days: u32) -> Option<OffsetDateTime> {
    now.checked_sub(Duration::days(i64::from(days)))
}

/// `"<visible> of <total> reports"`, as shown above the table.
pub fn visible_summary(visible: usize, total: usize) -> String {
    format!("{visible} of {total} reports")
}
