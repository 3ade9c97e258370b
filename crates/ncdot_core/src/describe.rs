//! Display text for a single report: the detail card, its links and the
//! short description editors paste into closures.

use crate::ingest::TRUCK_CLOSURE;
use crate::schema::ReportEntity;
use crate::settings::Settings;
use crate::timestamp::Stamp;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

pub const DETAILS_URL: &str = "https://drivenc.gov/?type=incident&id=";
pub const ADMIN_URL: &str = "https://tims.ncdot.gov/tims/V2/Incident/Details/";

pub const TRUCK_CLOSURE_BANNER: &str =
    "Truck Closures should not be added to the map! If added by a feed, please delete the closure.";

const CARD_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short] [month]/[day]/[year] [hour]:[minute]");
const TABLE_TIME: &[BorrowedFormatItem<'static>] = format_description!(
    "[month padding:none]/[day padding:none]/[year repr:last_two] [hour]:[minute]"
);

pub fn format_card_time(stamp: Option<&Stamp>) -> String {
    format_with(stamp, CARD_TIME)
}

pub fn format_table_time(stamp: Option<&Stamp>) -> String {
    format_with(stamp, TABLE_TIME)
}

// Times are shown in the offset the feed reported them in.
fn format_with(stamp: Option<&Stamp>, format: &[BorrowedFormatItem<'_>]) -> String {
    match stamp {
        Some(stamp) => stamp
            .at
            .format(format)
            .unwrap_or_else(|_| stamp.text.clone()),
        None => String::new(),
    }
}

pub fn details_url(id: &str, secure_site: bool) -> String {
    if secure_site {
        format!("{ADMIN_URL}{id}")
    } else {
        format!("{DETAILS_URL}{id}")
    }
}

/// `"<type> - DriveNC.gov <id>"`, with the generic "Other" type replaced by
/// the condition.
pub fn rtc_description(report: &ReportEntity) -> String {
    let attrs = &report.attributes;
    let incident_type = attrs
        .incident_type
        .as_deref()
        .unwrap_or_default()
        .replace("Night Time", "Nighttime")
        .replace("Other", &attrs.condition);
    format!("{incident_type} - DriveNC.gov {}", report.id)
}

pub fn expand_direction(code: &str) -> &str {
    match code {
        "W" => "West",
        "E" => "East",
        "N" => "North",
        "S" => "South",
        "A" => "Both",
        "I" => "Inner Loop",
        "O" => "Outer Loop",
        other => other,
    }
}

/// Newline-separated ids of the working list.
pub fn incident_ids(reports: &[ReportEntity]) -> String {
    reports
        .iter()
        .map(|report| report.id.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct DetailCard {
    pub title: String,
    pub banner: Option<&'static str>,
    pub fields: Vec<(&'static str, String)>,
    pub rtc_description: String,
    pub url: String,
    pub archived: bool,
}

pub fn detail_card(report: &ReportEntity, settings: &Settings) -> DetailCard {
    let attrs = &report.attributes;
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    let mut fields = vec![
        ("Road", attrs.road_full_name.clone()),
        (
            "City",
            format!("{}  ({} County)", text(&attrs.city), text(&attrs.county_name)),
        ),
        ("Location", text(&attrs.location)),
        ("Reason", text(&attrs.reason)),
    ];
    if let Some(direction) = attrs.direction.as_deref().filter(|d| !d.is_empty()) {
        fields.push(("Direction", expand_direction(direction).to_string()));
    }
    fields.push(("Start Time", format_card_time(attrs.start.as_ref())));
    fields.push(("End Time", format_card_time(attrs.end.as_ref())));
    if let Some(closure_time) = attrs.construction_date_time.as_deref().filter(|t| !t.is_empty()) {
        fields.push(("Closure Date/Time", closure_time.to_string()));
    }
    fields.push(("Last Updated", format_card_time(Some(&attrs.last_update))));
    if attrs.event_id.is_some_and(|event_id| event_id > 1) {
        fields.push(("NCDOT Event", text(&attrs.event)));
    }

    DetailCard {
        title: format!("{} - {}", report.id, attrs.condition),
        banner: (attrs.incident_type.as_deref() == Some(TRUCK_CLOSURE)).then_some(TRUCK_CLOSURE_BANNER),
        fields,
        rtc_description: rtc_description(report),
        url: details_url(&report.id, settings.secure_site),
        archived: report.archived,
    }
}
