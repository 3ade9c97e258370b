use crate::timestamp::now_millis;
use anyhow::{anyhow, Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

pub const STORE_NAME: &str = "nc_dot_report_settings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub last_updated: String,
}

/// Archived report ids mapped to the `lastUpdate` text seen when archiving.
pub type ArchiveSet = BTreeMap<String, ArchiveEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub last_version: Option<String>,
    pub ncdot_layer_visible: bool,
    pub ncdot_camera_visible: bool,
    pub show_city_county_check: bool,
    pub hide_located: bool,
    pub hide_jump: bool,
    #[serde(rename = "copyPL")]
    pub copy_pl: bool,
    pub copy_description: bool,
    pub auto_open_closures: bool,
    pub hide_poly: bool,
    pub hide_archived_reports: bool,
    pub hide_all_but_weather_reports: bool,
    pub hide_interstates_reports: bool,
    #[serde(rename = "hideUSHighwaysReports")]
    pub hide_us_highways_reports: bool,
    #[serde(rename = "hideNCHighwaysReports")]
    pub hide_nc_highways_reports: bool,
    #[serde(rename = "hideSRHighwaysReports")]
    pub hide_sr_highways_reports: bool,
    pub hide_x_days_reports: bool,
    #[serde(deserialize_with = "lenient_days")]
    #[schemars(with = "Option<u32>")]
    pub hide_x_days_number: Option<u32>,
    pub secure_site: bool,
    #[serde(deserialize_with = "lenient_archive")]
    #[schemars(with = "ArchiveSet")]
    pub archived_reports: ArchiveSet,
    pub last_saved: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            last_version: None,
            ncdot_layer_visible: true,
            ncdot_camera_visible: true,
            show_city_county_check: false,
            hide_located: false,
            hide_jump: false,
            copy_pl: true,
            copy_description: true,
            auto_open_closures: false,
            hide_poly: false,
            hide_archived_reports: true,
            hide_all_but_weather_reports: false,
            hide_interstates_reports: false,
            hide_us_highways_reports: false,
            hide_nc_highways_reports: false,
            hide_sr_highways_reports: false,
            hide_x_days_reports: false,
            hide_x_days_number: Some(7),
            secure_site: false,
            archived_reports: ArchiveSet::new(),
            last_saved: 0,
        }
    }
}

// The widget stored whatever was typed, so the value shows up as a number,
// a numeric string or an empty string.
fn lenient_days<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

// Older saves can carry `null` (or junk) here; that means nothing is archived
// and must not cost the rest of the blob.
fn lenient_archive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ArchiveSet, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(ArchiveSet::new());
    }
    Ok(serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(error = %err, "Archived reports unreadable, starting empty");
        ArchiveSet::new()
    }))
}

impl Settings {
    /// Staleness threshold in days, only when the filter is on and the value
    /// is a positive integer.
    pub fn stale_after_days(&self) -> Option<u32> {
        if !self.hide_x_days_reports {
            return None;
        }
        self.hide_x_days_number.filter(|days| *days > 0)
    }

    pub fn flag(&self, key: SettingKey) -> bool {
        *self.flag_slot(key)
    }

    pub fn set_flag(&mut self, key: SettingKey, value: bool) {
        *self.flag_slot_mut(key) = value;
    }

    fn flag_slot(&self, key: SettingKey) -> &bool {
        match key {
            SettingKey::LayerVisible => &self.ncdot_layer_visible,
            SettingKey::CameraVisible => &self.ncdot_camera_visible,
            SettingKey::ShowCityCounty => &self.show_city_county_check,
            SettingKey::HideLocated => &self.hide_located,
            SettingKey::HideJump => &self.hide_jump,
            SettingKey::CopyPermalink => &self.copy_pl,
            SettingKey::CopyDescription => &self.copy_description,
            SettingKey::AutoOpenClosures => &self.auto_open_closures,
            SettingKey::HidePoly => &self.hide_poly,
            SettingKey::HideArchived => &self.hide_archived_reports,
            SettingKey::HideAllButWeather => &self.hide_all_but_weather_reports,
            SettingKey::HideInterstates => &self.hide_interstates_reports,
            SettingKey::HideUsHighways => &self.hide_us_highways_reports,
            SettingKey::HideNcHighways => &self.hide_nc_highways_reports,
            SettingKey::HideSrHighways => &self.hide_sr_highways_reports,
            SettingKey::HideXDays => &self.hide_x_days_reports,
            SettingKey::SecureSite => &self.secure_site,
        }
    }

    fn flag_slot_mut(&mut self, key: SettingKey) -> &mut bool {
        match key {
            SettingKey::LayerVisible => &mut self.ncdot_layer_visible,
            SettingKey::CameraVisible => &mut self.ncdot_camera_visible,
            SettingKey::ShowCityCounty => &mut self.show_city_county_check,
            SettingKey::HideLocated => &mut self.hide_located,
            SettingKey::HideJump => &mut self.hide_jump,
            SettingKey::CopyPermalink => &mut self.copy_pl,
            SettingKey::CopyDescription => &mut self.copy_description,
            SettingKey::AutoOpenClosures => &mut self.auto_open_closures,
            SettingKey::HidePoly => &mut self.hide_poly,
            SettingKey::HideArchived => &mut self.hide_archived_reports,
            SettingKey::HideAllButWeather => &mut self.hide_all_but_weather_reports,
            SettingKey::HideInterstates => &mut self.hide_interstates_reports,
            SettingKey::HideUsHighways => &mut self.hide_us_highways_reports,
            SettingKey::HideNcHighways => &mut self.hide_nc_highways_reports,
            SettingKey::HideSrHighways => &mut self.hide_sr_highways_reports,
            SettingKey::HideXDays => &mut self.hide_x_days_reports,
            SettingKey::SecureSite => &mut self.secure_site,
        }
    }

    /// Builds settings from a persisted blob; any field that is missing keeps
    /// its default.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Settings blob does not match the expected shape")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    LayerVisible,
    CameraVisible,
    ShowCityCounty,
    HideLocated,
    HideJump,
    CopyPermalink,
    CopyDescription,
    AutoOpenClosures,
    HidePoly,
    HideArchived,
    HideAllButWeather,
    HideInterstates,
    HideUsHighways,
    HideNcHighways,
    HideSrHighways,
    HideXDays,
    SecureSite,
}

impl SettingKey {
    pub const ALL: [SettingKey; 17] = [
        SettingKey::LayerVisible,
        SettingKey::CameraVisible,
        SettingKey::ShowCityCounty,
        SettingKey::HideLocated,
        SettingKey::HideJump,
        SettingKey::CopyPermalink,
        SettingKey::CopyDescription,
        SettingKey::AutoOpenClosures,
        SettingKey::HidePoly,
        SettingKey::HideArchived,
        SettingKey::HideAllButWeather,
        SettingKey::HideInterstates,
        SettingKey::HideUsHighways,
        SettingKey::HideNcHighways,
        SettingKey::HideSrHighways,
        SettingKey::HideXDays,
        SettingKey::SecureSite,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::LayerVisible => "layer-visible",
            SettingKey::CameraVisible => "camera-visible",
            SettingKey::ShowCityCounty => "show-city-county",
            SettingKey::HideLocated => "hide-located",
            SettingKey::HideJump => "hide-jump",
            SettingKey::CopyPermalink => "copy-permalink",
            SettingKey::CopyDescription => "copy-description",
            SettingKey::AutoOpenClosures => "auto-open-closures",
            SettingKey::HidePoly => "hide-poly",
            SettingKey::HideArchived => "hide-archived",
            SettingKey::HideAllButWeather => "hide-all-but-weather",
            SettingKey::HideInterstates => "hide-interstates",
            SettingKey::HideUsHighways => "hide-us-highways",
            SettingKey::HideNcHighways => "hide-nc-highways",
            SettingKey::HideSrHighways => "hide-sr-highways",
            SettingKey::HideXDays => "hide-x-days",
            SettingKey::SecureSite => "secure-site",
        }
    }
}

impl std::str::FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        SettingKey::ALL
            .into_iter()
            .find(|key| key.name() == value)
            .ok_or_else(|| anyhow!("Unknown setting: {value}"))
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named-blob store. The local database and the remote sync copy both
/// implement it.
pub trait KeyValueStore {
    fn load(&self, name: &str) -> Result<Option<String>>;
    fn save(&self, name: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn with_entry(name: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(entries.get(name).cloned())
    }

    fn save(&self, name: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        entries.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// One `<name>.json` file per key inside a (typically synced) directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }
}

impl KeyValueStore for DirStore {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(contents))
    }

    fn save(&self, name: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(name);
        fs::write(&path, value).with_context(|| format!("Failed to write {}", path.display()))
    }
}

pub struct SettingsStore {
    name: String,
    local: Box<dyn KeyValueStore>,
    remote: Option<Box<dyn KeyValueStore>>,
    data: Settings,
}

impl SettingsStore {
    /// Loads the local copy, lets a newer remote copy win field by field, and
    /// falls back to defaults when nothing usable is found.
    pub fn load(
        name: &str,
        local: Box<dyn KeyValueStore>,
        remote: Option<Box<dyn KeyValueStore>>,
    ) -> Result<Self> {
        let local_blob = parse_blob("local", local.load(name)?);
        let remote_blob = match &remote {
            Some(remote) => match remote.load(name) {
                Ok(text) => parse_blob("remote", text),
                Err(err) => {
                    warn!(error = %err, "Remote settings unavailable, using local copy");
                    None
                }
            },
            None => None,
        };

        let merged = merge_blobs(local_blob, remote_blob);
        let data = match merged {
            Some(value) => Settings::from_value(value).unwrap_or_else(|err| {
                warn!(error = %err, "Persisted settings unreadable, using defaults");
                Settings::default()
            }),
            None => Settings::default(),
        };
        debug!(archived = data.archived_reports.len(), "Settings loaded");

        Ok(Self {
            name: name.to_string(),
            local,
            remote,
            data,
        })
    }

    pub fn get(&self) -> &Settings {
        &self.data
    }

    /// Applies a mutation and persists the result.
    pub fn update<F>(&mut self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        mutate(&mut self.data);
        self.save()
    }

    pub fn set_flag(&mut self, key: SettingKey, value: bool) -> Result<()> {
        self.update(|settings| settings.set_flag(key, value))
    }

    pub fn set_x_days(&mut self, days: Option<u32>) -> Result<()> {
        self.update(|settings| settings.hide_x_days_number = days)
    }

    /// Mutable access for the ingestion pass, which evicts stale archive
    /// entries; the caller decides when to persist.
    pub fn archive_set_mut(&mut self) -> &mut ArchiveSet {
        &mut self.data.archived_reports
    }

    pub fn save(&mut self) -> Result<()> {
        self.data.last_saved = now_millis();
        let serialized = serde_json::to_string(&self.data)?;
        self.local
            .save(&self.name, &serialized)
            .context("Failed to persist settings locally")?;
        if let Some(remote) = &self.remote {
            if let Err(err) = remote.save(&self.name, &serialized) {
                warn!(error = %err, "Remote settings save failed");
            }
        }
        debug!("Settings saved");
        Ok(())
    }
}

fn parse_blob(origin: &str, text: Option<String>) -> Option<Value> {
    let text = text?;
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => {
            warn!(origin, "Settings blob is not an object, ignoring");
            None
        }
        Err(err) => {
            warn!(origin, error = %err, "Settings blob is not valid JSON, ignoring");
            None
        }
    }
}

fn last_saved(value: &Value) -> i64 {
    value.get("lastSaved").and_then(Value::as_i64).unwrap_or(0)
}

/// Shallow merge: when the remote copy was saved later, each of its top-level
/// fields replaces the local one.
pub fn merge_blobs(local: Option<Value>, remote: Option<Value>) -> Option<Value> {
    match (local, remote) {
        (Some(mut local), Some(remote)) if last_saved(&remote) > last_saved(&local) => {
            if let (Value::Object(fields), Value::Object(newer)) = (&mut local, remote) {
                fields.extend(newer);
            }
            Some(local)
        }
        (Some(local), _) => Some(local),
        (None, remote) => remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_first_run() {
        let settings = Settings::default();
        assert!(settings.hide_archived_reports);
        assert!(settings.copy_pl);
        assert_eq!(settings.hide_x_days_number, Some(7));
        assert!(settings.archived_reports.is_empty());
    }

    #[test]
    fn json_names_follow_the_persisted_blob() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        for key in [
            "copyPL",
            "hideUSHighwaysReports",
            "hideNCHighwaysReports",
            "hideSRHighwaysReports",
            "hideXDaysNumber",
            "archivedReports",
            "lastSaved",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn missing_fields_take_defaults_individually() {
        let settings = Settings::from_value(json!({"hideInterstatesReports": true})).unwrap();
        assert!(settings.hide_interstates_reports);
        assert!(settings.hide_archived_reports);
    }

    #[test]
    fn null_archive_keeps_the_other_fields() {
        let local = MemoryStore::with_entry(
            STORE_NAME,
            r#"{"lastSaved":5,"hideJump":true,"hideInterstatesReports":true,"archivedReports":null}"#,
        );
        let store = SettingsStore::load(STORE_NAME, Box::new(local), None).unwrap();
        assert!(store.get().hide_jump);
        assert!(store.get().hide_interstates_reports);
        assert!(store.get().archived_reports.is_empty());

        let junk = Settings::from_value(json!({"hideJump": true, "archivedReports": "oops"})).unwrap();
        assert!(junk.hide_jump);
        assert!(junk.archived_reports.is_empty());
    }

    #[test]
    fn x_days_accepts_strings_and_blanks() {
        let settings = Settings::from_value(json!({"hideXDaysNumber": "14"})).unwrap();
        assert_eq!(settings.hide_x_days_number, Some(14));
        let settings = Settings::from_value(json!({"hideXDaysNumber": ""})).unwrap();
        assert_eq!(settings.hide_x_days_number, None);
    }

    #[test]
    fn stale_threshold_requires_flag_and_positive_days() {
        let mut settings = Settings::default();
        assert_eq!(settings.stale_after_days(), None);
        settings.hide_x_days_reports = true;
        assert_eq!(settings.stale_after_days(), Some(7));
        settings.hide_x_days_number = Some(0);
        assert_eq!(settings.stale_after_days(), None);
    }

    #[test]
    fn newer_remote_wins_per_field() {
        let local = json!({"lastSaved": 10, "hideJump": true, "secureSite": true});
        let remote = json!({"lastSaved": 20, "secureSite": false});
        let merged = merge_blobs(Some(local), Some(remote)).unwrap();
        assert_eq!(merged["hideJump"], json!(true));
        assert_eq!(merged["secureSite"], json!(false));
        assert_eq!(merged["lastSaved"], json!(20));
    }

    #[test]
    fn older_remote_is_ignored() {
        let local = json!({"lastSaved": 30, "secureSite": true});
        let remote = json!({"lastSaved": 20, "secureSite": false});
        let merged = merge_blobs(Some(local), Some(remote)).unwrap();
        assert_eq!(merged["secureSite"], json!(true));
    }

    #[test]
    fn corrupt_local_falls_back_to_defaults() {
        let local = MemoryStore::with_entry(STORE_NAME, "{not json");
        let store = SettingsStore::load(STORE_NAME, Box::new(local), None).unwrap();
        assert_eq!(store.get(), &Settings::default());
    }

    #[test]
    fn remote_only_copy_is_used() {
        let remote = MemoryStore::with_entry(STORE_NAME, r#"{"lastSaved": 5, "hidePoly": true}"#);
        let store =
            SettingsStore::load(STORE_NAME, Box::new(MemoryStore::default()), Some(Box::new(remote)))
                .unwrap();
        assert!(store.get().hide_poly);
    }

    #[test]
    fn setting_keys_round_trip_through_names() {
        for key in SettingKey::ALL {
            assert_eq!(key.name().parse::<SettingKey>().unwrap(), key);
        }
        assert!("hide-everything".parse::<SettingKey>().is_err());
    }

    #[test]
    fn set_flag_persists_and_stamps_last_saved() {
        let mut store =
            SettingsStore::load(STORE_NAME, Box::new(MemoryStore::default()), None).unwrap();
        store.set_flag(SettingKey::HideInterstates, true).unwrap();
        assert!(store.get().hide_interstates_reports);
        assert!(store.get().last_saved > 0);
    }
}
