use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ncdot_core::config::AppConfig;
use ncdot_core::db::{self, Connection, LocalStorage, CAMERAS_FEED, INCIDENTS_FEED};
use ncdot_core::describe::{detail_card, format_table_time, incident_ids};
use ncdot_core::feed::{FeedClient, FileFeed, HttpFeed};
use ncdot_core::settings::{DirStore, KeyValueStore, SettingKey, SettingsStore};
use ncdot_core::sort::{Column, TableSort};
use ncdot_core::store::{FeedBatch, RefreshStatus, ReportStore};
use schemars::schema_for;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ncdot")]
#[command(about = "NCDOT road closure and camera reports", long_about = None)]
struct Cli {
    /// Config file (default: ./ncdot.toml; missing file means defaults)
    #[arg(long, global = true, default_value = "ncdot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch both feeds, store them, and print the closures table
    Refresh {
        /// Read incidents from a saved JSON payload instead of the network
        #[arg(long)]
        incidents_file: Option<PathBuf>,
        /// Read cameras from a saved JSON payload (only with --incidents-file)
        #[arg(long, requires = "incidents_file")]
        cameras_file: Option<PathBuf>,
        #[command(flatten)]
        table: TableArgs,
    },
    /// Print the closures table from the last stored fetch
    List {
        #[command(flatten)]
        table: TableArgs,
    },
    /// Show the detail card of one report
    Show { id: String },
    /// Archive reports until they change upstream
    Archive {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove reports from the archive
    Unarchive {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Archive (or unarchive) every report in the working list
    ArchiveAll {
        #[arg(long)]
        unarchive: bool,
    },
    /// Print the ids of the working list, one per line
    Ids,
    /// List active cameras
    Cameras,
    /// Inspect or change persisted settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Write a markdown digest of the visible closures and cameras
    Digest {
        /// Output directory (default: ./digest)
        #[arg(long, default_value = "digest")]
        out_dir: PathBuf,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(clap::Args)]
struct TableArgs {
    /// Include reports hidden by the current filters
    #[arg(long)]
    all: bool,
    /// Column clicks to apply in order; repeat a column to reverse it
    #[arg(long = "sort-by", value_enum)]
    sort_by: Vec<ColumnArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ColumnArg {
    Archive,
    Road,
    Desc,
    Start,
    End,
    Updated,
}

impl From<ColumnArg> for Column {
    fn from(value: ColumnArg) -> Self {
        match value {
            ColumnArg::Archive => Column::Archive,
            ColumnArg::Road => Column::Road,
            ColumnArg::Desc => Column::Desc,
            ColumnArg::Start => Column::Start,
            ColumnArg::End => Column::End,
            ColumnArg::Updated => Column::Updated,
        }
    }
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the merged settings as JSON
    Show,
    /// Turn a flag on or off (e.g. hide-interstates, secure-site)
    Set { key: SettingKey, value: bool },
    /// Staleness threshold for hide-x-days; "none" clears it
    XDays { days: String },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for feed records and settings
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Refresh {
            incidents_file,
            cameras_file,
            table,
        } => {
            let camera_source = incidents_file.is_none() || cameras_file.is_some();
            let client: Box<dyn FeedClient> = match incidents_file {
                Some(incidents) => Box::new(FileFeed {
                    incidents,
                    cameras: cameras_file,
                }),
                None => Box::new(HttpFeed::new(&config.feeds)),
            };
            refresh(&config, client.as_ref(), camera_source, &table)
        }
        Commands::List { table } => {
            let mut store = open_store(&config)?;
            print_table(&mut store, &table);
            Ok(())
        }
        Commands::Show { id } => show(&config, &id),
        Commands::Archive { ids } => set_archived(&config, &ids, true),
        Commands::Unarchive { ids } => set_archived(&config, &ids, false),
        Commands::ArchiveAll { unarchive } => {
            let mut store = open_store(&config)?;
            store.archive_all(!unarchive)?;
            let verb = if unarchive { "Unarchived" } else { "Archived" };
            println!("{verb} {} reports", store.reports().len());
            Ok(())
        }
        Commands::Ids => {
            let store = open_store(&config)?;
            println!("{}", incident_ids(store.reports()));
            Ok(())
        }
        Commands::Cameras => cameras(&config),
        Commands::Settings { command } => settings(&config, command),
        Commands::Digest { out_dir } => {
            let store = open_store(&config)?;
            let written = ncdot_digest::build_digest(&store, &out_dir, OffsetDateTime::now_utc())?;
            println!("Wrote {written} closure notes to {}", out_dir.display());
            Ok(())
        }
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn open_db(config: &AppConfig) -> Result<Rc<Connection>> {
    let path = config.storage.db_path.to_string_lossy();
    debug!(path = %path, "Opening database");
    let conn = db::open(&path).with_context(|| format!("Failed to open database {path}"))?;
    Ok(Rc::new(conn))
}

fn load_settings(config: &AppConfig, conn: &Rc<Connection>) -> Result<SettingsStore> {
    let local = LocalStorage::new(Rc::clone(conn));
    let remote = config
        .storage
        .remote_dir
        .as_ref()
        .map(|dir| Box::new(DirStore::new(dir)) as Box<dyn KeyValueStore>);
    SettingsStore::load(&config.storage.store_name, Box::new(local), remote)
}

fn stored_cameras(conn: &Connection) -> Result<Value> {
    Ok(db::load_snapshot(conn, CAMERAS_FEED)?
        .map(|snapshot| snapshot.payload)
        .unwrap_or_else(|| Value::Array(Vec::new())))
}

/// Builds the session store from the last stored payloads.
fn open_store(config: &AppConfig) -> Result<ReportStore> {
    let conn = open_db(config)?;
    let settings = load_settings(config, &conn)?;
    let mut store = ReportStore::new(settings, TableSort::new(config.table.sort_order()?));

    let Some(incidents) = db::load_snapshot(&conn, INCIDENTS_FEED)? else {
        bail!("No stored reports yet; run `ncdot refresh` first");
    };
    let cameras = stored_cameras(&conn)?;

    let ticket = store.begin_refresh();
    store.complete_refresh(
        ticket,
        Ok(FeedBatch {
            incidents: incidents.payload,
            cameras: Ok(cameras),
        }),
    )?;
    Ok(store)
}

/// Snapshots are written only once the store accepted the payloads, so a bad
/// response never replaces the last good one. Without a camera source the
/// stored cameras are reused and left untouched.
fn refresh(
    config: &AppConfig,
    client: &dyn FeedClient,
    camera_source: bool,
    table: &TableArgs,
) -> Result<()> {
    let conn = open_db(config)?;
    let settings = load_settings(config, &conn)?;
    let mut store = ReportStore::new(settings, TableSort::new(config.table.sort_order()?));

    let ticket = store.begin_refresh();
    let mut batch = FeedBatch::fetch(client);
    if let Ok(batch) = &mut batch {
        if !camera_source {
            batch.cameras = Ok(stored_cameras(&conn)?);
        }
    }
    let fetched = batch
        .as_ref()
        .ok()
        .map(|batch| (batch.incidents.clone(), batch.cameras.as_ref().ok().cloned()));

    let status = store.complete_refresh(ticket, batch)?;
    if let (RefreshStatus::Applied { evicted, .. }, Some((incidents, cameras))) = (status, fetched) {
        let fetched_at = OffsetDateTime::now_utc().format(&Rfc3339)?;
        db::save_snapshot(&conn, INCIDENTS_FEED, &fetched_at, &incidents)?;
        match cameras {
            Some(cameras) if camera_source && store.last_error().is_none() => {
                db::save_snapshot(&conn, CAMERAS_FEED, &fetched_at, &cameras)?;
            }
            _ => {}
        }
        if evicted > 0 {
            eprintln!("{evicted} archived reports changed upstream and were unarchived");
        }
    }
    if let Some(err) = store.last_error() {
        eprintln!("warning: {err}");
    }
    print_table(&mut store, table);
    Ok(())
}

fn print_table(store: &mut ReportStore, table: &TableArgs) {
    for column in &table.sort_by {
        store.click_column((*column).into());
    }
    let now = OffsetDateTime::now_utc();
    let show_city = store.settings().show_city_county_check;

    println!(
        "{:<3} {:<10} {:<24} {:<28} {:<14} {:<14} {:<14}",
        "A", "ID", "Road", "Desc", "Start", "End", "Updated"
    );
    for report in store.reports() {
        if !table.all && !store.is_visible(report, now) {
            continue;
        }
        let attrs = &report.attributes;
        let desc = if show_city {
            format!(
                "{} ({}) {}",
                attrs.city.as_deref().unwrap_or_default(),
                attrs.county_name.as_deref().unwrap_or_default(),
                attrs.condition
            )
        } else {
            attrs.condition.clone()
        };
        println!(
            "{:<3} {:<10} {:<24} {:<28} {:<14} {:<14} {:<14}",
            if report.archived { "x" } else { "" },
            report.id,
            attrs.road,
            desc,
            format_table_time(attrs.start.as_ref()),
            format_table_time(attrs.end.as_ref()),
            format_table_time(Some(&attrs.last_update)),
        );
    }
    println!("{}", store.summary(now));
}

fn show(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    let Some(report) = store.find(id) else {
        bail!("No report with id {id}");
    };
    let card = detail_card(report, store.settings());
    println!("{}", card.title);
    if let Some(banner) = card.banner {
        println!("!! {banner}");
    }
    for (label, value) in &card.fields {
        println!("{label:>18}: {value}");
    }
    println!("{:>18}: {}", "RTC Description", card.rtc_description);
    println!("{:>18}: {}", "Link", card.url);
    if card.archived {
        println!("{:>18}: yes", "Archived");
    }
    Ok(())
}

fn set_archived(config: &AppConfig, ids: &[String], archive: bool) -> Result<()> {
    let mut store = open_store(config)?;
    for id in ids {
        store.set_archived(id, archive)?;
    }
    let verb = if archive { "Archived" } else { "Unarchived" };
    println!("{verb} {}", ids.join(", "));
    Ok(())
}

fn cameras(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    for camera in store.visible_cameras() {
        println!(
            "{:<8} {:<40} {:>10.5} {:>11.5} {}",
            camera.id,
            camera.display_name.as_deref().unwrap_or_default(),
            camera.latitude,
            camera.longitude,
            camera.image_url.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

fn settings(config: &AppConfig, command: SettingsCommands) -> Result<()> {
    let conn = open_db(config)?;
    let mut settings = load_settings(config, &conn)?;
    match command {
        SettingsCommands::Show => {}
        SettingsCommands::Set { key, value } => settings.set_flag(key, value)?,
        SettingsCommands::XDays { days } => {
            let days = match days.trim() {
                "none" | "" => None,
                value => Some(
                    value
                        .parse::<u32>()
                        .with_context(|| format!("Invalid day count: {value}"))?,
                ),
            };
            settings.set_x_days(days)?;
        }
    }
    println!("{}", serde_json::to_string_pretty(settings.get())?);
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    // Export RawIncident schema
    let incident_schema = schema_for!(ncdot_core::schema::RawIncident);
    let incident_json = serde_json::to_string_pretty(&incident_schema)?;
    fs::write(out_dir.join("RawIncident.schema.json"), incident_json)?;

    // Export RawCamera schema
    let camera_schema = schema_for!(ncdot_core::schema::RawCamera);
    let camera_json = serde_json::to_string_pretty(&camera_schema)?;
    fs::write(out_dir.join("RawCamera.schema.json"), camera_json)?;

    // Export Settings schema
    let settings_schema = schema_for!(ncdot_core::settings::Settings);
    let settings_json = serde_json::to_string_pretty(&settings_schema)?;
    fs::write(out_dir.join("Settings.schema.json"), settings_json)?;

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn table() -> TableArgs {
        TableArgs {
            all: true,
            sort_by: Vec::new(),
        }
    }

    fn config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.db_path = dir.join("ncdot.db");
        config
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn bad_payload_keeps_the_last_good_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let good = write(
            dir.path(),
            "good.json",
            r#"[{"id": 1, "road": "NC-50", "condition": "Road Closed",
                 "latitude": 35.0, "longitude": -78.0, "lastUpdate": "2024-01-01T10:00"}]"#,
        );
        let cameras = write(
            dir.path(),
            "cameras.json",
            r#"[{"id": 9, "latitude": 35.0, "longitude": -78.0, "status": "ON"}]"#,
        );
        let bad = write(dir.path(), "bad.json", r#"{"error": "maintenance"}"#);

        let feed = FileFeed {
            incidents: good.clone(),
            cameras: Some(cameras),
        };
        refresh(&config, &feed, true, &table()).unwrap();

        let feed = FileFeed {
            incidents: bad,
            cameras: None,
        };
        assert!(refresh(&config, &feed, false, &table()).is_err());

        let store = open_store(&config).unwrap();
        assert_eq!(store.reports().len(), 1);
        assert_eq!(store.cameras().len(), 1);
    }

    #[test]
    fn incidents_only_refresh_keeps_stored_cameras() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let incidents = write(dir.path(), "incidents.json", "[]");
        let cameras = write(
            dir.path(),
            "cameras.json",
            r#"[{"id": 9, "latitude": 35.0, "longitude": -78.0, "status": "ON"}]"#,
        );

        let feed = FileFeed {
            incidents: incidents.clone(),
            cameras: Some(cameras),
        };
        refresh(&config, &feed, true, &table()).unwrap();

        let feed = FileFeed {
            incidents,
            cameras: None,
        };
        refresh(&config, &feed, false, &table()).unwrap();

        let store = open_store(&config).unwrap();
        assert_eq!(store.cameras().len(), 1);
        assert_eq!(store.cameras()[0].id, "9");
    }
}
