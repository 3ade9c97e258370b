use crate::feed::{records_from_payload, FeedClient};
use crate::filter::{is_visible, visible_summary};
use crate::ingest::{ingest, ingest_cameras};
use crate::schema::{CameraEntity, ReportEntity};
use crate::settings::{ArchiveEntry, ArchiveSet, Settings, SettingsStore};
use crate::sort::{Column, TableSort};
use anyhow::{anyhow, Result};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Handed out when a refresh starts; the completion must present it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStatus {
    Applied {
        reports: usize,
        cameras: usize,
        evicted: usize,
    },
    /// A newer refresh already landed; this result was dropped.
    Superseded,
}

/// Raw payloads from one fetch of both feeds. The camera feed is independent:
/// its failure travels with the batch instead of failing it.
#[derive(Debug)]
pub struct FeedBatch {
    pub incidents: Value,
    pub cameras: Result<Value>,
}

impl FeedBatch {
    pub fn fetch(client: &dyn FeedClient) -> Result<Self> {
        Ok(Self {
            incidents: client.fetch_incidents()?,
            cameras: client.fetch_cameras(),
        })
    }
}

/// Owns the working list, the camera list, the settings and the table sort
/// for one session. Presentation code only reads from it.
pub struct ReportStore {
    settings: SettingsStore,
    sort: TableSort,
    reports: Vec<ReportEntity>,
    cameras: Vec<CameraEntity>,
    issued: u64,
    applied: u64,
    last_error: Option<String>,
}

impl ReportStore {
    pub fn new(settings: SettingsStore, sort: TableSort) -> Self {
        Self {
            settings,
            sort,
            reports: Vec::new(),
            cameras: Vec::new(),
            issued: 0,
            applied: 0,
            last_error: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.settings.get()
    }

    pub fn settings_store_mut(&mut self) -> &mut SettingsStore {
        &mut self.settings
    }

    pub fn table_sort(&self) -> &TableSort {
        &self.sort
    }

    pub fn reports(&self) -> &[ReportEntity] {
        &self.reports
    }

    pub fn cameras(&self) -> &[CameraEntity] {
        &self.cameras
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        debug!(seq = self.issued, "Refresh started");
        RefreshTicket(self.issued)
    }

    /// Applies a finished fetch. Failures keep the previous lists; a result
    /// older than the last applied one is dropped.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<FeedBatch>,
    ) -> Result<RefreshStatus> {
        if ticket.0 <= self.applied {
            debug!(seq = ticket.0, applied = self.applied, "Dropping superseded refresh");
            return Ok(RefreshStatus::Superseded);
        }
        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                warn!(seq = ticket.0, error = %err, "Refresh failed, keeping previous reports");
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        let incidents = match records_from_payload(batch.incidents) {
            Ok(incidents) => incidents,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        let outcome = ingest(&incidents, self.settings.archive_set_mut());
        let mut reports = outcome.reports;
        self.sort.apply(&mut reports);

        self.reports = reports;
        self.applied = ticket.0;
        self.last_error = None;
        match batch.cameras.and_then(records_from_payload) {
            Ok(cameras) => self.cameras = ingest_cameras(&cameras),
            Err(err) => {
                warn!(seq = ticket.0, error = %err, "Camera refresh failed, keeping previous cameras");
                self.last_error = Some(format!("cameras: {err}"));
            }
        }

        if !outcome.evicted.is_empty() {
            self.settings.save()?;
        }
        info!(
            reports = self.reports.len(),
            cameras = self.cameras.len(),
            evicted = outcome.evicted.len(),
            "Reports refreshed"
        );
        Ok(RefreshStatus::Applied {
            reports: self.reports.len(),
            cameras: self.cameras.len(),
            evicted: outcome.evicted.len(),
        })
    }

    /// Fetches and applies in one step.
    pub fn refresh(&mut self, client: &dyn FeedClient) -> Result<RefreshStatus> {
        let ticket = self.begin_refresh();
        let result = FeedBatch::fetch(client);
        self.complete_refresh(ticket, result)
    }

    pub fn find(&self, id: &str) -> Option<&ReportEntity> {
        self.reports.iter().find(|report| report.id == id.trim())
    }

    pub fn is_visible(&self, report: &ReportEntity, now: OffsetDateTime) -> bool {
        is_visible(report, self.settings.get(), now)
    }

    /// Reports to show, in table order. Empty while the reports layer is off.
    pub fn visible_reports(&self, now: OffsetDateTime) -> impl Iterator<Item = &ReportEntity> + '_ {
        let layer_on = self.settings.get().ncdot_layer_visible;
        self.reports
            .iter()
            .filter(move |report| layer_on && self.is_visible(report, now))
    }

    pub fn visible_cameras(&self) -> impl Iterator<Item = &CameraEntity> + '_ {
        let layer_on = self.settings.get().ncdot_camera_visible;
        self.cameras
            .iter()
            .filter(move |camera| layer_on && camera.active)
    }

    pub fn summary(&self, now: OffsetDateTime) -> String {
        visible_summary(self.visible_reports(now).count(), self.reports.len())
    }

    /// Archives or unarchives one report and persists the archive set.
    pub fn set_archived(&mut self, id: &str, archive: bool) -> Result<()> {
        let report = self
            .reports
            .iter_mut()
            .find(|report| report.id == id.trim())
            .ok_or_else(|| anyhow!("No report with id {id}"))?;
        mark_archived(report, archive, self.settings.archive_set_mut());
        self.settings.save()?;
        self.sort.apply(&mut self.reports);
        Ok(())
    }

    pub fn archive_all(&mut self, archive: bool) -> Result<()> {
        let archive_set = self.settings.archive_set_mut();
        for report in &mut self.reports {
            mark_archived(report, archive, archive_set);
        }
        self.settings.save()?;
        self.sort.apply(&mut self.reports);
        Ok(())
    }

    pub fn click_column(&mut self, column: Column) {
        let show_city = self.settings.get().show_city_county_check;
        self.sort.click(column, show_city);
        self.sort.apply(&mut self.reports);
    }
}

fn mark_archived(report: &mut ReportEntity, archive: bool, archive_set: &mut ArchiveSet) {
    report.archived = archive;
    if archive {
        archive_set.insert(
            report.id.clone(),
            ArchiveEntry {
                last_updated: report.attributes.last_update.text.clone(),
            },
        );
    } else {
        archive_set.remove(&report.id);
    }
}
