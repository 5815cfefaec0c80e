use crate::config::ConfigStore;
use crate::history::{RecordFilter, RenameHistory, RenameRecord};
use crate::rename::RenameListener;
use anyhow::{Context, Result};
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

const COLUMNS: [&str; 5] = ["#", "Time", "Route", "Original name", "New name"];

/// In-memory list of renames shown by the report surface.
#[derive(Debug, Clone, Default)]
pub struct ReportLog {
    rows: Arc<Mutex<Vec<RenameRecord>>>,
}

impl ReportLog {
    /// Fills the log from the row store, oldest first.
    pub fn load_from(history: &RenameHistory, filter: &RecordFilter) -> Result<Self> {
        let mut records = history.records(filter)?;
        records.reverse();
        info!(count = records.len(), "loaded rename history");
        Ok(Self {
            rows: Arc::new(Mutex::new(records)),
        })
    }

    pub fn push(&self, record: RenameRecord) {
        self.lock().push(record);
    }

    pub fn rows(&self) -> Vec<RenameRecord> {
        self.lock().clone()
    }

    pub fn filtered(&self, filter: &RecordFilter) -> Vec<RenameRecord> {
        self.lock()
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Tab-separated table with one numbered line per record.
    pub fn render_table(&self, filter: &RecordFilter) -> String {
        render_rows(&self.filtered(filter))
    }

    pub fn export(&self, path: &Path, filter: &RecordFilter) -> Result<usize> {
        let rows = self.filtered(filter);
        let mut body = format!(
            "Rename report\nCreated: {}\n{}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            filter_lines(filter)
        );
        body.push_str(&render_rows(&rows));
        fs::write(path, body)
            .with_context(|| format!("could not write report: {}", path.display()))?;
        info!(path = %path.display(), rows = rows.len(), "report exported");
        Ok(rows.len())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RenameRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RenameListener for ReportLog {
    fn on_renamed(&self, record: &RenameRecord) {
        self.push(record.clone());
    }
}

/// Keeps `report_route_history` in settings up to date for the route filter.
#[derive(Debug, Clone)]
pub struct RouteHistoryRecorder {
    config: Arc<ConfigStore>,
}

impl RouteHistoryRecorder {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }
}

impl RenameListener for RouteHistoryRecorder {
    fn on_renamed(&self, record: &RenameRecord) {
        if let Err(err) = self.config.add_route_history(&record.route) {
            warn!("could not update route history: {err:#}");
        }
    }
}

/// Header lines naming the active route and date filters.
pub(crate) fn filter_lines(filter: &RecordFilter) -> String {
    let route = filter.route.as_deref().unwrap_or("All routes");
    let date = filter
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "All dates".to_string());
    format!("Route filter: {route}\nDate filter: {date}\n")
}

fn render_rows(rows: &[RenameRecord]) -> String {
    let mut out = COLUMNS.join("\t");
    out.push('\n');
    for (index, record) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            index + 1,
            record.created_at.format("%H:%M:%S"),
            record.route,
            record.original_name,
            record.new_name
        );
    }
    out
}
