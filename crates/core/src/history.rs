use crate::counter::NameHistory;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One successful rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub sequence: u64,
    pub created_at: DateTime<Local>,
    pub route: String,
    pub original_name: String,
    pub new_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub date: Option<NaiveDate>,
    pub route: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &RenameRecord) -> bool {
        self.date
            .map_or(true, |date| record.created_at.date_naive() == date)
            && self
                .route
                .as_deref()
                .map_or(true, |route| record.route == route)
    }
}

/// Append-only SQLite table of rename records.
pub struct RenameHistory {
    conn: Connection,
}

impl std::fmt::Debug for RenameHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenameHistory")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl RenameHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("could not open rename history: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("could not open in-memory history")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rename_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                create_date TEXT NOT NULL,
                route TEXT NOT NULL,
                original_name TEXT NOT NULL,
                new_name TEXT NOT NULL,
                file_path TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_date ON rename_history(create_date);
            CREATE INDEX IF NOT EXISTS idx_route ON rename_history(route);",
        )
        .context("could not initialise rename history schema")?;
        Ok(Self { conn })
    }

    /// Stores a record and returns it with the row id as its sequence number.
    pub fn add_record(
        &self,
        created_at: DateTime<Local>,
        route: &str,
        original_name: &str,
        new_name: &str,
        path: &Path,
    ) -> Result<RenameRecord> {
        self.conn
            .execute(
                "INSERT INTO rename_history
                    (timestamp, create_date, route, original_name, new_name, file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    created_at.format(TIMESTAMP_FORMAT).to_string(),
                    created_at.format(DATE_FORMAT).to_string(),
                    route,
                    original_name,
                    new_name,
                    path.to_string_lossy().to_string(),
                ],
            )
            .with_context(|| format!("could not store rename record for {new_name}"))?;

        Ok(RenameRecord {
            sequence: self.conn.last_insert_rowid().max(0) as u64,
            created_at,
            route: route.to_string(),
            original_name: original_name.to_string(),
            new_name: new_name.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Records matching `filter`, newest first.
    pub fn records(&self, filter: &RecordFilter) -> Result<Vec<RenameRecord>> {
        let date = filter.date.map(|d| d.format(DATE_FORMAT).to_string());
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, route, original_name, new_name, file_path
                 FROM rename_history
                 WHERE (?1 IS NULL OR create_date = ?1)
                   AND (?2 IS NULL OR route = ?2)
                 ORDER BY timestamp DESC, id DESC",
            )
            .context("could not prepare history query")?;
        let rows = stmt
            .query_map(params![date, filter.route], row_to_record)
            .context("could not query rename history")?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("could not read rename history row")?);
        }
        Ok(records)
    }

    pub fn all_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT create_date FROM rename_history ORDER BY create_date DESC")
            .context("could not prepare date query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("could not query dates")?;

        let mut dates = Vec::new();
        for row in rows {
            let raw = row.context("could not read date row")?;
            if let Ok(date) = NaiveDate::parse_from_str(&raw, DATE_FORMAT) {
                dates.push(date);
            }
        }
        Ok(dates)
    }

    pub fn all_routes(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT route FROM rename_history ORDER BY route")
            .context("could not prepare route query")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("could not query routes")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("could not read route rows")
    }

    pub fn new_names_on(&self, date: NaiveDate) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT new_name FROM rename_history WHERE create_date = ?1")
            .context("could not prepare name query")?;
        let rows = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
                row.get::<_, String>(0)
            })
            .context("could not query names")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("could not read name rows")
    }

    /// Deletes every record and returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM rename_history", [])
            .context("could not clear rename history")?;
        info!(removed, "rename history cleared");
        Ok(removed)
    }
}

impl NameHistory for RenameHistory {
    fn generated_names(&self, date: NaiveDate) -> Result<Vec<String>> {
        self.new_names_on(date)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RenameRecord> {
    let id: i64 = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let file_path: String = row.get(5)?;
    Ok(RenameRecord {
        sequence: id.max(0) as u64,
        created_at: parse_timestamp(&timestamp),
        route: row.get(2)?,
        original_name: row.get(3)?,
        new_name: row.get(4)?,
        path: PathBuf::from(file_path),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Local> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or_else(|| {
            Local
                .timestamp_opt(0, 0)
                .single()
                .unwrap_or_else(Local::now)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .earliest()
            .expect("valid local time")
    }

    #[test]
    fn records_are_filtered_and_newest_first() {
        let history = RenameHistory::open_in_memory().expect("open");
        history
            .add_record(at(2024, 5, 1, 9), "R1", "a.jpg", "A.jpg", Path::new("/x/A.jpg"))
            .expect("add");
        history
            .add_record(at(2024, 5, 1, 10), "R2", "b.jpg", "B.jpg", Path::new("/x/B.jpg"))
            .expect("add");
        history
            .add_record(at(2024, 5, 2, 9), "R1", "c.jpg", "C.jpg", Path::new("/x/C.jpg"))
            .expect("add");

        let all = history.records(&RecordFilter::default()).expect("records");
        let names: Vec<&str> = all.iter().map(|r| r.new_name.as_str()).collect();
        assert_eq!(names, vec!["C.jpg", "B.jpg", "A.jpg"]);

        let filter = RecordFilter {
            date: NaiveDate::from_ymd_opt(2024, 5, 1),
            route: Some("R1".to_string()),
        };
        let filtered = history.records(&filter).expect("records");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].original_name, "a.jpg");
        assert_eq!(filtered[0].created_at, at(2024, 5, 1, 9));
    }

    #[test]
    fn dates_routes_and_names() {
        let history = RenameHistory::open_in_memory().expect("open");
        let day = at(2024, 5, 1, 9);
        history
            .add_record(day, "R2", "a.jpg", "A.jpg", Path::new("A.jpg"))
            .expect("add");
        history
            .add_record(day + Duration::days(1), "R1", "b.jpg", "B.jpg", Path::new("B.jpg"))
            .expect("add");

        let dates = history.all_dates().expect("dates");
        assert_eq!(dates.len(), 2);
        assert!(dates[0] > dates[1]);
        assert_eq!(history.all_routes().expect("routes"), vec!["R1", "R2"]);
        assert_eq!(
            history.new_names_on(day.date_naive()).expect("names"),
            vec!["A.jpg".to_string()]
        );
    }

    #[test]
    fn clear_all_removes_everything() {
        let history = RenameHistory::open_in_memory().expect("open");
        history
            .add_record(Local::now(), "R1", "a.jpg", "A.jpg", Path::new("A.jpg"))
            .expect("add");
        assert_eq!(history.clear_all().expect("clear"), 1);
        assert!(history
            .records(&RecordFilter::default())
            .expect("records")
            .is_empty());
    }

    #[test]
    fn history_persists_on_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("rename_history.db");
        {
            let history = RenameHistory::open(&path).expect("open");
            let record = history
                .add_record(Local::now(), "R1", "a.jpg", "A.jpg", Path::new("A.jpg"))
                .expect("add");
            assert_eq!(record.sequence, 1);
        }
        let reopened = RenameHistory::open(&path).expect("reopen");
        assert_eq!(
            reopened
                .records(&RecordFilter::default())
                .expect("records")
                .len(),
            1
        );
    }
}
