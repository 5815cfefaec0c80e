use crate::DEFAULT_TEMPLATE;
use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub project: String,
    #[serde(alias = "tl_type")]
    pub type_code: String,
    pub route: String,
    pub number_format: String,
    pub date_format: String,
    pub var1: String,
    pub var2: String,
    pub var3: String,
    pub folder: PathBuf,
    pub extensions: String,
    pub template: String,
    pub monitoring_enabled: bool,
    pub rename_only_today: bool,
    pub folder_history: Vec<PathBuf>,
    pub template_history: Vec<String>,
    pub enabled_plugins: Vec<String>,
    pub combobox_values: ComboValues,
    pub report_route_history: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let folder = default_watch_folder();
        Self {
            project: "Project1".to_string(),
            type_code: "VK".to_string(),
            route: "M2.1".to_string(),
            number_format: "01".to_string(),
            date_format: "YYYYMMDD".to_string(),
            var1: "Value1".to_string(),
            var2: "Value2".to_string(),
            var3: "Value3".to_string(),
            folder_history: vec![folder.clone()],
            folder,
            extensions: "png,jpg,jpeg".to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
            monitoring_enabled: true,
            rename_only_today: true,
            template_history: vec![
                DEFAULT_TEMPLATE.to_string(),
                "{project}_{TYPE}_{date}_{counter}".to_string(),
                "{route}_{date}_{counter}_{project}".to_string(),
            ],
            enabled_plugins: vec!["report".to_string()],
            combobox_values: ComboValues::default(),
            report_route_history: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Allowed extensions, lower-cased and without the leading dot.
    pub fn allowed_extensions(&self) -> Vec<String> {
        parse_extensions(&self.extensions)
    }

    pub fn field(&self, field: ComboField) -> &str {
        match field {
            ComboField::Project => &self.project,
            ComboField::TypeCode => &self.type_code,
            ComboField::Route => &self.route,
            ComboField::NumberFormat => &self.number_format,
            ComboField::DateFormat => &self.date_format,
            ComboField::Var1 => &self.var1,
            ComboField::Var2 => &self.var2,
            ComboField::Var3 => &self.var3,
        }
    }

    fn field_mut(&mut self, field: ComboField) -> &mut String {
        match field {
            ComboField::Project => &mut self.project,
            ComboField::TypeCode => &mut self.type_code,
            ComboField::Route => &mut self.route,
            ComboField::NumberFormat => &mut self.number_format,
            ComboField::DateFormat => &mut self.date_format,
            ComboField::Var1 => &mut self.var1,
            ComboField::Var2 => &mut self.var2,
            ComboField::Var3 => &mut self.var3,
        }
    }
}

/// Values offered for each editable field. New entries are appended as the
/// user types them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboValues {
    pub project: Vec<String>,
    #[serde(alias = "tl_type")]
    pub type_code: Vec<String>,
    pub route: Vec<String>,
    pub number_format: Vec<String>,
    pub date_format: Vec<String>,
    pub var1: Vec<String>,
    pub var2: Vec<String>,
    pub var3: Vec<String>,
}

impl Default for ComboValues {
    fn default() -> Self {
        let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        Self {
            project: strings(&["Project1", "Project2"]),
            type_code: strings(&["VK", "Other"]),
            route: strings(&["M2.1", "M2.2", "M2.3"]),
            number_format: strings(&["1", "01", "001"]),
            date_format: strings(&[
                "YYYYMMDD",
                "YYYY-MM-DD",
                "YYYY.MM.DD",
                "DDMMYYYY",
                "DD-MM-YYYY",
                "DD.MM.YYYY",
            ]),
            var1: strings(&["Value1", "Value2"]),
            var2: strings(&["Value1", "Value2"]),
            var3: strings(&["Value1", "Value2"]),
        }
    }
}

impl ComboValues {
    pub fn values(&self, field: ComboField) -> &[String] {
        match field {
            ComboField::Project => &self.project,
            ComboField::TypeCode => &self.type_code,
            ComboField::Route => &self.route,
            ComboField::NumberFormat => &self.number_format,
            ComboField::DateFormat => &self.date_format,
            ComboField::Var1 => &self.var1,
            ComboField::Var2 => &self.var2,
            ComboField::Var3 => &self.var3,
        }
    }

    fn values_mut(&mut self, field: ComboField) -> &mut Vec<String> {
        match field {
            ComboField::Project => &mut self.project,
            ComboField::TypeCode => &mut self.type_code,
            ComboField::Route => &mut self.route,
            ComboField::NumberFormat => &mut self.number_format,
            ComboField::DateFormat => &mut self.date_format,
            ComboField::Var1 => &mut self.var1,
            ComboField::Var2 => &mut self.var2,
            ComboField::Var3 => &mut self.var3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComboField {
    Project,
    TypeCode,
    Route,
    NumberFormat,
    DateFormat,
    Var1,
    Var2,
    Var3,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub settings_path: PathBuf,
    pub ledger_path: PathBuf,
    pub history_db_path: PathBuf,
    pub log_path: PathBuf,
}

impl AppPaths {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let config_dir = dir.into();
        Self {
            settings_path: config_dir.join("settings.json"),
            ledger_path: config_dir.join("renamed_files.json"),
            history_db_path: config_dir.join("rename_history.db"),
            log_path: config_dir.join("renamer.log"),
            config_dir,
        }
    }
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("com", "egok", "egok-renamer")
        .context("could not determine the OS configuration directory")?;
    Ok(AppPaths::in_dir(proj.config_dir()))
}

/// JSON-backed settings shared between the watcher, the rename worker and
/// the command surface. Every mutation is written out in full.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<AppConfig>,
}

impl ConfigStore {
    /// Loads settings from `path`, merging them over the defaults. A missing
    /// or unreadable file yields the defaults, which are then persisted.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (config, needs_write) = match read_config(&path) {
            Ok(Some(config)) => (config, false),
            Ok(None) => {
                info!(path = %path.display(), "settings file not found, using defaults");
                (AppConfig::default(), true)
            }
            Err(err) => {
                warn!(path = %path.display(), "settings file is malformed, falling back to defaults: {err:#}");
                backup_broken_file(&path);
                (AppConfig::default(), true)
            }
        };

        let store = Self {
            path,
            current: Mutex::new(config),
        };
        if needs_write {
            if let Err(err) = store.save() {
                warn!("failed to write default settings: {err:#}");
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> AppConfig {
        self.lock().clone()
    }

    /// Applies `change` and persists the result. The change stays in memory
    /// even if the write fails.
    pub fn update<F>(&self, change: F) -> Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.lock();
        change(&mut guard);
        // Held across the write: one writer at a time.
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }

    pub fn save(&self) -> Result<()> {
        let guard = self.lock();
        write_config(&self.path, &guard)
    }

    pub fn set_folder(&self, folder: impl Into<PathBuf>) -> Result<AppConfig> {
        let folder = folder.into();
        self.update(|config| {
            push_history(&mut config.folder_history, folder.clone());
            config.folder = folder;
        })
    }

    pub fn set_template(&self, template: &str) -> Result<AppConfig> {
        self.update(|config| {
            config.template = template.to_string();
            if !template.is_empty() {
                push_history(&mut config.template_history, template.to_string());
            }
        })
    }

    /// Sets a field and remembers the value in its allowed-value list.
    pub fn set_field(&self, field: ComboField, value: &str) -> Result<AppConfig> {
        self.update(|config| {
            *config.field_mut(field) = value.to_string();
            let values = config.combobox_values.values_mut(field);
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        })
    }

    pub fn add_route_history(&self, route: &str) -> Result<AppConfig> {
        self.update(|config| {
            if !route.is_empty() && !config.report_route_history.iter().any(|r| r == route) {
                config.report_route_history.push(route.to_string());
            }
        })
    }

    pub fn set_monitoring_enabled(&self, enabled: bool) -> Result<AppConfig> {
        self.update(|config| config.monitoring_enabled = enabled)
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Writes `body` next to `path` and renames it into place so readers never
/// observe a half-written document.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create directory: {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, body)
        .with_context(|| format!("could not write: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "could not replace {} with {}",
            path.display(),
            tmp_path.display()
        )
    })?;
    Ok(())
}

fn push_history<T: PartialEq>(history: &mut Vec<T>, value: T) {
    if history.contains(&value) {
        return;
    }
    history.insert(0, value);
    history.truncate(HISTORY_LIMIT);
}

fn read_config(path: &Path) -> Result<Option<AppConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read settings file: {}", path.display()))?;
    let config = serde_json::from_str::<AppConfig>(&raw)
        .with_context(|| format!("could not parse settings file: {}", path.display()))?;
    Ok(Some(config))
}

fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    let body = serde_json::to_vec_pretty(config).context("could not serialize settings")?;
    write_atomic(path, &body)
}

fn backup_broken_file(path: &Path) {
    let mut backup_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    backup_name.push(".bak");
    let backup = path.with_file_name(backup_name);
    if let Err(err) = fs::copy(path, &backup) {
        warn!(path = %path.display(), "could not back up malformed settings file: {err}");
    }
}

fn default_watch_folder() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.picture_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_writes_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");

        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot().project, "Project1");
        assert!(path.exists(), "defaults should be persisted");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults_and_is_rewritten() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(&path, "{ not json").expect("write broken settings");

        let store = ConfigStore::load(&path);
        let config = store.snapshot();
        assert_eq!(config.template, DEFAULT_TEMPLATE);
        assert_eq!(config.number_format, "01");

        let raw = fs::read_to_string(&path).expect("read settings");
        serde_json::from_str::<AppConfig>(&raw).expect("rewritten settings must parse");
        assert!(temp.path().join("settings.json.bak").exists());
    }

    #[test]
    fn partial_file_is_merged_over_defaults() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{"project":"P9","tl_type":"T7"}"#).expect("write settings");

        let config = ConfigStore::load(&path).snapshot();
        assert_eq!(config.project, "P9");
        assert_eq!(config.type_code, "T7");
        assert_eq!(config.route, "M2.1");
        assert!(config.rename_only_today);
        assert_eq!(config.combobox_values.number_format, vec!["1", "01", "001"]);
    }

    #[test]
    fn update_persists_every_change() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        let store = ConfigStore::load(&path);

        store
            .update(|config| config.route = "R5".to_string())
            .expect("update");
        let reloaded = ConfigStore::load(&path).snapshot();
        assert_eq!(reloaded.route, "R5");
    }

    #[test]
    fn folder_history_is_bounded_and_most_recent_first() {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::load(temp.path().join("settings.json"));

        for i in 0..15 {
            store.set_folder(format!("/data/{i}")).expect("set folder");
        }
        store.set_folder("/data/14").expect("repeat folder");

        let config = store.snapshot();
        assert_eq!(config.folder, PathBuf::from("/data/14"));
        assert_eq!(config.folder_history.len(), HISTORY_LIMIT);
        assert_eq!(config.folder_history[0], PathBuf::from("/data/14"));
        assert_eq!(config.folder_history[1], PathBuf::from("/data/13"));
    }

    #[test]
    fn set_field_grows_allowed_values_once() {
        let temp = tempdir().expect("tempdir");
        let store = ConfigStore::load(temp.path().join("settings.json"));

        store.set_field(ComboField::Route, "M9.9").expect("set route");
        store.set_field(ComboField::Route, "M9.9").expect("set route again");

        let config = store.snapshot();
        assert_eq!(config.route, "M9.9");
        let count = config
            .combobox_values
            .values(ComboField::Route)
            .iter()
            .filter(|v| v.as_str() == "M9.9")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn extensions_are_normalized() {
        assert_eq!(
            parse_extensions(" JPG, .png ,,mp4 "),
            vec!["jpg".to_string(), "png".to_string(), "mp4".to_string()]
        );
    }

    #[test]
    fn concurrent_updates_leave_the_latest_snapshot_on_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        let store = ConfigStore::load(&path);

        for round in 0..50 {
            let errors: usize = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|t| {
                        let store = &store;
                        scope.spawn(move || {
                            store.update(|c| c.route = format!("R{round}-{t}")).is_err()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("writer thread"))
                    .filter(|failed| *failed)
                    .count()
            });
            assert_eq!(errors, 0, "round {round}");

            let on_disk = read_config(&path)
                .expect("read settings")
                .expect("settings exist");
            assert_eq!(on_disk, store.snapshot(), "round {round}");
        }
    }
}
