use crate::config::{AppConfig, ConfigStore};
use crate::history::RecordFilter;
use crate::report::{filter_lines, ReportLog};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin: {0}")]
    Unknown(String),
    #[error("plugin {id} failed to build: {reason}")]
    Build { id: String, reason: String },
}

/// What the host hands to a plugin when building its surface.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub config: Arc<ConfigStore>,
    pub report: ReportLog,
    /// Initial date/route filter for the report surface.
    pub filter: RecordFilter,
}

/// A presentable panel contributed by a plugin.
pub trait Surface {
    fn title(&self) -> String;
    fn render(&self) -> String;
}

pub trait Plugin: Send + Sync {
    /// Identifier used in `enabled_plugins`.
    fn id(&self) -> &'static str;
    fn name(&self) -> String;
    fn build(&self, ctx: &PluginContext) -> Result<Box<dyn Surface>, PluginError>;
}

pub struct LoadedSurface {
    pub id: String,
    pub surface: Box<dyn Surface>,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(ReportPlugin));
        registry.register(Box::new(ExamplePlugin));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.insert(plugin.id(), plugin);
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    pub fn get(&self, id: &str) -> Option<&dyn Plugin> {
        self.plugins.get(id).map(|p| p.as_ref())
    }

    pub fn build(&self, id: &str, ctx: &PluginContext) -> Result<Box<dyn Surface>, PluginError> {
        let plugin = self
            .get(id)
            .ok_or_else(|| PluginError::Unknown(id.to_string()))?;
        plugin.build(ctx)
    }

    /// Builds every plugin listed in `enabled_plugins`. Failures are logged
    /// and the plugin is left out.
    pub fn build_enabled(&self, config: &AppConfig, ctx: &PluginContext) -> Vec<LoadedSurface> {
        let mut loaded = Vec::new();
        for id in &config.enabled_plugins {
            match self.build(id, ctx) {
                Ok(surface) => {
                    info!(plugin = %id, "plugin loaded");
                    loaded.push(LoadedSurface {
                        id: id.clone(),
                        surface,
                    });
                }
                Err(err @ PluginError::Unknown(_)) => warn!("{err}"),
                Err(err) => error!("{err}"),
            }
        }
        loaded
    }
}

pub struct ReportPlugin;

impl Plugin for ReportPlugin {
    fn id(&self) -> &'static str {
        "report"
    }

    fn name(&self) -> String {
        "Rename report".to_string()
    }

    fn build(&self, ctx: &PluginContext) -> Result<Box<dyn Surface>, PluginError> {
        let config = ctx.config.snapshot();
        Ok(Box::new(ReportSurface {
            report: ctx.report.clone(),
            routes: config.report_route_history,
            filter: ctx.filter.clone(),
        }))
    }
}

struct ReportSurface {
    report: ReportLog,
    routes: Vec<String>,
    filter: RecordFilter,
}

impl Surface for ReportSurface {
    fn title(&self) -> String {
        "Rename report".to_string()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if !self.routes.is_empty() {
            let _ = writeln!(out, "Routes: {}", self.routes.join(", "));
        }
        out.push_str(&filter_lines(&self.filter));
        out.push_str(&self.report.render_table(&self.filter));
        out
    }
}

pub struct ExamplePlugin;

impl Plugin for ExamplePlugin {
    fn id(&self) -> &'static str {
        "example"
    }

    fn name(&self) -> String {
        "Example plugin".to_string()
    }

    fn build(&self, ctx: &PluginContext) -> Result<Box<dyn Surface>, PluginError> {
        let config = ctx.config.snapshot();
        Ok(Box::new(ExampleSurface {
            profile: format!("{} / {} / {}", config.project, config.route, config.type_code),
        }))
    }
}

struct ExampleSurface {
    profile: String,
}

impl Surface for ExampleSurface {
    fn title(&self) -> String {
        "Example plugin".to_string()
    }

    fn render(&self) -> String {
        format!(
            "Plugins implement `Plugin` and are registered with the plugin registry.\n\
             Active profile: {}\n",
            self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RenameRecord;
    use chrono::Local;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct Broken;

    impl Plugin for Broken {
        fn id(&self) -> &'static str {
            "broken"
        }

        fn name(&self) -> String {
            "Broken".to_string()
        }

        fn build(&self, _ctx: &PluginContext) -> Result<Box<dyn Surface>, PluginError> {
            Err(PluginError::Build {
                id: "broken".to_string(),
                reason: "missing resource".to_string(),
            })
        }
    }

    fn context() -> (tempfile::TempDir, PluginContext) {
        let temp = tempdir().expect("tempdir");
        let config = Arc::new(ConfigStore::load(temp.path().join("settings.json")));
        (
            temp,
            PluginContext {
                config,
                report: ReportLog::default(),
                filter: RecordFilter::default(),
            },
        )
    }

    #[test]
    fn enabled_plugins_are_built_and_failures_skipped() {
        let (_temp, ctx) = context();
        let mut registry = PluginRegistry::with_builtin();
        registry.register(Box::new(Broken));
        let config = ctx
            .config
            .update(|c| {
                c.enabled_plugins = vec![
                    "report".to_string(),
                    "missing".to_string(),
                    "broken".to_string(),
                    "example".to_string(),
                ]
            })
            .expect("configure");

        let loaded = registry.build_enabled(&config, &ctx);
        let ids: Vec<&str> = loaded.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["report", "example"]);
    }

    #[test]
    fn unknown_plugin_is_an_error() {
        let (_temp, ctx) = context();
        let registry = PluginRegistry::with_builtin();
        assert!(matches!(
            registry.build("nope", &ctx),
            Err(PluginError::Unknown(_))
        ));
        assert_eq!(registry.ids(), vec!["example", "report"]);
    }

    #[test]
    fn report_surface_shows_renames() {
        let (_temp, ctx) = context();
        ctx.report.push(RenameRecord {
            sequence: 1,
            created_at: Local::now(),
            route: "R1".to_string(),
            original_name: "shot.jpg".to_string(),
            new_name: "P1_R1_01.jpg".to_string(),
            path: PathBuf::from("P1_R1_01.jpg"),
        });

        let surface = PluginRegistry::with_builtin()
            .build("report", &ctx)
            .expect("build report");
        assert_eq!(surface.title(), "Rename report");
        assert!(surface.render().contains("shot.jpg\tP1_R1_01.jpg"));
    }

    #[test]
    fn report_surface_applies_context_filter() {
        let (_temp, mut ctx) = context();
        for (route, name) in [("R1", "first.jpg"), ("R2", "second.jpg")] {
            ctx.report.push(RenameRecord {
                sequence: 1,
                created_at: Local::now(),
                route: route.to_string(),
                original_name: name.to_string(),
                new_name: format!("new_{name}"),
                path: PathBuf::from(name),
            });
        }
        ctx.filter = RecordFilter {
            date: None,
            route: Some("R2".to_string()),
        };

        let rendered = PluginRegistry::with_builtin()
            .build("report", &ctx)
            .expect("build report")
            .render();
        assert!(rendered.contains("Route filter: R2"));
        assert!(rendered.contains("second.jpg"));
        assert!(!rendered.contains("first.jpg"));
    }
}
