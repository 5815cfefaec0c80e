mod config;
mod counter;
mod history;
mod ledger;
mod plugin;
mod rename;
mod report;
mod template;
mod watcher;

pub const DEFAULT_TEMPLATE: &str = "{project}_{date}_{route}_{counter}_{TYPE}";

pub use config::{
    app_paths, parse_extensions, AppConfig, AppPaths, ComboField, ComboValues, ConfigStore,
};
pub use counter::{next_counter, CounterPattern, NameHistory};
pub use history::{RecordFilter, RenameHistory, RenameRecord};
pub use ledger::{creation_time, identity_key, RenamedLedger};
pub use plugin::{
    ExamplePlugin, LoadedSurface, Plugin, PluginContext, PluginError, PluginRegistry,
    ReportPlugin, Surface,
};
pub use rename::{
    extension_of, has_allowed_extension, FailedRename, RenameListener, RenameOutcome,
    RenamedFile, Renamer, SkipReason,
};
pub use report::{ReportLog, RouteHistoryRecorder};
pub use template::{
    render_example, render_file_name, validate_template, DateFormat, NumberFormat, Placeholder,
    TemplateError,
};
pub use watcher::{FolderWatcher, Monitor, RenameWorker, WorkerCommand, DEFAULT_DEBOUNCE};
