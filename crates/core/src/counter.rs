use crate::config::AppConfig;
use crate::template::DateFormat;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Names generated earlier for a given day, used when the renamed files are
/// no longer in the folder.
pub trait NameHistory {
    fn generated_names(&self, date: NaiveDate) -> Result<Vec<String>>;
}

/// Matches `<project>_<date>_<route>_<n>_<type>` for one profile and day.
#[derive(Debug, Clone)]
pub struct CounterPattern {
    regex: Regex,
}

impl CounterPattern {
    pub fn for_profile(config: &AppConfig, date: NaiveDate) -> Result<Self> {
        let formatted = DateFormat::from_setting(&config.date_format).format(date);
        let source = format!(
            r"^{}_{}_{}_(\d+)_{}",
            regex::escape(&config.project),
            regex::escape(&formatted),
            regex::escape(&config.route),
            regex::escape(&config.type_code),
        );
        let regex = Regex::new(&source)
            .with_context(|| format!("could not build counter pattern: {source}"))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    pub fn counter_in(&self, file_name: &str) -> Option<u32> {
        self.regex
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn max_counter<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> u32 {
        names
            .into_iter()
            .filter_map(|name| self.counter_in(name))
            .max()
            .unwrap_or(0)
    }
}

/// Returns the next unused counter for today's profile: one more than the
/// highest counter seen in `folder` or in `history`, or 1 when none match.
pub fn next_counter(
    folder: &Path,
    config: &AppConfig,
    date: NaiveDate,
    history: Option<&dyn NameHistory>,
) -> Result<u32> {
    let pattern = CounterPattern::for_profile(config, date)?;
    let folder_max = pattern.max_counter(folder_names(folder).iter().map(String::as_str));

    let history_max = match history.map(|h| h.generated_names(date)) {
        Some(Ok(names)) => pattern.max_counter(names.iter().map(String::as_str)),
        Some(Err(err)) => {
            warn!("could not read rename history for counter lookup: {err:#}");
            0
        }
        None => 0,
    };

    debug!(folder_max, history_max, "resolved counter");
    Ok(folder_max.max(history_max).saturating_add(1))
}

fn folder_names(folder: &Path) -> Vec<String> {
    if !folder.is_dir() {
        return Vec::new();
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        match entry {
            Ok(entry) => names.push(entry.file_name().to_string_lossy().to_string()),
            Err(err) => warn!(folder = %folder.display(), "could not list entry: {err}"),
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    impl NameHistory for Vec<String> {
        fn generated_names(&self, _date: NaiveDate) -> Result<Vec<String>> {
            Ok(self.clone())
        }
    }

    fn config() -> AppConfig {
        AppConfig {
            project: "P1".to_string(),
            route: "R1".to_string(),
            type_code: "T1".to_string(),
            date_format: "YYYYMMDD".to_string(),
            ..AppConfig::default()
        }
    }

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
    }

    #[test]
    fn empty_folder_starts_at_one() {
        let temp = tempdir().expect("tempdir");
        let next = next_counter(temp.path(), &config(), may_first(), None).expect("counter");
        assert_eq!(next, 1);
    }

    #[test]
    fn missing_folder_starts_at_one() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("nope");
        let next = next_counter(&missing, &config(), may_first(), None).expect("counter");
        assert_eq!(next, 1);
    }

    #[test]
    fn folder_maximum_is_used() {
        let temp = tempdir().expect("tempdir");
        for name in [
            "P1_20240501_R1_03_T1.jpg",
            "P1_20240501_R1_11_T1.png",
            "P1_20240430_R1_50_T1.jpg",
            "P2_20240501_R1_60_T1.jpg",
            "unrelated.jpg",
        ] {
            fs::write(temp.path().join(name), b"x").expect("write");
        }

        let next = next_counter(temp.path(), &config(), may_first(), None).expect("counter");
        assert_eq!(next, 12);
    }

    #[test]
    fn history_maximum_wins_when_larger() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("P1_20240501_R1_02_T1.jpg"), b"x").expect("write");
        let history = vec![
            "P1_20240501_R1_07_T1.jpg".to_string(),
            "P1_20240501_R9_99_T1.jpg".to_string(),
        ];

        let next = next_counter(
            temp.path(),
            &config(),
            may_first(),
            Some(&history as &dyn NameHistory),
        )
        .expect("counter");
        assert_eq!(next, 8);
    }

    #[test]
    fn profile_values_are_matched_literally() {
        let mut cfg = config();
        cfg.route = "M2.1".to_string();
        let pattern = CounterPattern::for_profile(&cfg, may_first()).expect("pattern");

        assert_eq!(pattern.counter_in("P1_20240501_M2.1_05_T1.jpg"), Some(5));
        assert_eq!(pattern.counter_in("P1_20240501_M2x1_05_T1.jpg"), None);
        assert!(!pattern.matches("xP1_20240501_M2.1_05_T1.jpg"));
    }

    #[test]
    fn date_format_is_part_of_the_pattern() {
        let mut cfg = config();
        cfg.date_format = "DD.MM.YYYY".to_string();
        let pattern = CounterPattern::for_profile(&cfg, may_first()).expect("pattern");

        assert_eq!(pattern.counter_in("P1_01.05.2024_R1_4_T1.jpg"), Some(4));
        assert_eq!(pattern.counter_in("P1_01x05x2024_R1_4_T1.jpg"), None);
    }
}
