use crate::config::AppConfig;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Project,
    Route,
    TypeCode,
    Date,
    Counter,
    Extension,
    Var1,
    Var2,
    Var3,
}

impl Placeholder {
    pub const ALL: [Placeholder; 9] = [
        Placeholder::Project,
        Placeholder::Route,
        Placeholder::TypeCode,
        Placeholder::Date,
        Placeholder::Counter,
        Placeholder::Extension,
        Placeholder::Var1,
        Placeholder::Var2,
        Placeholder::Var3,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Placeholder::Project => "{project}",
            Placeholder::Route => "{route}",
            Placeholder::TypeCode => "{TYPE}",
            Placeholder::Date => "{date}",
            Placeholder::Counter => "{counter}",
            Placeholder::Extension => "{extension}",
            Placeholder::Var1 => "{1}",
            Placeholder::Var2 => "{2}",
            Placeholder::Var3 => "{3}",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "project" => Some(Placeholder::Project),
            "route" => Some(Placeholder::Route),
            // `TL` is what older settings files call the type code.
            "TYPE" | "TL" => Some(Placeholder::TypeCode),
            "date" => Some(Placeholder::Date),
            "counter" => Some(Placeholder::Counter),
            "extension" => Some(Placeholder::Extension),
            "1" => Some(Placeholder::Var1),
            "2" => Some(Placeholder::Var2),
            "3" => Some(Placeholder::Var3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    DayMonthYear,
    DayMonthYearDotted,
    DayMonthYearDashed,
    YearMonthDay,
    YearMonthDayDotted,
    YearMonthDayDashed,
}

impl DateFormat {
    pub const ALL: [DateFormat; 6] = [
        DateFormat::YearMonthDay,
        DateFormat::YearMonthDayDashed,
        DateFormat::YearMonthDayDotted,
        DateFormat::DayMonthYear,
        DateFormat::DayMonthYearDashed,
        DateFormat::DayMonthYearDotted,
    ];

    /// Unknown settings fall back to `YYYYMMDD`.
    pub fn from_setting(value: &str) -> Self {
        match value {
            "DDMMYYYY" => DateFormat::DayMonthYear,
            "DD.MM.YYYY" => DateFormat::DayMonthYearDotted,
            "DD-MM-YYYY" => DateFormat::DayMonthYearDashed,
            "YYYY.MM.DD" => DateFormat::YearMonthDayDotted,
            "YYYY-MM-DD" => DateFormat::YearMonthDayDashed,
            _ => DateFormat::YearMonthDay,
        }
    }

    pub fn setting(self) -> &'static str {
        match self {
            DateFormat::DayMonthYear => "DDMMYYYY",
            DateFormat::DayMonthYearDotted => "DD.MM.YYYY",
            DateFormat::DayMonthYearDashed => "DD-MM-YYYY",
            DateFormat::YearMonthDay => "YYYYMMDD",
            DateFormat::YearMonthDayDotted => "YYYY.MM.DD",
            DateFormat::YearMonthDayDashed => "YYYY-MM-DD",
        }
    }

    pub fn format(self, date: NaiveDate) -> String {
        let pattern = match self {
            DateFormat::DayMonthYear => "%d%m%Y",
            DateFormat::DayMonthYearDotted => "%d.%m.%Y",
            DateFormat::DayMonthYearDashed => "%d-%m-%Y",
            DateFormat::YearMonthDay => "%Y%m%d",
            DateFormat::YearMonthDayDotted => "%Y.%m.%d",
            DateFormat::YearMonthDayDashed => "%Y-%m-%d",
        };
        date.format(pattern).to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Plain,
    TwoDigits,
    ThreeDigits,
}

impl NumberFormat {
    pub fn from_setting(value: &str) -> Self {
        match value {
            "01" => NumberFormat::TwoDigits,
            "001" => NumberFormat::ThreeDigits,
            _ => NumberFormat::Plain,
        }
    }

    pub fn format(self, counter: u32) -> String {
        match self {
            NumberFormat::Plain => counter.to_string(),
            NumberFormat::TwoDigits => format!("{counter:02}"),
            NumberFormat::ThreeDigits => format!("{counter:03}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("template has unbalanced braces")]
    UnbalancedBraces,
    #[error("unknown placeholder: {{{0}}}")]
    UnknownPlaceholder(String),
}

/// Checks that every `{...}` in the template names a known placeholder.
pub fn validate_template(input: &str) -> Result<(), TemplateError> {
    if input.trim().is_empty() {
        return Err(TemplateError::Empty);
    }

    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                let mut name = String::new();
                let mut found_close = false;
                for next in chars.by_ref() {
                    if next == '}' {
                        found_close = true;
                        break;
                    }
                    if next == '{' {
                        return Err(TemplateError::UnbalancedBraces);
                    }
                    name.push(next);
                }
                if !found_close {
                    return Err(TemplateError::UnbalancedBraces);
                }
                if Placeholder::from_name(&name).is_none() {
                    return Err(TemplateError::UnknownPlaceholder(name));
                }
            }
            '}' => return Err(TemplateError::UnbalancedBraces),
            _ => {}
        }
    }
    Ok(())
}

/// Renders the configured template for a file with `extension` (no dot).
///
/// Substitution is a single left-to-right pass: values inserted for one
/// placeholder are never scanned again, and unknown `{...}` text is kept
/// verbatim.
pub fn render_file_name(
    config: &AppConfig,
    date: NaiveDate,
    counter: u32,
    extension: &str,
) -> String {
    let extension = extension.trim_start_matches('.').to_lowercase();
    let base = render_template(&config.template, config, date, counter, &extension);
    if extension.is_empty() {
        base
    } else {
        format!("{base}.{extension}")
    }
}

/// Renders the example shown by the "check template" action.
pub fn render_example(config: &AppConfig, date: NaiveDate) -> Result<String, TemplateError> {
    validate_template(&config.template)?;
    Ok(render_file_name(config, date, 1, "jpg"))
}

fn render_template(
    template: &str,
    config: &AppConfig,
    date: NaiveDate,
    counter: u32,
    extension: &str,
) -> String {
    let mut output = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let tail = &rest[open..];
        let placeholder = tail[1..]
            .find('}')
            .and_then(|close| Placeholder::from_name(&tail[1..1 + close]).map(|p| (p, close)));

        match placeholder {
            Some((placeholder, close)) => {
                output.push_str(&placeholder_value(placeholder, config, date, counter, extension));
                rest = &tail[close + 2..];
            }
            None => {
                output.push('{');
                rest = &tail[1..];
            }
        }
    }
    output.push_str(rest);
    output
}

fn placeholder_value(
    placeholder: Placeholder,
    config: &AppConfig,
    date: NaiveDate,
    counter: u32,
    extension: &str,
) -> String {
    match placeholder {
        Placeholder::Project => config.project.clone(),
        Placeholder::Route => config.route.clone(),
        Placeholder::TypeCode => config.type_code.clone(),
        Placeholder::Date => DateFormat::from_setting(&config.date_format).format(date),
        Placeholder::Counter => NumberFormat::from_setting(&config.number_format).format(counter),
        Placeholder::Extension => extension.to_string(),
        Placeholder::Var1 => config.var1.clone(),
        Placeholder::Var2 => config.var2.clone(),
        Placeholder::Var3 => config.var3.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(template: &str) -> AppConfig {
        AppConfig {
            project: "P1".to_string(),
            route: "R1".to_string(),
            type_code: "T1".to_string(),
            date_format: "YYYYMMDD".to_string(),
            number_format: "01".to_string(),
            var1: "a".to_string(),
            var2: "b".to_string(),
            var3: "c".to_string(),
            template: template.to_string(),
            ..AppConfig::default()
        }
    }

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date")
    }

    #[test]
    fn renders_documented_example() {
        let cfg = config("{project}_{date}_{route}_{counter}_{TYPE}");
        assert_eq!(
            render_file_name(&cfg, may_first(), 1, "jpg"),
            "P1_20240501_R1_01_T1.jpg"
        );
        assert_eq!(
            render_file_name(&cfg, may_first(), 2, ".JPG"),
            "P1_20240501_R1_02_T1.jpg"
        );
    }

    #[test]
    fn legacy_type_token_is_accepted() {
        let cfg = config("{project}_{TL}");
        assert_eq!(render_file_name(&cfg, may_first(), 1, "png"), "P1_T1.png");
        assert!(validate_template("{TL}_{counter}").is_ok());
    }

    #[test]
    fn free_variables_and_extension_are_substituted() {
        let cfg = config("{1}-{2}-{3}-{extension}");
        assert_eq!(render_file_name(&cfg, may_first(), 7, "mp4"), "a-b-c-mp4.mp4");
    }

    #[test]
    fn counter_formats() {
        assert_eq!(NumberFormat::from_setting("1").format(7), "7");
        assert_eq!(NumberFormat::from_setting("01").format(7), "07");
        assert_eq!(NumberFormat::from_setting("001").format(7), "007");
        assert_eq!(NumberFormat::from_setting("001").format(1234), "1234");
        assert_eq!(NumberFormat::from_setting("weird").format(7), "7");
    }

    #[test]
    fn date_formats_and_fallback() {
        let date = may_first();
        let rendered: Vec<String> = DateFormat::ALL.iter().map(|f| f.format(date)).collect();
        assert_eq!(
            rendered,
            vec![
                "20240501",
                "2024-05-01",
                "2024.05.01",
                "01052024",
                "01-05-2024",
                "01.05.2024"
            ]
        );
        for format in DateFormat::ALL {
            assert_eq!(DateFormat::from_setting(format.setting()), format);
        }
        assert_eq!(DateFormat::from_setting("MM/DD"), DateFormat::YearMonthDay);
    }

    #[test]
    fn empty_template_yields_only_extension() {
        let cfg = config("");
        assert_eq!(render_file_name(&cfg, may_first(), 1, "jpg"), ".jpg");
    }

    #[test]
    fn placeholders_are_case_sensitive() {
        let cfg = config("{Project}_{type}_{counter}");
        assert_eq!(
            render_file_name(&cfg, may_first(), 3, "jpg"),
            "{Project}_{type}_03.jpg"
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let mut cfg = config("{project}_{route}");
        cfg.project = "{route}".to_string();
        assert_eq!(render_file_name(&cfg, may_first(), 1, "jpg"), "{route}_R1.jpg");
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let cfg = config("{project}_{date}_{route}_{counter}_{TYPE}_{1}{2}{3}_{extension}");
        let once = render_template(&cfg.template, &cfg, may_first(), 4, "jpg");
        let twice = render_template(&once, &cfg, may_first(), 4, "jpg");
        assert_eq!(once, twice);
        assert!(Placeholder::ALL.iter().all(|p| !once.contains(p.token())));
    }

    #[test]
    fn validate_rejects_unknown_and_unbalanced() {
        assert_eq!(validate_template("  "), Err(TemplateError::Empty));
        assert_eq!(
            validate_template("{project"),
            Err(TemplateError::UnbalancedBraces)
        );
        assert_eq!(
            validate_template("project}"),
            Err(TemplateError::UnbalancedBraces)
        );
        assert_eq!(
            validate_template("{foo}_{counter}"),
            Err(TemplateError::UnknownPlaceholder("foo".to_string()))
        );
    }

    #[test]
    fn example_uses_first_counter() {
        let cfg = config("{project}_{counter}");
        assert_eq!(render_example(&cfg, may_first()), Ok("P1_01.jpg".to_string()));
        let broken = config("{project");
        assert!(render_example(&broken, may_first()).is_err());
    }
}
