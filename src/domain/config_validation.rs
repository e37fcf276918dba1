//! Configuration validation.
//!
//! Every section the build needs is checked before any bars are read, so a
//! bad key fails with its section and name instead of partway through a run.

use std::fmt::Display;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::domain::error::OrbError;
use crate::domain::instrument::InstrumentSpec;
use crate::domain::session::SessionResolver;
use crate::ports::config_port::ConfigPort;

pub const BUILD_SECTION: &str = "build";

/// Validated `[build]` section plus the instruments it names.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub specs: Vec<InstrumentSpec>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub resume: bool,
    pub parallel: bool,
}

impl BuildConfig {
    pub fn instrument(&self, code: &str) -> Result<&InstrumentSpec, OrbError> {
        self.specs
            .iter()
            .find(|s| s.instrument() == code)
            .ok_or_else(|| OrbError::Unconfigured {
                instrument: code.to_string(),
            })
    }

    pub fn resolver(&self) -> SessionResolver {
        self.specs
            .iter()
            .fold(SessionResolver::new(), |r, s| r.with_calendar(s.calendar.clone()))
    }
}

pub fn validate_build_config(config: &dyn ConfigPort) -> Result<BuildConfig, OrbError> {
    let codes = validate_instruments(config)?;
    let (start_date, end_date) = validate_dates(config)?;
    let specs = codes
        .iter()
        .map(|code| InstrumentSpec::from_config(config, code))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BuildConfig {
        specs,
        start_date,
        end_date,
        resume: config.get_bool(BUILD_SECTION, "resume", true),
        parallel: config.get_bool(BUILD_SECTION, "parallel", false),
    })
}

fn validate_instruments(config: &dyn ConfigPort) -> Result<Vec<String>, OrbError> {
    let codes: Vec<String> = split_list(&required(config, BUILD_SECTION, "instruments")?)
        .into_iter()
        .map(|c| c.to_uppercase())
        .collect();
    if codes.is_empty() {
        return Err(OrbError::ConfigMissing {
            section: BUILD_SECTION.to_string(),
            key: "instruments".to_string(),
        });
    }
    for (i, code) in codes.iter().enumerate() {
        if codes[..i].contains(code) {
            return Err(OrbError::ConfigInvalid {
                section: BUILD_SECTION.to_string(),
                key: "instruments".to_string(),
                reason: format!("instrument {code} listed twice"),
            });
        }
    }
    Ok(codes)
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(NaiveDate, NaiveDate), OrbError> {
    let start_date = parse_date(config, "start_date")?;
    let end_date = parse_date(config, "end_date")?;

    if start_date > end_date {
        return Err(OrbError::ConfigInvalid {
            section: BUILD_SECTION.to_string(),
            key: "start_date".to_string(),
            reason: "start_date must not be after end_date".to_string(),
        });
    }
    Ok((start_date, end_date))
}

fn parse_date(config: &dyn ConfigPort, field: &str) -> Result<NaiveDate, OrbError> {
    let value = required(config, BUILD_SECTION, field)?;
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| OrbError::ConfigInvalid {
        section: BUILD_SECTION.to_string(),
        key: field.to_string(),
        reason: format!("invalid {field} format, expected YYYY-MM-DD"),
    })
}

/// A non-empty value for `[section] key`.
pub(crate) fn required(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, OrbError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(OrbError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Parse `[section] key`, falling back to `default` only when the key is
/// absent. A present but unparsable value is an error.
pub(crate) fn parse_or<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, OrbError>
where
    T: FromStr,
    T::Err: Display,
{
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| OrbError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: format!("`{}`: {e}", raw.trim()),
        }),
    }
}

pub(crate) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const INSTRUMENT: &str = r#"
[instrument.MGC]
timezone = Australia/Brisbane
orb_times = 0900, 1000
"#;

    #[test]
    fn valid_build_config_passes() {
        let config = make_config(&format!(
            "[build]\ninstruments = mgc\nstart_date = 2024-01-01\nend_date = 2024-03-31\n\
             parallel = true\n{INSTRUMENT}"
        ));
        let build = validate_build_config(&config).unwrap();
        assert_eq!(build.specs.len(), 1);
        assert_eq!(build.specs[0].instrument(), "MGC");
        assert!(build.resume);
        assert!(build.parallel);
        assert!(build.instrument("MGC").is_ok());
        assert!(build.resolver().calendar("MGC").is_ok());
    }

    #[test]
    fn unknown_instrument_lookup_is_unconfigured() {
        let config = make_config(&format!(
            "[build]\ninstruments = MGC\nstart_date = 2024-01-01\n\
             end_date = 2024-01-31\n{INSTRUMENT}"
        ));
        let build = validate_build_config(&config).unwrap();
        assert!(matches!(
            build.instrument("NQ"),
            Err(OrbError::Unconfigured { .. })
        ));
    }

    #[test]
    fn missing_instruments_fails() {
        let config = make_config("[build]\nstart_date = 2024-01-01\nend_date = 2024-01-31\n");
        match validate_build_config(&config) {
            Err(OrbError::ConfigMissing { key, .. }) => assert_eq!(key, "instruments"),
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_instrument_fails() {
        let config = make_config(&format!(
            "[build]\ninstruments = MGC, mgc\nstart_date = 2024-01-01\n\
             end_date = 2024-01-31\n{INSTRUMENT}"
        ));
        assert!(matches!(
            validate_build_config(&config),
            Err(OrbError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn invalid_start_date_format_fails() {
        let config = make_config(
            "[build]\ninstruments = MGC\nstart_date = 01/01/2024\nend_date = 2024-01-31\n",
        );
        match validate_build_config(&config) {
            Err(OrbError::ConfigInvalid { key, .. }) => assert_eq!(key, "start_date"),
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn start_after_end_fails() {
        let config = make_config(
            "[build]\ninstruments = MGC\nstart_date = 2024-02-01\nend_date = 2024-01-31\n",
        );
        assert!(matches!(
            validate_build_config(&config),
            Err(OrbError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn instrument_section_is_validated_up_front() {
        let config = make_config(
            "[build]\ninstruments = MGC\nstart_date = 2024-01-01\nend_date = 2024-01-31\n",
        );
        match validate_build_config(&config) {
            Err(OrbError::ConfigMissing { section, key }) => {
                assert_eq!(section, "instrument.MGC");
                assert_eq!(key, "timezone");
            }
            other => panic!("expected ConfigMissing, got {other:?}"),
        }
    }

    #[test]
    fn parse_or_distinguishes_absent_from_invalid() {
        let config = make_config("[x]\nn = 7\nbad = seven\n");
        assert_eq!(parse_or::<u32>(&config, "x", "n", 1).unwrap(), 7);
        assert_eq!(parse_or::<u32>(&config, "x", "absent", 1).unwrap(), 1);
        assert!(parse_or::<u32>(&config, "x", "bad", 1).is_err());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
    }
}
