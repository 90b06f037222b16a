use config::{Config, Environment, File, FileFormat};
use error_stack::{Result, ResultExt};
use std::collections::HashMap;
use std::path::Path;
use tokio::time::Duration;

use crate::error::ForceCoolingError;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

type Sections = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct GoveeSettings {
    pub api_key: String,
    pub mac_address: String,
    pub sku_model_number: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensiboSettings {
    pub api_key: String,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub govee: GoveeSettings,
    pub sensibo: SensiboSettings,
    pub temperature_threshold: f64,
    pub http: HttpSettings,
}

impl Settings {
    /// Loads an INI file, then applies `FORCE_COOLING_<SECTION>__<KEY>` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, ForceCoolingError> {
        Settings::load_with_environment(path.as_ref(), environment())
    }

    fn load_with_environment(
        path: &Path,
        environment: Environment,
    ) -> Result<Settings, ForceCoolingError> {
        let into_context = || {
            ForceCoolingError::ConfigurationError(format!(
                "Loading configuration from '{}'",
                path.display()
            ))
        };

        let file = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()
            .change_context_lazy(into_context)?;

        let overrides = Config::builder()
            .add_source(environment)
            .build()
            .change_context_lazy(into_context)?;

        // The file keeps its section case while environment keys come lowercased,
        // so both are normalized before the overrides are layered on top
        let mut sections = normalized_sections(file).change_context_lazy(into_context)?;
        for (section, values) in normalized_sections(overrides).change_context_lazy(into_context)? {
            sections.entry(section).or_default().extend(values);
        }

        Settings::from_sections(&sections).change_context_lazy(into_context)
    }

    #[cfg(test)]
    pub fn from_ini_str(content: &str) -> Result<Settings, ForceCoolingError> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Ini))
            .build()
            .change_context(ForceCoolingError::ConfigurationError(
                "Parsing configuration".to_string(),
            ))?;

        Settings::from_sections(&normalized_sections(config)?)
    }

    fn from_sections(sections: &Sections) -> Result<Settings, ForceCoolingError> {
        let govee = GoveeSettings {
            api_key: required(sections, "Govee", "api_key")?,
            mac_address: required(sections, "Govee", "mac_address")?,
            sku_model_number: required(sections, "Govee", "sku_model_number")?,
        };

        let sensibo = SensiboSettings {
            api_key: required(sections, "Sensibo", "api_key")?,
            device_name: required(sections, "Sensibo", "device_name")?,
        };

        let threshold = required(sections, "Threshold", "temperature_threshold")?;
        let temperature_threshold = parse_threshold(&threshold)?;

        let http = match optional(sections, "Http", "timeout_seconds") {
            Some(timeout) => HttpSettings {
                timeout: parse_timeout(&timeout)?,
            },
            None => HttpSettings::default(),
        };

        Ok(Settings {
            govee,
            sensibo,
            temperature_threshold,
            http,
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix("FORCE_COOLING")
        .prefix_separator("_")
        .separator("__")
}

/// Section and key names are case-insensitive, as with configparser style files.
fn normalized_sections(config: Config) -> Result<Sections, ForceCoolingError> {
    let raw_sections = config
        .try_deserialize::<Sections>()
        .change_context(ForceCoolingError::ConfigurationError(
            "Configuration must consist of sections of string values".to_string(),
        ))?;

    let mut sections = Sections::new();
    for (section, values) in raw_sections {
        sections
            .entry(section.to_lowercase())
            .or_default()
            .extend(values.into_iter().map(|(key, value)| (key.to_lowercase(), value)));
    }

    Ok(sections)
}

fn optional(sections: &Sections, section: &str, key: &str) -> Option<String> {
    sections
        .get(&section.to_lowercase())
        .and_then(|values| values.get(key))
        .map(|value| value.trim().to_string())
}

fn required(sections: &Sections, section: &str, key: &str) -> Result<String, ForceCoolingError> {
    match optional(sections, section, key) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(ForceCoolingError::ConfigurationError(format!(
            "[{section}] {key} must not be empty"
        ))
        .into()),
        None => Err(ForceCoolingError::ConfigurationError(format!(
            "Missing [{section}] {key}"
        ))
        .into()),
    }
}

fn parse_threshold(value: &str) -> Result<f64, ForceCoolingError> {
    let invalid = || {
        ForceCoolingError::ConfigurationError(format!(
            "[Threshold] temperature_threshold '{value}' is not a number"
        ))
    };

    let threshold = value.parse::<f64>().change_context_lazy(invalid)?;
    if !threshold.is_finite() {
        return Err(invalid().into());
    }

    Ok(threshold)
}

fn parse_timeout(value: &str) -> Result<Duration, ForceCoolingError> {
    let invalid = || {
        ForceCoolingError::ConfigurationError(format!(
            "[Http] timeout_seconds '{value}' must be a positive number of seconds"
        ))
    };

    let seconds = value.parse::<u64>().change_context_lazy(invalid)?;
    if seconds == 0 {
        return Err(invalid().into());
    }

    Ok(Duration::from_secs(seconds))
}
