//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/labscope.toml` by default)
//! 2. environment variables prefixed with `LABSCOPE_`, nested keys separated
//!    by a double underscore (`LABSCOPE_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use labscope::config::LabscopeConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = LabscopeConfig::load()?;
//! config.validate().map_err(anyhow::Error::msg)?;
//! println!("Application: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use labscope_storage::StorageFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/labscope.toml";

/// Hardware types the application knows how to build.
pub const HARDWARE_TYPES: [&str; 6] = [
    "number_gen",
    "andor_spec",
    "andor_ccd",
    "mcl_xy_stage",
    "mcl_z_stage",
    "mock_xy_stage",
];

/// Measurement types the application knows how to build.
pub const MEASUREMENT_TYPES: [&str; 4] = [
    "number_gen_readout",
    "number_gen_readout_simple",
    "number_gen_readout_extendable_dataset",
    "example_2d_scan",
];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabscopeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where measurement files go
    #[serde(default)]
    pub storage: StorageConfig,
    /// Hardware components, in connection order
    #[serde(default)]
    pub hardware: Vec<HardwareDefinition>,
    /// Measurements available to run
    #[serde(default)]
    pub measurements: Vec<MeasurementDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, recorded in every data file
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for measurement files
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    /// File format (json or hdf5)
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            format: default_format(),
        }
    }
}

/// Hardware component definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareDefinition {
    /// Component type (`number_gen`, `andor_spec`, `mcl_xy_stage`, ...)
    pub r#type: String,
    /// Whether this component is built at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Connect while the application starts
    #[serde(default)]
    pub connect_on_startup: bool,
    /// Initial setting values (`name = value`)
    #[serde(default = "empty_table")]
    pub settings: toml::Value,
}

/// Measurement definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementDefinition {
    /// Measurement type (`example_2d_scan`, `number_gen_readout`, ...)
    pub r#type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Hardware providing the signal. Defaults to `number_gen` for readouts
    /// and `andor_ccd` for the scan.
    #[serde(default)]
    pub source: Option<String>,
    /// Initial setting values (`name = value`)
    #[serde(default = "empty_table")]
    pub settings: toml::Value,
}

impl MeasurementDefinition {
    pub fn source_or_default(&self) -> &str {
        match &self.source {
            Some(source) => source,
            None if self.r#type == "example_2d_scan" => "andor_ccd",
            None => "number_gen",
        }
    }
}

// Default value functions
fn default_name() -> String {
    "labscope".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_format() -> String {
    "json".to_string()
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl LabscopeConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABSCOPE_").split("__"))
            .extract()
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(toml)).extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        let format: StorageFormat = self
            .storage
            .format
            .parse()
            .map_err(|e| format!("Invalid storage format: {e}"))?;
        if !format.is_enabled() {
            return Err(format!(
                "Storage format '{}' is not compiled in",
                self.storage.format
            ));
        }

        let mut types = HashSet::new();
        for hw in &self.hardware {
            if !HARDWARE_TYPES.contains(&hw.r#type.as_str()) {
                return Err(format!(
                    "Unknown hardware type '{}'. Must be one of: {}",
                    hw.r#type,
                    HARDWARE_TYPES.join(", ")
                ));
            }
            if !types.insert(hw.r#type.as_str()) {
                return Err(format!("Duplicate hardware type: {}", hw.r#type));
            }
            if !hw.settings.is_table() {
                return Err(format!("Settings of '{}' must be a table", hw.r#type));
            }
        }
        let enabled: HashSet<&str> = self
            .enabled_hardware()
            .iter()
            .map(|hw| hw.r#type.as_str())
            .collect();
        if enabled.contains("mcl_xy_stage") && enabled.contains("mock_xy_stage") {
            return Err("mcl_xy_stage and mock_xy_stage both provide axes x and y".to_string());
        }

        let mut measurements = HashSet::new();
        for m in &self.measurements {
            if !MEASUREMENT_TYPES.contains(&m.r#type.as_str()) {
                return Err(format!(
                    "Unknown measurement type '{}'. Must be one of: {}",
                    m.r#type,
                    MEASUREMENT_TYPES.join(", ")
                ));
            }
            if !measurements.insert(m.r#type.as_str()) {
                return Err(format!("Duplicate measurement: {}", m.r#type));
            }
            if !m.settings.is_table() {
                return Err(format!("Settings of '{}' must be a table", m.r#type));
            }
        }

        Ok(())
    }

    /// Get all enabled hardware definitions
    pub fn enabled_hardware(&self) -> Vec<&HardwareDefinition> {
        self.hardware.iter().filter(|hw| hw.enabled).collect()
    }

    /// Get all enabled measurement definitions
    pub fn enabled_measurements(&self) -> Vec<&MeasurementDefinition> {
        self.measurements.iter().filter(|m| m.enabled).collect()
    }

    pub fn storage_format(&self) -> Result<StorageFormat, String> {
        self.storage
            .format
            .parse()
            .map_err(|e| format!("Invalid storage format: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [application]
        name = "test-scope"
        log_level = "debug"

        [storage]
        save_dir = "/tmp/labscope"

        [[hardware]]
        type = "number_gen"
        connect_on_startup = true
        settings = { amplitude = 2.0 }

        [[hardware]]
        type = "andor_ccd"

        [[measurements]]
        type = "example_2d_scan"
        settings = { Nh = 3, Nv = 2 }
    "#;

    #[test]
    fn test_parse_sample() {
        let config = LabscopeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.application.name, "test-scope");
        assert_eq!(config.application.log_format, "pretty");
        assert_eq!(config.storage.format, "json");
        assert_eq!(config.hardware.len(), 2);
        assert!(config.hardware[0].connect_on_startup);
        assert!(!config.hardware[1].connect_on_startup);
        assert!(config.hardware[1].settings.is_table());
        assert_eq!(config.measurements[0].source_or_default(), "andor_ccd");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LabscopeConfig::from_toml_str("").unwrap();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.storage.save_dir, PathBuf::from("data"));
        assert!(config.hardware.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = LabscopeConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_hardware() {
        let config = LabscopeConfig::from_toml_str(
            r#"
            [[hardware]]
            type = "number_gen"
            [[hardware]]
            type = "number_gen"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate hardware type"));
    }

    #[test]
    fn test_unknown_types_rejected() {
        let config = LabscopeConfig::from_toml_str("[[hardware]]\ntype = \"laser\"").unwrap();
        assert!(config.validate().unwrap_err().contains("Unknown hardware type"));

        let config =
            LabscopeConfig::from_toml_str("[[measurements]]\ntype = \"fast_scan\"").unwrap();
        assert!(config
            .validate()
            .unwrap_err()
            .contains("Unknown measurement type"));
    }

    #[test]
    fn test_both_xy_stages_rejected() {
        let config = LabscopeConfig::from_toml_str(
            r#"
            [[hardware]]
            type = "mcl_xy_stage"
            [[hardware]]
            type = "mock_xy_stage"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = LabscopeConfig::load_from(path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_hardware().len(), 3);
        assert_eq!(config.enabled_measurements().len(), 4);
    }

    #[test]
    fn test_readout_source_defaults_to_number_gen() {
        let config =
            LabscopeConfig::from_toml_str("[[measurements]]\ntype = \"number_gen_readout\"")
                .unwrap();
        assert_eq!(config.measurements[0].source_or_default(), "number_gen");
        assert_eq!(config.enabled_measurements().len(), 1);
    }
}
