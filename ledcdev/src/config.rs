//! Configuration management for ledcdev.
//!
//! Configuration comes from an optional JSON file, then environment
//! variables, then command-line flags (applied by the binary). Every field has
//! a default matching the stock `led_driver` module, so an empty file (or no
//! file) yields a working setup.

use crate::device::{DEFAULT_CAPACITY, MAX_CAPACITY};
use crate::error::Error;
use crate::gpio::LineSpec;
use crate::of::DeviceNode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Device naming and buffer size
    pub device: DeviceConfig,

    /// How the LED line is located
    pub line: LineSpec,

    /// Which GPIO controller drives the line
    pub gpio: GpioBackend,

    /// When the driver comes up
    pub lifecycle: Lifecycle,
}

/// Naming and capacity of the device file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Name the device-number range is registered under
    pub name: String,

    /// Device class the node is grouped in
    pub class: String,

    /// Node name processes open
    pub node: String,

    /// FileBuffer size in bytes
    pub capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "led_driver".to_string(),
            class: "led_class".to_string(),
            node: "led".to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// GPIO controller selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GpioBackend {
    /// In-memory chip
    Sim {
        #[serde(default = "default_sim_lines")]
        lines: u32,

        /// Line names, label -> line number
        #[serde(default)]
        names: BTreeMap<String, u32>,
    },

    /// Linux GPIO character device
    Cdev { chip: PathBuf },
}

fn default_sim_lines() -> u32 {
    54
}

impl Default for GpioBackend {
    fn default() -> Self {
        GpioBackend::Sim {
            lines: default_sim_lines(),
            names: BTreeMap::from([("led".to_string(), 17)]),
        }
    }
}

/// Driver lifecycle path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Lifecycle {
    /// Register everything at startup with a statically chosen line
    #[default]
    Eager,

    /// Bind to matching nodes of a hardware description
    Bus {
        /// JSON hardware description
        tree: PathBuf,
    },
}

/// Parse an environment variable, ignoring it when unset or malformed.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

impl Config {
    /// Load configuration: file (if given), then environment, then
    /// validation.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// File (if given) plus environment, not yet validated, so callers can
    /// layer further overrides first.
    pub fn read(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `LEDCDEV_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(capacity) = env_parse::<usize>("LEDCDEV_CAPACITY") {
            self.device.capacity = capacity;
        }
        if let Some(node) = env_parse::<String>("LEDCDEV_NODE") {
            self.device.node = node;
        }
        if let Some(line) = env_parse::<u32>("LEDCDEV_LINE") {
            self.line = LineSpec::Number { line };
        }
        if let Some(chip) = env_parse::<PathBuf>("LEDCDEV_GPIO_CHIP") {
            self.gpio = GpioBackend::Cdev { chip };
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let device = &self.device;
        if device.capacity == 0 || device.capacity > MAX_CAPACITY {
            return Err(Error::Config(format!(
                "capacity {} outside 1..={MAX_CAPACITY}",
                device.capacity
            )));
        }
        for (field, value) in [
            ("name", &device.name),
            ("class", &device.class),
            ("node", &device.node),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("device {field} is empty")));
            }
        }
        if let LineSpec::Label { name } = &self.line {
            if name.is_empty() {
                return Err(Error::Config("line label is empty".to_string()));
            }
        }
        if self.lifecycle == Lifecycle::Eager && matches!(self.line, LineSpec::Property { .. }) {
            return Err(Error::Config(
                "property lines need a bound hardware node; use the bus lifecycle".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the hardware description of the bus lifecycle, if any.
    pub fn load_tree(&self) -> anyhow::Result<Option<DeviceNode>> {
        match &self.lifecycle {
            Lifecycle::Eager => Ok(None),
            Lifecycle::Bus { tree } => {
                let text = std::fs::read_to_string(tree)
                    .with_context(|| format!("reading device tree {}", tree.display()))?;
                let node = DeviceNode::from_json(&text)
                    .with_context(|| format!("parsing device tree {}", tree.display()))?;
                Ok(Some(node))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_match_stock_module() {
        let config = Config::default();
        assert_eq!(config.device.name, "led_driver");
        assert_eq!(config.device.class, "led_class");
        assert_eq!(config.device.node, "led");
        assert_eq!(config.device.capacity, 15);
        assert_eq!(config.line, LineSpec::Label { name: "led".into() });
        assert_eq!(config.lifecycle, Lifecycle::Eager);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_full_json() {
        let config = Config::from_json(
            r#"{
                "device": { "name": "led2", "node": "led2", "capacity": 16 },
                "line": { "by": "property", "property": "led-gpios", "index": 0 },
                "gpio": { "backend": "cdev", "chip": "/dev/gpiochip0" },
                "lifecycle": { "mode": "bus", "tree": "/etc/ledcdev/tree.json" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.device.name, "led2");
        assert_eq!(config.device.class, "led_class");
        assert_eq!(config.device.capacity, 16);
        assert_eq!(
            config.gpio,
            GpioBackend::Cdev {
                chip: "/dev/gpiochip0".into()
            }
        );
        assert!(matches!(config.lifecycle, Lifecycle::Bus { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_demo_configs_parse() {
        let eager = Config::from_json(include_str!("../demos/eager.json")).unwrap();
        assert_eq!(eager, Config::default());

        let bus = Config::from_json(include_str!("../demos/bus.json")).unwrap();
        assert!(bus.validate().is_ok());
        let tree = DeviceNode::from_json(include_str!("../demos/tree.json")).unwrap();
        assert!(tree.find("/leds/status").is_some());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = Config::from_json(r#"{"gpio": {"backend": "pwm"}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.device.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.node.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.line = LineSpec::Property {
            property: "led-gpios".into(),
            index: 0,
        };
        assert!(config.validate().is_err(), "property line without bus");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("LEDCDEV_CAPACITY", "16");
        std::env::set_var("LEDCDEV_LINE", "22");
        std::env::set_var("LEDCDEV_NODE", "led2");
        let config = Config::load(None).unwrap();
        std::env::remove_var("LEDCDEV_CAPACITY");
        std::env::remove_var("LEDCDEV_LINE");
        std::env::remove_var("LEDCDEV_NODE");

        assert_eq!(config.device.capacity, 16);
        assert_eq!(config.device.node, "led2");
        assert_eq!(config.line, LineSpec::Number { line: 22 });
    }

    #[test]
    #[serial]
    fn test_env_malformed_is_ignored() {
        std::env::set_var("LEDCDEV_CAPACITY", "lots");
        let config = Config::load(None).unwrap();
        std::env::remove_var("LEDCDEV_CAPACITY");
        assert_eq!(config.device.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"line": {{"by": "number", "line": 4}}}}"#).unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.line, LineSpec::Number { line: 4 });
    }

    #[test]
    #[serial]
    fn test_read_defers_validation_to_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"line": {{"by": "property"}}}}"#).unwrap();
        assert!(Config::load(Some(file.path())).is_err());

        let mut config = Config::read(Some(file.path())).unwrap();
        assert!(config.validate().is_err());
        config.line = LineSpec::Number { line: 4 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_from(Path::new("/nonexistent/ledcdev.json")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
