use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::GpioError;

pub const DEFAULT_CONTROL_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Default for Edge {
    fn default() -> Self {
        Edge::Both
    }
}

/// A writable per-pin attribute file and the values the kernel accepts for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Direction,
    Edge,
    ActiveLow,
}

impl Attribute {
    pub fn file_name(&self) -> &'static str {
        match self {
            Attribute::Direction => "direction",
            Attribute::Edge => "edge",
            Attribute::ActiveLow => "active_low",
        }
    }

    pub fn allowed_values(&self) -> &'static [&'static str] {
        match self {
            Attribute::Direction => &["in", "out"],
            Attribute::Edge => &["none", "rising", "falling", "both"],
            Attribute::ActiveLow => &["0", "1"],
        }
    }

    /// Case-insensitive match against [`Attribute::allowed_values`], returning
    /// the canonical lower-case token.
    pub fn validate(&self, value: &str) -> Result<&'static str, GpioError> {
        let lowered = value.trim().to_ascii_lowercase();
        self.allowed_values()
            .iter()
            .copied()
            .find(|allowed| *allowed == lowered)
            .ok_or_else(|| {
                GpioError::InvalidArgument(format!(
                    "Invalid option {value} for {} (available options: {})",
                    self.file_name(),
                    self.allowed_values().join(", ")
                ))
            })
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Attribute::Direction.validate(s)? {
            "in" => Ok(Direction::In),
            _ => Ok(Direction::Out),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Edge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

impl FromStr for Edge {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match Attribute::Edge.validate(s)? {
            "none" => Edge::None,
            "rising" => Edge::Rising,
            "falling" => Edge::Falling,
            _ => Edge::Both,
        })
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options a handle is constructed from.
///
/// Values are kept as the caller supplied them (command line, JSON file) and
/// only validated while the pin is being configured, so a bad option surfaces
/// after export and exercises the rollback path.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    pub pin: u32,
    pub direction: String,
    #[serde(default = "default_edge")]
    pub edge: String,
    #[serde(default)]
    pub active_low: Option<String>,
    #[serde(default = "default_control_root")]
    pub control_root: PathBuf,
}

fn default_edge() -> String {
    Edge::default().as_str().to_string()
}

fn default_control_root() -> PathBuf {
    PathBuf::from(DEFAULT_CONTROL_ROOT)
}

impl PinConfig {
    pub fn new(pin: u32, direction: impl Into<String>) -> Self {
        Self {
            pin,
            direction: direction.into(),
            edge: default_edge(),
            active_low: None,
            control_root: default_control_root(),
        }
    }

    pub fn input(pin: u32) -> Self {
        Self::new(pin, Direction::In.as_str())
    }

    pub fn output(pin: u32) -> Self {
        Self::new(pin, Direction::Out.as_str())
    }

    pub fn with_edge(mut self, edge: impl Into<String>) -> Self {
        self.edge = edge.into();
        self
    }

    pub fn with_active_low(mut self, active_low: bool) -> Self {
        self.active_low = Some(if active_low { "1" } else { "0" }.to_string());
        self
    }

    pub fn with_control_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.control_root = root.into();
        self
    }

    pub fn pin_dir(&self) -> PathBuf {
        self.control_root.join(format!("gpio{}", self.pin))
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))
    }
}

/// Pin configuration as accepted by the kernel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinSettings {
    pub direction: Direction,
    pub edge: Option<Edge>,
    pub active_low: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_fill_edge_and_root() {
        let cfg: PinConfig = serde_json::from_str(r#"{"pin": 17, "direction": "in"}"#).unwrap();
        assert_eq!(cfg.edge, "both");
        assert_eq!(cfg.active_low, None);
        assert_eq!(cfg.control_root, PathBuf::from(DEFAULT_CONTROL_ROOT));
        assert_eq!(cfg.pin_dir(), PathBuf::from("/sys/class/gpio/gpio17"));
    }

    #[test]
    fn validation_is_case_insensitive() {
        assert_eq!(Attribute::Edge.validate("RiSiNg").unwrap(), "rising");
        assert_eq!(Attribute::Direction.validate("OUT").unwrap(), "out");
        assert_eq!("Falling".parse::<Edge>().unwrap(), Edge::Falling);
    }

    #[test]
    fn validation_rejects_unknown_values() {
        let err = Attribute::Edge.validate("sideways").unwrap_err();
        assert!(err.is_invalid_argument());
        let err = Attribute::ActiveLow.validate("2").unwrap_err();
        assert!(err.is_invalid_argument());
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = PinConfig::load_from_file("/nonexistent/sgpio.json").unwrap_err();
        assert!(matches!(err, GpioError::Config(_)));
    }
}
