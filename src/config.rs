//! A small typed configuration store, keyed by parameter name, validated
//! against a declared schema. Each back-end publishes its own
//! [`ParamSpec`] table (see `backend::cpc::PARAMS`, `backend::serial::PARAMS`,
//! `backend::usb::PARAMS`) mirroring the `config_param_t` tables of the
//! original CAN-CPC/CAN-Serial/CAN-USB device back-ends.
//!
//! A schema's declared default is stored as `&'static str` ("default
//! text", per the data model) rather than a pre-built [`ConfigValue`],
//! since a `static` schema table must be const-initializable and
//! `ConfigValue::Str` owns a heap-allocated `String`. The text is parsed
//! into the right typed value the first time it's needed.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// A typed configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Enum(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Result<&str, ConfigError> {
        match self {
            ConfigValue::Str(s) => Ok(s),
            _ => Err(self.wrong_type("string")),
        }
    }

    pub fn as_int(&self) -> Result<i64, ConfigError> {
        match self {
            ConfigValue::Int(i) => Ok(*i),
            _ => Err(self.wrong_type("int")),
        }
    }

    pub fn as_float(&self) -> Result<f64, ConfigError> {
        match self {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Int(i) => Ok(*i as f64),
            _ => Err(self.wrong_type("float")),
        }
    }

    pub fn as_enum(&self) -> Result<&str, ConfigError> {
        match self {
            ConfigValue::Enum(s) => Ok(s),
            _ => Err(self.wrong_type("enum")),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Str(_) => "string",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Enum(_) => "enum",
        }
    }

    fn wrong_type(&self, expected: &'static str) -> ConfigError {
        ConfigError::WrongType {
            name: String::new(),
            expected,
            found: self.type_name(),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Str(s) => write!(f, "{s}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::Enum(s) => write!(f, "{s}"),
        }
    }
}

/// Which [`ConfigValue`] variant a parameter's text is parsed into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Enum,
}

impl ParamType {
    fn name(self) -> &'static str {
        match self {
            ParamType::Str => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Enum => "enum",
        }
    }
}

/// Valid-value constraint for a parameter.
#[derive(Clone, Debug)]
pub enum Constraint {
    None,
    IntRange(i64, i64),
    FloatRange(f64, f64),
    Choices(&'static [&'static str]),
}

/// The declared schema for one configuration parameter, mirroring a
/// `config_param_t` row: name, type, default text, and an allowed-value
/// constraint.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub default: &'static str,
    pub constraint: Constraint,
    pub description: &'static str,
}

impl ParamSpec {
    fn parse(&self, text: &str) -> Result<ConfigValue, ConfigError> {
        match self.param_type {
            ParamType::Str => Ok(ConfigValue::Str(text.to_owned())),
            ParamType::Enum => Ok(ConfigValue::Enum(text.to_owned())),
            ParamType::Int => text.parse::<i64>().map(ConfigValue::Int).map_err(|e| {
                ConfigError::InvalidValue {
                    name: self.name.to_owned(),
                    reason: format!("`{text}` is not an integer: {e}"),
                }
            }),
            ParamType::Float => text.parse::<f64>().map(ConfigValue::Float).map_err(|e| {
                ConfigError::InvalidValue {
                    name: self.name.to_owned(),
                    reason: format!("`{text}` is not a float: {e}"),
                }
            }),
        }
    }

    fn default_value(&self) -> ConfigValue {
        self.parse(self.default)
            .expect("a schema's declared default must parse under its own declared type")
    }

    fn validate(&self, value: &ConfigValue) -> Result<(), ConfigError> {
        match (&self.constraint, value) {
            (Constraint::None, _) => Ok(()),
            (Constraint::IntRange(lo, hi), ConfigValue::Int(i)) => {
                if *i < *lo || *i > *hi {
                    Err(ConfigError::InvalidValue {
                        name: self.name.to_owned(),
                        reason: format!("{i} is outside the allowed range [{lo}, {hi}]"),
                    })
                } else {
                    Ok(())
                }
            }
            (Constraint::FloatRange(lo, hi), ConfigValue::Float(x)) => {
                if *x < *lo || *x > *hi {
                    Err(ConfigError::InvalidValue {
                        name: self.name.to_owned(),
                        reason: format!("{x} is outside the allowed range [{lo}, {hi}]"),
                    })
                } else {
                    Ok(())
                }
            }
            (Constraint::Choices(choices), ConfigValue::Enum(s)) => {
                if choices.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidValue {
                        name: self.name.to_owned(),
                        reason: format!("`{s}` is not one of {choices:?}"),
                    })
                }
            }
            _ => Err(ConfigError::WrongType {
                name: self.name.to_owned(),
                expected: self.param_type.name(),
                found: value.type_name(),
            }),
        }
    }
}

/// A validated, typed set of configuration parameters for one back-end.
#[derive(Clone, Debug)]
pub struct Config {
    schema: &'static [ParamSpec],
    values: BTreeMap<&'static str, ConfigValue>,
}

impl Config {
    /// Builds a config seeded with every parameter's declared default.
    pub fn from_defaults(schema: &'static [ParamSpec]) -> Self {
        let values = schema.iter().map(|p| (p.name, p.default_value())).collect();
        Config { schema, values }
    }

    fn spec(&self, name: &str) -> Result<&'static ParamSpec, ConfigError> {
        self.schema
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ConfigError::UnknownParam(name.to_owned()))
    }

    /// Sets a parameter from an already-typed value.
    pub fn set(&mut self, name: &str, value: ConfigValue) -> Result<(), ConfigError> {
        let spec = self.spec(name)?;
        spec.validate(&value)?;
        self.values.insert(spec.name, value);
        Ok(())
    }

    /// Sets a parameter by parsing `text` under its declared type, e.g. an
    /// argument collected from a CLI flag. Used for the CLI surface's
    /// generic `--param name=value` escape hatch.
    pub fn set_str(&mut self, name: &str, text: &str) -> Result<(), ConfigError> {
        let spec = self.spec(name)?;
        let value = spec.parse(text)?;
        spec.validate(&value)?;
        self.values.insert(spec.name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&ConfigValue, ConfigError> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParam(name.to_owned()))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, ConfigError> {
        self.get(name)?.as_str()
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ConfigError> {
        self.get(name)?.as_int()
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ConfigError> {
        self.get(name)?.as_float()
    }

    pub fn get_enum(&self, name: &str) -> Result<&str, ConfigError> {
        self.get(name)?.as_enum()
    }

    pub fn schema(&self) -> &'static [ParamSpec] {
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SCHEMA: &[ParamSpec] = &[
        ParamSpec {
            name: "dev",
            param_type: ParamType::Str,
            default: "/dev/ttyS0",
            constraint: Constraint::None,
            description: "device path",
        },
        ParamSpec {
            name: "baud-rate",
            param_type: ParamType::Int,
            default: "38400",
            constraint: Constraint::IntRange(50, 230_400),
            description: "baud rate",
        },
        ParamSpec {
            name: "parity",
            param_type: ParamType::Enum,
            default: "none",
            constraint: Constraint::Choices(&["none", "odd", "even"]),
            description: "parity",
        },
    ];

    #[test]
    fn defaults_are_preloaded() {
        let cfg = Config::from_defaults(SCHEMA);
        assert_eq!(cfg.get_int("baud-rate").unwrap(), 38400);
    }

    #[test]
    fn rejects_out_of_range() {
        let mut cfg = Config::from_defaults(SCHEMA);
        assert!(cfg.set("baud-rate", ConfigValue::Int(1)).is_err());
    }

    #[test]
    fn rejects_unknown_enum_choice() {
        let mut cfg = Config::from_defaults(SCHEMA);
        assert!(cfg
            .set("parity", ConfigValue::Enum("mark".to_owned()))
            .is_err());
    }

    #[test]
    fn rejects_unknown_param() {
        let cfg = Config::from_defaults(SCHEMA);
        assert!(cfg.get("nonexistent").is_err());
    }

    #[test]
    fn accepts_valid_value() {
        let mut cfg = Config::from_defaults(SCHEMA);
        cfg.set("baud-rate", ConfigValue::Int(9600)).unwrap();
        assert_eq!(cfg.get_int("baud-rate").unwrap(), 9600);
    }

    #[test]
    fn set_str_parses_under_declared_type() {
        let mut cfg = Config::from_defaults(SCHEMA);
        cfg.set_str("baud-rate", "19200").unwrap();
        assert_eq!(cfg.get_int("baud-rate").unwrap(), 19200);
        assert!(cfg.set_str("baud-rate", "not-a-number").is_err());
    }
}
