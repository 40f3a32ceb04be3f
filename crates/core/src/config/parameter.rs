use std::{collections::BTreeMap, fmt};

use crate::{AtmoError, Result};

/// Textual encoding class of a persisted parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Bool,
    Int,
    Text,
}

macro_rules! parameters {
    ($($variant:ident => $name:literal : $kind:ident,)+) => {
        /// Every parameter the pipeline knows about, in persisted order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Parameter {
            $($variant,)+
        }

        impl Parameter {
            pub const ALL: &'static [Parameter] = &[$(Parameter::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Parameter::$variant => $name,)+
                }
            }

            pub fn kind(self) -> ParameterKind {
                match self {
                    $(Parameter::$variant => ParameterKind::$kind,)+
                }
            }

            /// Looks a parameter up by its persisted name.
            pub fn from_name(name: &str) -> Result<Self> {
                match name {
                    $($name => Ok(Parameter::$variant),)+
                    other => Err(AtmoError::configuration(format!(
                        "unknown parameter '{other}'"
                    ))),
                }
            }
        }
    };
}

parameters! {
    Driver => "driver": Text,
    CustomDriver => "custom_driver": Text,
    DriverParam => "driver_param": Text,
    LogLevel => "log_level": Int,
    Top => "top": Int,
    Bottom => "bottom": Int,
    Left => "left": Int,
    Right => "right": Int,
    Center => "center": Bool,
    TopLeft => "top_left": Bool,
    TopRight => "top_right": Bool,
    BottomLeft => "bottom_left": Bool,
    BottomRight => "bottom_right": Bool,
    Overscan => "overscan": Int,
    DarknessLimit => "darkness_limit": Int,
    EdgeWeighting => "edge_weighting": Int,
    WeightLimit => "weight_limit": Int,
    HueWinSize => "hue_win_size": Int,
    SatWinSize => "sat_win_size": Int,
    HueThreshold => "hue_threshold": Int,
    UniformBrightness => "uniform_brightness": Bool,
    Brightness => "brightness": Int,
    Filter => "filter": Int,
    FilterSmoothness => "filter_smoothness": Int,
    FilterLength => "filter_length": Int,
    FilterThreshold => "filter_threshold": Int,
    FilterDelay => "filter_delay": Int,
    OutputRate => "output_rate": Int,
    WcRed => "wc_red": Int,
    WcGreen => "wc_green": Int,
    WcBlue => "wc_blue": Int,
    Gamma => "gamma": Int,
    AnalyzeRate => "analyze_rate": Int,
    AnalyzeSize => "analyze_size": Int,
    Enabled => "enabled": Bool,
}

impl Parameter {
    /// Parameters whose change reopens buffers or the output device and so
    /// cannot be hot-applied while video plays.
    pub fn needs_full_reconfigure(self) -> bool {
        matches!(
            self,
            Parameter::Driver
                | Parameter::CustomDriver
                | Parameter::DriverParam
                | Parameter::Top
                | Parameter::Bottom
                | Parameter::Left
                | Parameter::Right
                | Parameter::Center
                | Parameter::TopLeft
                | Parameter::TopRight
                | Parameter::BottomLeft
                | Parameter::BottomRight
                | Parameter::AnalyzeSize
                | Parameter::AnalyzeRate
        )
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed value of a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ParameterValue {
    /// Parses the persisted textual form according to `parameter`'s kind.
    pub fn parse(parameter: Parameter, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match parameter.kind() {
            ParameterKind::Bool => match raw {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                other => Err(invalid(parameter, other)),
            },
            ParameterKind::Int => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| invalid(parameter, raw)),
            ParameterKind::Text => Ok(Self::Text(raw.to_string())),
        }
    }

    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Bool(_) => ParameterKind::Bool,
            Self::Int(_) => ParameterKind::Int,
            Self::Text(_) => ParameterKind::Text,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Bool(flag) => Some(i64::from(*flag)),
            Self::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            Self::Int(value) => Some(*value != 0),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

fn invalid(parameter: Parameter, raw: &str) -> AtmoError {
    AtmoError::configuration(format!(
        "invalid value '{raw}' for parameter '{parameter}'"
    ))
}

/// Ordered set of parameter values keyed by [`Parameter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    values: BTreeMap<Parameter, ParameterValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory defaults for a fresh installation.
    pub fn defaults() -> Self {
        let mut set = Self::new();
        for &parameter in Parameter::ALL {
            let value = match parameter {
                Parameter::Driver => ParameterValue::from("null"),
                Parameter::LogLevel => ParameterValue::Int(2),
                Parameter::Brightness => ParameterValue::Int(100),
                Parameter::DarknessLimit => ParameterValue::Int(1),
                Parameter::EdgeWeighting => ParameterValue::Int(60),
                Parameter::Filter => ParameterValue::Int(3),
                Parameter::FilterLength => ParameterValue::Int(500),
                Parameter::FilterSmoothness => ParameterValue::Int(50),
                Parameter::FilterThreshold => ParameterValue::Int(40),
                Parameter::HueWinSize | Parameter::SatWinSize => ParameterValue::Int(3),
                Parameter::HueThreshold => ParameterValue::Int(93),
                Parameter::WcRed | Parameter::WcGreen | Parameter::WcBlue => {
                    ParameterValue::Int(255)
                }
                Parameter::OutputRate => ParameterValue::Int(20),
                Parameter::Gamma => ParameterValue::Int(10),
                Parameter::AnalyzeRate => ParameterValue::Int(35),
                Parameter::AnalyzeSize => ParameterValue::Int(1),
                Parameter::Enabled => ParameterValue::Bool(true),
                other => match other.kind() {
                    ParameterKind::Bool => ParameterValue::Bool(false),
                    ParameterKind::Int => ParameterValue::Int(0),
                    ParameterKind::Text => ParameterValue::Text(String::new()),
                },
            };
            set.values.insert(parameter, value);
        }
        set
    }

    /// Parses a persisted `name -> text` mapping. Every known parameter must
    /// be present and unknown names are rejected.
    pub fn from_settings(settings: &BTreeMap<String, String>) -> Result<Self> {
        for name in settings.keys() {
            Parameter::from_name(name)?;
        }

        let mut set = Self::new();
        for &parameter in Parameter::ALL {
            let raw = settings.get(parameter.name()).ok_or_else(|| {
                AtmoError::configuration(format!("parameter '{parameter}' is missing"))
            })?;
            set.values
                .insert(parameter, ParameterValue::parse(parameter, raw)?);
        }
        Ok(set)
    }

    /// Textual encoding suitable for persisting.
    pub fn to_settings(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(parameter, value)| (parameter.name().to_string(), value.to_string()))
            .collect()
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterValue> {
        self.values.get(&parameter)
    }

    pub fn set(&mut self, parameter: Parameter, value: impl Into<ParameterValue>) {
        self.values.insert(parameter, value.into());
    }

    pub fn int(&self, parameter: Parameter) -> i64 {
        self.get(parameter)
            .and_then(ParameterValue::as_int)
            .unwrap_or_default()
    }

    pub fn flag(&self, parameter: Parameter) -> bool {
        self.get(parameter)
            .and_then(ParameterValue::as_bool)
            .unwrap_or_default()
    }

    pub fn text(&self, parameter: Parameter) -> &str {
        self.get(parameter)
            .and_then(ParameterValue::as_text)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &ParameterValue)> {
        self.values.iter().map(|(parameter, value)| (*parameter, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
