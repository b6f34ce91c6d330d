use crate::reading::Reading;
use serde::Deserialize;
use std::fmt;

pub const DEFAULT_TEMPERATURE: Range = Range {
    min: 18.0,
    max: 28.0,
};
pub const DEFAULT_HUMIDITY: Range = Range {
    min: 30.0,
    max: 70.0,
};

/// Inclusive `[min, max]` bounds for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Result<Self, ThresholdError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(ThresholdError::NonFinite { min, max });
        }
        if min > max {
            return Err(ThresholdError::Inverted { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("threshold bounds must be finite (min={min}, max={max})")]
    NonFinite { min: f64, max: f64 },
    #[error("threshold min {min} is greater than max {max}")]
    Inverted { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub temperature: Range,
    pub humidity: Range,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            humidity: DEFAULT_HUMIDITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
}

/// Why a reading failed evaluation. Renders as the alert message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViolationReason {
    pub metric: Metric,
    pub value: f64,
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = format_value(self.value);
        match self.metric {
            Metric::Temperature => write!(f, "Temperature out of range: {value}°C"),
            Metric::Humidity => write!(f, "Humidity out of range: {value}%"),
        }
    }
}

/// Checks temperature, then humidity. Only the first violated metric is
/// reported even when both are out of range.
pub fn evaluate(reading: &Reading, config: &ThresholdConfig) -> Option<ViolationReason> {
    if !config.temperature.contains(reading.temperature) {
        return Some(ViolationReason {
            metric: Metric::Temperature,
            value: reading.temperature,
        });
    }
    if !config.humidity.contains(reading.humidity) {
        return Some(ViolationReason {
            metric: Metric::Humidity,
            value: reading.humidity,
        });
    }
    None
}

// Integral values keep a trailing ".0" (30.0, not 30).
fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}
