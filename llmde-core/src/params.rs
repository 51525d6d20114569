//! Generation parameters shared by every provider.
//!
//! Temperature and top-p are validated to `[0.0, 1.0]` for every provider,
//! even those accepting a wider native range, so the same parameters behave
//! the same way regardless of which model runs them. Unset values are kept
//! unset: the provider's own default sampling applies.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const UNIT_RANGE: RangeInclusive<f64> = 0.0..=1.0;

/// An out-of-range generation parameter.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field} must be {expected}. Provided {value} is invalid.")]
pub struct ValidationError {
    pub field: &'static str,
    pub value: String,
    pub expected: &'static str,
}

impl ValidationError {
    fn new(field: &'static str, value: impl fmt::Display, expected: &'static str) -> Self {
        Self {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Raw, user-supplied generation parameters. Integers are signed so that
/// negative input reaches validation instead of failing to parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub max_tokens: Option<i64>,
    pub system_instruction: Option<String>,
}

impl GenerationParams {
    pub fn validate(self) -> Result<GenerationConfig, ValidationError> {
        let temperature = check_unit("temperature", self.temperature)?;
        let top_p = check_unit("top_p", self.top_p)?;

        let top_k = match self.top_k {
            None => None,
            Some(value) if value >= 1 => Some(
                u32::try_from(value)
                    .map_err(|_| ValidationError::new("top_k", value, "a positive 32-bit integer"))?,
            ),
            Some(value) => return Err(ValidationError::new("top_k", value, ">= 1")),
        };

        let max_tokens = match self.max_tokens {
            None => DEFAULT_MAX_TOKENS,
            Some(value) if value > 0 => u32::try_from(value).map_err(|_| {
                ValidationError::new("max_tokens", value, "a positive 32-bit integer")
            })?,
            Some(value) => {
                return Err(ValidationError::new(
                    "max_tokens",
                    value,
                    "a positive integer",
                ));
            }
        };

        Ok(GenerationConfig {
            temperature,
            top_p,
            top_k,
            max_tokens,
            system_instruction: self.system_instruction,
        })
    }
}

fn check_unit(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    match value {
        None => Ok(None),
        Some(v) if UNIT_RANGE.contains(&v) => Ok(Some(v)),
        Some(v) => Err(ValidationError::new(field, v, "between 0.0 and 1.0")),
    }
}

/// Validated, immutable generation settings. Only obtainable through
/// [`GenerationParams::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    temperature: Option<f64>,
    top_p: Option<f64>,
    top_k: Option<u32>,
    max_tokens: u32,
    system_instruction: Option<String>,
}

impl GenerationConfig {
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn top_k(&self) -> Option<u32> {
        self.top_k
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn with_system_instruction(mut self, instruction: Option<String>) -> Self {
        self.system_instruction = instruction;
        self
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_instruction: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams::default()
    }

    #[test]
    fn accepts_values_inside_ranges_unchanged() {
        for (temperature, top_p, top_k, max_tokens) in [
            (0.0, 0.0, 1, 1),
            (0.5, 0.95, 40, 4096),
            (1.0, 1.0, 500, 65_536),
        ] {
            let config = GenerationParams {
                temperature: Some(temperature),
                top_p: Some(top_p),
                top_k: Some(top_k),
                max_tokens: Some(max_tokens),
                system_instruction: Some("be precise".to_string()),
            }
            .validate()
            .unwrap();

            assert_eq!(config.temperature(), Some(temperature));
            assert_eq!(config.top_p(), Some(top_p));
            assert_eq!(config.top_k(), Some(top_k as u32));
            assert_eq!(config.max_tokens(), max_tokens as u32);
            assert_eq!(config.system_instruction(), Some("be precise"));
        }
    }

    #[test]
    fn unset_values_stay_unset() {
        let config = params().validate().unwrap();
        assert_eq!(config.temperature(), None);
        assert_eq!(config.top_p(), None);
        assert_eq!(config.top_k(), None);
        assert_eq!(config.system_instruction(), None);
        assert_eq!(config.max_tokens(), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        for bad in [-0.01, 1.01, 2.0, f64::NAN] {
            let err = GenerationParams {
                temperature: Some(bad),
                ..params()
            }
            .validate()
            .unwrap_err();
            assert_eq!(err.field, "temperature");
            assert!(err.to_string().contains("between 0.0 and 1.0"));
        }
    }

    #[test]
    fn rejects_top_p_out_of_range() {
        let err = GenerationParams {
            top_p: Some(1.5),
            ..params()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.field, "top_p");
    }

    #[test]
    fn rejects_non_positive_top_k() {
        for bad in [0, -3] {
            let err = GenerationParams {
                top_k: Some(bad),
                ..params()
            }
            .validate()
            .unwrap_err();
            assert_eq!(err.field, "top_k");
            assert!(err.to_string().contains(">= 1"));
        }
    }

    #[test]
    fn rejects_non_positive_max_tokens() {
        for bad in [0, -1] {
            let err = GenerationParams {
                max_tokens: Some(bad),
                ..params()
            }
            .validate()
            .unwrap_err();
            assert_eq!(err.field, "max_tokens");
        }
    }

    #[test]
    fn rejects_max_tokens_beyond_u32() {
        let err = GenerationParams {
            max_tokens: Some(i64::from(u32::MAX) + 1),
            ..params()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.field, "max_tokens");
    }
}
