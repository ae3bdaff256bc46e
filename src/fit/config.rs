//! Typed free/fixed parameter configuration.
//!
//! Each of the four decline parameters is either `Free` (with bounds and an
//! initial guess) or `Fixed` (baked into the objective as a constant), so "a
//! parameter in both sets" or "in neither" is unrepresentable. Bounds are
//! validated once at construction and the configuration is immutable
//! afterwards.
//!
//! Free parameters are exposed to optimizers in the canonical order
//! `Qi, Dei, Def, b`.

use serde::{Deserialize, Serialize};

use crate::domain::DeclineParameters;
use crate::error::CoreError;

/// The four decline parameters, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    Qi,
    Dei,
    Def,
    B,
}

impl ParamName {
    pub const ALL: [ParamName; 4] = [ParamName::Qi, ParamName::Dei, ParamName::Def, ParamName::B];

    pub fn display_name(self) -> &'static str {
        match self {
            ParamName::Qi => "Qi",
            ParamName::Dei => "Dei",
            ParamName::Def => "Def",
            ParamName::B => "b",
        }
    }
}

/// How a single parameter participates in the fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamSetting {
    Free { low: f64, high: f64, guess: f64 },
    Fixed(f64),
}

/// Complete fit configuration: one setting per decline parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConfiguration {
    qi: ParamSetting,
    dei: ParamSetting,
    def_: ParamSetting,
    b: ParamSetting,
}

impl FitConfiguration {
    /// Build and validate a configuration.
    ///
    /// Fails fast (before any optimization) on inverted bounds, a guess
    /// outside its bounds, non-finite values, or a configuration with no
    /// free parameter at all.
    pub fn new(
        qi: ParamSetting,
        dei: ParamSetting,
        def_: ParamSetting,
        b: ParamSetting,
    ) -> Result<Self, CoreError> {
        let config = Self { qi, dei, def_, b };
        for name in ParamName::ALL {
            validate_setting(name, config.setting(name))?;
        }
        if config.free_names().is_empty() {
            return Err(CoreError::configuration(
                "at least one parameter must be free",
            ));
        }
        Ok(config)
    }

    pub fn setting(&self, name: ParamName) -> ParamSetting {
        match name {
            ParamName::Qi => self.qi,
            ParamName::Dei => self.dei,
            ParamName::Def => self.def_,
            ParamName::B => self.b,
        }
    }

    /// Names of the free parameters, in canonical order.
    pub fn free_names(&self) -> Vec<ParamName> {
        ParamName::ALL
            .into_iter()
            .filter(|&n| matches!(self.setting(n), ParamSetting::Free { .. }))
            .collect()
    }

    /// Number of free parameters.
    pub fn free_len(&self) -> usize {
        self.free_names().len()
    }

    /// (low, high) per free parameter, in canonical order.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        ParamName::ALL
            .into_iter()
            .filter_map(|n| match self.setting(n) {
                ParamSetting::Free { low, high, .. } => Some((low, high)),
                ParamSetting::Fixed(_) => None,
            })
            .collect()
    }

    /// Initial guess per free parameter, in canonical order.
    pub fn initial_guess(&self) -> Vec<f64> {
        ParamName::ALL
            .into_iter()
            .filter_map(|n| match self.setting(n) {
                ParamSetting::Free { guess, .. } => Some(guess),
                ParamSetting::Fixed(_) => None,
            })
            .collect()
    }

    /// Substitute free values (canonical order) into the full parameter set.
    ///
    /// Returns a `Configuration` error when the assembled set violates the
    /// physical envelope (the objective treats that as an infinite-cost
    /// candidate rather than a hard failure).
    pub fn assemble(&self, free: &[f64]) -> Result<DeclineParameters, CoreError> {
        if free.len() != self.free_len() {
            return Err(CoreError::configuration(format!(
                "expected {} free values, got {}",
                self.free_len(),
                free.len()
            )));
        }
        let mut idx = 0;
        let mut value = |setting: ParamSetting| match setting {
            // Length was checked above, so the index stays in range.
            ParamSetting::Free { .. } => {
                let v = free[idx];
                idx += 1;
                v
            }
            ParamSetting::Fixed(v) => v,
        };
        let qi = value(self.qi);
        let dei = value(self.dei);
        let def_ = value(self.def_);
        let b = value(self.b);
        DeclineParameters::new(qi, dei, def_, b)
    }
}

fn validate_setting(name: ParamName, setting: ParamSetting) -> Result<(), CoreError> {
    match setting {
        ParamSetting::Fixed(v) => {
            if !v.is_finite() {
                return Err(CoreError::configuration(format!(
                    "fixed value for {} must be finite",
                    name.display_name()
                )));
            }
        }
        ParamSetting::Free { low, high, guess } => {
            if !(low.is_finite() && high.is_finite() && guess.is_finite()) {
                return Err(CoreError::configuration(format!(
                    "bounds for {} must be finite",
                    name.display_name()
                )));
            }
            if low > high {
                return Err(CoreError::configuration(format!(
                    "inverted bounds for {}: [{low}, {high}]",
                    name.display_name()
                )));
            }
            if guess < low || guess > high {
                return Err(CoreError::configuration(format!(
                    "initial guess {guess} for {} outside [{low}, {high}]",
                    name.display_name()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dei_b_config() -> FitConfiguration {
        FitConfiguration::new(
            ParamSetting::Fixed(500.0),
            ParamSetting::Free {
                low: 0.06,
                high: 0.98,
                guess: 0.15,
            },
            ParamSetting::Fixed(0.06),
            ParamSetting::Free {
                low: 0.5,
                high: 1.4,
                guess: 0.9,
            },
        )
        .unwrap()
    }

    #[test]
    fn free_names_follow_canonical_order() {
        let config = dei_b_config();
        assert_eq!(config.free_names(), vec![ParamName::Dei, ParamName::B]);
        assert_eq!(config.initial_guess(), vec![0.15, 0.9]);
        assert_eq!(config.bounds(), vec![(0.06, 0.98), (0.5, 1.4)]);
    }

    #[test]
    fn assemble_substitutes_in_order() {
        let config = dei_b_config();
        let p = config.assemble(&[0.25, 1.1]).unwrap();
        assert_eq!(p.qi, 500.0);
        assert_eq!(p.dei, 0.25);
        assert_eq!(p.def_, 0.06);
        assert_eq!(p.b, 1.1);
    }

    #[test]
    fn inverted_bounds_fail_fast() {
        let err = FitConfiguration::new(
            ParamSetting::Fixed(500.0),
            ParamSetting::Free {
                low: 0.9,
                high: 0.1,
                guess: 0.5,
            },
            ParamSetting::Fixed(0.06),
            ParamSetting::Fixed(0.9),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn guess_outside_bounds_fails_fast() {
        let err = FitConfiguration::new(
            ParamSetting::Fixed(500.0),
            ParamSetting::Free {
                low: 0.1,
                high: 0.3,
                guess: 0.5,
            },
            ParamSetting::Fixed(0.06),
            ParamSetting::Fixed(0.9),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn all_fixed_is_rejected() {
        let err = FitConfiguration::new(
            ParamSetting::Fixed(500.0),
            ParamSetting::Fixed(0.15),
            ParamSetting::Fixed(0.06),
            ParamSetting::Fixed(0.9),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
