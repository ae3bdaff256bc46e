//! Modified-hyperbolic Arps decline model.
//!
//! Given (Qi, Dei, Def, b) and a time grid in months, produce the rate
//! `q(t)`, the effective annual decline `de(t)`, and the cumulative
//! production `Np(t)`.
//!
//! The model follows the hyperbolic law
//!
//! ```text
//! q(τ) = Qi / (1 + b·Di·τ)^(1/b)        (τ in years)
//! ```
//!
//! while the instantaneous effective decline stays above the terminal
//! decline `Def`; once it reaches `Def` the curve switches to pure
//! exponential decline anchored at the switch rate. The switch time is
//! solved analytically, so the transition is exact regardless of the time
//! grid. The resulting curve is continuous (C⁰) with a guaranteed
//! linear-log tail.
//!
//! The single most important invariant: `q(0) == Qi` for every valid
//! parameter set.

use crate::domain::DeclineParameters;
use crate::error::CoreError;

const MONTHS_PER_YEAR: f64 = 12.0;

/// Nominal declines below this are treated as "no decline" to avoid
/// dividing by a vanishing rate in the closed-form integrals.
const MIN_NOMINAL: f64 = 1e-12;

/// Where the hyperbolic regime hands over to the exponential tail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchPoint {
    /// Switch time in months.
    pub t_months: f64,
    /// Rate at the switch.
    pub rate: f64,
}

/// Full decline-curve evaluation on a time grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclineCurve {
    /// Echo of the input grid (months).
    pub t: Vec<f64>,
    /// Rate q(t).
    pub rate: Vec<f64>,
    /// Effective annual decline de(t).
    pub decline: Vec<f64>,
    /// Cumulative production Np(t), closed form per regime.
    pub cum: Vec<f64>,
    pub switch: Option<SwitchPoint>,
}

/// Convert an effective annual decline to the nominal decline for exponent
/// `b` (`b = 0` is the exponential limit).
pub fn nominal_decline(b: f64, effective: f64) -> f64 {
    if b > 0.0 {
        ((1.0 - effective).powf(-b) - 1.0) / b
    } else {
        -(1.0 - effective).ln()
    }
}

/// Piecewise evaluation plan for one parameter set. Built once per call and
/// shared by the rate/decline/cumulative closures.
#[derive(Debug, Clone, Copy)]
struct Regimes {
    qi: f64,
    b: f64,
    def_: f64,
    /// Initial nominal annual decline.
    di: f64,
    /// Hyperbolic-to-exponential switch, in years, with the rate and the
    /// cumulative already produced at that point.
    switch: Option<SwitchState>,
}

#[derive(Debug, Clone, Copy)]
struct SwitchState {
    tau: f64,
    rate: f64,
    cum: f64,
    /// Nominal decline of the exponential tail, `-ln(1 - Def)`.
    d_exp: f64,
}

impl Regimes {
    fn build(p: &DeclineParameters) -> Self {
        let di = nominal_decline(p.b, p.dei);
        if di <= MIN_NOMINAL || p.b == 0.0 {
            // Exponential (or flat) from the start; the effective decline is
            // constant at Dei and never crosses Def from above.
            return Self {
                qi: p.qi,
                b: p.b,
                def_: p.def_,
                di,
                switch: None,
            };
        }

        let di_switch = nominal_decline(p.b, p.def_);
        let switch = if p.def_ > 0.0 && di > di_switch {
            let tau = (di / di_switch - 1.0) / (p.b * di);
            let rate = p.qi * (1.0 + p.b * di * tau).powf(-1.0 / p.b);
            let cum = hyperbolic_cum(p.qi, di, p.b, tau);
            Some(SwitchState {
                tau,
                rate,
                cum,
                d_exp: -(1.0 - p.def_).ln(),
            })
        } else if p.def_ > 0.0 {
            // Dei == Def: the whole curve is the exponential tail.
            Some(SwitchState {
                tau: 0.0,
                rate: p.qi,
                cum: 0.0,
                d_exp: -(1.0 - p.def_).ln(),
            })
        } else {
            None
        };

        Self {
            qi: p.qi,
            b: p.b,
            def_: p.def_,
            di,
            switch,
        }
    }

    fn rate_at(&self, tau: f64) -> f64 {
        if let Some(sw) = self.switch {
            if tau >= sw.tau {
                return sw.rate * (-sw.d_exp * (tau - sw.tau)).exp();
            }
        }
        if self.di <= MIN_NOMINAL {
            self.qi
        } else if self.b > 0.0 {
            self.qi * (1.0 + self.b * self.di * tau).powf(-1.0 / self.b)
        } else {
            self.qi * (-self.di * tau).exp()
        }
    }

    fn decline_at(&self, tau: f64) -> f64 {
        if let Some(sw) = self.switch {
            if tau >= sw.tau {
                return self.def_;
            }
        }
        if self.di <= MIN_NOMINAL {
            0.0
        } else if self.b > 0.0 {
            // Nominal decline decays hyperbolically; convert back to
            // effective. For b = 1 this reduces to Di(τ)/(1 + Di(τ)).
            let di_t = self.di / (1.0 + self.b * self.di * tau);
            1.0 - (1.0 + self.b * di_t).powf(-1.0 / self.b)
        } else {
            1.0 - (-self.di).exp()
        }
    }

    fn cum_at(&self, tau: f64) -> f64 {
        if let Some(sw) = self.switch {
            if tau >= sw.tau {
                let tail = if sw.d_exp > MIN_NOMINAL {
                    MONTHS_PER_YEAR * sw.rate / sw.d_exp
                        * (1.0 - (-sw.d_exp * (tau - sw.tau)).exp())
                } else {
                    sw.rate * (tau - sw.tau) * MONTHS_PER_YEAR
                };
                return sw.cum + tail;
            }
        }
        if self.di <= MIN_NOMINAL {
            self.qi * tau * MONTHS_PER_YEAR
        } else if self.b > 0.0 {
            hyperbolic_cum(self.qi, self.di, self.b, tau)
        } else {
            MONTHS_PER_YEAR * self.qi / self.di * (1.0 - (-self.di * tau).exp())
        }
    }
}

/// Closed-form hyperbolic cumulative for rates in volume/month, declines per
/// year, and `tau` in years. The factor 12 converts the year-time integral
/// into month-time units so it matches a trapezoid over the monthly grid.
fn hyperbolic_cum(qi: f64, di: f64, b: f64, tau: f64) -> f64 {
    if (b - 1.0).abs() < 1e-9 {
        // Harmonic closed form.
        MONTHS_PER_YEAR * qi / di * (1.0 + di * tau).ln()
    } else {
        MONTHS_PER_YEAR * qi / (di * (1.0 - b)) * (1.0 - (1.0 + b * di * tau).powf(1.0 - 1.0 / b))
    }
}

/// Evaluate the decline curve on a grid of month offsets.
pub fn decline_curve(p: &DeclineParameters, t_months: &[f64]) -> Result<DeclineCurve, CoreError> {
    if t_months.iter().any(|&t| !t.is_finite() || t < 0.0) {
        return Err(CoreError::configuration(
            "time grid must contain non-negative finite month offsets",
        ));
    }

    let regimes = Regimes::build(p);

    let mut rate = Vec::with_capacity(t_months.len());
    let mut decline = Vec::with_capacity(t_months.len());
    let mut cum = Vec::with_capacity(t_months.len());
    for &t in t_months {
        let tau = t / MONTHS_PER_YEAR;
        rate.push(regimes.rate_at(tau));
        decline.push(regimes.decline_at(tau));
        cum.push(regimes.cum_at(tau));
    }

    Ok(DeclineCurve {
        t: t_months.to_vec(),
        rate,
        decline,
        cum,
        switch: regimes.switch.map(|sw| SwitchPoint {
            t_months: sw.tau * MONTHS_PER_YEAR,
            rate: sw.rate,
        }),
    })
}

/// Rate-only fast path for the fit objective (avoids building the decline
/// and cumulative arrays on every optimizer evaluation).
pub fn predict_rates(p: &DeclineParameters, t_months: &[f64]) -> Vec<f64> {
    let regimes = Regimes::build(p);
    t_months
        .iter()
        .map(|&t| regimes.rate_at(t / MONTHS_PER_YEAR))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::trapezoid;

    fn grid(months: usize) -> Vec<f64> {
        (0..months).map(|i| i as f64).collect()
    }

    #[test]
    fn q_at_zero_equals_qi_for_all_b_regimes() {
        for &b in &[0.0, 0.5, 1.0, 1.3] {
            let p = DeclineParameters::new(480.0, 0.35, 0.06, b).unwrap();
            let curve = decline_curve(&p, &grid(24)).unwrap();
            assert!(
                (curve.rate[0] - 480.0).abs() < 1e-9,
                "q(0) != Qi for b={b}: {}",
                curve.rate[0]
            );
        }
    }

    #[test]
    fn initial_effective_decline_matches_dei() {
        let p = DeclineParameters::new(300.0, 0.42, 0.08, 1.1).unwrap();
        let curve = decline_curve(&p, &grid(12)).unwrap();
        assert!((curve.decline[0] - 0.42).abs() < 1e-9);
    }

    #[test]
    fn rate_is_non_increasing_and_terminal_decline_holds() {
        let p = DeclineParameters::new(600.0, 0.55, 0.06, 0.9).unwrap();
        let curve = decline_curve(&p, &grid(240)).unwrap();

        for i in 1..curve.rate.len() {
            assert!(
                curve.rate[i] <= curve.rate[i - 1] + 1e-9,
                "rate increased at month {i}"
            );
        }

        let sw = curve.switch.expect("curve should switch to exponential");
        for (i, &t) in curve.t.iter().enumerate() {
            if t >= sw.t_months {
                assert!((curve.decline[i] - 0.06).abs() < 1e-9);
            } else {
                assert!(curve.decline[i] > 0.06);
            }
        }
    }

    #[test]
    fn switch_point_is_continuous() {
        let p = DeclineParameters::new(500.0, 0.6, 0.1, 1.0).unwrap();
        let curve = decline_curve(&p, &grid(120)).unwrap();
        let sw = curve.switch.unwrap();

        // Evaluate just either side of the switch time.
        let eps = 1e-6;
        let near = decline_curve(&p, &[sw.t_months - eps, sw.t_months + eps]).unwrap();
        assert!((near.rate[0] - near.rate[1]).abs() < 1e-3);
        assert!((near.rate[0] - sw.rate).abs() < 1e-3);
    }

    #[test]
    fn closed_form_cum_matches_trapezoid_within_5_percent() {
        for &(dei, b) in &[(0.30, 0.5), (0.45, 1.0), (0.25, 1.3), (0.20, 0.0)] {
            let p = DeclineParameters::new(400.0, dei, 0.06, b).unwrap();
            let t: Vec<f64> = (0..360).map(|i| i as f64).collect();
            let curve = decline_curve(&p, &t).unwrap();

            let numeric = trapezoid(&curve.t, &curve.rate);
            let closed = *curve.cum.last().unwrap();
            let rel = (closed - numeric).abs() / closed;
            assert!(
                rel < 0.05,
                "cumulative mismatch {rel:.4} for dei={dei}, b={b}"
            );
        }
    }

    #[test]
    fn b_zero_is_pure_exponential_with_constant_decline() {
        let p = DeclineParameters::new(200.0, 0.25, 0.06, 0.0).unwrap();
        let curve = decline_curve(&p, &grid(60)).unwrap();

        assert!(curve.switch.is_none());
        for &de in &curve.decline {
            assert!((de - 0.25).abs() < 1e-9);
        }
        // q(12 months) = Qi * (1 - Dei) by definition of effective decline.
        let q12 = curve.rate[12];
        assert!((q12 - 200.0 * 0.75).abs() < 1e-6);
    }

    #[test]
    fn zero_decline_yields_constant_rate() {
        let p = DeclineParameters::new(150.0, 0.0, 0.0, 0.8).unwrap();
        let curve = decline_curve(&p, &grid(24)).unwrap();
        assert!(curve.rate.iter().all(|&q| (q - 150.0).abs() < 1e-9));
        assert!(curve.decline.iter().all(|&d| d == 0.0));
        // Np grows linearly: Qi per month.
        assert!((curve.cum[10] - 1500.0).abs() < 1e-6);
    }

    #[test]
    fn reference_scenario_qi_600() {
        // Qi=600, Dei=0.15, Def=0.06, b=0.9 over 60 months: exact q(0) and
        // strictly decreasing de. This gentle decline does not reach the
        // terminal floor inside the window; the switch sits years out.
        let p = DeclineParameters::new(600.0, 0.15, 0.06, 0.9).unwrap();
        let curve = decline_curve(&p, &grid(60)).unwrap();

        assert!((curve.rate[0] - 600.0).abs() < 1e-9);
        for i in 1..curve.decline.len() {
            assert!(
                curve.decline[i] < curve.decline[i - 1],
                "de not strictly decreasing at month {i}"
            );
            assert!(curve.decline[i] > 0.06);
        }
        let sw = curve.switch.unwrap();
        assert!(sw.t_months > 60.0);

        // On a longer grid the decline does pin to the terminal value.
        let long = decline_curve(&p, &grid(240)).unwrap();
        assert!((long.decline[239] - 0.06).abs() < 1e-9);
    }

    #[test]
    fn predict_rates_agrees_with_full_curve() {
        let p = DeclineParameters::new(350.0, 0.4, 0.08, 1.2).unwrap();
        let t = grid(48);
        let curve = decline_curve(&p, &t).unwrap();
        let rates = predict_rates(&p, &t);
        for (a, b) in curve.rate.iter().zip(rates.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn rejects_negative_time() {
        let p = DeclineParameters::new(100.0, 0.2, 0.06, 0.9).unwrap();
        assert!(decline_curve(&p, &[-1.0, 0.0]).is_err());
    }
}
