#![allow(non_snake_case)]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const R: f64 = 8.314;

/// enum for the closed set of supported reaction sub-types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionType {
    Elementary,
    ThreeBody,
    Falloff,
    ChemicallyActivated,
    #[serde(rename = "pressure-dependent-Arrhenius")]
    Plog,
    Chebyshev,
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ReactionType::Elementary => "elementary",
            ReactionType::ThreeBody => "three-body",
            ReactionType::Falloff => "falloff",
            ReactionType::ChemicallyActivated => "chemically-activated",
            ReactionType::Plog => "pressure-dependent-Arrhenius",
            ReactionType::Chebyshev => "Chebyshev",
        };
        write!(f, "{}", s)
    }
}

/// Simple Arrhenius form k = A*T^n*exp(-E/(R*T)), E in J/mol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ArrheniusRate {
    pub A: f64,
    pub n: f64,
    pub E: f64,
}

impl ArrheniusRate {
    pub fn new(A: f64, n: f64, E: f64) -> Self {
        Self { A, n, E }
    }
    /// rate constant at temperature T; logT passed in so batch updates
    /// compute ln(T) once per state change
    pub fn K_const(&self, T: f64, logT: f64) -> f64 {
        (self.A.ln() + self.n * logT - self.E / (R * T)).exp()
    }
    /// analytic relative derivative d(ln k)/dT
    pub fn dlnK_dT(&self, T: f64) -> f64 {
        self.n / T + self.E / (R * T * T)
    }
}

/// Pressure-dependent multi-Arrhenius rate: one Arrhenius set per tabulated
/// pressure (Pa), log-log interpolated between neighbours. Pressures outside
/// the table use the closest available entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlogRate {
    /// (pressure, Arrhenius) pairs; sorted by pressure on construction
    pub rates: Vec<(f64, ArrheniusRate)>,
}

impl PlogRate {
    pub fn new(mut rates: Vec<(f64, ArrheniusRate)>) -> Self {
        rates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self { rates }
    }

    /// rate constant at T for the cached log-pressure
    pub fn K_const(&self, T: f64, logT: f64, logP: f64) -> f64 {
        let n = self.rates.len();
        if n == 1 {
            return self.rates[0].1.K_const(T, logT);
        }
        let logp_first = self.rates[0].0.ln();
        let logp_last = self.rates[n - 1].0.ln();
        if logP <= logp_first {
            return self.rates[0].1.K_const(T, logT);
        }
        if logP >= logp_last {
            return self.rates[n - 1].1.K_const(T, logT);
        }
        // bracketing interval in log-pressure
        let mut ihi = 1;
        while self.rates[ihi].0.ln() < logP {
            ihi += 1;
        }
        let ilo = ihi - 1;
        let logp_lo = self.rates[ilo].0.ln();
        let logp_hi = self.rates[ihi].0.ln();
        let k_lo = self.rates[ilo].1.K_const(T, logT);
        let k_hi = self.rates[ihi].1.K_const(T, logT);
        let w = (logP - logp_lo) / (logp_hi - logp_lo);
        (k_lo.ln() + w * (k_hi.ln() - k_lo.ln())).exp()
    }
}

/// Chebyshev polynomial rate expression: log10(k) expanded in reduced inverse
/// temperature and reduced log10-pressure over [Tmin, Tmax] x [Pmin, Pmax]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChebyshevRate {
    pub Tmin: f64,
    pub Tmax: f64,
    pub Pmin: f64,
    pub Pmax: f64,
    /// coeffs[i][j]: i-th temperature order, j-th pressure order
    pub coeffs: Vec<Vec<f64>>,
}

impl ChebyshevRate {
    pub fn new(Tmin: f64, Tmax: f64, Pmin: f64, Pmax: f64, coeffs: Vec<Vec<f64>>) -> Self {
        Self {
            Tmin,
            Tmax,
            Pmin,
            Pmax,
            coeffs,
        }
    }

    fn reduced_T(&self, T: f64) -> f64 {
        (2.0 / T - 1.0 / self.Tmin - 1.0 / self.Tmax) / (1.0 / self.Tmax - 1.0 / self.Tmin)
    }

    fn reduced_P(&self, log10P: f64) -> f64 {
        (2.0 * log10P - self.Pmin.log10() - self.Pmax.log10())
            / (self.Pmax.log10() - self.Pmin.log10())
    }

    pub fn K_const(&self, T: f64, log10P: f64) -> f64 {
        let tr = self.reduced_T(T);
        let pr = self.reduced_P(log10P);
        let np = self.coeffs.first().map_or(0, |row| row.len());
        // Chebyshev polynomials of the first kind by recurrence
        let cheb = |x: f64, order: usize| -> Vec<f64> {
            let mut t = vec![0.0; order];
            for (i, ti) in t.iter_mut().enumerate() {
                *ti = match i {
                    0 => 1.0,
                    1 => x,
                    _ => 0.0,
                };
            }
            for i in 2..order {
                t[i] = 2.0 * x * t[i - 1] - t[i - 2];
            }
            t
        };
        let tpoly = cheb(tr, self.coeffs.len());
        let ppoly = cheb(pr, np);
        let mut log10k = 0.0;
        for (i, row) in self.coeffs.iter().enumerate() {
            for (j, a) in row.iter().enumerate() {
                log10k += a * tpoly[i] * ppoly[j];
            }
        }
        10f64.powf(log10k)
    }
}

/// Parameters of a falloff blending curve; the dimensionless F-factor forms
/// themselves live in the falloff module
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FalloffCurveData {
    Lindemann,
    /// [A, T3, T1] or [A, T3, T1, T2]
    Troe(Vec<f64>),
    /// [a, b, c] or [a, b, c, d, e]
    Sri(Vec<f64>),
}

/// enum for rate expressions of the different reaction sub-types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RateExpression {
    Falloff {
        low_rate: ArrheniusRate,
        high_rate: ArrheniusRate,
        curve: FalloffCurveData,
    },
    Plog(PlogRate),
    Chebyshev(ChebyshevRate),
    Arrhenius(ArrheniusRate),
}

/// Third-body efficiency map: species index -> enhancement factor, plus the
/// default efficiency applied to every unlisted species
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThirdBodyEff {
    pub efficiencies: HashMap<usize, f64>,
    pub default_efficiency: f64,
}

impl ThirdBodyEff {
    pub fn new(efficiencies: HashMap<usize, f64>, default_efficiency: f64) -> Self {
        Self {
            efficiencies,
            default_efficiency,
        }
    }
}

impl Default for ThirdBodyEff {
    fn default() -> Self {
        Self {
            efficiencies: HashMap::new(),
            default_efficiency: 1.0,
        }
    }
}

/// Full reaction definition handed to the kinetics core at installation.
/// The core copies what it needs into per-type caches and never stores the
/// struct itself; species indices refer to the thermo provider's ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(rename = "type")]
    pub reaction_type: ReactionType,
    pub reversible: bool,
    /// (species index, stoichiometric coefficient)
    pub reactants: Vec<(usize, f64)>,
    pub products: Vec<(usize, f64)>,
    pub rate: RateExpression,
    pub third_body: Option<ThirdBodyEff>,
}

impl Reaction {
    /// net mole change: sum of product minus reactant coefficients
    pub fn delta_n(&self) -> f64 {
        let p: f64 = self.products.iter().map(|&(_, nu)| nu).sum();
        let r: f64 = self.reactants.iter().map(|&(_, nu)| nu).sum();
        p - r
    }

    /// checks that the reaction_type tag matches the rate-data variant;
    /// a mismatch is a configuration error caught at installation
    pub fn type_matches_rate(&self) -> bool {
        matches!(
            (&self.reaction_type, &self.rate),
            (ReactionType::Elementary, RateExpression::Arrhenius(_))
                | (ReactionType::ThreeBody, RateExpression::Arrhenius(_))
                | (ReactionType::Falloff, RateExpression::Falloff { .. })
                | (ReactionType::ChemicallyActivated, RateExpression::Falloff { .. })
                | (ReactionType::Plog, RateExpression::Plog(_))
                | (ReactionType::Chebyshev, RateExpression::Chebyshev(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_arrhenius_k_const() {
        let rate = ArrheniusRate::new(1.0, 2.0, 300.0);
        let T: f64 = 298.0;
        let expected = 1.0 * T.powf(2.0) * f64::exp(-300.0 / (298.0 * R));
        assert_relative_eq!(rate.K_const(T, T.ln()), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_arrhenius_dlnK_dT_matches_finite_difference() {
        let rate = ArrheniusRate::new(1.3e8, 1.5, 52000.0);
        let T = 1200.0;
        let dT = 1e-4 * T;
        let k0 = rate.K_const(T, T.ln());
        let k1 = rate.K_const(T + dT, (T + dT).ln());
        let fd = (k1 - k0) / (dT * k0);
        assert_relative_eq!(rate.dlnK_dT(T), fd, max_relative = 1e-4);
    }

    #[test]
    fn test_plog_exact_node_and_midpoint() {
        let lo = ArrheniusRate::new(1.0e5, 0.0, 0.0);
        let hi = ArrheniusRate::new(1.0e7, 0.0, 0.0);
        let plog = PlogRate::new(vec![(1.0e4, lo), (1.0e6, hi)]);
        let T: f64 = 1000.0;
        let logT = T.ln();
        assert_relative_eq!(
            plog.K_const(T, logT, 1.0e4f64.ln()),
            1.0e5,
            max_relative = 1e-12
        );
        // geometric mean at the log-pressure midpoint
        let mid = 0.5 * (1.0e4f64.ln() + 1.0e6f64.ln());
        assert_relative_eq!(plog.K_const(T, logT, mid), 1.0e6, max_relative = 1e-10);
    }

    #[test]
    fn test_plog_clamps_out_of_range_pressure() {
        let lo = ArrheniusRate::new(1.0e5, 0.0, 0.0);
        let hi = ArrheniusRate::new(1.0e7, 0.0, 0.0);
        let plog = PlogRate::new(vec![(1.0e4, lo), (1.0e6, hi)]);
        let T: f64 = 1000.0;
        let logT = T.ln();
        assert_relative_eq!(plog.K_const(T, logT, 1.0f64.ln()), 1.0e5);
        assert_relative_eq!(plog.K_const(T, logT, 1.0e9f64.ln()), 1.0e7);
    }

    #[test]
    fn test_chebyshev_constant_table() {
        // single coefficient: log10(k) = a00 everywhere in range
        let cheb = ChebyshevRate::new(300.0, 2000.0, 1.0e3, 1.0e7, vec![vec![2.0]]);
        assert_relative_eq!(cheb.K_const(800.0, 5.0), 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_delta_n() {
        // H2 + M <=> H + H + M : dn = +1
        let r = Reaction {
            reaction_type: ReactionType::ThreeBody,
            reversible: true,
            reactants: vec![(0, 1.0)],
            products: vec![(1, 2.0)],
            rate: RateExpression::Arrhenius(ArrheniusRate::new(4.577e19, -1.4, 436705.2)),
            third_body: Some(ThirdBodyEff::default()),
        };
        assert_relative_eq!(r.delta_n(), 1.0);
        assert!(r.type_matches_rate());
    }

    #[test]
    fn test_type_tag_mismatch_detected() {
        let r = Reaction {
            reaction_type: ReactionType::Falloff,
            reversible: false,
            reactants: vec![(0, 1.0)],
            products: vec![(1, 1.0)],
            rate: RateExpression::Arrhenius(ArrheniusRate::new(1.0, 0.0, 0.0)),
            third_body: None,
        };
        assert!(!r.type_matches_rate());
    }

    #[test]
    fn test_reaction_type_serde_round_trip() {
        let tags = [
            ReactionType::Elementary,
            ReactionType::ThreeBody,
            ReactionType::Falloff,
            ReactionType::ChemicallyActivated,
            ReactionType::Plog,
            ReactionType::Chebyshev,
        ];
        for tag in tags {
            let s = serde_json::to_string(&tag).unwrap();
            let back: ReactionType = serde_json::from_str(&s).unwrap();
            assert_eq!(tag, back);
        }
    }
}
