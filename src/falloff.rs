#![allow(non_snake_case)]
//! Falloff blending curves and their batch manager. A curve maps the reduced
//! pressure Pr to a dimensionless factor F(T, Pr); the blended reduction
//! applied to a falloff reaction is F * Pr/(1+Pr). Temperature-dependent
//! intermediates (e.g. the Troe Fcent) are computed once per temperature
//! change into a shared work array.
use crate::reaction::FalloffCurveData;
use enum_dispatch::enum_dispatch;

const SMALL_NUMBER: f64 = 1.0e-300;

#[enum_dispatch]
pub trait FalloffFunction {
    /// number of temperature-dependent work values this curve caches
    fn work_size(&self) -> usize;
    /// recompute the curve's work values at temperature T
    fn update_temp(&self, T: f64, work: &mut [f64]);
    /// the F-factor at reduced pressure pr, given the cached work values
    fn F(&self, pr: f64, work: &[f64]) -> f64;
}

/// Lindemann curve: no curvature correction, F = 1
#[derive(Debug, Clone, Default)]
pub struct LindemannCurve;

impl FalloffFunction for LindemannCurve {
    fn work_size(&self) -> usize {
        0
    }
    fn update_temp(&self, _T: f64, _work: &mut [f64]) {}
    fn F(&self, _pr: f64, _work: &[f64]) -> f64 {
        1.0
    }
}

/// Troe curve, 3- or 4-parameter form
#[derive(Debug, Clone)]
pub struct TroeCurve {
    pub A: f64,
    pub T3: f64,
    pub T1: f64,
    pub T2: Option<f64>,
}

impl TroeCurve {
    pub fn new(params: &[f64]) -> Self {
        Self {
            A: params[0],
            T3: params[1],
            T1: params[2],
            T2: params.get(3).copied(),
        }
    }
}

impl FalloffFunction for TroeCurve {
    fn work_size(&self) -> usize {
        1
    }

    fn update_temp(&self, T: f64, work: &mut [f64]) {
        let mut Fcent = (1.0 - self.A) * (-T / self.T3).exp() + self.A * (-T / self.T1).exp();
        if let Some(T2) = self.T2 {
            Fcent += (-T2 / T).exp();
        }
        work[0] = Fcent.max(SMALL_NUMBER).log10();
    }

    fn F(&self, pr: f64, work: &[f64]) -> f64 {
        let lfc = work[0];
        let lpr = pr.max(SMALL_NUMBER).log10();
        let cc = -0.4 - 0.67 * lfc;
        let nn = 0.75 - 1.27 * lfc;
        let f1 = (lpr + cc) / (nn - 0.14 * (lpr + cc));
        10f64.powf(lfc / (1.0 + f1 * f1))
    }
}

/// SRI curve, 3- or 5-parameter form
#[derive(Debug, Clone)]
pub struct SriCurve {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

impl SriCurve {
    pub fn new(params: &[f64]) -> Self {
        Self {
            a: params[0],
            b: params[1],
            c: params[2],
            d: params.get(3).copied().unwrap_or(1.0),
            e: params.get(4).copied().unwrap_or(0.0),
        }
    }
}

impl FalloffFunction for SriCurve {
    fn work_size(&self) -> usize {
        2
    }

    fn update_temp(&self, T: f64, work: &mut [f64]) {
        work[0] = self.a * (-self.b / T).exp() + (-T / self.c).exp();
        work[1] = self.d * T.powf(self.e);
    }

    fn F(&self, pr: f64, work: &[f64]) -> f64 {
        let lpr = pr.max(SMALL_NUMBER).log10();
        let xx = 1.0 / (1.0 + lpr * lpr);
        work[1] * work[0].powf(xx)
    }
}

#[derive(Debug, Clone)]
#[enum_dispatch(FalloffFunction)]
pub enum FalloffCurve {
    Lindemann(LindemannCurve),
    Troe(TroeCurve),
    Sri(SriCurve),
}

pub fn create_falloff_curve(data: &FalloffCurveData) -> FalloffCurve {
    match data {
        FalloffCurveData::Lindemann => FalloffCurve::Lindemann(LindemannCurve),
        FalloffCurveData::Troe(p) => FalloffCurve::Troe(TroeCurve::new(p)),
        FalloffCurveData::Sri(p) => FalloffCurve::Sri(SriCurve::new(p)),
    }
}

/// manager for the blending curves of all falloff-family reactions, indexed
/// by falloff-subset position
#[derive(Debug, Clone, Default)]
pub struct FalloffMgr {
    curves: Vec<FalloffCurve>,
    offsets: Vec<usize>,
    work_size: usize,
}

impl FalloffMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nReactions(&self) -> usize {
        self.curves.len()
    }

    pub fn workSize(&self) -> usize {
        self.work_size
    }

    pub fn install(&mut self, curve: FalloffCurve) {
        self.offsets.push(self.work_size);
        self.work_size += curve.work_size();
        self.curves.push(curve);
    }

    /// replace the curve at a falloff-subset position; a curve with a
    /// different work size rebuilds the shared work-array layout
    pub fn replace(&mut self, pos: usize, curve: FalloffCurve) -> bool {
        if pos >= self.curves.len() {
            return false;
        }
        self.curves[pos] = curve;
        self.work_size = 0;
        for k in 0..self.curves.len() {
            self.offsets[k] = self.work_size;
            self.work_size += self.curves[k].work_size();
        }
        true
    }

    /// recompute every curve's temperature-dependent work values
    pub fn updateTemp(&self, T: f64, work: &mut [f64]) {
        for (pos, curve) in self.curves.iter().enumerate() {
            let off = self.offsets[pos];
            curve.update_temp(T, &mut work[off..off + curve.work_size()]);
        }
    }

    /// map reduced pressures to blended reduction factors in place:
    /// pr[i] <- F(pr[i]) * pr[i]/(1 + pr[i])
    pub fn pr_to_falloff(&self, pr: &mut [f64], work: &[f64]) {
        for (pos, curve) in self.curves.iter().enumerate() {
            let off = self.offsets[pos];
            let F = curve.F(pr[pos], &work[off..off + curve.work_size()]);
            pr[pos] = F * pr[pos] / (1.0 + pr[pos]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_lindemann_blending_limits() {
        let mgr = {
            let mut m = FalloffMgr::new();
            m.install(FalloffCurve::Lindemann(LindemannCurve));
            m
        };
        let work: Vec<f64> = vec![];
        // pr -> 0: blended factor -> pr (low-pressure limit)
        let mut pr = vec![1.0e-8];
        mgr.pr_to_falloff(&mut pr, &work);
        assert_relative_eq!(pr[0], 1.0e-8, max_relative = 1e-7);
        // pr -> inf: blended factor -> 1 (high-pressure limit)
        let mut pr = vec![1.0e8];
        mgr.pr_to_falloff(&mut pr, &work);
        assert_relative_eq!(pr[0], 1.0, max_relative = 1e-7);
    }

    #[test]
    fn test_troe_center_value() {
        // at the center of the falloff curve (pr = 1, lpr+cc chosen small)
        // F stays between Fcent and 1
        let curve = TroeCurve::new(&[0.562, 91.0, 5836.0]);
        let mut work = vec![0.0];
        curve.update_temp(1000.0, &mut work);
        let Fcent = 10f64.powf(work[0]);
        let F = curve.F(1.0, &work);
        assert!(F > 0.0 && F <= 1.0);
        assert!(F >= Fcent * 0.9);
    }

    #[test]
    fn test_troe_four_parameter_term() {
        let three = TroeCurve::new(&[0.5, 300.0, 1000.0]);
        let four = TroeCurve::new(&[0.5, 300.0, 1000.0, 6118.0]);
        let mut w3 = vec![0.0];
        let mut w4 = vec![0.0];
        three.update_temp(1200.0, &mut w3);
        four.update_temp(1200.0, &mut w4);
        // the exp(-T2/T) term only raises Fcent
        assert!(w4[0] > w3[0]);
    }

    #[test]
    fn test_sri_reduces_to_base_at_pr_one() {
        let curve = SriCurve::new(&[1.1, 700.0, 1200.0]);
        let mut work = vec![0.0; 2];
        let T = 900.0;
        curve.update_temp(T, &mut work);
        // at pr = 1, log10(pr) = 0 and the exponent is 1
        let base = 1.1 * (-700.0f64 / T).exp() + (-T / 1200.0f64).exp();
        assert_relative_eq!(curve.F(1.0, &work), base, max_relative = 1e-12);
    }

    #[test]
    fn test_mgr_mixed_curves_work_layout() {
        let mut mgr = FalloffMgr::new();
        mgr.install(FalloffCurve::Troe(TroeCurve::new(&[0.6, 100.0, 2000.0])));
        mgr.install(FalloffCurve::Lindemann(LindemannCurve));
        mgr.install(FalloffCurve::Sri(SriCurve::new(&[1.0, 500.0, 900.0])));
        assert_eq!(mgr.workSize(), 3);
        let mut work = vec![0.0; mgr.workSize()];
        mgr.updateTemp(1000.0, &mut work);
        let mut pr = vec![1.0, 1.0, 1.0];
        mgr.pr_to_falloff(&mut pr, &work);
        // Lindemann entry is exactly pr/(1+pr)
        assert_relative_eq!(pr[1], 0.5, max_relative = 1e-12);
        assert!(pr[0] > 0.0 && pr[2] > 0.0);
    }

    #[test]
    fn test_replace_rebuilds_work_layout() {
        let mut mgr = FalloffMgr::new();
        mgr.install(FalloffCurve::Troe(TroeCurve::new(&[0.6, 100.0, 2000.0])));
        mgr.install(FalloffCurve::Sri(SriCurve::new(&[1.0, 500.0, 900.0])));
        assert_eq!(mgr.workSize(), 3);

        // shrinking the first curve shifts the SRI work values down
        assert!(mgr.replace(0, FalloffCurve::Lindemann(LindemannCurve)));
        assert_eq!(mgr.workSize(), 2);
        let T = 900.0;
        let mut work = vec![0.0; mgr.workSize()];
        mgr.updateTemp(T, &mut work);
        let mut pr = vec![1.0, 1.0];
        mgr.pr_to_falloff(&mut pr, &work);
        assert_relative_eq!(pr[0], 0.5, max_relative = 1e-12);
        let base = 1.0 * (-500.0f64 / T).exp() + (-T / 900.0f64).exp();
        assert_relative_eq!(pr[1], 0.5 * base, max_relative = 1e-12);

        assert!(!mgr.replace(5, FalloffCurve::Lindemann(LindemannCurve)));
    }
}
