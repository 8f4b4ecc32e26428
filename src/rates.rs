#![allow(non_snake_case)]
//! Rate-law evaluator buckets: one bucket per reaction sub-type. Each bucket
//! owns the rate parameters of its reactions together with the indices of the
//! slots it writes in the shared forward-rate-constant vector, recomputes
//! those slots in a batch when the temperature (or its pressure component)
//! actually changed, and applies relative temperature/collider derivatives
//! multiplicatively to caller-provided work buffers.
use crate::reaction::{ArrheniusRate, ChebyshevRate, PlogRate};

/// bucket for plain Arrhenius rates (elementary and three-body reactions,
/// and - with bucket-local indices - falloff low/high pressure limits)
#[derive(Debug, Clone, Default)]
pub struct ArrheniusBucket {
    indices: Vec<usize>,
    rates: Vec<ArrheniusRate>,
    last_temp: f64,
}

impl ArrheniusBucket {
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            rates: Vec::new(),
            last_temp: 0.0,
        }
    }

    pub fn nReactions(&self) -> usize {
        self.rates.len()
    }

    pub fn install(&mut self, rxn_index: usize, rate: ArrheniusRate) {
        self.indices.push(rxn_index);
        self.rates.push(rate);
        // new slot has no cached value yet
        self.last_temp = 0.0;
    }

    /// replace the rate installed for the given slot index; true on success
    pub fn replace(&mut self, rxn_index: usize, rate: ArrheniusRate) -> bool {
        if let Some(pos) = self.indices.iter().position(|&i| i == rxn_index) {
            self.rates[pos] = rate;
            self.last_temp = 0.0;
            true
        } else {
            false
        }
    }

    pub fn get(&self, pos: usize) -> &ArrheniusRate {
        &self.rates[pos]
    }

    /// recompute every owned rate constant into kf; reports whether anything
    /// changed so the assembler can skip redundant work
    pub fn update(&mut self, T: f64, logT: f64, kf: &mut [f64]) -> bool {
        if T == self.last_temp || self.rates.is_empty() {
            return false;
        }
        for (pos, rate) in self.rates.iter().enumerate() {
            kf[self.indices[pos]] = rate.K_const(T, logT);
        }
        self.last_temp = T;
        true
    }

    /// multiply the owned entries of `out` by the analytic d(ln k)/dT
    pub fn process_ddT(&self, out: &mut [f64]) {
        let T = self.last_temp;
        for (pos, rate) in self.rates.iter().enumerate() {
            out[self.indices[pos]] *= rate.dlnK_dT(T);
        }
    }

    /// rate constants of this family do not depend on the collider
    /// concentration; the collider-derivative contribution is zero
    pub fn process_ddM(&self, out: &mut [f64]) {
        for &i in &self.indices {
            out[i] = 0.0;
        }
    }
}

/// bucket for pressure-dependent multi-Arrhenius ("PLOG") rates; pressure
/// enters through ln(P)
#[derive(Debug, Clone, Default)]
pub struct PlogBucket {
    indices: Vec<usize>,
    rates: Vec<PlogRate>,
    last_temp: f64,
    logP: f64,
}

impl PlogBucket {
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            rates: Vec::new(),
            last_temp: 0.0,
            logP: f64::NAN,
        }
    }

    pub fn nReactions(&self) -> usize {
        self.rates.len()
    }

    pub fn install(&mut self, rxn_index: usize, rate: PlogRate) {
        self.indices.push(rxn_index);
        self.rates.push(rate);
        self.last_temp = 0.0;
    }

    pub fn replace(&mut self, rxn_index: usize, rate: PlogRate) -> bool {
        if let Some(pos) = self.indices.iter().position(|&i| i == rxn_index) {
            self.rates[pos] = rate;
            self.last_temp = 0.0;
            true
        } else {
            false
        }
    }

    /// cache the log-pressure used by the interpolation
    pub fn update_P(&mut self, logP: f64) -> bool {
        if logP == self.logP {
            return false;
        }
        self.logP = logP;
        // force the next temperature update to recompute
        self.last_temp = 0.0;
        true
    }

    pub fn update(&mut self, T: f64, logT: f64, kf: &mut [f64]) -> bool {
        if T == self.last_temp || self.rates.is_empty() {
            return false;
        }
        for (pos, rate) in self.rates.iter().enumerate() {
            kf[self.indices[pos]] = rate.K_const(T, logT, self.logP);
        }
        self.last_temp = T;
        true
    }

    /// relative finite-difference d(ln k)/dT at the cached pressure
    pub fn process_ddT(&self, out: &mut [f64], rtol: f64) {
        let T = self.last_temp;
        let T1 = T * (1.0 + rtol);
        for (pos, rate) in self.rates.iter().enumerate() {
            let k0 = rate.K_const(T, T.ln(), self.logP);
            let k1 = rate.K_const(T1, T1.ln(), self.logP);
            out[self.indices[pos]] *= (k1 - k0) / (rtol * T * k0);
        }
    }

    pub fn process_ddM(&self, out: &mut [f64]) {
        for &i in &self.indices {
            out[i] = 0.0;
        }
    }
}

/// bucket for Chebyshev polynomial rates; pressure enters through log10(P)
#[derive(Debug, Clone, Default)]
pub struct ChebyshevBucket {
    indices: Vec<usize>,
    rates: Vec<ChebyshevRate>,
    last_temp: f64,
    log10P: f64,
}

impl ChebyshevBucket {
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            rates: Vec::new(),
            last_temp: 0.0,
            log10P: f64::NAN,
        }
    }

    pub fn nReactions(&self) -> usize {
        self.rates.len()
    }

    pub fn install(&mut self, rxn_index: usize, rate: ChebyshevRate) {
        self.indices.push(rxn_index);
        self.rates.push(rate);
        self.last_temp = 0.0;
    }

    pub fn replace(&mut self, rxn_index: usize, rate: ChebyshevRate) -> bool {
        if let Some(pos) = self.indices.iter().position(|&i| i == rxn_index) {
            self.rates[pos] = rate;
            self.last_temp = 0.0;
            true
        } else {
            false
        }
    }

    pub fn update_P(&mut self, log10P: f64) -> bool {
        if log10P == self.log10P {
            return false;
        }
        self.log10P = log10P;
        self.last_temp = 0.0;
        true
    }

    pub fn update(&mut self, T: f64, _logT: f64, kf: &mut [f64]) -> bool {
        if T == self.last_temp || self.rates.is_empty() {
            return false;
        }
        for (pos, rate) in self.rates.iter().enumerate() {
            kf[self.indices[pos]] = rate.K_const(T, self.log10P);
        }
        self.last_temp = T;
        true
    }

    pub fn process_ddT(&self, out: &mut [f64], rtol: f64) {
        let T = self.last_temp;
        let T1 = T * (1.0 + rtol);
        for (pos, rate) in self.rates.iter().enumerate() {
            let k0 = rate.K_const(T, self.log10P);
            let k1 = rate.K_const(T1, self.log10P);
            out[self.indices[pos]] *= (k1 - k0) / (rtol * T * k0);
        }
    }

    pub fn process_ddM(&self, out: &mut [f64]) {
        for &i in &self.indices {
            out[i] = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::reaction::R;

    #[test]
    fn test_bucket_update_reports_changed_only_on_new_temperature() {
        let mut bucket = ArrheniusBucket::new();
        bucket.install(0, ArrheniusRate::new(1.0e10, 0.5, 20000.0));
        bucket.install(2, ArrheniusRate::new(3.0e7, 1.1, 45000.0));
        let mut kf = vec![0.0; 3];
        let T = 1500.0;
        assert!(bucket.update(T, T.ln(), &mut kf));
        let k_first = kf[0];
        // same temperature: untouched
        kf[0] = -1.0;
        assert!(!bucket.update(T, T.ln(), &mut kf));
        assert_eq!(kf[0], -1.0);
        // new temperature: rewritten
        assert!(bucket.update(1600.0, 1600f64.ln(), &mut kf));
        assert_ne!(kf[0], k_first);
        assert_relative_eq!(
            kf[2],
            3.0e7 * 1600f64.powf(1.1) * (-45000.0 / (R * 1600.0)).exp(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_bucket_replace_invalidates_cache() {
        let mut bucket = ArrheniusBucket::new();
        bucket.install(0, ArrheniusRate::new(1.0, 0.0, 0.0));
        let mut kf = vec![0.0; 1];
        let T = 1000.0;
        bucket.update(T, T.ln(), &mut kf);
        assert_relative_eq!(kf[0], 1.0);
        assert!(bucket.replace(0, ArrheniusRate::new(2.0, 0.0, 0.0)));
        assert!(bucket.update(T, T.ln(), &mut kf));
        assert_relative_eq!(kf[0], 2.0);
        assert!(!bucket.replace(5, ArrheniusRate::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_plog_bucket_pressure_invalidation() {
        let mut bucket = PlogBucket::new();
        bucket.install(
            0,
            PlogRate::new(vec![
                (1.0e4, ArrheniusRate::new(1.0e5, 0.0, 0.0)),
                (1.0e6, ArrheniusRate::new(1.0e7, 0.0, 0.0)),
            ]),
        );
        let mut kf = vec![0.0; 1];
        let T = 900.0;
        assert!(bucket.update_P(1.0e4f64.ln()));
        assert!(bucket.update(T, T.ln(), &mut kf));
        assert_relative_eq!(kf[0], 1.0e5, max_relative = 1e-10);
        // unchanged pressure reports false; changed pressure forces rewrite
        assert!(!bucket.update_P(1.0e4f64.ln()));
        assert!(bucket.update_P(1.0e6f64.ln()));
        assert!(bucket.update(T, T.ln(), &mut kf));
        assert_relative_eq!(kf[0], 1.0e7, max_relative = 1e-10);
    }

    #[test]
    fn test_ddT_hooks_scale_entries() {
        let mut bucket = ArrheniusBucket::new();
        let rate = ArrheniusRate::new(2.5e12, 0.7, 31000.0);
        bucket.install(1, rate);
        let mut kf = vec![0.0; 2];
        let T = 1100.0;
        bucket.update(T, T.ln(), &mut kf);
        let mut out = kf.clone();
        bucket.process_ddT(&mut out);
        assert_relative_eq!(out[1], kf[1] * rate.dlnK_dT(T), max_relative = 1e-12);
        let mut dm = kf.clone();
        bucket.process_ddM(&mut dm);
        assert_eq!(dm[1], 0.0);
    }

    #[test]
    fn test_chebyshev_bucket_update() {
        let mut bucket = ChebyshevBucket::new();
        bucket.install(
            0,
            ChebyshevRate::new(300.0, 2000.0, 1.0e3, 1.0e7, vec![vec![3.0]]),
        );
        let mut kf = vec![0.0; 1];
        assert!(bucket.update_P(5.0));
        assert!(bucket.update(700.0, 700f64.ln(), &mut kf));
        assert_relative_eq!(kf[0], 1000.0, max_relative = 1e-12);
    }
}
