#![allow(non_snake_case)]
//! Thermodynamic state provider seam. The kinetics core queries temperature,
//! pressure, molar density, standard concentration, concentrations and
//! standard chemical potentials through this trait, and transiently perturbs
//! (T, P) for finite-difference derivatives.
use crate::reaction::R;

/// standard pressure, Pa
pub const P_STANDARD: f64 = 101325.0;

pub trait ThermoProvider {
    fn temperature(&self) -> f64;
    fn pressure(&self) -> f64;
    /// total molar density, mol/m3
    fn molar_density(&self) -> f64;
    /// standard concentration used to nondimensionalize Kc, mol/m3
    fn standard_concentration(&self) -> f64;
    /// R*T, J/mol
    fn RT(&self) -> f64 {
        R * self.temperature()
    }
    fn nSpecies(&self) -> usize;
    /// activity concentrations entering the law of mass action
    fn get_activity_concentrations(&self, c: &mut [f64]);
    /// physical species concentrations entering collider sums
    fn get_concentrations(&self, c: &mut [f64]);
    /// standard-state chemical potentials, J/mol
    fn get_standard_chem_potentials(&self, mu: &mut [f64]);
    /// transiently set (T, P); callers restore the original state afterward
    fn set_state_TP(&mut self, T: f64, P: f64);
    /// true when d(ctot)/dT at constant P has the analytic ideal-gas form
    fn is_ideal_gas(&self) -> bool {
        false
    }
}

/// Ideal-gas mixture at fixed mole fractions. Chemical potentials follow the
/// mu = h - T*s convention with constant per-species (h, s).
#[derive(Debug, Clone)]
pub struct IdealGasState {
    T: f64,
    P: f64,
    mole_fractions: Vec<f64>,
    /// per-species (h0 [J/mol], s0 [J/mol/K])
    thermo_data: Vec<(f64, f64)>,
}

impl IdealGasState {
    pub fn new(T: f64, P: f64, mole_fractions: Vec<f64>, thermo_data: Vec<(f64, f64)>) -> Self {
        Self {
            T,
            P,
            mole_fractions,
            thermo_data,
        }
    }
}

impl ThermoProvider for IdealGasState {
    fn temperature(&self) -> f64 {
        self.T
    }

    fn pressure(&self) -> f64 {
        self.P
    }

    fn molar_density(&self) -> f64 {
        self.P / (R * self.T)
    }

    fn standard_concentration(&self) -> f64 {
        P_STANDARD / (R * self.T)
    }

    fn nSpecies(&self) -> usize {
        self.mole_fractions.len()
    }

    fn get_activity_concentrations(&self, c: &mut [f64]) {
        self.get_concentrations(c);
    }

    fn get_concentrations(&self, c: &mut [f64]) {
        let ctot = self.molar_density();
        for (ci, xi) in c.iter_mut().zip(&self.mole_fractions) {
            *ci = xi * ctot;
        }
    }

    fn get_standard_chem_potentials(&self, mu: &mut [f64]) {
        for (mui, &(h, s)) in mu.iter_mut().zip(&self.thermo_data) {
            *mui = h - self.T * s;
        }
    }

    fn set_state_TP(&mut self, T: f64, P: f64) {
        self.T = T;
        self.P = P;
    }

    fn is_ideal_gas(&self) -> bool {
        true
    }
}

/// State with directly prescribed concentrations, for callers that perturb a
/// single species concentration (e.g. finite-difference Jacobian checks).
/// Molar density is the concentration sum; the equation of state is opaque.
#[derive(Debug, Clone)]
pub struct FixedCompositionState {
    T: f64,
    P: f64,
    concentrations: Vec<f64>,
    thermo_data: Vec<(f64, f64)>,
}

impl FixedCompositionState {
    pub fn new(T: f64, P: f64, concentrations: Vec<f64>, thermo_data: Vec<(f64, f64)>) -> Self {
        Self {
            T,
            P,
            concentrations,
            thermo_data,
        }
    }

    pub fn set_concentration(&mut self, k: usize, c: f64) {
        self.concentrations[k] = c;
    }

    pub fn concentration(&self, k: usize) -> f64 {
        self.concentrations[k]
    }
}

impl ThermoProvider for FixedCompositionState {
    fn temperature(&self) -> f64 {
        self.T
    }

    fn pressure(&self) -> f64 {
        self.P
    }

    fn molar_density(&self) -> f64 {
        self.concentrations.iter().sum()
    }

    fn standard_concentration(&self) -> f64 {
        P_STANDARD / (R * self.T)
    }

    fn nSpecies(&self) -> usize {
        self.concentrations.len()
    }

    fn get_activity_concentrations(&self, c: &mut [f64]) {
        c.copy_from_slice(&self.concentrations);
    }

    fn get_concentrations(&self, c: &mut [f64]) {
        c.copy_from_slice(&self.concentrations);
    }

    fn get_standard_chem_potentials(&self, mu: &mut [f64]) {
        for (mui, &(h, s)) in mu.iter_mut().zip(&self.thermo_data) {
            *mui = h - self.T * s;
        }
    }

    fn set_state_TP(&mut self, T: f64, P: f64) {
        self.T = T;
        self.P = P;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ideal_gas_concentrations() {
        let state = IdealGasState::new(
            1000.0,
            101325.0,
            vec![0.7, 0.3],
            vec![(0.0, 0.0), (0.0, 0.0)],
        );
        let ctot = 101325.0 / (R * 1000.0);
        assert_relative_eq!(state.molar_density(), ctot, max_relative = 1e-14);
        assert_relative_eq!(state.standard_concentration(), ctot, max_relative = 1e-14);
        let mut c = vec![0.0; 2];
        state.get_concentrations(&mut c);
        assert_relative_eq!(c[0], 0.7 * ctot, max_relative = 1e-14);
        assert_relative_eq!(c[1], 0.3 * ctot, max_relative = 1e-14);
    }

    #[test]
    fn test_chem_potentials_follow_h_minus_ts() {
        let mut state = IdealGasState::new(
            500.0,
            101325.0,
            vec![1.0],
            vec![(-50_000.0, 100.0)],
        );
        let mut mu = vec![0.0];
        state.get_standard_chem_potentials(&mut mu);
        assert_relative_eq!(mu[0], -50_000.0 - 500.0 * 100.0, max_relative = 1e-14);
        // transient perturbation changes T-dependent quantities and restores
        let ctot0 = state.molar_density();
        state.set_state_TP(550.0, 101325.0);
        assert!(state.molar_density() < ctot0);
        state.set_state_TP(500.0, 101325.0);
        assert_relative_eq!(state.molar_density(), ctot0, max_relative = 1e-14);
    }
}
