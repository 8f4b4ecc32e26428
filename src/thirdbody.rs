#![allow(non_snake_case)]
//! Effective third-body (collider) concentrations. For a reaction with
//! efficiency map {k: eff_k} and default efficiency d the effective
//! concentration is d*C_tot + sum_k (eff_k - d)*c_k, which equals the
//! weighted-sum form sum_k eff_k*c_k + d*(C_tot - sum_{k in map} c_k).
//! The same calculator type serves both the batched "multi" pass over all
//! three-body reactions and the per-subset passes used by the falloff and
//! legacy code paths, so overlapping reactions agree exactly.
use nalgebra_sparse::coo::CooMatrix;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ThirdBodyCalc {
    /// global reaction index per installed entry
    reaction_idx: Vec<usize>,
    /// species listed in each entry's efficiency map
    species: Vec<Vec<usize>>,
    /// efficiency minus default, aligned with `species`
    eff: Vec<Vec<f64>>,
    default_eff: Vec<f64>,
}

impl ThirdBodyCalc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workSize(&self) -> usize {
        self.reaction_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reaction_idx.is_empty()
    }

    pub fn contains(&self, rxn_index: usize) -> bool {
        self.reaction_idx.contains(&rxn_index)
    }

    pub fn install(
        &mut self,
        rxn_index: usize,
        efficiencies: &HashMap<usize, f64>,
        default_efficiency: f64,
    ) {
        let mut species: Vec<usize> = efficiencies.keys().copied().collect();
        species.sort_unstable();
        let eff = species
            .iter()
            .map(|k| efficiencies[k] - default_efficiency)
            .collect();
        self.reaction_idx.push(rxn_index);
        self.species.push(species);
        self.eff.push(eff);
        self.default_eff.push(default_efficiency);
    }

    /// replace the efficiency map installed for a reaction without touching
    /// any other entry; true on success
    pub fn replace(
        &mut self,
        rxn_index: usize,
        efficiencies: &HashMap<usize, f64>,
        default_efficiency: f64,
    ) -> bool {
        let Some(pos) = self.reaction_idx.iter().position(|&i| i == rxn_index) else {
            return false;
        };
        let mut species: Vec<usize> = efficiencies.keys().copied().collect();
        species.sort_unstable();
        self.eff[pos] = species
            .iter()
            .map(|k| efficiencies[k] - default_efficiency)
            .collect();
        self.species[pos] = species;
        self.default_eff[pos] = default_efficiency;
        true
    }

    /// drop a reaction's entry; remaining entries keep their relative order
    pub fn remove(&mut self, rxn_index: usize) -> bool {
        let Some(pos) = self.reaction_idx.iter().position(|&i| i == rxn_index) else {
            return false;
        };
        self.reaction_idx.remove(pos);
        self.species.remove(pos);
        self.eff.remove(pos);
        self.default_eff.remove(pos);
        true
    }

    /// compute every effective concentration into the compact work array
    pub fn update(&self, conc: &[f64], ctot: f64, work: &mut [f64]) {
        for pos in 0..self.reaction_idx.len() {
            let mut sum = 0.0;
            for (j, &k) in self.species[pos].iter().enumerate() {
                sum += self.eff[pos][j] * conc[k];
            }
            work[pos] = self.default_eff[pos] * ctot + sum;
        }
    }

    /// multiply the owned entries of a reaction-length vector by the
    /// effective concentrations
    pub fn multiply(&self, rop: &mut [f64], work: &[f64]) {
        for (pos, &i) in self.reaction_idx.iter().enumerate() {
            rop[i] *= work[pos];
        }
    }

    /// scatter the compact work values into a reaction-length vector
    pub fn copy(&self, work: &[f64], dest: &mut [f64]) {
        for (pos, &i) in self.reaction_idx.iter().enumerate() {
            dest[i] = work[pos];
        }
    }

    /// relative-derivative propagation: add each owned reaction's value,
    /// scaled by the collider reaction order (one), into `out`
    pub fn scaleOrder(&self, rop: &[f64], out: &mut [f64]) {
        for &i in &self.reaction_idx {
            out[i] += rop[i];
        }
    }

    /// sparse sensitivity of the collider concentrations: d M_i/d c_k equals
    /// the species' efficiency, so each owned row gets rop[i]*eff_k entries
    pub fn jacobian(&self, rop: &[f64], n_reactions: usize, n_species: usize) -> CooMatrix<f64> {
        let mut jac = CooMatrix::new(n_reactions, n_species);
        for (pos, &i) in self.reaction_idx.iter().enumerate() {
            if rop[i] == 0.0 {
                continue;
            }
            for (j, &k) in self.species[pos].iter().enumerate() {
                jac.push(i, k, rop[i] * self.eff[pos][j]);
            }
            let d = self.default_eff[pos];
            if d != 0.0 {
                for k in 0..n_species {
                    jac.push(i, k, rop[i] * d);
                }
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse::csr::CsrMatrix;

    fn efficiency_map(pairs: &[(usize, f64)]) -> HashMap<usize, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_effective_concentration_weighted_sum_formula() {
        // M = sum eff_k*c_k + d*(C_tot - sum_{k in map} c_k)
        let mut calc = ThirdBodyCalc::new();
        calc.install(0, &efficiency_map(&[(0, 2.5), (2, 12.0)]), 1.0);
        let conc = [0.3, 0.5, 0.2];
        let ctot: f64 = conc.iter().sum();
        let mut work = vec![0.0; calc.workSize()];
        calc.update(&conc, ctot, &mut work);
        let expected = 2.5 * 0.3 + 12.0 * 0.2 + 1.0 * (ctot - 0.3 - 0.2);
        assert_relative_eq!(work[0], expected, max_relative = 1e-14);
    }

    #[test]
    fn test_batched_and_subset_paths_agree_exactly() {
        let effs = efficiency_map(&[(1, 2.0), (3, 0.7)]);
        let mut multi = ThirdBodyCalc::new();
        multi.install(0, &efficiency_map(&[(0, 3.0)]), 1.0);
        multi.install(2, &effs, 0.5);
        let mut subset = ThirdBodyCalc::new();
        subset.install(2, &effs, 0.5);

        let conc = [0.11, 0.22, 0.33, 0.44];
        let ctot: f64 = conc.iter().sum();
        let mut work_multi = vec![0.0; multi.workSize()];
        let mut work_subset = vec![0.0; subset.workSize()];
        multi.update(&conc, ctot, &mut work_multi);
        subset.update(&conc, ctot, &mut work_subset);

        let mut concm_multi = vec![0.0; 3];
        let mut concm_subset = vec![0.0; 3];
        multi.copy(&work_multi, &mut concm_multi);
        subset.copy(&work_subset, &mut concm_subset);
        // bit-identical for the overlapping reaction
        assert_eq!(concm_multi[2], concm_subset[2]);
    }

    #[test]
    fn test_replace_and_remove_leave_other_entries_alone() {
        let mut calc = ThirdBodyCalc::new();
        calc.install(0, &efficiency_map(&[(0, 2.0)]), 1.0);
        calc.install(1, &efficiency_map(&[(1, 5.0)]), 1.0);
        calc.install(2, &efficiency_map(&[(2, 3.0)]), 0.0);
        let conc = [1.0, 1.0, 1.0];
        let mut before = vec![0.0; 3];
        calc.update(&conc, 3.0, &mut before);

        assert!(calc.replace(1, &efficiency_map(&[(1, 9.0)]), 1.0));
        let mut after = vec![0.0; 3];
        calc.update(&conc, 3.0, &mut after);
        assert_eq!(before[0], after[0]);
        assert_eq!(before[2], after[2]);
        assert_relative_eq!(after[1], 3.0 + (9.0 - 1.0), max_relative = 1e-14);

        assert!(calc.remove(1));
        assert_eq!(calc.workSize(), 2);
        let mut rest = vec![0.0; 2];
        calc.update(&conc, 3.0, &mut rest);
        assert_eq!(rest[0], before[0]);
        assert_eq!(rest[1], before[2]);
        assert!(!calc.remove(7));
    }

    #[test]
    fn test_multiply_and_scale_order_touch_only_owned_rows() {
        let mut calc = ThirdBodyCalc::new();
        calc.install(1, &efficiency_map(&[]), 1.0);
        let mut work = vec![0.0; 1];
        calc.update(&[0.5, 0.5], 1.0, &mut work);
        let mut rop = vec![2.0, 2.0, 2.0];
        calc.multiply(&mut rop, &work);
        assert_eq!(rop, vec![2.0, 2.0, 2.0]); // M = C_tot = 1
        let mut out = vec![0.0; 3];
        calc.scaleOrder(&rop, &mut out);
        assert_eq!(out, vec![0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_jacobian_entries_are_efficiencies() {
        let mut calc = ThirdBodyCalc::new();
        calc.install(0, &efficiency_map(&[(1, 4.0)]), 1.0);
        let rop = [3.0];
        let jac = CsrMatrix::from(&calc.jacobian(&rop, 1, 2));
        // dM/dc_0 = default = 1, dM/dc_1 = eff = 4
        let dense = nalgebra::DMatrix::from(&jac);
        assert_relative_eq!(dense[(0, 0)], 3.0 * 1.0, max_relative = 1e-14);
        assert_relative_eq!(dense[(0, 1)], 3.0 * 4.0, max_relative = 1e-14);
    }
}
