#![allow(non_snake_case)]
//! Stoichiometric bookkeeping for one side of the reaction set: per-reaction
//! (species, coefficient) lists with the concentration-power products, the
//! Delta-G assembly increments and the analytic sparse sensitivities that the
//! rate-of-progress and Jacobian assemblers delegate to.
use nalgebra_sparse::coo::CooMatrix;

#[derive(Debug, Clone, Default)]
pub struct StoichManager {
    /// coeffs[i]: (species index, coefficient) pairs of reaction i; empty for
    /// reactions this side does not participate in
    coeffs: Vec<Vec<(usize, f64)>>,
}

impl StoichManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nReactions(&self) -> usize {
        self.coeffs.len()
    }

    /// append the coefficient list of the next reaction; an empty list keeps
    /// the index space aligned for reactions without entries on this side
    pub fn add_reaction(&mut self, pairs: Vec<(usize, f64)>) {
        self.coeffs.push(pairs);
    }

    /// rop[i] *= prod_k c_k^nu_ki
    pub fn multiply(&self, conc: &[f64], rop: &mut [f64]) {
        for (i, pairs) in self.coeffs.iter().enumerate() {
            if pairs.is_empty() {
                continue;
            }
            let mut prod = 1.0;
            for &(k, nu) in pairs {
                prod *= conc[k].powf(nu);
            }
            rop[i] *= prod;
        }
    }

    /// dg[i] += sum_k nu_ki * g[k]
    pub fn increment_reactions(&self, g: &[f64], dg: &mut [f64]) {
        for (i, pairs) in self.coeffs.iter().enumerate() {
            for &(k, nu) in pairs {
                dg[i] += nu * g[k];
            }
        }
    }

    /// dg[i] -= sum_k nu_ki * g[k]
    pub fn decrement_reactions(&self, g: &[f64], dg: &mut [f64]) {
        for (i, pairs) in self.coeffs.iter().enumerate() {
            for &(k, nu) in pairs {
                dg[i] -= nu * g[k];
            }
        }
    }

    /// relative-derivative propagation: out[i] += in[i] * (sum of this side's
    /// reaction orders), the sensitivity of the concentration-power product
    /// to a uniform relative change of all concentrations
    pub fn scale(&self, rop: &[f64], out: &mut [f64]) {
        for (i, pairs) in self.coeffs.iter().enumerate() {
            let order_sum: f64 = pairs.iter().map(|&(_, nu)| nu).sum();
            out[i] += rop[i] * order_sum;
        }
    }

    /// analytic sensitivity of rop[i] = base[i] * prod_k c_k^nu_ki with
    /// respect to each participating concentration:
    /// J(i, k) = base[i] * nu_ki * c_k^(nu_ki - 1) * prod_{j != k} c_j^nu_ji
    pub fn jacobian(&self, conc: &[f64], base: &[f64], n_species: usize) -> CooMatrix<f64> {
        let mut jac = CooMatrix::new(self.coeffs.len(), n_species);
        for (i, pairs) in self.coeffs.iter().enumerate() {
            if pairs.is_empty() || base[i] == 0.0 {
                continue;
            }
            for (pos, &(k, nu)) in pairs.iter().enumerate() {
                let mut term = base[i] * nu * conc[k].powf(nu - 1.0);
                for (other, &(j, nu_j)) in pairs.iter().enumerate() {
                    if other != pos {
                        term *= conc[j].powf(nu_j);
                    }
                }
                jac.push(i, k, term);
            }
        }
        jac
    }
}
