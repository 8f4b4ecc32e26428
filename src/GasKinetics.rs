#![allow(non_snake_case)]
//! The rate-of-progress and Jacobian assembler for homogeneous gas-phase
//! kinetics. Owns the cached evaluation state (rate constants, reverse-rate
//! multipliers, collider concentrations, rates of progress) over a stable
//! 0-based reaction index space and orchestrates the rate-law buckets, the
//! third-body calculators, the falloff blender and the equilibrium-constant
//! calculator into forward/reverse/net rates of progress and their
//! temperature and concentration derivatives.

use crate::falloff::{FalloffMgr, create_falloff_curve};
use crate::rates::{ArrheniusBucket, ChebyshevBucket, PlogBucket};
use crate::reaction::{RateExpression, Reaction, ReactionType};
use crate::stoichiometry::StoichManager;
use crate::thermo::ThermoProvider;
use crate::thirdbody::ThirdBodyCalc;
use log::{error, warn};
use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;
use serde_json::{Value, json};
use thiserror::Error;

pub const BIG_NUMBER: f64 = 1.0e300;
pub const SMALL_NUMBER: f64 = 1.0e-300;

#[derive(Debug, Error)]
pub enum KineticsError {
    #[error("{context}: {vector}[{index}] is not finite")]
    NonFinite {
        context: &'static str,
        vector: &'static str,
        index: usize,
    },
    #[error("{context}: unknown or mismatched reaction type '{rtype}'")]
    InvalidReactionType {
        context: &'static str,
        rtype: String,
    },
    #[error("{context}: {msg}")]
    NotImplemented {
        context: &'static str,
        msg: String,
    },
    #[error("{context}: not supported for reactions installed through the deprecated construction path")]
    LegacyRates { context: &'static str },
    #[error("{context}: {msg}")]
    InvalidInput {
        context: &'static str,
        msg: String,
    },
}

pub struct GasKinetics<Th: ThermoProvider> {
    thermo: Th,
    n_species: usize,

    // structural per-reaction data, fixed at installation
    rxn_type: Vec<ReactionType>,
    dn: Vec<f64>,
    revindex: Vec<usize>,
    irrev: Vec<usize>,
    perturb: Vec<f64>,
    /// indices installed through the deprecated construction path; their
    /// presence makes every Jacobian entry point fail fast
    legacy: Vec<usize>,

    reactant_stoich: StoichManager,
    product_stoich: StoichManager,
    rev_product_stoich: StoichManager,

    // rate-law evaluator buckets (global reaction indices)
    rates: ArrheniusBucket,
    plog_rates: PlogBucket,
    cheb_rates: ChebyshevBucket,

    // falloff machinery (bucket-local falloff-subset indices)
    falloff_low_rates: ArrheniusBucket,
    falloff_high_rates: ArrheniusBucket,
    falloffn: FalloffMgr,
    fall_indx: Vec<usize>,
    fall_type: Vec<ReactionType>,
    rfn_low: Vec<f64>,
    rfn_high: Vec<f64>,
    falloff_work: Vec<f64>,
    falloff_pr: Vec<f64>,
    falloff_concm: ThirdBodyCalc,
    concm_falloff_values: Vec<f64>,

    // third-body calculators: batched multi pass plus the legacy per-family
    // subset; both are the same calculator type so overlapping reactions
    // agree exactly
    multi_concm: ThirdBodyCalc,
    concm_multi_values: Vec<f64>,
    legacy_3b_concm: ThirdBodyCalc,
    concm_3b_values: Vec<f64>,

    // cached evaluation state, invalidated together
    temp: f64,
    pres: f64,
    log_stand_conc: f64,
    rfn: Vec<f64>,
    rkcn: Vec<f64>,
    concm: Vec<f64>,
    ropf: Vec<f64>,
    ropr: Vec<f64>,
    ropnet: Vec<f64>,
    grt: Vec<f64>,
    act_conc: Vec<f64>,
    phys_conc: Vec<f64>,
    rbuf0: Vec<f64>,
    rbuf1: Vec<f64>,
    rbuf2: Vec<f64>,
    rop_ok: bool,

    // jacobian settings
    jac_const_pressure: bool,
    jac_mole_fractions: bool,
    jac_skip_third_bodies: bool,
    jac_skip_falloff: bool,
    jac_rtol_deltaT: f64,

    /// per-instance toggle for the deprecated rate-constant semantics that
    /// fold third-body concentrations into reported forward rate constants
    use_legacy_rate_constants: bool,
}

impl<Th: ThermoProvider> GasKinetics<Th> {
    pub fn new(thermo: Th) -> Self {
        let n_species = thermo.nSpecies();
        Self {
            thermo,
            n_species,
            rxn_type: Vec::new(),
            dn: Vec::new(),
            revindex: Vec::new(),
            irrev: Vec::new(),
            perturb: Vec::new(),
            legacy: Vec::new(),
            reactant_stoich: StoichManager::new(),
            product_stoich: StoichManager::new(),
            rev_product_stoich: StoichManager::new(),
            rates: ArrheniusBucket::new(),
            plog_rates: PlogBucket::new(),
            cheb_rates: ChebyshevBucket::new(),
            falloff_low_rates: ArrheniusBucket::new(),
            falloff_high_rates: ArrheniusBucket::new(),
            falloffn: FalloffMgr::new(),
            fall_indx: Vec::new(),
            fall_type: Vec::new(),
            rfn_low: Vec::new(),
            rfn_high: Vec::new(),
            falloff_work: Vec::new(),
            falloff_pr: Vec::new(),
            falloff_concm: ThirdBodyCalc::new(),
            concm_falloff_values: Vec::new(),
            multi_concm: ThirdBodyCalc::new(),
            concm_multi_values: Vec::new(),
            legacy_3b_concm: ThirdBodyCalc::new(),
            concm_3b_values: Vec::new(),
            temp: 0.0,
            pres: 0.0,
            log_stand_conc: 0.0,
            rfn: Vec::new(),
            rkcn: Vec::new(),
            concm: Vec::new(),
            ropf: Vec::new(),
            ropr: Vec::new(),
            ropnet: Vec::new(),
            grt: vec![0.0; n_species],
            act_conc: vec![0.0; n_species],
            phys_conc: vec![0.0; n_species],
            rbuf0: Vec::new(),
            rbuf1: Vec::new(),
            rbuf2: Vec::new(),
            rop_ok: false,
            jac_const_pressure: true,
            jac_mole_fractions: true,
            jac_skip_third_bodies: false,
            jac_skip_falloff: true,
            jac_rtol_deltaT: 1e-6,
            use_legacy_rate_constants: false,
        }
    }

    pub fn nReactions(&self) -> usize {
        self.rxn_type.len()
    }

    pub fn thermo(&self) -> &Th {
        &self.thermo
    }

    pub fn thermo_mut(&mut self) -> &mut Th {
        &mut self.thermo
    }

    //////////////////////// INSTALLATION ////////////////////////

    /// install a reaction at the next index; returns the index
    pub fn add_reaction(&mut self, r: &Reaction) -> Result<usize, KineticsError> {
        if !r.type_matches_rate() {
            return Err(KineticsError::InvalidReactionType {
                context: "GasKinetics::add_reaction",
                rtype: r.reaction_type.to_string(),
            });
        }
        let i = self.install_common(r);
        match (&r.reaction_type, &r.rate) {
            (ReactionType::Elementary, RateExpression::Arrhenius(rate)) => {
                self.rates.install(i, *rate);
            }
            (ReactionType::ThreeBody, RateExpression::Arrhenius(rate)) => {
                self.rates.install(i, *rate);
                let tb = r.third_body.clone().unwrap_or_default();
                self.multi_concm
                    .install(i, &tb.efficiencies, tb.default_efficiency);
                self.concm_multi_values
                    .resize(self.multi_concm.workSize(), 0.0);
            }
            (
                ReactionType::Falloff | ReactionType::ChemicallyActivated,
                RateExpression::Falloff {
                    low_rate,
                    high_rate,
                    curve,
                },
            ) => {
                self.falloff_low_rates
                    .install(self.falloffn.nReactions(), *low_rate);
                self.falloff_high_rates
                    .install(self.falloffn.nReactions(), *high_rate);
                self.rfn_low.push(0.0);
                self.rfn_high.push(0.0);
                self.fall_indx.push(i);
                self.fall_type.push(r.reaction_type);
                self.falloffn.install(create_falloff_curve(curve));
                self.falloff_work.resize(self.falloffn.workSize(), 0.0);
                self.falloff_pr.push(0.0);
                let tb = r.third_body.clone().unwrap_or_default();
                self.falloff_concm
                    .install(i, &tb.efficiencies, tb.default_efficiency);
                self.concm_falloff_values
                    .resize(self.falloff_concm.workSize(), 0.0);
            }
            (ReactionType::Plog, RateExpression::Plog(rate)) => {
                self.plog_rates.install(i, rate.clone());
            }
            (ReactionType::Chebyshev, RateExpression::Chebyshev(rate)) => {
                self.cheb_rates.install(i, rate.clone());
            }
            _ => unreachable!("type/rate consistency checked above"),
        }
        self.resize_reactions();
        self.invalidate_cache();
        Ok(i)
    }

    /// deprecated construction path retained for compatibility: elementary
    /// and three-body reactions only, installed through the per-family
    /// third-body subset; Jacobian queries against the instance fail fast
    /// while any reaction installed this way exists
    pub fn add_reaction_legacy(&mut self, r: &Reaction) -> Result<usize, KineticsError> {
        warn!(
            "GasKinetics::add_reaction_legacy is deprecated; reactions installed \
             through it do not support Jacobian evaluation"
        );
        match (&r.reaction_type, &r.rate) {
            (ReactionType::Elementary, RateExpression::Arrhenius(rate)) => {
                let i = self.install_common(r);
                self.rates.install(i, *rate);
                self.legacy.push(i);
                self.resize_reactions();
                self.invalidate_cache();
                Ok(i)
            }
            (ReactionType::ThreeBody, RateExpression::Arrhenius(rate)) => {
                let i = self.install_common(r);
                self.rates.install(i, *rate);
                let tb = r.third_body.clone().unwrap_or_default();
                self.legacy_3b_concm
                    .install(i, &tb.efficiencies, tb.default_efficiency);
                self.concm_3b_values
                    .resize(self.legacy_3b_concm.workSize(), 0.0);
                self.legacy.push(i);
                self.resize_reactions();
                self.invalidate_cache();
                Ok(i)
            }
            _ => Err(KineticsError::InvalidReactionType {
                context: "GasKinetics::add_reaction_legacy",
                rtype: r.reaction_type.to_string(),
            }),
        }
    }

    /// replace the rate parameters of reaction i in place; the reaction type
    /// and stoichiometry (including the net mole change) are kept
    pub fn modify_reaction(&mut self, i: usize, r: &Reaction) -> Result<(), KineticsError> {
        if i >= self.nReactions() {
            return Err(KineticsError::InvalidInput {
                context: "GasKinetics::modify_reaction",
                msg: format!("reaction index {} out of range", i),
            });
        }
        if r.reaction_type != self.rxn_type[i] || !r.type_matches_rate() {
            return Err(KineticsError::InvalidReactionType {
                context: "GasKinetics::modify_reaction",
                rtype: r.reaction_type.to_string(),
            });
        }
        match (&r.reaction_type, &r.rate) {
            (ReactionType::Elementary, RateExpression::Arrhenius(rate)) => {
                self.rates.replace(i, *rate);
            }
            (ReactionType::ThreeBody, RateExpression::Arrhenius(rate)) => {
                self.rates.replace(i, *rate);
                if let Some(tb) = &r.third_body {
                    if !self
                        .multi_concm
                        .replace(i, &tb.efficiencies, tb.default_efficiency)
                    {
                        self.legacy_3b_concm
                            .replace(i, &tb.efficiencies, tb.default_efficiency);
                    }
                }
            }
            (
                ReactionType::Falloff | ReactionType::ChemicallyActivated,
                RateExpression::Falloff {
                    low_rate,
                    high_rate,
                    curve,
                },
            ) => {
                // fall_indx maps the falloff-subset position to the global
                // index; replacement works on the subset position
                let Some(pos) = self.fall_indx.iter().position(|&k| k == i) else {
                    return Err(KineticsError::InvalidInput {
                        context: "GasKinetics::modify_reaction",
                        msg: format!("reaction {} is not in the falloff subset", i),
                    });
                };
                self.falloff_low_rates.replace(pos, *low_rate);
                self.falloff_high_rates.replace(pos, *high_rate);
                self.falloffn.replace(pos, create_falloff_curve(curve));
                self.falloff_work.resize(self.falloffn.workSize(), 0.0);
                if let Some(tb) = &r.third_body {
                    self.falloff_concm
                        .replace(i, &tb.efficiencies, tb.default_efficiency);
                }
            }
            (ReactionType::Plog, RateExpression::Plog(rate)) => {
                self.plog_rates.replace(i, rate.clone());
            }
            (ReactionType::Chebyshev, RateExpression::Chebyshev(rate)) => {
                self.cheb_rates.replace(i, rate.clone());
            }
            _ => unreachable!("type/rate consistency checked above"),
        }
        self.invalidate_cache();
        Ok(())
    }

    fn install_common(&mut self, r: &Reaction) -> usize {
        let i = self.nReactions();
        self.rxn_type.push(r.reaction_type);
        self.dn.push(r.delta_n());
        self.perturb.push(1.0);
        self.reactant_stoich.add_reaction(r.reactants.clone());
        self.product_stoich.add_reaction(r.products.clone());
        if r.reversible {
            self.revindex.push(i);
            self.rev_product_stoich.add_reaction(r.products.clone());
        } else {
            self.irrev.push(i);
            self.rev_product_stoich.add_reaction(Vec::new());
        }
        i
    }

    fn resize_reactions(&mut self) {
        let n = self.nReactions();
        self.rfn.resize(n, 0.0);
        self.rkcn.resize(n, 0.0);
        self.concm.resize(n, 0.0);
        self.ropf.resize(n, 0.0);
        self.ropr.resize(n, 0.0);
        self.ropnet.resize(n, 0.0);
        self.rbuf0.resize(n, 0.0);
        self.rbuf1.resize(n, 0.0);
        self.rbuf2.resize(n, 0.0);
    }

    /// structural mutation must never leave a coincidentally-matching cache:
    /// the (T, P) sentinels are perturbed by a fixed nonzero offset
    fn invalidate_cache(&mut self) {
        self.temp += 0.13579;
        self.pres += 0.13579;
        self.rop_ok = false;
    }

    //////////////////////// STATE UPDATES ////////////////////////

    fn update_rates_T(&mut self) {
        let T = self.thermo.temperature();
        let P = self.thermo.pressure();
        self.log_stand_conc = self.thermo.standard_concentration().ln();
        let logT = T.ln();

        if T != self.temp {
            if !self.rfn.is_empty() {
                self.rates.update(T, logT, &mut self.rfn);
            }
            if !self.rfn_low.is_empty() {
                self.falloff_low_rates.update(T, logT, &mut self.rfn_low);
                self.falloff_high_rates.update(T, logT, &mut self.rfn_high);
            }
            if !self.falloff_work.is_empty() {
                self.falloffn.updateTemp(T, &mut self.falloff_work);
            }
            self.update_kc();
            self.rop_ok = false;
        }
        if T != self.temp || P != self.pres {
            if self.plog_rates.nReactions() > 0 {
                self.plog_rates.update(T, logT, &mut self.rfn);
                self.rop_ok = false;
            }
            if self.cheb_rates.nReactions() > 0 {
                self.cheb_rates.update(T, logT, &mut self.rfn);
                self.rop_ok = false;
            }
        }
        self.pres = P;
        self.temp = T;
    }

    fn update_rates_C(&mut self) {
        self.thermo.get_activity_concentrations(&mut self.act_conc);
        self.thermo.get_concentrations(&mut self.phys_conc);
        let ctot = self.thermo.molar_density();

        self.multi_concm
            .update(&self.phys_conc, ctot, &mut self.concm_multi_values);
        self.multi_concm
            .copy(&self.concm_multi_values, &mut self.concm);

        // three-body reactions (legacy subset)
        if !self.concm_3b_values.is_empty() {
            self.legacy_3b_concm
                .update(&self.phys_conc, ctot, &mut self.concm_3b_values);
            self.legacy_3b_concm
                .copy(&self.concm_3b_values, &mut self.concm);
        }

        // falloff reactions: collider enters through the reduced pressure
        if !self.concm_falloff_values.is_empty() {
            self.falloff_concm
                .update(&self.phys_conc, ctot, &mut self.concm_falloff_values);
            self.falloff_concm
                .copy(&self.concm_falloff_values, &mut self.concm);
        }

        if self.plog_rates.nReactions() > 0 {
            self.plog_rates.update_P(self.thermo.pressure().ln());
        }
        if self.cheb_rates.nReactions() > 0 {
            self.cheb_rates.update_P(self.thermo.pressure().log10());
        }
        self.rop_ok = false;
    }

    /// recompute the reverse-rate multipliers exp(dG0/RT - dn*ln(C0)) for
    /// reversible reactions, clamped against overflow; exactly zero for
    /// irreversible reactions
    fn update_kc(&mut self) {
        self.thermo.get_standard_chem_potentials(&mut self.grt);
        self.rkcn.fill(0.0);

        // Delta G^0 for all reversible reactions
        self.rev_product_stoich
            .increment_reactions(&self.grt, &mut self.rkcn);
        self.reactant_stoich
            .decrement_reactions(&self.grt, &mut self.rkcn);

        let rrt = 1.0 / self.thermo.RT();
        for pos in 0..self.revindex.len() {
            let irxn = self.revindex[pos];
            self.rkcn[irxn] = (self.rkcn[irxn] * rrt - self.dn[irxn] * self.log_stand_conc)
                .exp()
                .min(BIG_NUMBER);
        }
        for pos in 0..self.irrev.len() {
            self.rkcn[self.irrev[pos]] = 0.0;
        }
    }

    /// equilibrium constants Kc = exp(-dG0/RT + dn*ln(C0)) for every
    /// reaction; forces the temperature sentinel to an unreachable value so
    /// the reverse-rate multipliers are refreshed before their next use
    pub fn get_equilibrium_constants(&mut self, kc: &mut [f64]) {
        self.update_rates_T();
        self.thermo.get_standard_chem_potentials(&mut self.grt);
        self.rkcn.fill(0.0);

        // Delta G^0 for all reactions
        self.product_stoich
            .increment_reactions(&self.grt, &mut self.rkcn);
        self.reactant_stoich
            .decrement_reactions(&self.grt, &mut self.rkcn);

        let rrt = 1.0 / self.thermo.RT();
        for i in 0..self.nReactions() {
            kc[i] = (-self.rkcn[i] * rrt + self.dn[i] * self.log_stand_conc).exp();
        }

        // m_rkcn was clobbered; force the next T-update to rebuild it
        self.temp = 0.0;
    }

    //////////////////////// RATE-OF-PROGRESS ASSEMBLY ////////////////////////

    /// reduced pressure and blending for the falloff subset, writing the
    /// effective rate constants into the falloff entries of `ropf`
    fn process_falloff_reactions(&mut self, ropf: &mut [f64]) -> Result<(), KineticsError> {
        let nfall = self.falloff_low_rates.nReactions();
        for j in 0..nfall {
            let pr =
                self.concm_falloff_values[j] * self.rfn_low[j] / (self.rfn_high[j] + SMALL_NUMBER);
            if !pr.is_finite() {
                error!(
                    "GasKinetics::process_falloff_reactions: pr[{}] is not finite",
                    self.fall_indx[j]
                );
                return Err(KineticsError::NonFinite {
                    context: "GasKinetics::process_falloff_reactions",
                    vector: "pr",
                    index: self.fall_indx[j],
                });
            }
            self.falloff_pr[j] = pr;
        }

        self.falloffn
            .pr_to_falloff(&mut self.falloff_pr, &self.falloff_work);

        for j in 0..nfall {
            // falloff scales the high-pressure limit, chemically-activated
            // the low-pressure limit; the blending machinery is shared
            let limit = if self.fall_type[j] == ReactionType::Falloff {
                self.rfn_high[j]
            } else {
                self.rfn_low[j]
            };
            ropf[self.fall_indx[j]] = self.falloff_pr[j] * limit;
        }
        Ok(())
    }

    fn process_fwd_rate_coefficients(&mut self, ropf: &mut [f64]) -> Result<(), KineticsError> {
        self.update_rates_C();
        self.update_rates_T();

        ropf.copy_from_slice(&self.rfn);

        if self.falloff_high_rates.nReactions() > 0 {
            self.process_falloff_reactions(ropf)?;
        }

        // scale by the perturbation factors used for sensitivity studies
        for (v, p) in ropf.iter_mut().zip(&self.perturb) {
            *v *= p;
        }
        Ok(())
    }

    /// multiply the entries of third-body-bearing reactions by the effective
    /// collider concentration (falloff excluded: its collider enters pr)
    fn process_third_bodies(&self, rop: &mut [f64]) {
        if !self.concm_3b_values.is_empty() {
            self.legacy_3b_concm.multiply(rop, &self.concm_3b_values);
        }
        if !self.concm_multi_values.is_empty() {
            self.multi_concm.multiply(rop, &self.concm_multi_values);
        }
    }

    /// multiply forward coefficients by the reverse-rate multipliers
    fn process_equilibrium_constants(&self, rop: &mut [f64]) {
        for (v, rkcn) in rop.iter_mut().zip(&self.rkcn) {
            *v *= rkcn;
        }
    }

    fn update_rop(&mut self) -> Result<(), KineticsError> {
        let mut ropf = std::mem::take(&mut self.ropf);
        let mut ropr = std::mem::take(&mut self.ropr);

        let assemble = (|| -> Result<(), KineticsError> {
            self.process_fwd_rate_coefficients(&mut ropf)?;
            self.process_third_bodies(&mut ropf);
            ropr.copy_from_slice(&ropf);

            // forward rates of progress: law of mass action on reactants
            self.reactant_stoich.multiply(&self.act_conc, &mut ropf);

            // reverse rates of progress through thermochemistry
            self.process_equilibrium_constants(&mut ropr);
            self.rev_product_stoich.multiply(&self.act_conc, &mut ropr);

            for j in 0..self.nReactions() {
                self.ropnet[j] = ropf[j] - ropr[j];
            }
            Ok(())
        })();
        self.ropf = ropf;
        self.ropr = ropr;
        assemble?;

        for i in 0..self.rfn.len() {
            self.assert_finite(self.rfn[i], "GasKinetics::update_rop", "rfn", i)?;
            self.assert_finite(self.ropf[i], "GasKinetics::update_rop", "ropf", i)?;
            self.assert_finite(self.ropr[i], "GasKinetics::update_rop", "ropr", i)?;
        }
        self.rop_ok = true;
        Ok(())
    }

    fn assert_finite(
        &self,
        value: f64,
        context: &'static str,
        vector: &'static str,
        index: usize,
    ) -> Result<(), KineticsError> {
        if value.is_finite() {
            Ok(())
        } else {
            error!("{}: {}[{}] is not finite", context, vector, index);
            Err(KineticsError::NonFinite {
                context,
                vector,
                index,
            })
        }
    }

    //////////////////////// QUERY SURFACE ////////////////////////

    /// forward rate constants; with the deprecated legacy semantics enabled
    /// the reported values fold in the third-body concentrations
    pub fn get_fwd_rate_constants(&mut self, kfwd: &mut [f64]) -> Result<(), KineticsError> {
        let mut ropf = std::mem::take(&mut self.ropf);
        let result = self.process_fwd_rate_coefficients(&mut ropf);
        if result.is_ok() && self.use_legacy_rate_constants {
            warn!(
                "GasKinetics::get_fwd_rate_constants: legacy rate-constant semantics \
                 are deprecated; reported values include third-body concentrations \
                 for three-body reactions"
            );
            self.process_third_bodies(&mut ropf);
        }
        kfwd.copy_from_slice(&ropf);
        self.ropf = ropf;
        result
    }

    pub fn get_fwd_rates_of_progress(&mut self, out: &mut [f64]) -> Result<(), KineticsError> {
        self.update_rop()?;
        out.copy_from_slice(&self.ropf);
        Ok(())
    }

    pub fn get_rev_rates_of_progress(&mut self, out: &mut [f64]) -> Result<(), KineticsError> {
        self.update_rop()?;
        out.copy_from_slice(&self.ropr);
        Ok(())
    }

    pub fn get_net_rates_of_progress(&mut self, out: &mut [f64]) -> Result<(), KineticsError> {
        self.update_rop()?;
        out.copy_from_slice(&self.ropnet);
        Ok(())
    }

    pub fn get_third_body_concentrations(&mut self, out: &mut [f64]) -> Result<(), KineticsError> {
        self.update_rop()?;
        out.copy_from_slice(&self.concm);
        Ok(())
    }

    pub fn set_multiplier(&mut self, i: usize, f: f64) -> Result<(), KineticsError> {
        if i >= self.nReactions() {
            return Err(KineticsError::InvalidInput {
                context: "GasKinetics::set_multiplier",
                msg: format!("reaction index {} out of range", i),
            });
        }
        self.perturb[i] = f;
        Ok(())
    }

    pub fn multiplier(&self, i: usize) -> f64 {
        self.perturb[i]
    }

    pub fn set_legacy_rate_constants(&mut self, legacy: bool) {
        self.use_legacy_rate_constants = legacy;
    }

    //////////////////////// JACOBIAN SETTINGS ////////////////////////

    pub fn get_jacobian_settings(&self) -> Value {
        json!({
            "constant-pressure": self.jac_const_pressure,
            "mole-fraction-scaling": self.jac_mole_fractions,
            "skip-third-body-derivative": self.jac_skip_third_bodies,
            "skip-falloff-derivative": self.jac_skip_falloff,
            "relative-temperature-step": self.jac_rtol_deltaT,
        })
    }

    pub fn set_jacobian_settings(&mut self, settings: &Value) -> Result<(), KineticsError> {
        let obj = settings.as_object();
        let force = obj.is_none_or(|m| m.is_empty());
        let get_bool = |key: &str| -> Result<Option<bool>, KineticsError> {
            match obj.and_then(|m| m.get(key)) {
                None => Ok(None),
                Some(v) => v.as_bool().map(Some).ok_or(KineticsError::InvalidInput {
                    context: "GasKinetics::set_jacobian_settings",
                    msg: format!("'{}' must be a boolean", key),
                }),
            }
        };
        if force || get_bool("constant-pressure")?.is_some() {
            self.jac_const_pressure = get_bool("constant-pressure")?.unwrap_or(true);
        }
        if force || get_bool("mole-fraction-scaling")?.is_some() {
            self.jac_mole_fractions = get_bool("mole-fraction-scaling")?.unwrap_or(true);
        }
        if force || get_bool("skip-third-body-derivative")?.is_some() {
            self.jac_skip_third_bodies = get_bool("skip-third-body-derivative")?.unwrap_or(false);
        }
        if force || get_bool("skip-falloff-derivative")?.is_some() {
            self.jac_skip_falloff = get_bool("skip-falloff-derivative")?.unwrap_or(true);
        }
        if !self.jac_skip_falloff {
            self.jac_skip_falloff = true;
            return Err(KineticsError::NotImplemented {
                context: "GasKinetics::set_jacobian_settings",
                msg: "derivative term for the rate dependence on third bodies through \
                      falloff is not implemented"
                    .to_string(),
            });
        }
        if let Some(v) = obj.and_then(|m| m.get("relative-temperature-step")) {
            self.jac_rtol_deltaT = v.as_f64().ok_or(KineticsError::InvalidInput {
                context: "GasKinetics::set_jacobian_settings",
                msg: "'relative-temperature-step' must be a number".to_string(),
            })?;
        } else if force {
            self.jac_rtol_deltaT = 1e-6;
        }
        Ok(())
    }

    fn check_legacy_rates(&self, context: &'static str) -> Result<(), KineticsError> {
        if self.legacy.is_empty() {
            Ok(())
        } else {
            Err(KineticsError::LegacyRates { context })
        }
    }

    //////////////////////// TEMPERATURE DERIVATIVES ////////////////////////

    /// apply every bucket's direct relative temperature derivative to the
    /// owned entries of `out`
    fn process_rate_constants_ddT(&self, out: &mut [f64]) {
        let rtol = self.jac_rtol_deltaT;
        self.rates.process_ddT(out);
        self.plog_rates.process_ddT(out, rtol);
        self.cheb_rates.process_ddT(out, rtol);
        self.falloff_process_ddT(out, rtol);
    }

    /// apply every bucket's collider-concentration derivative hook; rate
    /// constants of the plain families do not depend on the collider, and
    /// the falloff cross term is not implemented, so all owned entries are
    /// zeroed
    fn process_rate_constants_ddM(&self, out: &mut [f64]) {
        self.rates.process_ddM(out);
        self.plog_rates.process_ddM(out);
        self.cheb_rates.process_ddM(out);
        for &i in &self.fall_indx {
            out[i] = 0.0;
        }
    }

    /// relative finite-difference d(ln k_eff)/dT of the blended falloff rate
    /// constants, at fixed collider concentration
    fn falloff_process_ddT(&self, out: &mut [f64], rtol: f64) {
        let nfall = self.falloff_low_rates.nReactions();
        if nfall == 0 {
            return;
        }
        let T = self.temp;
        let T1 = T * (1.0 + rtol);

        let blend = |kl: &[f64], kh: &[f64], work: &[f64]| -> Vec<f64> {
            let mut pr: Vec<f64> = (0..nfall)
                .map(|j| self.concm_falloff_values[j] * kl[j] / (kh[j] + SMALL_NUMBER))
                .collect();
            self.falloffn.pr_to_falloff(&mut pr, work);
            for j in 0..nfall {
                let limit = if self.fall_type[j] == ReactionType::Falloff {
                    kh[j]
                } else {
                    kl[j]
                };
                pr[j] *= limit;
            }
            pr
        };

        let k0 = blend(&self.rfn_low, &self.rfn_high, &self.falloff_work);

        let logT1 = T1.ln();
        let kl1: Vec<f64> = (0..nfall)
            .map(|j| self.falloff_low_rates.get(j).K_const(T1, logT1))
            .collect();
        let kh1: Vec<f64> = (0..nfall)
            .map(|j| self.falloff_high_rates.get(j).K_const(T1, logT1))
            .collect();
        let mut work1 = vec![0.0; self.falloffn.workSize()];
        self.falloffn.updateTemp(T1, &mut work1);
        let k1 = blend(&kl1, &kh1, &work1);

        for j in 0..nfall {
            out[self.fall_indx[j]] *= (k1[j] - k0[j]) / (rtol * T * k0[j]);
        }
    }

    /// relative temperature derivative of the total concentration at
    /// constant pressure: analytic -1/T for an ideal gas, otherwise a
    /// finite-difference perturbation of the molar density
    fn process_concentrations_ddT(&mut self, rop: &mut [f64]) {
        let dln_ctot_dT = if self.thermo.is_ideal_gas() {
            -1.0 / self.thermo.temperature()
        } else {
            let rtol = self.jac_rtol_deltaT;
            let T = self.thermo.temperature();
            let P = self.thermo.pressure();
            self.thermo.set_state_TP(T * (1.0 + rtol), P);
            let ctot1 = self.thermo.molar_density();
            self.thermo.set_state_TP(T, P);
            let ctot0 = self.thermo.molar_density();
            (ctot1 - ctot0) / (T * rtol * ctot0)
        };
        for v in rop.iter_mut() {
            *v *= dln_ctot_dT;
        }
    }

    /// relative finite-difference temperature derivative of the reverse-rate
    /// multipliers, scaled onto `drkcn`; zero for irreversible reactions
    fn process_equilibrium_constants_ddT(&mut self, drkcn: &mut [f64]) {
        let mut kc0 = std::mem::take(&mut self.rbuf0);
        let mut kc1 = std::mem::take(&mut self.rbuf1);

        let rtol = self.jac_rtol_deltaT;
        let T = self.thermo.temperature();
        let P = self.thermo.pressure();
        let dTinv = 1.0 / (rtol * T);
        self.thermo.set_state_TP(T * (1.0 + rtol), P);
        self.get_equilibrium_constants(&mut kc1);

        self.thermo.set_state_TP(T, P);
        self.get_equilibrium_constants(&mut kc0);

        for i in 0..self.nReactions() {
            drkcn[i] *= (kc0[i] - kc1[i]) * dTinv;
            drkcn[i] /= kc0[i]; // divide once as this is a scaled derivative
        }
        for pos in 0..self.irrev.len() {
            drkcn[self.irrev[pos]] = 0.0;
        }

        self.rbuf0 = kc0;
        self.rbuf1 = kc1;
    }

    /// d(k_fwd)/dT of the forward rate constants
    pub fn fwd_rate_constants_ddT(&mut self) -> Result<DVector<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::fwd_rate_constants_ddT")?;
        self.update_rop()?;

        // seed with effective rate constants (falloff entries blended)
        let mut dkf = self.rfn.clone();
        if self.falloff_high_rates.nReactions() > 0 {
            self.process_falloff_reactions(&mut dkf)?;
        }
        let mut dkfM = dkf.clone();

        // direct temperature dependence
        self.process_rate_constants_ddT(&mut dkf);

        // rate constants that depend on third-body colliders
        if self.jac_const_pressure {
            self.process_rate_constants_ddM(&mut dkfM);
            self.process_concentrations_ddT(&mut dkfM);
            for (a, b) in dkf.iter_mut().zip(&dkfM) {
                *a += b;
            }
        }
        Ok(DVector::from_vec(dkf))
    }

    pub fn fwd_rates_of_progress_ddT(&mut self) -> Result<DVector<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::fwd_rates_of_progress_ddT")?;
        self.update_rop()?;

        let mut dFwdRop = self.ropf.clone();
        self.process_rate_constants_ddT(&mut dFwdRop);

        if self.jac_const_pressure {
            // sensitivity of the concentration-power product
            let mut dFwdRopC = vec![0.0; self.nReactions()];
            self.reactant_stoich.scale(&self.ropf, &mut dFwdRopC);

            // rates of progress that depend on third-body colliders
            let mut dFwdRopM = self.ropf.clone();
            self.process_rate_constants_ddM(&mut dFwdRopM);
            self.multi_concm.scaleOrder(&self.ropf, &mut dFwdRopM);
            for (a, b) in dFwdRopC.iter_mut().zip(&dFwdRopM) {
                *a += b;
            }

            // account for the temperature dependence of the concentrations
            self.process_concentrations_ddT(&mut dFwdRopC);
            for (a, b) in dFwdRop.iter_mut().zip(&dFwdRopC) {
                *a += b;
            }
        }
        Ok(DVector::from_vec(dFwdRop))
    }

    pub fn rev_rates_of_progress_ddT(&mut self) -> Result<DVector<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::rev_rates_of_progress_ddT")?;
        self.update_rop()?;

        // reverse rop times scaled rate-constant derivative
        let mut dRevRop = self.ropr.clone();
        self.process_rate_constants_ddT(&mut dRevRop);

        // reverse rop times scaled inverse-equilibrium-constant derivative
        let mut dRevRop2 = self.ropr.clone();
        self.process_equilibrium_constants_ddT(&mut dRevRop2);
        for (a, b) in dRevRop.iter_mut().zip(&dRevRop2) {
            *a += b;
        }

        if self.jac_const_pressure {
            let mut dRevRopC = vec![0.0; self.nReactions()];
            self.rev_product_stoich.scale(&self.ropr, &mut dRevRopC);

            let mut dRevRopM = self.ropr.clone();
            self.process_rate_constants_ddM(&mut dRevRopM);
            self.multi_concm.scaleOrder(&self.ropr, &mut dRevRopM);
            for (a, b) in dRevRopC.iter_mut().zip(&dRevRopM) {
                *a += b;
            }

            self.process_concentrations_ddT(&mut dRevRopC);
            for (a, b) in dRevRop.iter_mut().zip(&dRevRopC) {
                *a += b;
            }
        }
        Ok(DVector::from_vec(dRevRop))
    }

    pub fn net_rates_of_progress_ddT(&mut self) -> Result<DVector<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::net_rates_of_progress_ddT")?;
        Ok(self.fwd_rates_of_progress_ddT()? - self.rev_rates_of_progress_ddT()?)
    }

    //////////////////////// CONCENTRATION DERIVATIVES ////////////////////////

    /// rescale derivative seeds by the total molar density, turning the
    /// concentration Jacobian into a mole-fraction Jacobian
    fn scale_concentrations(&self, rates: &mut [f64]) {
        let ctot = self.thermo.molar_density();
        for v in rates.iter_mut() {
            *v *= ctot;
        }
    }

    pub fn fwd_rates_of_progress_ddC(&mut self) -> Result<CsrMatrix<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::fwd_rates_of_progress_ddC")?;
        let n = self.nReactions();
        let ns = self.n_species;

        // forward rate coefficients
        let mut rop_rates = std::mem::take(&mut self.rbuf0);
        let result = self.process_fwd_rate_coefficients(&mut rop_rates);
        if let Err(e) = result {
            self.rbuf0 = rop_rates;
            return Err(e);
        }
        if self.jac_mole_fractions {
            self.scale_concentrations(&mut rop_rates);
        }

        // derivatives handled by the stoichiometry manager
        let mut rop_stoich = rop_rates.clone();
        self.process_third_bodies(&mut rop_stoich);
        let mut jac = CsrMatrix::from(&self.reactant_stoich.jacobian(
            &self.act_conc,
            &rop_stoich,
            ns,
        ));

        // derivatives handled by the third-body calculator
        if !self.jac_skip_third_bodies && !self.multi_concm.is_empty() {
            let mut rop_3b = rop_rates.clone();
            self.reactant_stoich.multiply(&self.act_conc, &mut rop_3b);
            jac = &jac + &CsrMatrix::from(&self.multi_concm.jacobian(&rop_3b, n, ns));
        }

        self.rbuf0 = rop_rates;
        Ok(jac)
    }

    pub fn rev_rates_of_progress_ddC(&mut self) -> Result<CsrMatrix<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::rev_rates_of_progress_ddC")?;
        let n = self.nReactions();
        let ns = self.n_species;

        // reverse rate coefficients
        let mut rop_rates = std::mem::take(&mut self.rbuf0);
        let result = self.process_fwd_rate_coefficients(&mut rop_rates);
        if let Err(e) = result {
            self.rbuf0 = rop_rates;
            return Err(e);
        }
        self.process_equilibrium_constants(&mut rop_rates);
        if self.jac_mole_fractions {
            self.scale_concentrations(&mut rop_rates);
        }

        let mut rop_stoich = rop_rates.clone();
        self.process_third_bodies(&mut rop_stoich);
        let mut jac = CsrMatrix::from(&self.rev_product_stoich.jacobian(
            &self.act_conc,
            &rop_stoich,
            ns,
        ));

        if !self.jac_skip_third_bodies && !self.multi_concm.is_empty() {
            let mut rop_3b = rop_rates.clone();
            self.rev_product_stoich
                .multiply(&self.act_conc, &mut rop_3b);
            jac = &jac + &CsrMatrix::from(&self.multi_concm.jacobian(&rop_3b, n, ns));
        }

        self.rbuf0 = rop_rates;
        Ok(jac)
    }

    pub fn net_rates_of_progress_ddC(&mut self) -> Result<CsrMatrix<f64>, KineticsError> {
        self.check_legacy_rates("GasKinetics::net_rates_of_progress_ddC")?;
        Ok(&self.fwd_rates_of_progress_ddC()? - &self.rev_rates_of_progress_ddC()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::ArrheniusRate;
    use crate::thermo::IdealGasState;

    fn empty_engine() -> GasKinetics<IdealGasState> {
        let thermo = IdealGasState::new(1000.0, 101325.0, vec![1.0], vec![(0.0, 0.0)]);
        GasKinetics::new(thermo)
    }

    #[test]
    fn test_default_jacobian_settings() {
        let gk = empty_engine();
        let settings = gk.get_jacobian_settings();
        assert_eq!(settings["constant-pressure"], json!(true));
        assert_eq!(settings["mole-fraction-scaling"], json!(true));
        assert_eq!(settings["skip-third-body-derivative"], json!(false));
        assert_eq!(settings["skip-falloff-derivative"], json!(true));
        assert_eq!(settings["relative-temperature-step"], json!(1e-6));
    }

    #[test]
    fn test_disabling_skip_falloff_is_not_implemented() {
        let mut gk = empty_engine();
        let err = gk
            .set_jacobian_settings(&json!({"skip-falloff-derivative": false}))
            .unwrap_err();
        assert!(matches!(err, KineticsError::NotImplemented { .. }));
        // the setting stays enabled afterward
        assert_eq!(
            gk.get_jacobian_settings()["skip-falloff-derivative"],
            json!(true)
        );
    }

    #[test]
    fn test_mismatched_type_tag_rejected_at_install() {
        let mut gk = empty_engine();
        let bad = Reaction {
            reaction_type: ReactionType::Chebyshev,
            reversible: false,
            reactants: vec![(0, 1.0)],
            products: vec![(0, 1.0)],
            rate: RateExpression::Arrhenius(ArrheniusRate::new(1.0, 0.0, 0.0)),
            third_body: None,
        };
        let err = gk.add_reaction(&bad).unwrap_err();
        assert!(matches!(err, KineticsError::InvalidReactionType { .. }));
        assert_eq!(gk.nReactions(), 0);
    }

    #[test]
    fn test_legacy_path_rejects_pressure_dependent_types() {
        let mut gk = empty_engine();
        let falloff = Reaction {
            reaction_type: ReactionType::Falloff,
            reversible: false,
            reactants: vec![(0, 1.0)],
            products: vec![(0, 1.0)],
            rate: RateExpression::Falloff {
                low_rate: ArrheniusRate::new(1.0, 0.0, 0.0),
                high_rate: ArrheniusRate::new(1.0, 0.0, 0.0),
                curve: crate::reaction::FalloffCurveData::Lindemann,
            },
            third_body: None,
        };
        let err = gk.add_reaction_legacy(&falloff).unwrap_err();
        assert!(matches!(err, KineticsError::InvalidReactionType { .. }));
    }

    #[test]
    fn test_multiplier_bounds() {
        let mut gk = empty_engine();
        assert!(matches!(
            gk.set_multiplier(0, 2.0),
            Err(KineticsError::InvalidInput { .. })
        ));
    }
}
