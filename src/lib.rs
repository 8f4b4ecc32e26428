//! KiRate: rate-of-progress evaluation for homogeneous gas-phase kinetics.
//!
//! The crate turns a set of mass-action reactions (elementary, three-body,
//! falloff, chemically activated, PLOG and Chebyshev) plus a thermodynamic
//! state into forward, reverse and net rates of progress, and into their
//! derivatives with respect to temperature and species concentrations.
//!
//! The central type is [`GasKinetics::GasKinetics`], which caches everything
//! it can between evaluations: rate constants are refreshed only when the
//! temperature changes, pressure-interpolated rate laws also when the
//! pressure changes, and equilibrium constants together with the rate
//! constants. Thermodynamic state is supplied through the
//! [`thermo::ThermoProvider`] trait.
#[allow(non_snake_case)]
pub mod GasKinetics;
pub mod falloff;
pub mod rates;
pub mod reaction;
pub mod stoichiometry;
pub mod thermo;
pub mod thirdbody;
