//! Compton coincidence: analysis of a two-detector Compton scattering
//! experiment
//!
//!
//! # Introduction (for the physicist)
//!
//! A collimated Na-22 source sends 511 keV annihilation photons into a NaI
//! scintillator. Photons that Compton-scatter in it may reach a second NaI
//! detector placed at some angle. In coincidence, the energy left in the
//! first detector (the recoil electron) and the energy seen by the second
//! one (the scattered photon) should add up to 511 keV, and the rate of such
//! coincidences should follow the Klein-Nishina angular distribution once
//! the photo-peak efficiency and the self-absorption of the scatterer are
//! accounted for.
//!
//!
//! # Introduction (for the numerical guy)
//!
//! The coincidence peak of each angle is located by moments, then fitted by
//! chi-square minimization with bivariate Gaussian or Crystal-Ball models.
//! Parameter uncertainties come from the Hessian of the chi-square, and are
//! propagated to the peak integral by Monte-Carlo sampling. The absorption
//! correction is itself a small Monte-Carlo ray simulation.
//!
//!
//! # Introduction (for the computer guy)
//!
//! Each stage of the pipeline lives in its own module:
//!
//! * [`faster`] reads the raw pulse records of the acquisition system
//! * [`histogram`], [`calibration`] and [`coincidence`] turn them into
//!   calibrated energy histograms
//! * [`peak`], [`model`], [`fit`] and [`integrate`] extract the coincidence
//!   peak and its yield
//! * [`efficiency`], [`absorption`], [`response`] and [`klein_nishina`]
//!   provide the corrections and the theory to compare with
//! * [`analysis`] chains them, one function per command line subcommand,
//!   writing its results through [`output`]
//!
//! Monte-Carlo loops go through [`scheduling`], which can spread batches
//! across threads without changing the results.

#![warn(missing_docs)]

pub mod absorption;
pub mod analysis;
pub mod calibration;
pub mod coincidence;
pub mod config;
pub mod efficiency;
pub mod error;
pub mod faster;
pub mod fit;
pub mod histogram;
pub mod integrate;
pub mod klein_nishina;
pub mod model;
pub mod numeric;
pub mod output;
pub mod peak;
pub mod random;
pub mod resacc;
pub mod response;
pub mod scheduling;

/// We'll use eyre's type-erased result type throughout the application layer
pub type Result<T> = eyre::Result<T>;
