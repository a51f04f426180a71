//! Continuous-time individual-level multi-state disease progression simulation.
//!
//! The crate is layered leaves-first: [`hazard`] evaluates survival-time
//! distributions, [`sampler`] draws event times from them, [`transition`] binds
//! one hazard per edge of a state-transition matrix, [`simulator`] runs the
//! competing-risks trajectory stepper, and [`occupancy`] turns trajectories into
//! state-occupancy curves.

#![deny(dead_code)]
#![deny(unused_imports)]

#[path = "../hazard/mod.rs"]
pub mod hazard;

pub mod config;
pub mod occupancy;
pub mod params;
pub mod population;
pub mod rng;
pub mod sampler;
pub mod simulator;
pub mod transition;
