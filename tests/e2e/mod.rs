//! Operator end-to-end tests, run against the simulated ledger.
#![allow(unused)]

mod cases;
mod environment;

pub use environment::*;
