//! # Service operator
//!
//! Library driving autonomous services through their on-chain registry and staking lifecycle:
//! minting, registration, multisig deployment, staking, and the reverse path down to unbonding.

pub mod chains;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod safe;
pub mod serde;
pub mod signers;
pub mod staking;
pub mod storage;
pub mod transactions;
pub mod types;
