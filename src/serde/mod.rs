//! Serde helpers for config types.

pub mod duration;
pub mod hash_map;
