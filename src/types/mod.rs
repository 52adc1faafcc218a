//! Shared primitive types.
mod call;
pub use call::*;

mod contracts;
pub use contracts::*;

mod package;
pub use package::*;

mod service;
pub use service::*;

mod wallet;
pub use wallet::*;

/// A 96 bit integer, the width of registry bonds.
pub type U96 = alloy::primitives::Uint<96, 2>;
