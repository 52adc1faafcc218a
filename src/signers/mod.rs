//! Operator signers.

mod r#dyn;
pub use r#dyn::DynSigner;
