//! Inbound webhook support

pub mod signature;

pub use signature::{compute_signature, verify_signature};
