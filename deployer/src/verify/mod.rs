//! Post-deployment registration checks

pub mod verifier;
