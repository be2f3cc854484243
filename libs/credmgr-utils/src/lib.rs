#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Small building blocks shared by the credential manager crates.

pub mod duration_serde;
mod secret_string;

pub use secret_string::SecretString;
