//! Small shared helpers used across more than one module.

pub mod duration_serde;
