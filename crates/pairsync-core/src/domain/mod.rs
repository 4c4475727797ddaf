//! Domain model: validated newtypes, file digests, and domain errors.

pub mod digest;
pub mod errors;
pub mod newtypes;
