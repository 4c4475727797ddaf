//! PairSync Core - Domain logic and configuration
//!
//! This crate contains the runtime-independent core of PairSync:
//! - **Domain newtypes** - `FileName`, `PeerName`, `ActorId`
//! - **Digest store** - `FileDigest`, `DigestMap`, and the poll-cycle diff
//! - **Configuration** - typed config with loading, validation, and a builder
//!
//! # Architecture
//!
//! Everything here is pure data and pure functions. Filesystem access,
//! channels, and the actor runtime live in `pairsync-sync`; this crate only
//! defines what a file's fingerprint is and how two fingerprint maps are
//! compared, so the change-detection algorithm can be tested without any
//! I/O or concurrency.

pub mod config;
pub mod domain;
