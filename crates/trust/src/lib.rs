//! EigenTrust scoring, Sybil detection, and the periodic Trust Worker
//! (spec.md §4.6, §4.7).

pub mod cache;
pub mod error;
pub mod matrix;
pub mod sybil;
pub mod worker;

pub use cache::{CachedTrust, TrustCache};
pub use error::{Result, TrustError};
pub use matrix::{Edge, TrustMatrix, build_matrix, eigentrust_iterate};
pub use sybil::sybil_penalties;
pub use worker::{CycleSummary, TrustTunables, TrustWorker, run_cycle, run_cycle_with};
