//! Measurement pipeline for a Spectre v1 (bounds check bypass) covert
//! channel.
//!
//! A [`Session`] recovers one secret byte at a time:
//!
//! 1. every partition of the [`ProbeArray`] is evicted,
//! 2. the bounds check in the leak primitive is trained with in-bounds
//!    indices, interleaved with an out-of-bounds index that aliases the
//!    secret ([`trainer`]),
//! 3. each partition is timed once and fast reads are counted as hits
//!    ([`receiver`]),
//!
//! and after all trials the two most frequently hit partitions are picked
//! ([`stats::best_results`]).
//!
//! The hardware side sits behind the [`Machine`] trait. [`x86`] drives a
//! real core, while [`sim`] provides a deterministic model for tests.

pub mod error;
pub mod util;
pub mod probe;
pub mod victim;
pub mod stats;
pub mod machine;
pub mod trainer;
pub mod receiver;
pub mod session;
pub mod calibrate;
pub mod events;
pub mod sim;

#[cfg(target_arch = "x86_64")]
pub mod x86;

pub use crate::error::{Error, Result};
pub use crate::machine::Machine;
pub use crate::probe::{PartitionLayout, ProbeArray};
pub use crate::receiver::ProbeOrder;
pub use crate::session::*;
pub use crate::stats::{best_results, Candidate, HitCounterTable};
pub use crate::util::ProbeEnv;
pub use crate::victim::VictimMemory;
