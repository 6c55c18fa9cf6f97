//! Errors raised while setting up a measurement session.
//!
//! Nothing in the measurement pipeline itself fails: once a [`Session`] has
//! been emitted, decoding always produces a result (possibly a low-confidence
//! one). Every variant here comes from building the pieces a session needs.
//!
//! [`Session`]: crate::session::Session

use thiserror::Error;

use crate::probe::CACHE_LINE_SIZE;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("partition size {0:#x} must be a power of two and at least {min} bytes", min = CACHE_LINE_SIZE)]
    InvalidPartitionSize(usize),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(&'static str),

    /// The simulated machine cannot model the requested parameters.
    #[error("invalid simulation: {0}")]
    InvalidSimulation(String),

    #[error("couldn't map the probe array")]
    Map(#[from] std::io::Error),

    #[error("couldn't pin to CPU core {core}: {}", .source.desc())]
    Pin {
        core: usize,
        #[source]
        source: nix::Error,
    },

    #[error("couldn't emit the leak gadget: {0}")]
    Gadget(String),

    #[error("couldn't open a counter for {0}")]
    Counter(String, #[source] std::io::Error),
}
