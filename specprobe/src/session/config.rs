//! Session configuration.

use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::probe::ProbeArray;
use crate::receiver::ProbeOrder;
use crate::session::Session;
use crate::trainer::TrainingSchedule;
use crate::util::ProbeEnv;
use crate::victim::VictimMemory;

/// Configuration passed to [SessionConfig::emit].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of flush/train/receive trials per decoded byte.
    pub trials: usize,

    /// Accesses completing within this many cycles are cache hits.
    pub threshold: u64,

    /// Number of legitimate calls per malicious call while training.
    pub training_ratio: usize,

    /// Number of calls into the leak primitive per trial.
    pub training_rounds: usize,

    /// Busy-wait iterations before each call into the leak primitive.
    pub delay_spins: usize,

    /// Order in which the receiver times the probe partitions.
    pub probe_order: ProbeOrder,

    /// Evict the bound before every bounds check (hardware only).
    pub evict_bound: bool,

    /// Optionally pin the caller to a specific hardware thread.
    pub pinned_core: Option<usize>,
}

impl SessionConfig {
    pub const DEFAULT_TRIALS: usize = 99;
    pub const DEFAULT_THRESHOLD: u64 = 80;
    pub const DEFAULT_TRAINING_RATIO: usize = 5;
    pub const DEFAULT_TRAINING_ROUNDS: usize = 31;
    pub const DEFAULT_DELAY_SPINS: usize = 100;

    pub fn new() -> Self {
        Self {
            trials: Self::DEFAULT_TRIALS,
            threshold: Self::DEFAULT_THRESHOLD,
            training_ratio: Self::DEFAULT_TRAINING_RATIO,
            training_rounds: Self::DEFAULT_TRAINING_ROUNDS,
            delay_spins: Self::DEFAULT_DELAY_SPINS,
            probe_order: ProbeOrder::Sequential,
            evict_bound: true,
            pinned_core: None,
        }
    }

    pub fn schedule(&self) -> TrainingSchedule {
        TrainingSchedule {
            ratio: self.training_ratio,
            rounds: self.training_rounds,
            delay_spins: self.delay_spins,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            return Err(Error::InvalidConfig("trials must be non-zero"));
        }
        if self.training_rounds == 0 {
            return Err(Error::InvalidConfig("training rounds must be non-zero"));
        }
        if self.training_ratio == 0 {
            return Err(Error::InvalidConfig("training ratio must be non-zero"));
        }
        if self.training_ratio > TrainingSchedule::MAX_RATIO {
            return Err(Error::InvalidConfig("training ratio must be below 0x10000"));
        }
        if u32::try_from(self.trials).is_err() {
            return Err(Error::InvalidConfig("too many trials for a 32-bit hit counter"));
        }
        Ok(())
    }

    /// Check the configuration, apply process-level setup (pinning) and
    /// return a session that decodes bytes out of `victim`.
    pub fn emit<'a, M: Machine>(
        self,
        machine: M,
        probe: &'a ProbeArray,
        victim: &'a VictimMemory,
    ) -> Result<Session<'a, M>> {
        self.validate()?;
        if victim.array_size() == 0 {
            return Err(Error::InvalidConfig("public buffer must not be empty"));
        }
        if machine.layout().is_some_and(|l| l != probe.layout()) {
            return Err(Error::InvalidConfig("machine was built for a different partition layout"));
        }
        if machine.evicts_bound().is_some_and(|e| e != self.evict_bound) {
            return Err(Error::InvalidConfig("machine disagrees about evicting the bound"));
        }
        if let Some(core) = self.pinned_core {
            ProbeEnv::pin_to_core(core)?;
        }
        Ok(Session::new(self, machine, probe, victim))
    }
}

impl Default for SessionConfig {
    fn default() -> Self { Self::new() }
}

impl SessionConfig {
    pub fn trials(mut self, x: usize) -> Self {
        self.trials = x;
        self
    }

    pub fn threshold(mut self, x: u64) -> Self {
        self.threshold = x;
        self
    }

    pub fn training_ratio(mut self, x: usize) -> Self {
        self.training_ratio = x;
        self
    }

    pub fn training_rounds(mut self, x: usize) -> Self {
        self.training_rounds = x;
        self
    }

    pub fn delay_spins(mut self, x: usize) -> Self {
        self.delay_spins = x;
        self
    }

    pub fn probe_order(mut self, x: ProbeOrder) -> Self {
        self.probe_order = x;
        self
    }

    pub fn evict_bound(mut self, x: bool) -> Self {
        self.evict_bound = x;
        self
    }

    pub fn pinned_core(mut self, x: Option<usize>) -> Self {
        self.pinned_core = x;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.trials, 99);
        assert_eq!(cfg.threshold, 80);
        assert_eq!(cfg.schedule().period(), 6);
        assert_eq!(cfg.schedule().rounds, 31);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_configs() {
        let bad = [
            SessionConfig::new().trials(0),
            SessionConfig::new().training_rounds(0),
            SessionConfig::new().training_ratio(0),
            SessionConfig::new().training_ratio(0x10000),
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))), "{:?}", cfg);
        }
        assert!(SessionConfig::new().training_ratio(0xffff).validate().is_ok());
    }
}
