use log::{info, warn};

use crate::error::{Error, Result};

/// Utilities for inspecting and controlling the state of the current process.
pub struct ProbeEnv;
impl ProbeEnv {
    const BOOST_PATH: &'static str =
        "/sys/devices/system/cpu/cpufreq/boost";
    const ISOLATED_PATH: &'static str =
        "/sys/devices/system/cpu/isolated";
    const NOHZ_PATH: &'static str =
        "/sys/devices/system/cpu/nohz_full";
    const SMT_PATH: &'static str =
        "/sys/devices/system/cpu/smt/control";
    const SPECTRE_V1_PATH: &'static str =
        "/sys/devices/system/cpu/vulnerabilities/spectre_v1";

    fn read_sysfs(path: &str) -> std::result::Result<String, std::io::ErrorKind> {
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| e.kind())
    }

    /// Return a string describing the set of isolated cores.
    pub fn sysfs_isolated() -> std::result::Result<String, std::io::ErrorKind> {
        let res = Self::read_sysfs(Self::ISOLATED_PATH)?;
        match res.as_str() {
            "" => Ok("disabled".to_string()),
            _ => Ok(res),
        }
    }

    /// Return a string describing the set of 'nohz_full' cores.
    pub fn sysfs_nohz() -> std::result::Result<String, std::io::ErrorKind> {
        let res = Self::read_sysfs(Self::NOHZ_PATH)?;
        match res.as_str() {
            "" => Ok("disabled".to_string()),
            _ => Ok(res),
        }
    }

    /// Returns true if cpufreq boost is enabled.
    pub fn sysfs_cpufreq_boost_enabled() -> std::result::Result<bool, std::io::ErrorKind> {
        match Self::read_sysfs(Self::BOOST_PATH)?.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(std::io::ErrorKind::InvalidData),
        }
    }

    /// Return a string describing the cpufreq scaling strategy for a
    /// particular core.
    pub fn sysfs_cpufreq_governor(n: usize)
        -> std::result::Result<String, std::io::ErrorKind>
    {
        let path = format!(
            "/sys/devices/system/cpu/cpufreq/policy{}/scaling_governor", n
        );
        Self::read_sysfs(&path)
    }

    /// Returns true if SMT is enabled.
    ///
    /// Platforms without SMT report "notsupported" (or "notimplemented"),
    /// which counts as disabled.
    pub fn sysfs_smt_enabled() -> std::result::Result<bool, std::io::ErrorKind> {
        match Self::read_sysfs(Self::SMT_PATH)?.as_str() {
            "on" => Ok(true),
            "off" | "forceoff" | "notsupported" | "notimplemented" => Ok(false),
            _ => Err(std::io::ErrorKind::InvalidData),
        }
    }

    /// Return the kernel's description of its Spectre v1 mitigation.
    pub fn sysfs_spectre_v1() -> std::result::Result<String, std::io::ErrorKind> {
        Self::read_sysfs(Self::SPECTRE_V1_PATH)
    }

    /// Return the number of online cores.
    pub fn online_cores() -> Option<i64> {
        nix::unistd::sysconf(nix::unistd::SysconfVar::_NPROCESSORS_ONLN)
            .ok()
            .flatten()
    }

    /// Log a warning for each bit of environment state that is known to
    /// add noise to cache timing.
    pub fn warn_if_noisy() {
        if let Ok(true) = Self::sysfs_smt_enabled() {
            warn!("SMT is enabled; a sibling thread can disturb the probe array");
        }
        if let Ok(true) = Self::sysfs_cpufreq_boost_enabled() {
            warn!("cpufreq boost is enabled; cycle counts will drift");
        }
    }
}

impl ProbeEnv {
    /// Pin to a particular core.
    pub fn pin_to_core(core: usize) -> Result<()> {
        let this_pid = nix::unistd::Pid::from_raw(0);
        let mut cpuset = nix::sched::CpuSet::new();
        cpuset.set(core).map_err(|source| Error::Pin { core, source })?;
        nix::sched::sched_setaffinity(this_pid, &cpuset)
            .map_err(|source| Error::Pin { core, source })?;
        info!("pinned to CPU core {}", core);
        Ok(())
    }
}

/// A power-of-two alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Align(usize);
impl Align {
    /// Returns `None` unless `value` is a power of two.
    pub const fn new(value: usize) -> Option<Self> {
        if value.is_power_of_two() { Some(Self(value)) } else { None }
    }
    pub const fn from_value(value: usize) -> Self {
        assert!(value.is_power_of_two());
        Self(value)
    }
    pub const fn value(&self) -> usize { self.0 }
    pub const fn shift(&self) -> u32 { self.0.trailing_zeros() }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn align() {
        let a = Align::from_value(0x1000);
        assert_eq!(a.value(), 0x1000);
        assert_eq!(a.shift(), 12);
        assert_eq!(Align::from_value(64).shift(), 6);
    }

    #[test]
    fn align_rejects_non_powers() {
        assert_eq!(Align::new(0), None);
        assert_eq!(Align::new(48), None);
        assert_eq!(Align::new(4096).map(|a| a.shift()), Some(12));
    }
}
