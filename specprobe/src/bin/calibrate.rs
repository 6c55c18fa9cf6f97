use anyhow::Context;
use clap::Parser;
use specprobe::*;
use specprobe::calibrate::{Calibration, LatencySummary};
use specprobe::probe::DEFAULT_PARTITION_SIZE;
use specprobe::sim::SimConfig;

/// Measure cache hit and miss latencies and suggest a receiver threshold.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Number of passes over all 256 partitions.
    #[arg(long, default_value_t = 100)]
    rounds: usize,

    #[arg(long, default_value_t = DEFAULT_PARTITION_SIZE)]
    partition_size: usize,

    /// Pin to this CPU core.
    #[arg(long)]
    core: Option<usize>,

    /// Calibrate the simulated machine instead of this CPU.
    #[arg(long)]
    simulate: bool,
}

fn print_summary(name: &str, s: &LatencySummary) {
    println!("  {:<8} min={:<6} median={:<6} mode={:<6} max={:<8} mean={:.1}",
        name, s.min, s.median, s.mode, s.max, s.mean);
}

fn calibrate<M: Machine>(machine: &mut M, probe: &ProbeArray, rounds: usize)
    -> anyhow::Result<()>
{
    let report = Calibration::run(machine, probe, rounds)
        .context("no samples collected (--rounds must be non-zero)")?;
    println!("[*] Latencies over {} samples (cycles):", rounds * 256);
    print_summary("hit", &report.hit);
    print_summary("miss", &report.miss);
    if report.hit.median >= report.miss.median {
        println!("[!] Hits and misses overlap; this threshold is meaningless");
    }
    println!("[*] Suggested threshold: {}", report.suggested_threshold);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(core) = args.core {
        ProbeEnv::pin_to_core(core)?;
    }
    let probe = ProbeArray::new(PartitionLayout::new(args.partition_size)?)
        .context("allocating probe array")?;

    if args.simulate {
        let mut machine = SimConfig::deterministic().emit()?;
        return calibrate(&mut machine, &probe, args.rounds);
    }

    ProbeEnv::warn_if_noisy();
    calibrate_hardware(&probe, args.rounds)
}

#[cfg(target_arch = "x86_64")]
fn calibrate_hardware(probe: &ProbeArray, rounds: usize) -> anyhow::Result<()> {
    let mut machine = specprobe::x86::HardwareMachine::new(probe.layout(), true)?;
    calibrate(&mut machine, probe, rounds)
}

#[cfg(not(target_arch = "x86_64"))]
fn calibrate_hardware(_: &ProbeArray, _: usize) -> anyhow::Result<()> {
    anyhow::bail!("the hardware machine needs x86_64; try --simulate")
}
