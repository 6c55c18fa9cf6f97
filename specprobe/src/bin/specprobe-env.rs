use specprobe::ProbeEnv;
use std::io::ErrorKind;

fn describe_flag(res: Result<bool, ErrorKind>, on: &'static str, off: &'static str)
    -> String
{
    match res {
        Ok(true) => on.to_string(),
        Ok(false) => off.to_string(),
        Err(ErrorKind::NotFound) => "<not available>".to_string(),
        Err(e) => format!("<read error: {:?}>", e),
    }
}

fn describe(res: Result<String, ErrorKind>) -> String {
    match res {
        Ok(s) => s,
        Err(ErrorKind::NotFound) => "<not available>".to_string(),
        Err(e) => format!("<read error: {:?}>", e),
    }
}

fn main() {
    env_logger::init();

    let num_cores = ProbeEnv::online_cores()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    let isol = describe(ProbeEnv::sysfs_isolated());
    let nohz = describe(ProbeEnv::sysfs_nohz());
    let smt = describe_flag(ProbeEnv::sysfs_smt_enabled(), "enabled [!!]", "disabled");
    let boost = describe_flag(
        ProbeEnv::sysfs_cpufreq_boost_enabled(), "enabled [!!]", "disabled"
    );
    let gov = describe(ProbeEnv::sysfs_cpufreq_governor(0));
    let spectre_v1 = describe(ProbeEnv::sysfs_spectre_v1());

    println!("[*] 'specprobe' environment summary:");
    println!("  {:<40}: {}", "online cores", num_cores);
    println!("  {:<40}: {}", "isolated cores", isol);
    println!("  {:<40}: {}", "nohz_full cores", nohz);
    println!("  {:<40}: {}", "simultaneous multithreading (SMT)", smt);
    println!("  {:<40}: {}", "cpufreq boost", boost);
    println!("  {:<40}: {}", "cpufreq scaling (policy0)", gov);
    println!("  {:<40}: {}", "spectre_v1 mitigation", spectre_v1);
}
