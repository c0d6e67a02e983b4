use anyhow::{Context, Result};
use aya::maps::HashMap;
use aya::Ebpf;
use gscope_common::ProbeError;

fn counter(bpf: &Ebpf, name: &str, key: u32) -> Result<u64> {
    let map: HashMap<_, u32, u64> =
        HashMap::try_from(bpf.map(name).with_context(|| format!("{name} map not found"))?)?;
    // Absent key: the probes never bumped it
    Ok(map.get(&key, 0).unwrap_or(0))
}

/// Print the probe-side counters
///
/// - events the ring buffer had no room for
/// - probe failures per [`ProbeError`] code
/// - parked events whose reason code had no string
///
/// # Errors
/// Returns an error if the diagnostic maps cannot be accessed
pub fn print_probe_diagnostics(bpf: &Ebpf) -> Result<()> {
    println!("\n🔍 Probe diagnostics:");

    let dropped = counter(bpf, "EVENT_OUTPUT_FAILED", 0)?;
    println!("   - Events dropped (ring buffer full): {dropped}");

    let errors: HashMap<_, u32, u64> = HashMap::try_from(
        bpf.map("PROBE_ERRORS").context("PROBE_ERRORS map not found")?,
    )?;
    let mut any_error = false;
    for (code, count) in errors.iter().flatten() {
        let name = ProbeError::from_code(code).map_or("unknown", ProbeError::name);
        println!("   - Probe errors ({name}): {count}");
        any_error = true;
    }
    if !any_error {
        println!("   - Probe errors: 0");
    }

    let unknown = counter(bpf, "UNKNOWN_WAIT_REASONS", 0)?;
    println!("   - Unknown wait reasons: {unknown}");

    Ok(())
}
