//! # gscope - Main Entry Point
//!
//! Attaches the scheduler probes to a running Go process and streams what
//! they see: `gscope <PROCESS>` or `gscope --pid <PID>`, always with
//! `--offsets <FILE>` describing the build. Records are printed one per line
//! (unless `--quiet`) and optionally written as JSON lines (`--export`).

#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use aya::maps::RingBuf;
use clap::Parser;
use gscope_common::decode;
use log::{info, warn};
use std::path::Path;
use std::time::{Duration, Instant};

use gscope::cli::Args;
use gscope::config::load_offsets;
use gscope::preflight::{check_proc_access, check_process_exists, run_preflight_checks};
use gscope::process_lookup::{find_process_by_name, resolve_exe_path};
use gscope::profiling::{
    attach_plan, init_ebpf_logger, load_ebpf_program, populate_side_tables,
    print_probe_diagnostics, ProbePlan,
};
use gscope::reader::event_display::{display_progress, display_record, display_statistics};
use gscope::reader::{JsonLinesExporter, SnapshotAssembler};
use gscope::side_tables::{load_wait_reasons, parse_functab, ElfImage, TargetCode};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve PID and binary path from CLI arguments.
///
/// - `gscope my-app` - find process by name, auto-detect binary
/// - `gscope --pid 1234` - explicit PID, auto-detect binary from /proc
/// - `gscope --pid 1234 --target ./app` - explicit PID and binary
fn resolve_pid_and_target(args: &Args) -> Result<(i32, String)> {
    if let Some(ref name) = args.process {
        if args.pid.is_some() || args.target.is_some() {
            anyhow::bail!(
                "Cannot use PROCESS argument with --pid or --target.\n\n\
                 Use either:\n  \
                 gscope my-app --offsets o.json              (auto-detect)\n  \
                 gscope --pid 1234 --offsets o.json          (explicit PID)"
            );
        }
        let info = find_process_by_name(name)?;
        let target = info.exe_path.to_string_lossy().into_owned();
        return Ok((info.pid, target));
    }

    if let Some(pid) = args.pid {
        let target = if let Some(ref t) = args.target {
            std::fs::canonicalize(t)
                .with_context(|| format!("Failed to resolve path: {t}"))?
                .to_string_lossy()
                .into_owned()
        } else {
            resolve_exe_path(pid)?.to_string_lossy().into_owned()
        };
        return Ok((pid, target));
    }

    anyhow::bail!(
        "Missing required argument: PROCESS or --pid\n\n\
         Usage:\n  \
         gscope my-app --offsets o.json         Auto-detect PID and binary\n  \
         gscope --pid 1234 --offsets o.json     Explicit PID, auto-detect binary\n\n\
         Run 'gscope --help' for more options"
    )
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let (pid, target_path) = resolve_pid_and_target(&args)?;

    run_preflight_checks(&target_path)?;
    check_process_exists(pid)?;
    check_proc_access(pid)?;

    if !quiet {
        println!("gscope v{}", env!("CARGO_PKG_VERSION"));
        println!("target: {target_path}");
        println!("pid: {pid}");
    }

    // ── Target layout and side tables ───────────────────────────────────
    let offsets_file = load_offsets(&args.offsets)?;
    let image = ElfImage::open(Path::new(&target_path))
        .with_context(|| format!("Failed to read {target_path}"))?;
    let offsets = offsets_file.resolve(&image)?;
    let functab = parse_functab(image.pclntab())?;
    let wait_reasons = load_wait_reasons(&image, offsets.wait_reasons_addr)?;
    info!(
        "sched={:#x} allp={:#x} semtable={:#x} waitReasonStrings={:#x}",
        offsets.sched_addr,
        offsets.contexts_slice_addr,
        offsets.semtable_addr,
        offsets.wait_reasons_addr
    );

    let mut plan = match &args.probes {
        Some(path) => ProbePlan::default_plan().with_overrides(ProbePlan::load(path)?),
        None => ProbePlan::default_plan(),
    };
    plan.delay_packages.extend(args.delay_packages.iter().cloned());
    plan.validate()?;
    let plan = plan.resolve(&TargetCode::new(&image)?);

    // ── Load and attach ─────────────────────────────────────────────────
    let functab_len = u32::try_from(functab.len()).context("function table too large")?;
    let delay_ns = args.delay_ms.saturating_mul(1_000_000);
    let mut bpf = load_ebpf_program(&offsets, functab_len, delay_ns)?;
    init_ebpf_logger(&mut bpf);
    populate_side_tables(&mut bpf, &functab, &wait_reasons)?;

    let summary = attach_plan(&mut bpf, &plan, &target_path, Some(pid))?;
    if summary.attached == 0 {
        anyhow::bail!("No probe could be attached to {target_path}");
    }
    if !quiet {
        println!(
            "probes: {} attached, {} failed, {} unresolved",
            summary.attached, summary.failed, summary.unresolved
        );
        if delay_ns > 0 {
            println!("delay: {}ms", args.delay_ms);
        }
    }

    let mut ring_buf = RingBuf::try_from(bpf.take_map("EVENTS").context("EVENTS map not found")?)?;

    let exporter = args.export.as_deref().map(JsonLinesExporter::create).transpose()?;
    if !quiet {
        if let Some(ref export_path) = args.export {
            println!("export: {}", export_path.display());
        }
    }

    let mut assembler = SnapshotAssembler::new();
    let mut decode_errors = 0u64;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let start = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let proc_path = format!("/proc/{pid}");
    let mut last_status_time = Instant::now();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if !Path::new(&proc_path).exists() {
            exit_reason = "process exited";
            break;
        }

        if assembler.stats().events == 0 && last_status_time.elapsed() > Duration::from_secs(10) {
            info!("Still waiting for events... (no events received yet)");
            last_status_time = Instant::now();
        }

        while let Some(item) = ring_buf.next() {
            let event = match decode(&item) {
                Ok(event) => event,
                Err(e) => {
                    decode_errors += 1;
                    warn!("Dropping undecodable record: {e}");
                    continue;
                }
            };
            for record in assembler.push(event) {
                if !quiet {
                    display_record(&record);
                }
                if let Some(ref exporter) = exporter {
                    exporter.send(record)?;
                }
            }
        }

        if quiet && duration_limit.is_some() {
            display_progress(start.elapsed().as_secs(), args.duration);
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    for record in assembler.finish() {
        if !quiet {
            display_record(&record);
        }
        if let Some(ref exporter) = exporter {
            exporter.send(record)?;
        }
    }

    let stats = assembler.stats();
    eprintln!(
        "\n{exit_reason}: {:.1}s, {} events, {} records, {decode_errors} undecodable",
        start.elapsed().as_secs_f64(),
        stats.events,
        stats.records,
    );
    display_statistics(&stats);
    print_probe_diagnostics(&bpf)?;

    if let Some(exporter) = exporter {
        let written = exporter.finish().context("Failed to export records")?;
        if !quiet {
            if let Some(ref export_path) = args.export {
                println!("saved: {} ({written} records)", export_path.display());
            }
        }
    }

    Ok(())
}
