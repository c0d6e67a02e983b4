//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gscope",
    about = "Stream Go scheduler state from a running process",
    after_help = "\
EXAMPLES:
    sudo gscope my-app --offsets go1.22.json                  Auto-detect PID and binary
    sudo gscope --pid 1234 --offsets go1.22.json              Explicit PID, auto-detect binary
    sudo gscope --pid 1234 -t ./myapp --offsets o.json --export events.jsonl
    sudo gscope my-app --offsets o.json --probes plan.json --delay-ms 5
    sudo gscope my-app --offsets o.json --delay-package main --delay-ms 1"
)]
pub struct Args {
    /// Process name to monitor (auto-detects PID and binary)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to monitor (binary path auto-detected from /proc)
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Path to the monitored binary (optional, auto-detected if omitted)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Field offsets and base addresses of the monitored build (JSON)
    #[arg(long, value_name = "FILE")]
    pub offsets: PathBuf,

    /// Attach plan overriding the default probe points (JSON)
    #[arg(long, value_name = "FILE")]
    pub probes: Option<PathBuf>,

    /// Put a delay point on every source line of this package (repeatable)
    #[arg(long = "delay-package", value_name = "PKG")]
    pub delay_packages: Vec<String>,

    /// Busy-wait injected at delay points, dispatch and park (0 = off)
    #[arg(long, default_value = "0")]
    pub delay_ms: u64,

    /// Export reassembled records as JSON lines
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress per-record output
    #[arg(short, long)]
    pub quiet: bool,
}
