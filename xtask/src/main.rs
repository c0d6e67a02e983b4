//! Build helpers: `cargo xtask build-ebpf` compiles the probe object that
//! `gscope` embeds; `cargo xtask build` does that and then builds `gscope`.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the eBPF probe object
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        #[arg(long)]
        release: bool,
    },
    /// Build the probe object, then the userspace binary
    Build {
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, release } => build_ebpf(&target, release)?,
        Cmd::Build { release } => {
            build_ebpf("bpfel-unknown-none", true)?;
            build_userspace(release)?;
        }
    }

    Ok(())
}

fn build_ebpf(target: &str, _release: bool) -> Result<()> {
    // Debug builds pull in formatting code the BPF linker rejects; release
    // (LTO) strips it, so the flag is accepted but ignored.
    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly")
        .arg("build")
        .arg("--package")
        .arg("gscope-ebpf")
        .arg("--target")
        .arg(target)
        .arg("-Z")
        .arg("build-std=core")
        .arg("--release");

    run(cmd, "gscope-ebpf")?;

    println!("✓ gscope probes built");
    println!("  Target: {target}");
    println!("  Object: target/{target}/release/gscope");

    Ok(())
}

fn build_userspace(release: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("build").arg("--package").arg("gscope");
    if release {
        cmd.arg("--release");
    }

    run(cmd, "gscope")?;

    println!("✓ gscope built ({})", if release { "release" } else { "debug" });
    Ok(())
}

fn run(mut cmd: Command, package: &str) -> Result<()> {
    let status = cmd.status().with_context(|| format!("Failed to run cargo for {package}"))?;
    if !status.success() {
        anyhow::bail!("Failed to build {package} ({status})");
    }
    Ok(())
}
