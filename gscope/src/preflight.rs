//! Pre-flight checks for gscope
//!
//! Validates system requirements before attempting to load eBPF programs.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use object::{Object, ObjectSection};
use std::path::Path;

/// Ring buffer maps (5.8) and `bpf_loop` (5.17)
const MIN_KERNEL_VERSION: (u32, u32) = (5, 17);

/// Run all pre-flight checks before eBPF loading
pub fn run_preflight_checks(target_path: &str) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_binary_exists(target_path)?;
    check_go_binary(target_path)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    // CAP_BPF + CAP_PERFMON would do, but checking capabilities needs
    // another dependency
    bail!(
        "Permission denied: gscope requires root privileges to load eBPF programs.\n\n\
         Run with: sudo gscope ..."
    );
}

/// `(major, minor)` from a `/proc/version` line
fn parse_kernel_release(version_str: &str) -> Option<(u32, u32)> {
    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // Unparseable: let the loader complain if something is missing
    let Some((major, minor)) = parse_kernel_release(&version_str) else {
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {}.{} is too old.\n\n\
             gscope requires Linux {}.{} or newer (ring buffer and bpf_loop).",
            major,
            minor,
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Check if the target binary exists and is readable
fn check_binary_exists(target_path: &str) -> Result<()> {
    let path = Path::new(target_path);
    if !path.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Make sure the path is correct and the binary exists.",
            target_path
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --target must point to an executable file, not a directory.",
            target_path
        );
    }
    Ok(())
}

/// The function table comes from `.gopclntab`; without it nothing unwinds
fn check_go_binary(target_path: &str) -> Result<()> {
    let file_data = std::fs::read(target_path)
        .with_context(|| format!("Failed to read binary: {target_path}"))?;

    let obj = object::File::parse(&*file_data)
        .with_context(|| format!("Not an object file: {target_path}"))?;

    let has_pclntab = obj.section_by_name(".gopclntab").is_some_and(|s| s.size() > 0);
    if !has_pclntab {
        bail!(
            "{target_path} has no .gopclntab section.\n\n\
             gscope monitors Go binaries (Go 1.18 or newer)."
        );
    }

    Ok(())
}

/// Check if the target process exists
pub fn check_process_exists(pid: i32) -> Result<()> {
    let proc_path = format!("/proc/{pid}");
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {pid} not found.\n\n\
             Is the process still running? Check with: ps -p {pid}"
        );
    }
    Ok(())
}

/// Check if we can read the process's memory maps
pub fn check_proc_access(pid: i32) -> Result<()> {
    let maps_path = format!("/proc/{pid}/maps");
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {pid})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted"
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(
            parse_kernel_release("Linux version 6.1.0-arch1-1 (gcc 12) #1 SMP"),
            Some((6, 1))
        );
        assert_eq!(parse_kernel_release("Linux version 5.17rc3 x"), Some((5, 17)));
        assert_eq!(parse_kernel_release("garbage"), None);
    }

    #[test]
    fn test_binary_not_found() {
        let result = check_binary_exists("/nonexistent/path/to/binary");
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Binary not found"));
    }

    #[test]
    fn test_not_an_object_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"#!/bin/sh\n").unwrap();
        let result = check_go_binary(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_process_not_found() {
        let result = check_process_exists(999_999_999);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("not found"));
    }
}
