//! Find the monitored process by name and locate its executable.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// The kernel truncates `comm` to 15 bytes
const COMM_MAX_LEN: usize = 15;

#[derive(Debug)]
pub struct ProcessInfo {
    pub pid: i32,
    pub exe_path: PathBuf,
    pub command: String,
}

/// Find exactly one process whose command or executable matches `name`
///
/// Our own process is never a candidate, so `gscope gscope` does not match
/// itself.
///
/// # Errors
/// When no process, or more than one, matches.
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let own_pid = std::process::id();
    let mut candidates = Vec::new();

    for entry in fs::read_dir("/proc").context("Failed to read /proc")?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        if u32::try_from(pid).is_ok_and(|p| p == own_pid) {
            continue;
        }

        // Kernel threads have no exe link; other users' processes may be unreadable
        let Ok(exe_path) = fs::read_link(format!("/proc/{pid}/exe")) else {
            continue;
        };
        let Some(command) = fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .as_deref()
            .and_then(parse_comm)
            .map(str::to_string)
        else {
            continue;
        };

        if matches_name(&command, &exe_path, name) {
            candidates.push(ProcessInfo { pid, exe_path, command });
        }
    }

    if candidates.len() > 1 {
        let list: Vec<String> =
            candidates.iter().map(|c| format!("  {} ({})", c.pid, c.command)).collect();
        bail!(
            "Multiple processes match '{name}':\n{}\n\n\
             Specify PID explicitly: gscope --pid <PID>",
            list.join("\n")
        );
    }
    candidates.pop().with_context(|| {
        format!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        )
    })
}

/// Executable of `pid`, from `/proc/<pid>/exe`
///
/// # Errors
/// When the process is gone or the link is unreadable.
pub fn resolve_exe_path(pid: i32) -> Result<PathBuf> {
    let exe_link = format!("/proc/{pid}/exe");
    fs::read_link(&exe_link).with_context(|| format!("Cannot read {exe_link}"))
}

/// `comm` out of a `/proc/<pid>/stat` line ("pid (comm) state ...")
///
/// `comm` may itself contain parentheses, so the last `)` closes it.
fn parse_comm(stat_line: &str) -> Option<&str> {
    let open = stat_line.find('(')?;
    let close = stat_line.rfind(')')?;
    stat_line.get(open + 1..close)
}

fn matches_name(command: &str, exe_path: &Path, pattern: &str) -> bool {
    let wanted = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);
    let exe_name = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if exe_name == wanted || command == wanted {
        return true;
    }
    // Long names only survive as a 15-byte prefix in comm
    if wanted.len() > COMM_MAX_LEN && command.len() == COMM_MAX_LEN && wanted.starts_with(command)
    {
        return true;
    }
    exe_name.contains(pattern) || command.contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comm() {
        assert_eq!(parse_comm("1234 (my-app) S 1 1234 1234 0 -1 4194304"), Some("my-app"));
        assert_eq!(parse_comm("1234 (app (v2)) S 1 1234"), Some("app (v2)"));
        assert_eq!(parse_comm("1234 ) S ("), None);
    }

    #[test]
    fn test_matches_name() {
        let exe = Path::new("/usr/bin/my-server");
        assert!(matches_name("my-server", exe, "my-server"));
        assert!(matches_name("my-server", exe, "server"));
        assert!(matches_name("my-server", exe, "/opt/build/my-server"));
        assert!(!matches_name("my-server", exe, "other"));
    }

    #[test]
    fn test_matches_truncated_comm() {
        let exe = Path::new("/tmp/deleted-binary");
        assert!(matches_name("payment-gateway", exe, "payment-gateway-worker"));
    }
}
