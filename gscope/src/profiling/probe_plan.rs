//! # Attach Plan
//!
//! Which eBPF program goes on which symbol, and where inside it. Offsets are
//! found in the monitored binary: entry probes go just past the stack-split
//! check, return probes on every `ret`, and each `delay_packages` entry puts a
//! `delay_point` on the first instruction of every source line of that
//! package. Explicit `offsets` skip the lookup.
//!
//! ```json
//! { "probes": [
//!     { "program": "local_runq_status", "symbol": "runtime.newproc", "at": "returns" },
//!     { "program": "delay_point", "symbol": "main.worker", "offsets": [0, 36] }
//!   ],
//!   "delay_packages": ["main"] }
//! ```
//!
//! File entries replace every default entry of the same program.

use crate::domain::ConfigError;
use crate::side_tables::code::AttachOffsets;
use log::warn;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Programs exported by the probe object
pub const PROGRAMS: [&str; 11] = [
    "task_created",
    "delay_point",
    "local_runq_status",
    "woken_runq_status",
    "global_runq_status",
    "runq_steal",
    "dispatched",
    "found_runnable",
    "parked",
    "woken",
    "semtable_status",
];

const DELAY_PROGRAM: &str = "delay_point";

/// Where inside the symbol a probe goes when no offsets are given
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachAt {
    /// Past the stack-split check
    #[default]
    Entry,
    /// Every `ret`
    Returns,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeSpec {
    pub program: String,
    pub symbol: String,
    #[serde(default)]
    pub at: AttachAt,
    /// Byte offsets from the symbol, one uprobe each; override `at`
    #[serde(default)]
    pub offsets: Option<Vec<u64>>,
}

impl ProbeSpec {
    fn entry(program: &str, symbol: &str) -> Self {
        Self {
            program: program.to_string(),
            symbol: symbol.to_string(),
            at: AttachAt::Entry,
            offsets: None,
        }
    }

    fn returns(program: &str, symbol: &str) -> Self {
        Self { at: AttachAt::Returns, ..Self::entry(program, symbol) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbePlan {
    pub probes: Vec<ProbeSpec>,
    /// Packages whose every source line gets a delay point
    #[serde(default)]
    pub delay_packages: Vec<String>,
}

/// A plan entry with concrete offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProbe {
    pub program: String,
    pub symbol: String,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlan {
    pub probes: Vec<ResolvedProbe>,
    /// Plan entries whose offsets could not be found
    pub unresolved: usize,
}

impl ProbePlan {
    #[must_use]
    pub fn default_plan() -> Self {
        Self {
            probes: vec![
                ProbeSpec::entry("task_created", "runtime.newproc"),
                ProbeSpec::returns("local_runq_status", "runtime.newproc"),
                ProbeSpec::entry("dispatched", "runtime.schedule"),
                ProbeSpec::entry("found_runnable", "runtime.execute"),
                ProbeSpec::entry("parked", "runtime.gopark"),
                ProbeSpec::entry("woken", "runtime.ready"),
                ProbeSpec::returns("woken_runq_status", "runtime.goready"),
                ProbeSpec::entry("runq_steal", "runtime.runqsteal"),
                ProbeSpec::entry("global_runq_status", "runtime.findRunnable"),
                ProbeSpec::entry("semtable_status", "runtime.semrelease1"),
            ],
            delay_packages: Vec::new(),
        }
    }

    /// Parse a plan file and validate it
    ///
    /// # Errors
    /// [`ConfigError`] on unreadable or invalid files.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let plan: Self = serde_json::from_str(&text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// # Errors
    /// [`ConfigError::InvalidPlan`] for unknown programs, empty symbols or
    /// package names, and empty offset lists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for probe in &self.probes {
            if !PROGRAMS.contains(&probe.program.as_str()) {
                return Err(ConfigError::InvalidPlan(format!(
                    "unknown program {:?} (expected one of: {})",
                    probe.program,
                    PROGRAMS.join(", ")
                )));
            }
            if probe.symbol.is_empty() {
                return Err(ConfigError::InvalidPlan(format!("{}: empty symbol", probe.program)));
            }
            if probe.offsets.as_ref().is_some_and(Vec::is_empty) {
                return Err(ConfigError::InvalidPlan(format!(
                    "{} on {}: empty offsets",
                    probe.program, probe.symbol
                )));
            }
        }
        if self.delay_packages.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidPlan("empty delay package name".to_string()));
        }
        Ok(())
    }

    /// Default plan with every program named in `overrides` replaced by its
    /// entries there; delay packages are added
    #[must_use]
    pub fn with_overrides(self, overrides: ProbePlan) -> Self {
        let replaced: HashSet<&str> = overrides.probes.iter().map(|p| p.program.as_str()).collect();
        let mut probes: Vec<ProbeSpec> = self
            .probes
            .into_iter()
            .filter(|p| !replaced.contains(p.program.as_str()))
            .collect();
        probes.extend(overrides.probes.iter().cloned());

        let mut delay_packages = self.delay_packages;
        delay_packages.extend(overrides.delay_packages);
        Self { probes, delay_packages }
    }

    /// Find the offsets of every entry in the monitored binary
    ///
    /// An entry that cannot be resolved is logged and counted; the rest of the
    /// plan still goes ahead.
    pub fn resolve<C: AttachOffsets + ?Sized>(&self, code: &C) -> ResolvedPlan {
        let mut plan = ResolvedPlan::default();

        for probe in &self.probes {
            let offsets = match (&probe.offsets, probe.at) {
                (Some(offsets), _) => Ok(offsets.clone()),
                (None, AttachAt::Entry) => code.entry_offset(&probe.symbol).map(|o| vec![o]),
                (None, AttachAt::Returns) => code.return_offsets(&probe.symbol),
            };
            match offsets {
                Ok(offsets) if !offsets.is_empty() => plan.probes.push(ResolvedProbe {
                    program: probe.program.clone(),
                    symbol: probe.symbol.clone(),
                    offsets,
                }),
                Ok(_) => {
                    warn!("⚠️  {} on {}: no attach points found", probe.program, probe.symbol);
                    plan.unresolved += 1;
                }
                Err(e) => {
                    warn!("⚠️  {} on {}: {e}", probe.program, probe.symbol);
                    plan.unresolved += 1;
                }
            }
        }

        for package in &self.delay_packages {
            match code.package_offsets(package) {
                Ok(points) if !points.is_empty() => {
                    plan.probes.extend(points.into_iter().map(|(symbol, offsets)| ResolvedProbe {
                        program: DELAY_PROGRAM.to_string(),
                        symbol,
                        offsets,
                    }));
                }
                Ok(_) => {
                    warn!("⚠️  No functions of package {package} in the binary");
                    plan.unresolved += 1;
                }
                Err(e) => {
                    warn!("⚠️  Delay points of package {package}: {e}");
                    plan.unresolved += 1;
                }
            }
        }

        plan
    }
}
