//! Agent service probe
//!
//! Process-name matching over a remote shell is best-effort, so the answer
//! is tri-state rather than a boolean.

use serde::Serialize;

/// Remote command printing `detected` or `not-detected`
pub const PROBE_COMMAND: &str = "if pgrep -x zabbix_agent2 >/dev/null 2>&1 || pgrep -x zabbix_agentd >/dev/null 2>&1; \
then echo detected; else echo not-detected; fi";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeOutcome {
    Detected,
    NotDetected,
    Indeterminate,
}

impl ProbeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Detected => "agent running",
            ProbeOutcome::NotDetected => "agent not running",
            ProbeOutcome::Indeterminate => "agent unknown",
        }
    }
}

/// Interpret the probe command's exit code and stdout
pub fn parse_probe_output(exit_code: Option<i32>, stdout: &str) -> ProbeOutcome {
    if exit_code != Some(0) {
        return ProbeOutcome::Indeterminate;
    }
    match stdout.lines().map(str::trim).rev().find(|l| !l.is_empty()) {
        Some("detected") => ProbeOutcome::Detected,
        Some("not-detected") => ProbeOutcome::NotDetected,
        _ => ProbeOutcome::Indeterminate,
    }
}
