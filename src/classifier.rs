use crate::error::IssueKind;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Why the simulator stopped.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum SimEndReason {
    ContextsFinished,
    NoFaultInjected,
    CycleTimeout,
    Unknown,
}

impl SimEndReason {
    /// Map the raw `SimEnd` value of the status report.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "ContextsFinished" => SimEndReason::ContextsFinished,
            "EvergreenNoFaults" => SimEndReason::NoFaultInjected,
            "EvergreenMaxCycles" => SimEndReason::CycleTimeout,
            _ => SimEndReason::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SimEndReason::ContextsFinished => "contexts_finished",
            SimEndReason::NoFaultInjected => "no_fault_injected",
            SimEndReason::CycleTimeout => "cycle_timeout",
            SimEndReason::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BenchmarkResult {
    Passed,
    Failed,
    Unknown,
}

impl BenchmarkResult {
    pub fn as_str(self) -> &'static str {
        match self {
            BenchmarkResult::Passed => "passed",
            BenchmarkResult::Failed => "failed",
            BenchmarkResult::Unknown => "unknown",
        }
    }
}

/// Classification of one trial's run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationOutcome {
    pub sim_end: SimEndReason,
    /// Only inspected when the run ended with [`SimEndReason::ContextsFinished`],
    /// [`BenchmarkResult::Unknown`] otherwise.
    pub benchmark_result: BenchmarkResult,
    pub total_cycles: u64,
    pub gpu_cycles: u64,
    pub gpu_ipc: f64,
}

impl Default for SimulationOutcome {
    fn default() -> Self {
        Self {
            sim_end: SimEndReason::Unknown,
            benchmark_result: BenchmarkResult::Unknown,
            total_cycles: 0,
            gpu_cycles: 0,
            gpu_ipc: 0.0,
        }
    }
}

impl SimulationOutcome {
    /// Single label combining end reason and benchmark result.
    pub fn label(&self) -> &'static str {
        match self.sim_end {
            SimEndReason::ContextsFinished => self.benchmark_result.as_str(),
            SimEndReason::NoFaultInjected => "not_injected",
            SimEndReason::CycleTimeout => "cycle_timeout",
            SimEndReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusReportError {
    #[error("line {line}: content before the first section header")]
    MissingSectionHeader { line: usize },

    #[error("line {line}: cannot parse {text:?}")]
    Syntax { line: usize, text: String },

    #[error("missing key {key} in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("invalid value {value:?} for {key} in section [{section}]")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// INI-like simulator status report.
///
/// Section names are trimmed and case sensitive, keys are case insensitive.
/// Any line containing `warning` is treated as a comment, the simulator
/// interleaves its warnings with the report.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusReport {
    sections: HashMap<String, HashMap<String, String>>,
}

impl StatusReport {
    pub fn parse(text: &str) -> Result<Self, StatusReportError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            if raw.contains("warning") {
                continue;
            }
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') {
                continue;
            }

            // Indented lines continue the previous value
            if raw.starts_with(char::is_whitespace) {
                if let (Some(section), Some(key)) = (&current, &last_key) {
                    if let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key)) {
                        value.push('\n');
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
                let name = header.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                last_key = None;
                continue;
            }

            let Some(section) = &current else {
                return Err(StatusReportError::MissingSectionHeader { line: line_no });
            };
            let Some(split) = trimmed.find(|c: char| c == '=' || c == ':') else {
                return Err(StatusReportError::Syntax {
                    line: line_no,
                    text: raw.to_string(),
                });
            };
            let key = trimmed[..split].trim().to_lowercase();
            if key.is_empty() {
                return Err(StatusReportError::Syntax {
                    line: line_no,
                    text: raw.to_string(),
                });
            }
            let value = strip_inline_comment(trimmed[split + 1..].trim()).to_string();
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.clone(), value);
            last_key = Some(key);
        }
        Ok(Self { sections })
    }

    pub fn get(&self, section: &str, key: &str) -> Result<&str, StatusReportError> {
        self.sections
            .get(section)
            .and_then(|entries| entries.get(&key.to_lowercase()))
            .map(String::as_str)
            .ok_or_else(|| StatusReportError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    pub fn get_u64(&self, section: &str, key: &str) -> Result<u64, StatusReportError> {
        self.get_parsed(section, key)
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Result<f64, StatusReportError> {
        self.get_parsed(section, key)
    }

    fn get_parsed<T: std::str::FromStr>(
        &self,
        section: &str,
        key: &str,
    ) -> Result<T, StatusReportError> {
        let value = self.get(section, key)?;
        value
            .parse()
            .map_err(|_| StatusReportError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            })
    }
}

fn strip_inline_comment(value: &str) -> &str {
    match value.find(" ;") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

/// Names of the status report sections holding the counters.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusSections {
    pub general: String,
    /// Architecture specific section.
    pub gpu: String,
}

impl Default for StatusSections {
    fn default() -> Self {
        Self {
            general: "General".to_string(),
            gpu: "Evergreen".to_string(),
        }
    }
}

/// Outcome of a trial together with the recovered conditions met on the way.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub outcome: SimulationOutcome,
    pub notes: Vec<(IssueKind, String)>,
}

/// Classifies a run from its status report and benchmark output capture.
#[derive(Clone, Debug, Default)]
pub struct RunArtifactClassifier {
    sections: StatusSections,
}

impl RunArtifactClassifier {
    pub fn new(sections: StatusSections) -> Self {
        Self { sections }
    }

    /// Classify a trial. Never fails: a missing or broken status report gives
    /// an unknown outcome with zeroed counters, a missing benchmark output an
    /// unknown benchmark result.
    pub fn classify(&self, status_report: &Path, benchmark_output: &Path) -> SimulationOutcome {
        self.classify_with_notes(status_report, benchmark_output)
            .outcome
    }

    pub fn classify_with_notes(
        &self,
        status_report: &Path,
        benchmark_output: &Path,
    ) -> Classification {
        let mut notes = Vec::new();

        let mut outcome = match self.read_status_report(status_report) {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!("Status report {}: {reason}", status_report.display());
                notes.push((IssueKind::MissingOrUnparseableStatusReport, reason));
                SimulationOutcome::default()
            }
        };

        if outcome.sim_end == SimEndReason::ContextsFinished {
            match read_benchmark_result(benchmark_output) {
                Ok(result) => outcome.benchmark_result = result,
                Err(err) => {
                    let reason = format!("{}: {err}", benchmark_output.display());
                    warn!("Benchmark output {reason}");
                    notes.push((IssueKind::MissingBenchmarkOutput, reason));
                }
            }
        }

        debug!("Classified {} as {}", status_report.display(), outcome.label());
        Classification { outcome, notes }
    }

    fn read_status_report(&self, path: &Path) -> Result<SimulationOutcome, String> {
        // Fault injected runs may leave stray bytes, keep the readable lines
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        self.outcome_from_text(&String::from_utf8_lossy(&bytes))
            .map_err(|e| e.to_string())
    }

    /// Required lookups of a parsed report. All or nothing.
    pub fn outcome_from_text(&self, text: &str) -> Result<SimulationOutcome, StatusReportError> {
        let report = StatusReport::parse(text)?;
        let general = &self.sections.general;
        let gpu = &self.sections.gpu;
        let sim_end = SimEndReason::from_raw(report.get(general, "SimEnd")?);
        let total_cycles = report.get_u64(general, "Cycles")?;
        let gpu_cycles = report.get_u64(gpu, "Cycles")?;
        let gpu_ipc = report.get_f64(gpu, "IPC")?;
        Ok(SimulationOutcome {
            sim_end,
            benchmark_result: BenchmarkResult::Unknown,
            total_cycles,
            gpu_cycles,
            gpu_ipc,
        })
    }
}

/// Scan the benchmark output for the first `Passed` or `Failed` line.
///
/// Lines are compared as raw bytes, invalid UTF-8 elsewhere in the file does
/// not hide the verdict.
pub fn read_benchmark_result(path: &Path) -> std::io::Result<BenchmarkResult> {
    let reader = BufReader::new(File::open(path)?);
    for line in reader.split(b'\n') {
        let line = line?;
        match line.strip_suffix(b"\r").unwrap_or(&line) {
            b"Passed" => return Ok(BenchmarkResult::Passed),
            b"Failed" => return Ok(BenchmarkResult::Failed),
            _ => {}
        }
    }
    Ok(BenchmarkResult::Unknown)
}
