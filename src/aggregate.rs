use crate::classifier::RunArtifactClassifier;
use crate::descriptor::FaultDescriptor;
use crate::error::{CampaignError, ExtractError, IssueKind, Result, TrialIssue};
use crate::extractor::DebugEffectExtractor;
use crate::store::{RecordedEffect, ResultRecord, ResultStore};
use colored::Colorize;
use crossbeam_channel::{unbounded, Receiver, Sender};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};

/// File names of the artifacts of one trial.
///
/// Trial `n` lives in `<results_dir>/<n>/` and holds the fault descriptor
/// `<n>`, the status report `slurm-<run_id>_<n>.out`, the benchmark output
/// `<benchmark>_<n>.out` and the debug trace `debug_<n>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub benchmark: String,
    pub run_id: String,
}

impl ArtifactLayout {
    pub fn new(benchmark: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            run_id: run_id.into(),
        }
    }

    pub fn trial_dir(&self, results_dir: &Path, trial_index: u32) -> PathBuf {
        results_dir.join(trial_index.to_string())
    }

    pub fn fault_descriptor(&self, trial_dir: &Path, trial_index: u32) -> PathBuf {
        FaultDescriptor::path_in(trial_dir, trial_index)
    }

    pub fn status_report(&self, trial_dir: &Path, trial_index: u32) -> PathBuf {
        trial_dir.join(format!("slurm-{}_{trial_index}.out", self.run_id))
    }

    pub fn benchmark_output(&self, trial_dir: &Path, trial_index: u32) -> PathBuf {
        trial_dir.join(format!("{}_{trial_index}.out", self.benchmark))
    }

    pub fn debug_trace(&self, trial_dir: &Path, trial_index: u32) -> PathBuf {
        trial_dir.join(format!("debug_{trial_index}"))
    }

    /// Default result database name.
    pub fn database_name(&self) -> String {
        format!("{}_{}.db", self.run_id, self.benchmark)
    }
}

/// Largest gap between consecutive trial directories before the rest is
/// considered stray.
pub const MAX_TRIAL_GAP: u32 = 100_000;

/// Largest trial directory name in `results_dir`.
///
/// Only plain decimal names count (`7`, not `007`), other entries are
/// ignored. Directories following a gap wider than [`MAX_TRIAL_GAP`] are
/// ignored too.
pub fn max_trial_index(results_dir: &Path) -> Result<u32> {
    if !results_dir.is_dir() {
        return Err(CampaignError::ResultsDirMissing(results_dir.to_path_buf()));
    }
    let entries = fs::read_dir(results_dir).map_err(|e| CampaignError::io(results_dir, e))?;
    let indices: Vec<u32> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let index = name.parse::<u32>().ok()?;
            (index.to_string() == name).then_some(index)
        })
        .sorted()
        .collect();

    let mut max = 0;
    for index in &indices {
        if index - max > MAX_TRIAL_GAP {
            warn!(
                "Ignoring trial directories from {index} on in {}, gap after {max}",
                results_dir.display()
            );
            break;
        }
        max = *index;
    }
    if max == 0 {
        return Err(CampaignError::NoTrialDirectories(results_dir.to_path_buf()));
    }
    Ok(max)
}

/// Everything learned from one trial directory.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialReport {
    pub trial_index: u32,
    /// `None` when the trial had to be dropped.
    pub record: Option<ResultRecord>,
    pub issues: Vec<TrialIssue>,
}

/// Reads and normalizes the artifacts of single trials.
pub struct TrialProcessor {
    layout: ArtifactLayout,
    classifier: RunArtifactClassifier,
    extractor: DebugEffectExtractor,
}

impl TrialProcessor {
    pub fn new(layout: ArtifactLayout, classifier: RunArtifactClassifier) -> Self {
        Self {
            layout,
            classifier,
            extractor: DebugEffectExtractor::new(),
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn process(&self, results_dir: &Path, trial_index: u32) -> TrialReport {
        let mut issues = Vec::new();
        let record = self.build_record(results_dir, trial_index, &mut issues);
        // Status report and benchmark output issues are logged by the classifier
        for issue in issues.iter().filter(|issue| {
            !matches!(
                issue.kind,
                IssueKind::MissingOrUnparseableStatusReport | IssueKind::MissingBenchmarkOutput
            )
        }) {
            warn!("{issue}");
        }
        TrialReport {
            trial_index,
            record,
            issues,
        }
    }

    fn build_record(
        &self,
        results_dir: &Path,
        trial_index: u32,
        issues: &mut Vec<TrialIssue>,
    ) -> Option<ResultRecord> {
        let mut issue = |kind: IssueKind, detail: String| {
            issues.push(TrialIssue::new(trial_index, kind, detail));
        };

        let trial_dir = self.layout.trial_dir(results_dir, trial_index);
        if !trial_dir.is_dir() {
            issue(
                IssueKind::MissingTrialDirectory,
                trial_dir.display().to_string(),
            );
            return None;
        }

        let fault_path = self.layout.fault_descriptor(&trial_dir, trial_index);
        let descriptor = match FaultDescriptor::read_from(&fault_path) {
            Ok(descriptor) => descriptor,
            Err(CampaignError::Io { ref source, .. }) if source.kind() == ErrorKind::NotFound => {
                issue(
                    IssueKind::MissingFaultDescriptor,
                    fault_path.display().to_string(),
                );
                return None;
            }
            Err(err) => {
                issue(IssueKind::MalformedFaultDescriptor, err.to_string());
                return None;
            }
        };

        let classification = self.classifier.classify_with_notes(
            &self.layout.status_report(&trial_dir, trial_index),
            &self.layout.benchmark_output(&trial_dir, trial_index),
        );
        for (kind, detail) in classification.notes {
            issue(kind, detail);
        }

        let trace_path = self.layout.debug_trace(&trial_dir, trial_index);
        let trace = match fs::read(&trace_path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                let kind = match err.kind() {
                    ErrorKind::NotFound => IssueKind::MissingDebugTrace,
                    _ => IssueKind::MalformedDebugTrace,
                };
                issue(kind, format!("{}: {err}", trace_path.display()));
                return None;
            }
        };

        let effect = match self.extractor.extract(&trace, descriptor.kind()) {
            Ok(effect) => RecordedEffect::Observed(effect),
            Err(err @ ExtractError::MalformedDebugTrace) => {
                issue(IssueKind::MalformedDebugTrace, err.to_string());
                return None;
            }
            Err(err @ ExtractError::IncompleteErrorFields { .. }) => {
                issue(IssueKind::IncompleteErrorFields, err.to_string());
                RecordedEffect::NeedsReview {
                    effect_kind: crate::extractor::ERROR_EFFECT.to_string(),
                }
            }
        };

        debug!(
            "Trial {trial_index}: {descriptor} -> {} / {}",
            classification.outcome.label(),
            effect.effect_kind()
        );
        Some(ResultRecord {
            trial_index,
            benchmark: self.layout.benchmark.clone(),
            descriptor,
            outcome: classification.outcome,
            effect,
        })
    }
}

/// Result of one aggregation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub trials: u32,
    pub inserted: usize,
    /// Records whose key was already present.
    pub ignored: usize,
    pub issues: Vec<TrialIssue>,
}

impl AggregationSummary {
    /// Number of trials per issue kind.
    pub fn counts(&self) -> BTreeMap<IssueKind, usize> {
        self.issues
            .iter()
            .map(|issue| issue.kind)
            .counts()
            .into_iter()
            .collect()
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind == kind).count()
    }

    pub fn dropped(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| !issue.kind.is_recovered())
            .map(|issue| issue.trial_index)
            .unique()
            .count()
    }

    /// Pretty print the summary
    pub fn print(&self) {
        println!(
            "{} trials: {} stored, {} already present, {} dropped",
            self.trials,
            self.inserted.to_string().green(),
            self.ignored,
            self.dropped().to_string().red()
        );
        for (kind, count) in self.counts() {
            let line = format!("  {kind}: {count}");
            if kind.is_recovered() {
                println!("{}", line.yellow());
            } else {
                println!("{}", line.red());
            }
        }
    }
}

/// Walks all trials `1..=max_trial_index` of a results directory.
///
/// Trials are parsed by a pool of worker threads, the calling thread is the
/// only one writing to the store.
pub struct Aggregator<'a> {
    processor: Arc<TrialProcessor>,
    results_dir: PathBuf,
    store: &'a ResultStore,
    threads: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        processor: TrialProcessor,
        results_dir: impl Into<PathBuf>,
        store: &'a ResultStore,
        threads: usize,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            results_dir: results_dir.into(),
            store,
            threads: threads.max(1),
        }
    }

    pub fn run(&self) -> Result<AggregationSummary> {
        let trials = max_trial_index(&self.results_dir)?;
        info!(
            "Aggregating {trials} trials of {} from {}",
            self.processor.layout().benchmark,
            self.results_dir.display()
        );

        let (workload_sender, workload_receiver) = unbounded::<u32>();
        let (result_sender, result_receiver) = unbounded::<TrialReport>();
        let handles = self.start_workers(workload_receiver, result_sender);

        for trial_index in 1..=trials {
            // Receivers only go away once all workers have exited
            if workload_sender.send(trial_index).is_err() {
                break;
            }
        }
        drop(workload_sender);

        let mut summary = AggregationSummary {
            trials,
            ..Default::default()
        };
        let written = self.write_reports(&result_receiver, &mut summary);
        drop(result_receiver);
        join_workers(handles)?;
        written?;

        summary.issues.sort_by_key(|issue| issue.trial_index);
        Ok(summary)
    }

    fn start_workers(
        &self,
        workload_receiver: Receiver<u32>,
        result_sender: Sender<TrialReport>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.threads)
            .map(|_| {
                let receiver = workload_receiver.clone();
                let sender = result_sender.clone();
                let processor = Arc::clone(&self.processor);
                let results_dir = self.results_dir.clone();
                spawn(move || {
                    while let Ok(trial_index) = receiver.recv() {
                        let report = processor.process(&results_dir, trial_index);
                        if sender.send(report).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect()
    }

    /// Single writer loop. Ends when every worker dropped its sender.
    fn write_reports(
        &self,
        result_receiver: &Receiver<TrialReport>,
        summary: &mut AggregationSummary,
    ) -> Result<()> {
        for report in result_receiver.iter() {
            if let Some(record) = &report.record {
                if self.store.insert(record)? {
                    summary.inserted += 1;
                } else {
                    summary.ignored += 1;
                }
            }
            summary.issues.extend(report.issues);
        }
        Ok(())
    }
}

fn join_workers(handles: Vec<JoinHandle<()>>) -> Result<()> {
    for handle in handles {
        handle
            .join()
            .map_err(|_| CampaignError::Worker("worker thread panicked".to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        let layout = ArtifactLayout::new("DCT", "4711");
        let dir = layout.trial_dir(Path::new("/runs/dct"), 12);
        assert_eq!(dir, Path::new("/runs/dct/12"));
        assert_eq!(layout.fault_descriptor(&dir, 12), Path::new("/runs/dct/12/12"));
        assert_eq!(
            layout.status_report(&dir, 12),
            Path::new("/runs/dct/12/slurm-4711_12.out")
        );
        assert_eq!(layout.benchmark_output(&dir, 12), Path::new("/runs/dct/12/DCT_12.out"));
        assert_eq!(layout.debug_trace(&dir, 12), Path::new("/runs/dct/12/debug_12"));
        assert_eq!(layout.database_name(), "4711_DCT.db");
    }

    #[test]
    fn max_trial_from_numeric_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1", "2", "10", "logs", "7x"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("99"), "not a directory").unwrap();
        assert_eq!(max_trial_index(dir.path()).unwrap(), 10);
    }

    #[test]
    fn padded_and_stray_names_ignored() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1", "3", "007", "+9", "4000000000"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        assert_eq!(max_trial_index(dir.path()).unwrap(), 3);

        let only_stray = tempfile::tempdir().unwrap();
        fs::create_dir(only_stray.path().join("0")).unwrap();
        fs::create_dir(only_stray.path().join("123456789")).unwrap();
        assert!(matches!(
            max_trial_index(only_stray.path()),
            Err(CampaignError::NoTrialDirectories(_))
        ));
    }

    #[test]
    fn max_trial_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            max_trial_index(dir.path()),
            Err(CampaignError::NoTrialDirectories(_))
        ));
        assert!(matches!(
            max_trial_index(&dir.path().join("missing")),
            Err(CampaignError::ResultsDirMissing(_))
        ));
    }

    #[test]
    fn summary_counts() {
        let summary = AggregationSummary {
            trials: 4,
            inserted: 2,
            ignored: 0,
            issues: vec![
                TrialIssue::new(1, IssueKind::MissingBenchmarkOutput, "a"),
                TrialIssue::new(2, IssueKind::MalformedDebugTrace, "b"),
                TrialIssue::new(3, IssueKind::MissingTrialDirectory, "c"),
                TrialIssue::new(4, IssueKind::MissingBenchmarkOutput, "d"),
            ],
        };
        let counts = summary.counts();
        assert_eq!(counts[&IssueKind::MissingBenchmarkOutput], 2);
        assert_eq!(counts[&IssueKind::MalformedDebugTrace], 1);
        assert_eq!(summary.count(IssueKind::IncompleteErrorFields), 0);
        assert_eq!(summary.dropped(), 2);
    }
}
