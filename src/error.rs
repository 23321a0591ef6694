use std::fmt;
use std::path::PathBuf;

use crate::fault_model::FaultKind;

/// Errors which abort the operation that raised them.
///
/// Generation errors abort the whole campaign, store errors abort the
/// aggregation run. Anything scoped to a single trial is a [`TrialIssue`]
/// instead and never reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    /// Fault type code is not one of `reg`, `mem`, `ams`.
    #[error("unsupported fault type: {0:?}")]
    UnsupportedFaultType(String),

    /// Cycle bound of zero leaves nothing to draw from.
    #[error("cycle bound must be greater than zero")]
    InvalidCycleBound,

    /// Hardware bound with `min > max`.
    #[error("invalid range for {field}: {min} > {max}")]
    InvalidRange {
        field: &'static str,
        min: u32,
        max: u32,
    },

    #[error("unknown benchmark: {0:?}")]
    UnknownBenchmark(String),

    #[error("malformed fault descriptor {line:?}: {reason}")]
    MalformedDescriptor { line: String, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("result store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("results directory does not exist: {}", .0.display())]
    ResultsDirMissing(PathBuf),

    #[error("no numeric trial directories in {}", .0.display())]
    NoTrialDirectories(PathBuf),

    #[error("aggregation worker failed: {0}")]
    Worker(String),
}

impl CampaignError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CampaignError>;

/// Failures of the debug effect extractor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// The trace carries no `effect=` marker at all.
    #[error("debug trace has no effect= marker")]
    MalformedDebugTrace,

    /// Effect is `error` but a field required for this fault kind is absent.
    #[error("{kind} error effect is missing field {missing:?}")]
    IncompleteErrorFields {
        kind: FaultKind,
        missing: &'static str,
    },
}

/// Tag of a trial-scoped condition, used for the per-kind tally.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum IssueKind {
    MissingOrUnparseableStatusReport,
    MissingBenchmarkOutput,
    MissingTrialDirectory,
    MissingFaultDescriptor,
    MalformedFaultDescriptor,
    MissingDebugTrace,
    MalformedDebugTrace,
    IncompleteErrorFields,
}

impl IssueKind {
    /// Recovered conditions still produce a persisted record.
    pub fn is_recovered(self) -> bool {
        matches!(
            self,
            IssueKind::MissingOrUnparseableStatusReport
                | IssueKind::MissingBenchmarkOutput
                | IssueKind::IncompleteErrorFields
        )
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::MissingOrUnparseableStatusReport => "missing or unparseable status report",
            IssueKind::MissingBenchmarkOutput => "missing benchmark output",
            IssueKind::MissingTrialDirectory => "missing trial directory",
            IssueKind::MissingFaultDescriptor => "missing fault descriptor",
            IssueKind::MalformedFaultDescriptor => "malformed fault descriptor",
            IssueKind::MissingDebugTrace => "missing debug trace",
            IssueKind::MalformedDebugTrace => "malformed debug trace",
            IssueKind::IncompleteErrorFields => "incomplete error fields",
        };
        f.write_str(name)
    }
}

/// One trial-scoped condition together with the trial it happened in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialIssue {
    pub trial_index: u32,
    pub kind: IssueKind,
    pub detail: String,
}

impl TrialIssue {
    pub fn new(trial_index: u32, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            trial_index,
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for TrialIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trial {}: {} ({})", self.trial_index, self.kind, self.detail)
    }
}
