pub mod aggregate;
pub mod benchmarks;
pub mod classifier;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod extractor;
pub mod fault_model;
pub mod generator;
pub mod store;

pub mod prelude {
    pub use crate::aggregate::{
        max_trial_index, AggregationSummary, Aggregator, ArtifactLayout, TrialProcessor,
        TrialReport,
    };
    pub use crate::benchmarks::{BenchmarkCatalog, ALL_BENCHMARKS};
    pub use crate::classifier::{
        BenchmarkResult, RunArtifactClassifier, SimEndReason, SimulationOutcome, StatusReport,
        StatusSections,
    };
    pub use crate::config::{Args, Command, Config};
    pub use crate::descriptor::{FaultDescriptor, FaultPayload};
    pub use crate::error::{CampaignError, ExtractError, IssueKind, TrialIssue};
    pub use crate::extractor::{extract, DebugEffect, DebugEffectExtractor, NOT_APPLICABLE};
    pub use crate::fault_model::{FaultKind, FieldRange, HardwareFaultModel};
    pub use crate::generator::{
        fault_dir_for, generate_campaign, CampaignRequest, CyclePolicy, FaultGenerator,
        GenerationSummary,
    };
    pub use crate::store::{table_name, RecordedEffect, ResultRecord, ResultStore};
}
