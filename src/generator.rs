use crate::benchmarks::{BenchmarkCatalog, ALL_BENCHMARKS};
use crate::descriptor::{FaultDescriptor, FaultPayload};
use crate::error::{CampaignError, Result};
use crate::fault_model::{FaultKind, HardwareFaultModel};
use log::{debug, info, warn};
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Interval the fault cycle is drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// `[0, cycle_max)`
    #[default]
    ZeroBased,
    /// `[1, cycle_max]`
    OneBased,
}

impl CyclePolicy {
    /// Draw a cycle. Either way the result never exceeds `cycle_max`.
    pub fn draw<R: Rng + ?Sized>(self, rng: &mut R, cycle_max: u64) -> Result<u64> {
        if cycle_max == 0 {
            return Err(CampaignError::InvalidCycleBound);
        }
        Ok(match self {
            CyclePolicy::ZeroBased => rng.gen_range(0..cycle_max),
            CyclePolicy::OneBased => rng.gen_range(1..=cycle_max),
        })
    }
}

/// Draws randomized fault descriptors from a [`HardwareFaultModel`].
pub struct FaultGenerator<'a, R> {
    model: &'a HardwareFaultModel,
    rng: R,
    policy: CyclePolicy,
}

impl<'a, R: Rng> FaultGenerator<'a, R> {
    pub fn new(model: &'a HardwareFaultModel, rng: R, policy: CyclePolicy) -> Self {
        Self { model, rng, policy }
    }

    /// Draw one descriptor for `trial_index`.
    ///
    /// The cycle follows the configured [`CyclePolicy`], the compute unit is
    /// uniform over `[0, max_compute_units]` and every payload field is
    /// uniform over its hardware bound.
    pub fn generate(
        &mut self,
        trial_index: u32,
        kind: FaultKind,
        cycle_max: u64,
        max_compute_units: u32,
    ) -> Result<FaultDescriptor> {
        let cycle = self.policy.draw(&mut self.rng, cycle_max)?;
        let compute_unit = self.rng.gen_range(0..=max_compute_units);
        let rng = &mut self.rng;
        let payload = match kind {
            FaultKind::Register => FaultPayload::Register {
                register_id: self.model.register.register_id.sample(rng),
                bit: self.model.register.bit.sample(rng),
            },
            FaultKind::Memory => FaultPayload::Memory {
                byte_offset: self.model.memory.byte_offset.sample(rng),
                bit: self.model.memory.bit.sample(rng),
            },
            FaultKind::MicroState => FaultPayload::MicroState {
                stack_id: self.model.micro_state.stack_id.sample(rng),
                entry_id: self.model.micro_state.entry_id.sample(rng),
                bit: self.model.micro_state.bit.sample(rng),
            },
        };
        let descriptor = FaultDescriptor {
            cycle,
            compute_unit,
            payload,
        };
        debug!("Trial {trial_index}: {descriptor}");
        Ok(descriptor)
    }

    /// Same as [`generate`](Self::generate) for a raw fault type code.
    pub fn generate_code(
        &mut self,
        trial_index: u32,
        code: &str,
        cycle_max: u64,
        max_compute_units: u32,
    ) -> Result<FaultDescriptor> {
        let kind = FaultKind::from_code(code)?;
        self.generate(trial_index, kind, cycle_max, max_compute_units)
    }

    /// Generate a descriptor and write it to `<fault_dir>/<trial_index>`.
    pub fn emit(
        &mut self,
        fault_dir: &Path,
        trial_index: u32,
        kind: FaultKind,
        cycle_max: u64,
        max_compute_units: u32,
    ) -> Result<FaultDescriptor> {
        let descriptor = self.generate(trial_index, kind, cycle_max, max_compute_units)?;
        descriptor.write_to(fault_dir, trial_index)?;
        Ok(descriptor)
    }
}

/// What to generate for one invocation of the campaign.
#[derive(Clone, Debug)]
pub struct CampaignRequest {
    /// Benchmark name or `all`.
    pub benchmark: String,
    pub kind: FaultKind,
    pub trials: u32,
    /// Root under which `<benchmark>_faults` directories are created.
    pub faults_root: PathBuf,
    /// Overrides the catalog bound for every selected benchmark.
    pub cycle_max: Option<u64>,
    pub max_compute_units: u32,
}

/// Descriptors written for one benchmark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedBatch {
    pub benchmark: String,
    pub fault_dir: PathBuf,
    pub trials: u32,
    pub cycle_max: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub batches: Vec<GeneratedBatch>,
    /// Benchmarks without a known cycle bound.
    pub skipped: Vec<String>,
}

/// Directory holding the descriptors of `benchmark`.
pub fn fault_dir_for(faults_root: &Path, benchmark: &str) -> PathBuf {
    faults_root.join(format!("{benchmark}_faults"))
}

/// Write trials `1..=request.trials` for every selected benchmark.
///
/// With `all`, benchmarks lacking a cycle bound are skipped. A single named
/// benchmark without a bound is an error, since the generated cycles could
/// point past the end of its run.
pub fn generate_campaign<R: Rng>(
    generator: &mut FaultGenerator<'_, R>,
    catalog: &BenchmarkCatalog,
    request: &CampaignRequest,
) -> Result<GenerationSummary> {
    let mut summary = GenerationSummary::default();

    for (benchmark, bound) in catalog.select(&request.benchmark)? {
        let cycle_max = match request.cycle_max.or(bound) {
            Some(cycle_max) => cycle_max,
            None if request.benchmark == ALL_BENCHMARKS => {
                warn!("No cycle bound known for {benchmark}, skipped");
                summary.skipped.push(benchmark);
                continue;
            }
            None => {
                return Err(CampaignError::Config(format!(
                    "no cycle bound known for {benchmark}, pass --cycle-max"
                )))
            }
        };

        let fault_dir = fault_dir_for(&request.faults_root, &benchmark);
        info!(
            "Benchmark: {benchmark} - faults: {} - fault dir: {} - fault type: {}",
            request.trials,
            fault_dir.display(),
            request.kind
        );
        for trial_index in 1..=request.trials {
            generator.emit(
                &fault_dir,
                trial_index,
                request.kind,
                cycle_max,
                request.max_compute_units,
            )?;
        }
        summary.batches.push(GeneratedBatch {
            benchmark,
            fault_dir,
            trials: request.trials,
            cycle_max,
        });
    }
    Ok(summary)
}
