use crate::error::{CampaignError, Result};
use crate::fault_model::{FaultKind, HardwareFaultModel};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Fault kind specific part of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultPayload {
    Register { register_id: u32, bit: u32 },
    Memory { byte_offset: u32, bit: u32 },
    MicroState { stack_id: u32, entry_id: u32, bit: u32 },
}

impl FaultPayload {
    pub fn kind(&self) -> FaultKind {
        match self {
            FaultPayload::Register { .. } => FaultKind::Register,
            FaultPayload::Memory { .. } => FaultKind::Memory,
            FaultPayload::MicroState { .. } => FaultKind::MicroState,
        }
    }

    /// Targeted bit, common to all kinds.
    pub fn bit(&self) -> u32 {
        match *self {
            FaultPayload::Register { bit, .. }
            | FaultPayload::Memory { bit, .. }
            | FaultPayload::MicroState { bit, .. } => bit,
        }
    }
}

/// One randomized fault specification for one trial.
///
/// Written once by the generator as a single line, read back verbatim by the
/// aggregation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FaultDescriptor {
    /// Simulated clock tick at which the fault fires.
    pub cycle: u64,
    pub compute_unit: u32,
    pub payload: FaultPayload,
}

impl FaultDescriptor {
    pub fn kind(&self) -> FaultKind {
        self.payload.kind()
    }

    /// Check the payload against the hardware bounds.
    pub fn within(&self, model: &HardwareFaultModel) -> bool {
        match self.payload {
            FaultPayload::Register { register_id, bit } => {
                model.register.register_id.contains(register_id)
                    && model.register.bit.contains(bit)
            }
            FaultPayload::Memory { byte_offset, bit } => {
                model.memory.byte_offset.contains(byte_offset) && model.memory.bit.contains(bit)
            }
            FaultPayload::MicroState {
                stack_id,
                entry_id,
                bit,
            } => {
                model.micro_state.stack_id.contains(stack_id)
                    && model.micro_state.entry_id.contains(entry_id)
                    && model.micro_state.bit.contains(bit)
            }
        }
    }

    /// Path of the descriptor file for `trial_index` inside `dir`.
    pub fn path_in(dir: &Path, trial_index: u32) -> PathBuf {
        dir.join(trial_index.to_string())
    }

    /// Write the descriptor line to `<dir>/<trial_index>`, replacing any
    /// previous file. The directory is created when missing.
    pub fn write_to(&self, dir: &Path, trial_index: u32) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| CampaignError::io(dir, e))?;
        let path = Self::path_in(dir, trial_index);
        fs::write(&path, format!("{self}\n")).map_err(|e| CampaignError::io(&path, e))?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CampaignError::io(path, e))?;
        content.parse()
    }
}

impl fmt::Display for FaultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.cycle, self.kind().code(), self.compute_unit)?;
        match self.payload {
            FaultPayload::Register { register_id, bit } => write!(f, " {register_id} {bit}"),
            FaultPayload::Memory { byte_offset, bit } => write!(f, " {byte_offset} {bit}"),
            FaultPayload::MicroState {
                stack_id,
                entry_id,
                bit,
            } => write!(f, " {stack_id} {entry_id} {bit}"),
        }
    }
}

impl FromStr for FaultDescriptor {
    type Err = CampaignError;

    fn from_str(line: &str) -> Result<Self> {
        let malformed = |reason: &str| CampaignError::MalformedDescriptor {
            line: line.trim_end().to_string(),
            reason: reason.to_string(),
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(malformed("expected at least cycle, kind and compute unit"));
        }
        let number = |index: usize, name: &str| -> Result<u64> {
            tokens[index]
                .parse::<u64>()
                .map_err(|_| malformed(&format!("{name} is not a non-negative integer")))
        };
        let field = |index: usize, name: &str| -> Result<u32> {
            tokens[index]
                .parse::<u32>()
                .map_err(|_| malformed(&format!("{name} is not a non-negative integer")))
        };

        let kind = FaultKind::from_code(tokens[1])?;
        let expected = match kind {
            FaultKind::Register | FaultKind::Memory => 5,
            FaultKind::MicroState => 6,
        };
        if tokens.len() != expected {
            return Err(malformed(&format!(
                "{kind} descriptor needs {expected} fields, found {}",
                tokens.len()
            )));
        }

        let payload = match kind {
            FaultKind::Register => FaultPayload::Register {
                register_id: field(3, "register id")?,
                bit: field(4, "bit")?,
            },
            FaultKind::Memory => FaultPayload::Memory {
                byte_offset: field(3, "byte offset")?,
                bit: field(4, "bit")?,
            },
            FaultKind::MicroState => FaultPayload::MicroState {
                stack_id: field(3, "stack id")?,
                entry_id: field(4, "entry id")?,
                bit: field(5, "bit")?,
            },
        };

        Ok(Self {
            cycle: number(0, "cycle")?,
            compute_unit: field(2, "compute unit")?,
            payload,
        })
    }
}
