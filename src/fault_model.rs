use crate::error::{CampaignError, Result};
use clap::{builder::PossibleValue, ValueEnum};
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Simulated hardware state a fault can corrupt.
pub enum FaultKind {
    /// Vector register file.
    Register,
    /// Compute unit local memory.
    Memory,
    /// Architected micro-state (wavefront control stack masks).
    MicroState,
}

impl FaultKind {
    pub const ALL: [FaultKind; 3] = [FaultKind::Register, FaultKind::Memory, FaultKind::MicroState];

    /// Short code used in descriptor lines and on the command line.
    pub fn code(self) -> &'static str {
        match self {
            FaultKind::Register => "reg",
            FaultKind::Memory => "mem",
            FaultKind::MicroState => "ams",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "reg" => Ok(FaultKind::Register),
            "mem" => Ok(FaultKind::Memory),
            "ams" => Ok(FaultKind::MicroState),
            other => Err(CampaignError::UnsupportedFaultType(other.to_string())),
        }
    }
}

impl FromStr for FaultKind {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_code(s)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl ValueEnum for FaultKind {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        Some(match self {
            FaultKind::Register => PossibleValue::new("reg").help("register file bit flip"),
            FaultKind::Memory => PossibleValue::new("mem").help("local memory bit flip"),
            FaultKind::MicroState => {
                PossibleValue::new("ams").help("architected micro-state bit flip")
            }
        })
    }
}

/// Inclusive range of valid values for one descriptor field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct FieldRange {
    pub min: u32,
    pub max: u32,
}

impl FieldRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Uniform draw over `[min, max]`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        rng.gen_range(self.min..=self.max)
    }

    fn validate(&self, field: &'static str) -> Result<()> {
        if self.min > self.max {
            return Err(CampaignError::InvalidRange {
                field,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegisterBounds {
    /// Addressable registers in the register file.
    pub register_id: FieldRange,
    /// Register word width.
    pub bit: FieldRange,
}

impl Default for RegisterBounds {
    fn default() -> Self {
        Self {
            register_id: FieldRange::new(0, 16383),
            bit: FieldRange::new(0, 127),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryBounds {
    /// Local memory size in bytes.
    pub byte_offset: FieldRange,
    pub bit: FieldRange,
}

impl Default for MemoryBounds {
    fn default() -> Self {
        Self {
            byte_offset: FieldRange::new(0, 32767),
            bit: FieldRange::new(0, 7),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MicroStateBounds {
    /// Max wavefronts per compute unit.
    pub stack_id: FieldRange,
    /// Stack entries per wavefront.
    pub entry_id: FieldRange,
    /// Wavefront width.
    pub bit: FieldRange,
}

impl Default for MicroStateBounds {
    fn default() -> Self {
        Self {
            stack_id: FieldRange::new(0, 31),
            entry_id: FieldRange::new(0, 31),
            bit: FieldRange::new(0, 63),
        }
    }
}

/// Per fault kind bounds of the simulated hardware resources.
///
/// Loaded once (defaults, optionally overridden from the config file) and
/// handed to the generator by reference. Never mutated afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HardwareFaultModel {
    pub register: RegisterBounds,
    pub memory: MemoryBounds,
    pub micro_state: MicroStateBounds,
}

impl HardwareFaultModel {
    /// Check every range is non-empty.
    pub fn validate(&self) -> Result<()> {
        self.register.register_id.validate("register.register_id")?;
        self.register.bit.validate("register.bit")?;
        self.memory.byte_offset.validate("memory.byte_offset")?;
        self.memory.bit.validate("memory.bit")?;
        self.micro_state.stack_id.validate("micro_state.stack_id")?;
        self.micro_state.entry_id.validate("micro_state.entry_id")?;
        self.micro_state.bit.validate("micro_state.bit")
    }
}
