use crate::classifier::SimulationOutcome;
use crate::descriptor::{FaultDescriptor, FaultPayload};
use crate::error::Result;
use crate::extractor::DebugEffect;
use crate::fault_model::FaultKind;
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS RegisterFaults (
  ID INTEGER PRIMARY KEY,
  TrialIndex INTEGER NOT NULL,
  Type TEXT NOT NULL,
  Bench TEXT NOT NULL,
  Cycle INTEGER NOT NULL,
  CuID INTEGER NOT NULL,
  RegID INTEGER NOT NULL,
  Bit INTEGER NOT NULL,
  SimEnd TEXT NOT NULL,
  Outcome TEXT NOT NULL,
  TotalCycles INTEGER NOT NULL,
  GPUCycles INTEGER NOT NULL,
  GPUIPC REAL NOT NULL,
  Effect TEXT NOT NULL,
  EffectBit INTEGER,
  WG INTEGER,
  WF INTEGER,
  WI INTEGER,
  LoReg INTEGER,
  NeedsReview INTEGER NOT NULL DEFAULT 0,
  UNIQUE (TrialIndex, Type, Bench)
);

CREATE TABLE IF NOT EXISTS MemoryFaults (
  ID INTEGER PRIMARY KEY,
  TrialIndex INTEGER NOT NULL,
  Type TEXT NOT NULL,
  Bench TEXT NOT NULL,
  Cycle INTEGER NOT NULL,
  CuID INTEGER NOT NULL,
  ByteID INTEGER NOT NULL,
  Bit INTEGER NOT NULL,
  SimEnd TEXT NOT NULL,
  Outcome TEXT NOT NULL,
  TotalCycles INTEGER NOT NULL,
  GPUCycles INTEGER NOT NULL,
  GPUIPC REAL NOT NULL,
  Effect TEXT NOT NULL,
  EffectBit INTEGER,
  WG INTEGER,
  WF INTEGER,
  WI INTEGER,
  Byte INTEGER,
  NeedsReview INTEGER NOT NULL DEFAULT 0,
  UNIQUE (TrialIndex, Type, Bench)
);

CREATE TABLE IF NOT EXISTS MicroStateFaults (
  ID INTEGER PRIMARY KEY,
  TrialIndex INTEGER NOT NULL,
  Type TEXT NOT NULL,
  Bench TEXT NOT NULL,
  Cycle INTEGER NOT NULL,
  CuID INTEGER NOT NULL,
  StackID INTEGER NOT NULL,
  EntryID INTEGER NOT NULL,
  Bit INTEGER NOT NULL,
  SimEnd TEXT NOT NULL,
  Outcome TEXT NOT NULL,
  TotalCycles INTEGER NOT NULL,
  GPUCycles INTEGER NOT NULL,
  GPUIPC REAL NOT NULL,
  Effect TEXT NOT NULL,
  EffectBit INTEGER,
  WG INTEGER,
  WF INTEGER,
  WI INTEGER,
  NeedsReview INTEGER NOT NULL DEFAULT 0,
  UNIQUE (TrialIndex, Type, Bench)
);
";

const COMMON_COLUMNS: [&str; 5] = ["TrialIndex", "Type", "Bench", "Cycle", "CuID"];
const OUTCOME_COLUMNS: [&str; 10] = [
    "SimEnd",
    "Outcome",
    "TotalCycles",
    "GPUCycles",
    "GPUIPC",
    "Effect",
    "EffectBit",
    "WG",
    "WF",
    "WI",
];

/// Table of one fault kind.
struct TableLayout {
    name: &'static str,
    payload: &'static [&'static str],
    /// Kind specific effect column.
    effect_extra: Option<&'static str>,
}

fn layout(kind: FaultKind) -> &'static TableLayout {
    static REGISTER: TableLayout = TableLayout {
        name: "RegisterFaults",
        payload: &["RegID", "Bit"],
        effect_extra: Some("LoReg"),
    };
    static MEMORY: TableLayout = TableLayout {
        name: "MemoryFaults",
        payload: &["ByteID", "Bit"],
        effect_extra: Some("Byte"),
    };
    static MICRO_STATE: TableLayout = TableLayout {
        name: "MicroStateFaults",
        payload: &["StackID", "EntryID", "Bit"],
        effect_extra: None,
    };
    match kind {
        FaultKind::Register => &REGISTER,
        FaultKind::Memory => &MEMORY,
        FaultKind::MicroState => &MICRO_STATE,
    }
}

/// Name of the table holding faults of `kind`.
pub fn table_name(kind: FaultKind) -> &'static str {
    layout(kind).name
}

/// Effect as it is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedEffect {
    Observed(DebugEffect),
    /// `error` effect whose fields could not be recovered. Stored with empty
    /// effect columns and flagged for manual review.
    NeedsReview { effect_kind: String },
}

impl RecordedEffect {
    pub fn effect_kind(&self) -> &str {
        match self {
            RecordedEffect::Observed(effect) => &effect.effect_kind,
            RecordedEffect::NeedsReview { effect_kind } => effect_kind,
        }
    }

    fn field(&self, get: impl Fn(&DebugEffect) -> i64) -> Value {
        match self {
            RecordedEffect::Observed(effect) => Value::Integer(get(effect)),
            RecordedEffect::NeedsReview { .. } => Value::Null,
        }
    }
}

/// Unit of persistence, keyed by `(trial_index, kind, benchmark)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultRecord {
    pub trial_index: u32,
    pub benchmark: String,
    pub descriptor: FaultDescriptor,
    pub outcome: SimulationOutcome,
    pub effect: RecordedEffect,
}

impl ResultRecord {
    pub fn kind(&self) -> FaultKind {
        self.descriptor.kind()
    }

    fn values(&self) -> Vec<Value> {
        let descriptor = &self.descriptor;
        let mut values = vec![
            Value::from(self.trial_index),
            Value::from(self.kind().code().to_string()),
            Value::from(self.benchmark.clone()),
            integer(descriptor.cycle),
            Value::from(descriptor.compute_unit),
        ];
        match descriptor.payload {
            FaultPayload::Register { register_id, bit } => {
                values.extend([Value::from(register_id), Value::from(bit)])
            }
            FaultPayload::Memory { byte_offset, bit } => {
                values.extend([Value::from(byte_offset), Value::from(bit)])
            }
            FaultPayload::MicroState {
                stack_id,
                entry_id,
                bit,
            } => values.extend([
                Value::from(stack_id),
                Value::from(entry_id),
                Value::from(bit),
            ]),
        }

        let outcome = &self.outcome;
        let effect = &self.effect;
        values.extend([
            Value::from(outcome.sim_end.as_str().to_string()),
            Value::from(outcome.label().to_string()),
            integer(outcome.total_cycles),
            integer(outcome.gpu_cycles),
            Value::from(outcome.gpu_ipc),
            Value::from(effect.effect_kind().to_string()),
            effect.field(|e| e.bit),
            effect.field(|e| e.workgroup),
            effect.field(|e| e.wavefront),
            effect.field(|e| e.workitem),
        ]);
        match self.kind() {
            FaultKind::Register => values.push(effect.field(|e| e.low_register)),
            FaultKind::Memory => values.push(effect.field(|e| e.byte)),
            FaultKind::MicroState => {}
        }
        values.push(Value::from(matches!(
            effect,
            RecordedEffect::NeedsReview { .. }
        )));
        values
    }
}

fn integer(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn insert_statement(layout: &TableLayout) -> String {
    let columns: Vec<&str> = COMMON_COLUMNS
        .iter()
        .chain(layout.payload)
        .chain(OUTCOME_COLUMNS.iter())
        .chain(layout.effect_extra.iter())
        .copied()
        .chain(["NeedsReview"])
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({placeholders})",
        layout.name,
        columns.join(", ")
    )
}

/// Append-only SQLite store of trial results.
///
/// Every insert is autocommitted on its own, a failing trial never rolls
/// back the ones stored before it.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Open result store {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert-or-ignore one trial. Returns `false` when a row with the same
    /// `(trial_index, kind, benchmark)` key already existed.
    pub fn insert(&self, record: &ResultRecord) -> Result<bool> {
        let sql = insert_statement(layout(record.kind()));
        let changed = self.conn.execute(&sql, params_from_iter(record.values()))?;
        debug!(
            "Trial {} ({}) {}",
            record.trial_index,
            record.kind(),
            if changed == 1 { "stored" } else { "already present" }
        );
        Ok(changed == 1)
    }

    /// Combine the pieces of one trial into a record and insert it.
    pub fn record(
        &self,
        trial_index: u32,
        descriptor: &FaultDescriptor,
        outcome: &SimulationOutcome,
        effect: &RecordedEffect,
        benchmark: &str,
    ) -> Result<bool> {
        self.insert(&ResultRecord {
            trial_index,
            benchmark: benchmark.to_string(),
            descriptor: *descriptor,
            outcome: *outcome,
            effect: effect.clone(),
        })
    }

    pub fn row_count(&self, kind: FaultKind) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(kind));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn needs_review_count(&self, kind: FaultKind) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE NeedsReview = ?1",
            table_name(kind)
        );
        let count: i64 = self.conn.query_row(&sql, params![true], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}
