use crate::error::ExtractError;
use crate::fault_model::FaultKind;
use log::debug;
use regex::Regex;

/// Stored for fields which do not apply to a trial.
pub const NOT_APPLICABLE: i64 = -1;

/// Effect token which carries further structured fields.
pub const ERROR_EFFECT: &str = "error";

/// Observed hardware level effect of one trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugEffect {
    pub effect_kind: String,
    pub bit: i64,
    pub workgroup: i64,
    pub wavefront: i64,
    pub workitem: i64,
    /// Register faults only.
    pub low_register: i64,
    /// Memory faults only.
    pub byte: i64,
}

impl DebugEffect {
    /// Effect without structured fields.
    pub fn bare(effect_kind: impl Into<String>) -> Self {
        Self {
            effect_kind: effect_kind.into(),
            bit: NOT_APPLICABLE,
            workgroup: NOT_APPLICABLE,
            wavefront: NOT_APPLICABLE,
            workitem: NOT_APPLICABLE,
            low_register: NOT_APPLICABLE,
            byte: NOT_APPLICABLE,
        }
    }

    pub fn is_error(&self) -> bool {
        self.effect_kind == ERROR_EFFECT
    }
}

/// `key=<int>` fields of an error trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceField {
    Bit,
    Workgroup,
    Wavefront,
    Workitem,
    LowRegister,
    Byte,
}

impl TraceField {
    const ALL: [TraceField; 6] = [
        TraceField::Bit,
        TraceField::Workgroup,
        TraceField::Wavefront,
        TraceField::Workitem,
        TraceField::LowRegister,
        TraceField::Byte,
    ];

    pub fn key(self) -> &'static str {
        match self {
            TraceField::Bit => "bit",
            TraceField::Workgroup => "wg",
            TraceField::Wavefront => "wf",
            TraceField::Workitem => "wi",
            TraceField::LowRegister => "lo_reg",
            TraceField::Byte => "byte",
        }
    }

    /// Fields an `error` trace carries for `kind`, in trace order.
    pub fn layout(kind: FaultKind) -> &'static [TraceField] {
        match kind {
            FaultKind::Register => &[
                TraceField::Bit,
                TraceField::Workgroup,
                TraceField::Wavefront,
                TraceField::Workitem,
                TraceField::LowRegister,
            ],
            FaultKind::Memory => &[TraceField::Byte, TraceField::Bit, TraceField::Workgroup],
            FaultKind::MicroState => &[
                TraceField::Bit,
                TraceField::Workgroup,
                TraceField::Wavefront,
                TraceField::Workitem,
            ],
        }
    }

    fn apply(self, effect: &mut DebugEffect, value: i64) {
        match self {
            TraceField::Bit => effect.bit = value,
            TraceField::Workgroup => effect.workgroup = value,
            TraceField::Wavefront => effect.wavefront = value,
            TraceField::Workitem => effect.workitem = value,
            TraceField::LowRegister => effect.low_register = value,
            TraceField::Byte => effect.byte = value,
        }
    }
}

/// Tolerant scanner over free-form simulator debug traces.
///
/// Patterns are compiled once, reuse one extractor for a whole batch.
pub struct DebugEffectExtractor {
    effect: Regex,
    fields: Vec<(TraceField, Regex)>,
}

impl Default for DebugEffectExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugEffectExtractor {
    pub fn new() -> Self {
        let effect =
            Regex::new(r#"\beffect=["']?(\w+)"#).expect("Failed to compile effect pattern");
        let fields = TraceField::ALL
            .iter()
            .map(|field| {
                let pattern = format!(r"\b{}=(\d+)", field.key());
                let regex = Regex::new(&pattern).expect("Failed to compile field pattern");
                (*field, regex)
            })
            .collect();
        Self { effect, fields }
    }

    /// First `effect=` token of the trace, `None` when there is no marker.
    pub fn effect_kind<'t>(&self, trace: &'t str) -> Option<&'t str> {
        self.effect
            .captures(trace)
            .and_then(|caps| caps.get(1))
            .map(|token| token.as_str())
    }

    /// Look the fields up one after another, each one after the previous.
    ///
    /// A field without a match reads as `None`. The following fields are
    /// still looked up from the last matched position.
    pub fn scan_fields(&self, trace: &str, order: &[TraceField]) -> Vec<(TraceField, Option<i64>)> {
        let mut cursor = 0;
        order
            .iter()
            .map(|field| {
                let found = self
                    .pattern(*field)
                    .captures_at(trace, cursor)
                    .and_then(|caps| {
                        let value = caps.get(1)?;
                        let parsed = value.as_str().parse::<i64>().ok()?;
                        cursor = value.end();
                        Some(parsed)
                    });
                (*field, found)
            })
            .collect()
    }

    /// Extract the effect of a trial.
    ///
    /// Non-`error` effects carry no fields and are returned with every
    /// numeric field set to [`NOT_APPLICABLE`]. For `error`, every field of
    /// the kind's layout must be present.
    pub fn extract(&self, trace: &str, kind: FaultKind) -> Result<DebugEffect, ExtractError> {
        let effect_kind = self
            .effect_kind(trace)
            .ok_or(ExtractError::MalformedDebugTrace)?;
        let mut effect = DebugEffect::bare(effect_kind);
        if !effect.is_error() {
            debug!("Effect {effect_kind}, no fields");
            return Ok(effect);
        }

        for (field, value) in self.scan_fields(trace, TraceField::layout(kind)) {
            match value {
                Some(value) => field.apply(&mut effect, value),
                None => {
                    return Err(ExtractError::IncompleteErrorFields {
                        kind,
                        missing: field.key(),
                    })
                }
            }
        }
        Ok(effect)
    }

    fn pattern(&self, field: TraceField) -> &Regex {
        // Built in `TraceField::ALL` order
        &self.fields[field as usize].1
    }
}

/// One-off extraction, compiles the patterns on every call.
pub fn extract(trace: &str, kind: FaultKind) -> Result<DebugEffect, ExtractError> {
    DebugEffectExtractor::new().extract(trace, kind)
}
