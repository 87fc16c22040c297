use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Flat amount owed by every client before per-procedure fees and note
/// adjustments. Business rule inherited from the sheet, not configurable.
pub const BASE_FEE: f64 = 26000.0;

/// Scalar sheet columns that are editable alongside the tick grid. Save
/// payloads and the collector address these by header name, same as the
/// procedure columns.
pub const SCALAR_FIELDS: &[&str] = &[
    "Name",
    "Email",
    "University",
    "Phone",
    "Address",
    "Start Date",
    "Received",
    "Notes",
];

pub fn is_scalar_field(name: &str) -> bool {
    SCALAR_FIELDS.iter().any(|f| *f == name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleMode {
    TriState,
    Checkbox,
}

impl ToggleMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tristate" => Some(Self::TriState),
            "checkbox" => Some(Self::Checkbox),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TriState => "tristate",
            Self::Checkbox => "checkbox",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    False,
    True,
    Paid,
}

impl TickState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::False => "FALSE",
            Self::True => "TRUE",
            Self::Paid => "PAID",
        }
    }

    /// Lenient normalization for stored cells. Tri-state reads the discrete
    /// value; checkbox maps checked-equivalents to TRUE. Anything
    /// unrecognized reads as FALSE, matching how the sheet treated blanks.
    pub fn from_signal(raw: &str, mode: ToggleMode) -> Self {
        let t = raw.trim();
        match mode {
            ToggleMode::TriState => {
                if t.eq_ignore_ascii_case("PAID") {
                    Self::Paid
                } else if t.eq_ignore_ascii_case("TRUE") || t == "1" {
                    Self::True
                } else {
                    Self::False
                }
            }
            ToggleMode::Checkbox => {
                if t.eq_ignore_ascii_case("TRUE") || t == "1" {
                    Self::True
                } else {
                    Self::False
                }
            }
        }
    }

    /// Strict parse for writes. PAID is outside the checkbox domain.
    pub fn parse(raw: &str, mode: ToggleMode) -> Result<Self, CalcError> {
        let t = raw.trim();
        let state = if t.eq_ignore_ascii_case("PAID") {
            Self::Paid
        } else if t.eq_ignore_ascii_case("TRUE") {
            Self::True
        } else if t.eq_ignore_ascii_case("FALSE") {
            Self::False
        } else {
            return Err(CalcError::new(
                "bad_params",
                "status must be one of: FALSE, TRUE, PAID",
            )
            .with_details(json!({ "value": raw })));
        };
        if state == Self::Paid && mode == ToggleMode::Checkbox {
            return Err(CalcError::new(
                "bad_params",
                "PAID is not valid for a checkbox column",
            )
            .with_details(json!({ "value": raw })));
        }
        Ok(state)
    }

    /// Tri-state cycle: PAID -> TRUE -> FALSE -> PAID. Checkbox columns
    /// flip between TRUE and FALSE.
    pub fn cycled(self, mode: ToggleMode) -> Self {
        match mode {
            ToggleMode::TriState => match self {
                Self::Paid => Self::True,
                Self::True => Self::False,
                Self::False => Self::Paid,
            },
            ToggleMode::Checkbox => match self {
                Self::True => Self::False,
                _ => Self::True,
            },
        }
    }

    /// A procedure contributes its fee while done or paid.
    pub fn is_active(self) -> bool {
        matches!(self, Self::True | Self::Paid)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub mode: ToggleMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

static EXTRA_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"EXTRA:(-?\d+)").expect("static pattern"));

static NUMBER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)").expect("static pattern"));

/// First `EXTRA:<signed int>` marker embedded in a note, if any. Malformed
/// or absent markers contribute nothing; only the first match counts.
pub fn note_adjustment(note: &str) -> Option<i64> {
    EXTRA_MARKER
        .captures(note)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// The structured adjustment column wins when present; legacy notes still
/// honor their embedded marker.
pub fn effective_adjustment(structured: Option<i64>, note: &str) -> i64 {
    structured
        .or_else(|| note_adjustment(note))
        .unwrap_or(0)
}

/// Leading-prefix numeric parse with parseFloat semantics: "12000 EGP"
/// reads as 12000, junk reads as 0.
pub fn parse_amount(raw: &str) -> f64 {
    NUMBER_PREFIX
        .find(raw.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Per-procedure fee amounts, keyed by column name. Lives for the daemon
/// session; persisted only when a save explicitly carries it.
#[derive(Debug, Clone, Default)]
pub struct FeeTable {
    amounts: BTreeMap<String, f64>,
}

impl FeeTable {
    pub fn resolve(&self, column: &str) -> f64 {
        self.amounts.get(column).copied().unwrap_or(0.0)
    }

    /// Accepts a number or a numeric string; invalid input stores 0,
    /// negatives clamp to 0. Returns the amount actually stored.
    pub fn set(&mut self, column: &str, raw: &serde_json::Value) -> f64 {
        let amount = match raw {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
            serde_json::Value::String(s) => parse_amount(s),
            _ => 0.0,
        };
        let amount = if amount.is_finite() { amount.max(0.0) } else { 0.0 };
        self.amounts.insert(column.to_string(), amount);
        amount
    }

    pub fn set_amount(&mut self, column: &str, amount: f64) {
        self.amounts.insert(column.to_string(), amount.max(0.0));
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.amounts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceStyle {
    Due,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowTotals {
    pub required_total: f64,
    pub remaining: f64,
    pub balance: BalanceStyle,
}

/// requiredTotal = BASE_FEE + fees of active procedures + adjustment;
/// remaining = requiredTotal - received. Pure over its inputs, so
/// recomputing with unchanged inputs yields identical outputs.
pub fn row_totals<'a, I>(
    statuses: I,
    fees: &FeeTable,
    adjustment: i64,
    received_raw: &str,
) -> RowTotals
where
    I: IntoIterator<Item = (&'a str, TickState)>,
{
    let mut additionals = 0.0;
    for (column, state) in statuses {
        if state.is_active() {
            additionals += fees.resolve(column);
        }
    }
    additionals += adjustment as f64;

    let required_total = BASE_FEE + additionals;
    let remaining = required_total - parse_amount(received_raw);
    let balance = if remaining > 0.0 {
        BalanceStyle::Due
    } else {
        BalanceStyle::Settled
    };

    RowTotals {
        required_total,
        remaining,
        balance,
    }
}

/// One editable roster row as the collector sees it: scalar fields by
/// header name plus the current status of every procedure column.
#[derive(Debug, Clone, Default)]
pub struct RowSnapshot {
    pub row_index: i64,
    pub fields: BTreeMap<String, String>,
    pub ticks: BTreeMap<String, TickState>,
}

/// Sparse update map: row index -> column -> raw value. Saves carry the
/// full snapshot of every editable row, not a diff; the backend applies it
/// idempotently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    rows: BTreeMap<i64, BTreeMap<String, String>>,
}

impl ChangeSet {
    /// Full snapshot of every given row. A row with at least one editable
    /// control is never omitted, even when nothing changed.
    pub fn collect<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a RowSnapshot>,
    {
        let mut out = BTreeMap::new();
        for row in rows {
            let mut entry: BTreeMap<String, String> = row.fields.clone();
            for (column, state) in &row.ticks {
                entry.insert(column.clone(), state.as_str().to_string());
            }
            out.insert(row.row_index, entry);
        }
        Self { rows: out }
    }

    /// Validates and normalizes an incoming save payload:
    /// `{ "<rowIndex>": { "<column>": value } }`. Status values are parsed
    /// strictly against the column's toggle mode; scalar fields keep their
    /// raw edited value. Any unknown column rejects the whole payload.
    pub fn parse(raw: &serde_json::Value, columns: &[ColumnDef]) -> Result<Self, CalcError> {
        let Some(obj) = raw.as_object() else {
            return Err(CalcError::new("bad_params", "updates must be an object"));
        };

        let mut rows = BTreeMap::new();
        for (row_key, cells) in obj {
            let row_index = row_key.trim().parse::<i64>().map_err(|_| {
                CalcError::new("bad_params", "row keys must be integers")
                    .with_details(json!({ "row": row_key }))
            })?;
            if row_index < 0 {
                return Err(CalcError::new("bad_params", "row index must be >= 0")
                    .with_details(json!({ "row": row_index })));
            }

            let Some(cell_obj) = cells.as_object() else {
                return Err(CalcError::new("bad_params", "row entry must be an object")
                    .with_details(json!({ "row": row_index })));
            };

            let mut entry = BTreeMap::new();
            for (column, value) in cell_obj {
                let raw_value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => {
                        if *b {
                            "TRUE".to_string()
                        } else {
                            "FALSE".to_string()
                        }
                    }
                    _ => {
                        return Err(CalcError::new(
                            "bad_params",
                            "cell values must be strings, numbers, or booleans",
                        )
                        .with_details(json!({ "row": row_index, "column": column })))
                    }
                };

                if let Some(def) = columns.iter().find(|c| c.name == *column) {
                    let state = TickState::parse(&raw_value, def.mode).map_err(|e| {
                        e.with_details(json!({ "row": row_index, "column": column }))
                    })?;
                    entry.insert(column.clone(), state.as_str().to_string());
                } else if is_scalar_field(column) {
                    entry.insert(column.clone(), raw_value);
                } else {
                    return Err(CalcError::new("bad_params", "unknown column")
                        .with_details(json!({ "row": row_index, "column": column })));
                }
            }
            rows.insert(row_index, entry);
        }

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &BTreeMap<i64, BTreeMap<String, String>> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (row_index, cells) in &self.rows {
            let mut row_obj = serde_json::Map::new();
            for (column, value) in cells {
                row_obj.insert(column.clone(), json!(value));
            }
            out.insert(row_index.to_string(), serde_json::Value::Object(row_obj));
        }
        serde_json::Value::Object(out)
    }
}
