use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Tolerance used when validating exam-type weights against ceilings.
pub const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentType {
    pub id: String,
    pub subject_id: String,
    pub name: String,
    pub sort_order: i64,
    pub base_max_score: f64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamType {
    pub ordinal: i64,
    pub name: String,
    pub ceiling: f64,
    pub weight: f64,
}

/// Fixed table of exam types for a workspace, loaded once per request and
/// passed into the engine by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExamTypeRegistry {
    entries: Vec<ExamType>,
}

impl ExamTypeRegistry {
    pub fn new(mut entries: Vec<ExamType>) -> Self {
        entries.sort_by_key(|e| e.ordinal);
        Self { entries }
    }

    pub fn entries(&self) -> &[ExamType] {
        &self.entries
    }

    pub fn get(&self, ordinal: i64) -> Option<&ExamType> {
        self.entries.iter().find(|e| e.ordinal == ordinal)
    }

    /// Overall denominator for a student's subject percentage: the sum of
    /// every ceiling in the table. Never hardcoded by callers.
    pub fn total_possible(&self) -> f64 {
        self.entries.iter().map(|e| e.ceiling).sum()
    }

    /// A skewed table silently distorts every final percentage, so it is
    /// rejected before any computation uses it. The invariant that keeps
    /// `percentage_for_student` within [0, 100] is per-entry: the weight is
    /// the ceiling expressed as a fraction of 100 points.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.entries.is_empty() {
            return Err(EngineError::Configuration(
                "exam type table is empty".to_string(),
            ));
        }
        for e in &self.entries {
            if e.ceiling <= 0.0 {
                return Err(EngineError::Configuration(format!(
                    "exam type {} has non-positive ceiling {}",
                    e.name, e.ceiling
                )));
            }
            if e.weight <= 0.0 || e.weight > 1.0 {
                return Err(EngineError::Configuration(format!(
                    "exam type {} has weight {} outside (0, 1]",
                    e.name, e.weight
                )));
            }
            if (100.0 * e.weight - e.ceiling).abs() > WEIGHT_EPSILON {
                return Err(EngineError::Configuration(format!(
                    "exam type {} weight {} does not match ceiling {}",
                    e.name, e.weight, e.ceiling
                )));
            }
        }
        Ok(())
    }
}

/// One student's score for one component within one exam-type record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegreeComponentRecord {
    pub component_type_id: String,
    pub score: f64,
    pub scaled_max_score: f64,
}

/// Tagged score payload. The source system used a `usesComponents` flag over
/// loosely-typed objects; here the two modes are mutually exclusive by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ScoreValue {
    #[serde(rename_all = "camelCase")]
    Single { score: f64, max_score: f64 },
    #[serde(rename_all = "camelCase")]
    Components {
        components: Vec<DegreeComponentRecord>,
    },
}

/// A student's recorded result for one (subject, exam type) pair. A save
/// always replaces the whole record; there is no partial persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegreeRecord {
    pub subject_id: String,
    pub exam_type: i64,
    #[serde(flatten)]
    pub value: ScoreValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// All recorded degrees for one student. At most one record per
/// (subject, exam type): inserting again replaces the earlier record.
#[derive(Debug, Clone, Default)]
pub struct StudentDegreeSet {
    records: Vec<DegreeRecord>,
}

impl StudentDegreeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: DegreeRecord) {
        self.records
            .retain(|r| !(r.subject_id == record.subject_id && r.exam_type == record.exam_type));
        self.records.push(record);
    }

    pub fn records(&self) -> &[DegreeRecord] {
        &self.records
    }
}

/// Engine failure taxonomy. All variants signal bad input data, raised
/// synchronously and never retried; the caller fixes the configuration or
/// the submitted record and calls again.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed catalog or exam-type table (zero total base score, skewed
    /// weights, duplicate records for one exam type).
    Configuration(String),
    /// A component-mode record submitted with no component entries.
    EmptyRecord(String),
    /// A score above its scaled maximum, rejected instead of clamped.
    OutOfRange {
        component_type_id: Option<String>,
        score: f64,
        max: f64,
    },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "config_invalid",
            EngineError::EmptyRecord(_) => "empty_record",
            EngineError::OutOfRange { .. } => "out_of_range",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::OutOfRange {
                component_type_id,
                score,
                max,
            } => Some(json!({
                "componentTypeId": component_type_id,
                "score": score,
                "max": max,
            })),
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Configuration(msg) => write!(f, "{}", msg),
            EngineError::EmptyRecord(msg) => write!(f, "{}", msg),
            EngineError::OutOfRange { score, max, .. } => {
                write!(f, "score {} exceeds maximum {}", score, max)
            }
        }
    }
}

impl std::error::Error for EngineError {}
