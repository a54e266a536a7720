use serde::Serialize;

use crate::model::{DegreeRecord, EngineError, ExamType, ExamTypeRegistry, ScoreValue};
use crate::normalize::round2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTotal {
    pub achieved: f64,
    pub possible: f64,
}

/// Achieved/possible points for one degree record. Component mode sums the
/// breakdown; single mode passes the recorded score and maximum through.
pub fn component_total(record: &DegreeRecord) -> Result<ComponentTotal, EngineError> {
    match &record.value {
        ScoreValue::Single { score, max_score } => Ok(ComponentTotal {
            achieved: *score,
            possible: *max_score,
        }),
        ScoreValue::Components { components } => {
            if components.is_empty() {
                return Err(EngineError::EmptyRecord(format!(
                    "component record for subject {} exam type {} has no entries",
                    record.subject_id, record.exam_type
                )));
            }
            let achieved = components.iter().map(|c| c.score).sum();
            let possible = components.iter().map(|c| c.scaled_max_score).sum();
            Ok(ComponentTotal { achieved, possible })
        }
    }
}

/// Points this record contributes toward the student's overall subject mark.
///
/// Component records contribute `percentage * weight`; single-score records
/// contribute `score * weight` with the raw score taken as already
/// pre-normalized. The asymmetry matches the stored data this daemon has to
/// stay compatible with.
pub fn weighted_contribution(
    record: &DegreeRecord,
    exam_type: &ExamType,
) -> Result<f64, EngineError> {
    match &record.value {
        ScoreValue::Single { score, .. } => Ok(round2(score * exam_type.weight)),
        ScoreValue::Components { .. } => {
            let total = component_total(record)?;
            let percentage = if total.possible > 0.0 {
                100.0 * total.achieved / total.possible
            } else {
                0.0
            };
            Ok(round2(percentage * exam_type.weight))
        }
    }
}

fn check_one_record_per_exam_type(records: &[DegreeRecord]) -> Result<(), EngineError> {
    for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            if a.subject_id == b.subject_id && a.exam_type == b.exam_type {
                return Err(EngineError::Configuration(format!(
                    "duplicate degree record for subject {} exam type {}",
                    a.subject_id, a.exam_type
                )));
            }
        }
    }
    Ok(())
}

/// Sum of weighted contributions over every record present for one
/// student/subject. Missing exam types contribute nothing.
pub fn subject_mark_for_student(
    records: &[DegreeRecord],
    registry: &ExamTypeRegistry,
) -> Result<f64, EngineError> {
    registry.validate()?;
    check_one_record_per_exam_type(records)?;

    let mut mark = 0.0;
    for record in records {
        let Some(exam_type) = registry.get(record.exam_type) else {
            return Err(EngineError::Configuration(format!(
                "unknown exam type ordinal {}",
                record.exam_type
            )));
        };
        mark += weighted_contribution(record, exam_type)?;
    }
    Ok(round2(mark))
}

/// Subject mark expressed against the registry's full ceiling sum.
pub fn percentage_for_student(
    records: &[DegreeRecord],
    registry: &ExamTypeRegistry,
) -> Result<f64, EngineError> {
    let mark = subject_mark_for_student(records, registry)?;
    let total_possible = registry.total_possible();
    if total_possible <= 0.0 {
        return Err(EngineError::Configuration(
            "exam type ceilings sum to zero".to_string(),
        ));
    }
    Ok(round2(100.0 * mark / total_possible))
}

/// Arithmetic mean of student percentages, rounded to a whole number for
/// display. An empty class averages to 0.
pub fn class_average(percentages: &[f64]) -> i64 {
    if percentages.is_empty() {
        return 0;
    }
    let sum: f64 = percentages.iter().sum();
    (sum / percentages.len() as f64).round() as i64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamTypeBreakdown {
    pub exam_type: i64,
    pub name: String,
    pub achieved: f64,
    pub possible: f64,
    pub percentage: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject_id: String,
    pub rows: Vec<ExamTypeBreakdown>,
    pub subject_mark: f64,
    pub percentage: f64,
    pub total_possible: f64,
}

/// Display model for one student's subject: a breakdown row per recorded
/// exam type plus the rolled-up mark and percentage.
pub fn subject_summary(
    subject_id: &str,
    records: &[DegreeRecord],
    registry: &ExamTypeRegistry,
) -> Result<SubjectSummary, EngineError> {
    registry.validate()?;
    check_one_record_per_exam_type(records)?;

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let Some(exam_type) = registry.get(record.exam_type) else {
            return Err(EngineError::Configuration(format!(
                "unknown exam type ordinal {}",
                record.exam_type
            )));
        };
        let total = component_total(record)?;
        let percentage = if total.possible > 0.0 {
            round2(100.0 * total.achieved / total.possible)
        } else {
            0.0
        };
        rows.push(ExamTypeBreakdown {
            exam_type: exam_type.ordinal,
            name: exam_type.name.clone(),
            achieved: total.achieved,
            possible: total.possible,
            percentage,
            contribution: weighted_contribution(record, exam_type)?,
        });
    }
    rows.sort_by_key(|r| r.exam_type);

    let subject_mark = subject_mark_for_student(records, registry)?;
    let total_possible = registry.total_possible();
    let percentage = percentage_for_student(records, registry)?;

    Ok(SubjectSummary {
        subject_id: subject_id.to_string(),
        rows,
        subject_mark,
        percentage,
        total_possible,
    })
}
