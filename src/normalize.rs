use std::collections::HashMap;

use crate::model::{ComponentType, DegreeComponentRecord, EngineError};

/// 2-decimal rounding applied to every scaled maximum and rescaled score.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Scale each active component's base maximum so the maxima sum to the exam
/// type's ceiling. Rounding each entry independently can drift the sum by a
/// cent per component; that drift is accepted, not corrected.
pub fn compute_scaled_maxima(
    components: &[ComponentType],
    exam_type_ceiling: f64,
) -> Result<HashMap<String, f64>, EngineError> {
    let active: Vec<&ComponentType> = components.iter().filter(|c| c.is_active).collect();
    let total_base: f64 = active.iter().map(|c| c.base_max_score).sum();
    if total_base <= 0.0 {
        return Err(EngineError::Configuration(format!(
            "component base maxima sum to {}; normalization is undefined",
            total_base
        )));
    }

    let factor = exam_type_ceiling / total_base;
    let mut scaled = HashMap::with_capacity(active.len());
    for c in active {
        scaled.insert(c.id.clone(), round2(c.base_max_score * factor));
    }
    Ok(scaled)
}

/// Carry a previously entered score to a new maximum, preserving the ratio
/// rather than the raw points. For `old_score` within `[0, old_max]` the
/// result stays within `[0, new_max]`.
pub fn rescale_recorded_score(old_score: f64, old_max: f64, new_max: f64) -> f64 {
    let ratio = if old_max > 0.0 {
        old_score / old_max
    } else {
        0.0
    };
    round2(ratio * new_max)
}

/// Build the full editable row set for one (subject, exam type) sheet:
/// one record per active component in catalog order, prefilled from
/// `existing` where a matching component record is found (rescaled to the
/// new maximum), zero otherwise.
pub fn build_component_records(
    components: &[ComponentType],
    existing: Option<&[DegreeComponentRecord]>,
    exam_type_ceiling: f64,
) -> Result<Vec<DegreeComponentRecord>, EngineError> {
    let scaled = compute_scaled_maxima(components, exam_type_ceiling)?;

    let mut ordered: Vec<&ComponentType> = components.iter().filter(|c| c.is_active).collect();
    ordered.sort_by_key(|c| c.sort_order);

    let mut rows = Vec::with_capacity(ordered.len());
    for c in ordered {
        let new_max = scaled.get(&c.id).copied().unwrap_or(0.0);
        let prior = existing
            .unwrap_or(&[])
            .iter()
            .find(|r| r.component_type_id == c.id);
        let score = match prior {
            Some(r) => rescale_recorded_score(r.score, r.scaled_max_score, new_max),
            None => 0.0,
        };
        rows.push(DegreeComponentRecord {
            component_type_id: c.id.clone(),
            score,
            scaled_max_score: new_max,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, order: i64, base_max: f64) -> ComponentType {
        ComponentType {
            id: id.to_string(),
            subject_id: "subj-math".to_string(),
            name: id.to_string(),
            sort_order: order,
            base_max_score: base_max,
            is_active: true,
        }
    }

    #[test]
    fn scaled_maxima_sum_stays_near_ceiling() {
        let catalogs: Vec<Vec<f64>> = vec![
            vec![10.0, 5.0, 5.0],
            vec![3.0, 7.0, 11.0, 13.0],
            vec![1.0, 1.0, 1.0],
            vec![33.3, 66.7],
        ];
        for ceiling in [20.0, 80.0, 100.0] {
            for bases in &catalogs {
                let comps: Vec<ComponentType> = bases
                    .iter()
                    .enumerate()
                    .map(|(i, b)| component(&format!("c{}", i), i as i64, *b))
                    .collect();
                let scaled = compute_scaled_maxima(&comps, ceiling).expect("scale");
                let sum: f64 = scaled.values().sum();
                let tolerance = 0.01 * comps.len() as f64;
                assert!(
                    (sum - ceiling).abs() <= tolerance,
                    "sum {} vs ceiling {} for {:?}",
                    sum,
                    ceiling,
                    bases
                );
            }
        }
    }

    #[test]
    fn already_matching_bases_pass_through_unchanged() {
        let comps = vec![
            component("quiz", 1, 10.0),
            component("hw", 2, 5.0),
            component("practical", 3, 5.0),
        ];
        let at_20 = compute_scaled_maxima(&comps, 20.0).expect("scale");
        assert_eq!(at_20["quiz"], 10.0);
        assert_eq!(at_20["hw"], 5.0);
        assert_eq!(at_20["practical"], 5.0);

        let at_80 = compute_scaled_maxima(&comps, 80.0).expect("scale");
        assert_eq!(at_80["quiz"], 40.0);
        assert_eq!(at_80["hw"], 20.0);
        assert_eq!(at_80["practical"], 20.0);
    }

    #[test]
    fn zero_total_base_is_a_configuration_error() {
        let comps = vec![component("quiz", 1, 0.0), component("hw", 2, 0.0)];
        let err = compute_scaled_maxima(&comps, 20.0).expect_err("must fail");
        assert_eq!(err.code(), "config_invalid");
    }

    #[test]
    fn inactive_components_are_excluded_from_scaling() {
        let mut retired = component("retired", 3, 100.0);
        retired.is_active = false;
        let comps = vec![component("quiz", 1, 10.0), component("hw", 2, 10.0), retired];
        let scaled = compute_scaled_maxima(&comps, 20.0).expect("scale");
        assert_eq!(scaled.len(), 2);
        assert_eq!(scaled["quiz"], 10.0);
        assert_eq!(scaled["hw"], 10.0);
    }

    #[test]
    fn rescale_stays_within_new_bounds() {
        for old_max in [1.0, 10.0, 17.5, 80.0] {
            for step in 0..=10 {
                let old_score = old_max * (step as f64) / 10.0;
                for new_max in [0.0, 5.0, 20.0, 40.0] {
                    let rescaled = rescale_recorded_score(old_score, old_max, new_max);
                    assert!(
                        (0.0..=new_max).contains(&rescaled),
                        "rescale({}, {}, {}) = {}",
                        old_score,
                        old_max,
                        new_max,
                        rescaled
                    );
                }
            }
        }
    }

    #[test]
    fn rescale_is_identity_when_max_unchanged() {
        assert_eq!(rescale_recorded_score(8.0, 10.0, 10.0), 8.0);
        assert_eq!(rescale_recorded_score(7.25, 20.0, 20.0), 7.25);
        assert_eq!(rescale_recorded_score(0.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn rescale_round_trip_recovers_original() {
        let up = rescale_recorded_score(8.0, 10.0, 40.0);
        assert_eq!(up, 32.0);
        let back = rescale_recorded_score(up, 40.0, 10.0);
        assert!((back - 8.0).abs() <= 0.01);

        // A value that rounds on the way up still comes back within a cent.
        let up = rescale_recorded_score(7.0, 12.0, 20.0);
        let back = rescale_recorded_score(up, 20.0, 12.0);
        assert!((back - 7.0).abs() <= 0.01, "got {}", back);
    }

    #[test]
    fn rescale_treats_zero_old_max_as_zero_ratio() {
        assert_eq!(rescale_recorded_score(5.0, 0.0, 40.0), 0.0);
    }

    #[test]
    fn sheet_rows_follow_catalog_order_and_rescale_priors() {
        // Authored under a ceiling of 20 (quiz out of 10), re-displayed
        // under a ceiling of 80: the quiz score 8/10 becomes 32/40.
        let comps = vec![component("hw", 2, 10.0), component("quiz", 1, 10.0)];
        let existing = vec![
            DegreeComponentRecord {
                component_type_id: "quiz".to_string(),
                score: 8.0,
                scaled_max_score: 10.0,
            },
            DegreeComponentRecord {
                component_type_id: "hw".to_string(),
                score: 9.0,
                scaled_max_score: 10.0,
            },
        ];

        let rows = build_component_records(&comps, Some(&existing), 80.0).expect("build");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].component_type_id, "quiz");
        assert_eq!(rows[0].score, 32.0);
        assert_eq!(rows[0].scaled_max_score, 40.0);
        assert_eq!(rows[1].component_type_id, "hw");
        assert_eq!(rows[1].score, 36.0);
        assert_eq!(rows[1].scaled_max_score, 40.0);
    }

    #[test]
    fn sheet_rows_default_to_zero_without_priors() {
        let comps = vec![component("quiz", 1, 10.0), component("hw", 2, 10.0)];
        let rows = build_component_records(&comps, None, 20.0).expect("build");
        assert!(rows.iter().all(|r| r.score == 0.0));
        assert!(rows.iter().all(|r| r.scaled_max_score == 10.0));
    }
}
