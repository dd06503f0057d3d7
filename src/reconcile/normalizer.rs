//! Result normalizer.
//!
//! Puts every score block at its single canonical path and fills derived
//! fields. `normalize(normalize(x)) == normalize(x)`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::types::canonical::{RIASEC_MAX_SCORE, employability_level};
use crate::types::{CanonicalResult, RiasecBlock, RiasecScores};

pub fn normalize(mut result: CanonicalResult) -> CanonicalResult {
    adopt_blob_blocks(&mut result);
    normalize_riasec(&mut result);

    if let Some(aptitude) = result.aptitude.as_mut() {
        if aptitude.top_strengths.is_empty() {
            aptitude.top_strengths = aptitude.ranked_strengths();
        }
        if aptitude.overall_score.is_none() {
            aptitude.overall_score = aptitude.mean_positive_percentage();
        }
    }

    if let Some(employability) = result.employability.as_mut() {
        let level = employability
            .level
            .take()
            .or_else(|| employability.overall_readiness.take())
            .or_else(|| employability.score.map(|s| employability_level(s).to_string()));
        employability.level = level;
        employability.overall_readiness = None;
    }

    result.transformed = true;
    result
}

/// Block from the retained AI blob, if it parses.
fn blob_block<T: DeserializeOwned>(blob: Option<&Value>, key: &str) -> Option<T> {
    let value = blob?.get(key).filter(|v| v.is_object())?;
    serde_json::from_value(value.clone()).ok()
}

fn adopt_blob_blocks(result: &mut CanonicalResult) {
    let blob = result.gemini_results.as_ref();

    let riasec_empty = result
        .riasec
        .as_ref()
        .is_none_or(|r| r.scores.is_degenerate() && r.original_scores.is_none_or(|o| o.is_degenerate()));
    if riasec_empty
        && let Some(block) = blob_block::<RiasecBlock>(blob, "riasec")
        && !block.scores.is_degenerate()
    {
        debug!("Adopting interest scores from retained analysis");
        result.riasec = Some(RiasecBlock {
            top_three: Vec::new(),
            code: None,
            ..block
        });
    }

    if result.aptitude.as_ref().is_none_or(|a| a.scores.is_empty())
        && let Some(block) = blob_block(blob, "aptitude")
    {
        debug!("Adopting aptitude block from retained analysis");
        result.aptitude = Some(block);
    }
    if result.knowledge.as_ref().is_none_or(|k| k.score.is_none())
        && let Some(block) = blob_block(blob, "knowledge")
    {
        result.knowledge = Some(block);
    }
    if result.big_five.as_ref().is_none_or(|b| !b.has_any())
        && let Some(block) = blob_block(blob, "bigFive")
    {
        result.big_five = Some(block);
    }
}

/// Original scores some writers kept next to zeroed ones.
fn original_scores(block: &RiasecBlock, blob: Option<&Value>) -> Option<RiasecScores> {
    block
        .original_scores
        .or_else(|| {
            blob?
                .get("riasec")?
                .get("_originalScores")
                .and_then(RiasecScores::from_value)
        })
        .filter(|s| !s.is_degenerate())
}

fn normalize_riasec(result: &mut CanonicalResult) {
    let blob = result.gemini_results.as_ref();
    let Some(block) = result.riasec.as_mut() else {
        return;
    };

    if block.scores.is_degenerate()
        && let Some(original) = original_scores(block, blob)
    {
        debug!("Interest scores zeroed, restoring original scores");
        block.scores = original;
        block.original_scores = Some(original);
        block.top_three.clear();
        block.code = None;
    }

    if block.max_score.is_none_or(|m| m <= 0.0) {
        block.max_score = Some(RIASEC_MAX_SCORE);
    }
    if block.top_three.is_empty() {
        block.top_three = block
            .scores
            .top_three()
            .iter()
            .map(|t| t.letter().to_string())
            .collect();
    }
    if block.code.is_none() {
        block.code = Some(block.top_three.concat());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AptitudeBlock, EmployabilityBlock};
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_zero_scores_restored_from_original() {
        let result = CanonicalResult {
            riasec: Some(RiasecBlock {
                original_scores: Some(RiasecScores {
                    s: 12.0,
                    e: 8.0,
                    ..Default::default()
                }),
                top_three: vec!["R".into(), "I".into(), "A".into()],
                code: Some("RIA".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let riasec = normalize(result).riasec.unwrap();
        assert_eq!(riasec.scores.s, 12.0);
        assert_eq!(riasec.top_three, vec!["S", "E", "R"]);
        assert_eq!(riasec.code.as_deref(), Some("SER"));
        assert_eq!(riasec.max_score, Some(20.0));
    }

    #[test]
    fn test_original_scores_inside_blob() {
        let result = CanonicalResult {
            riasec: Some(RiasecBlock::default()),
            gemini_results: Some(json!({"riasec": {"scores": {}, "_originalScores": {"A": 7}}})),
            ..Default::default()
        };
        assert_eq!(normalize(result).riasec.unwrap().scores.a, 7.0);
    }

    #[test]
    fn test_missing_blocks_adopted_from_blob() {
        let result = CanonicalResult {
            gemini_results: Some(json!({
                "riasec": {"scores": {"I": 9, "C": 4}},
                "aptitude": {"scores": {"verbal": 60, "numerical": 80}},
                "knowledge": {"score": 70}
            })),
            ..Default::default()
        };
        let normalized = normalize(result);
        assert_eq!(normalized.riasec.as_ref().unwrap().code.as_deref(), Some("ICR"));
        let aptitude = normalized.aptitude.unwrap();
        assert_eq!(aptitude.top_strengths, vec!["Numerical", "Verbal"]);
        assert_eq!(aptitude.overall_score, Some(70.0));
        assert_eq!(normalized.knowledge.unwrap().score, Some(70.0));
    }

    #[test]
    fn test_employability_consolidated() {
        let result = CanonicalResult {
            employability: Some(EmployabilityBlock {
                score: Some(82.0),
                overall_readiness: Some("Ready".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let block = normalize(result).employability.unwrap();
        assert_eq!(block.level.as_deref(), Some("Ready"));
        assert!(block.overall_readiness.is_none());

        let scored = CanonicalResult {
            employability: Some(EmployabilityBlock {
                score: Some(82.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(normalize(scored).employability.unwrap().level.as_deref(), Some("High"));
    }

    #[test]
    fn test_existing_fields_kept() {
        let result = CanonicalResult {
            riasec: Some(RiasecBlock {
                scores: RiasecScores {
                    r: 5.0,
                    ..Default::default()
                },
                max_score: Some(30.0),
                code: Some("RSA".into()),
                top_three: vec!["R".into(), "S".into(), "A".into()],
                ..Default::default()
            }),
            aptitude: Some(AptitudeBlock {
                top_strengths: vec!["Verbal".into()],
                overall_score: Some(55.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let normalized = normalize(result.clone());
        assert_eq!(normalized.riasec, result.riasec);
        assert_eq!(normalized.aptitude, result.aptitude);
    }

    fn arb_scores() -> impl Strategy<Value = RiasecScores> {
        prop::array::uniform6(prop_oneof![Just(0.0), 0.0f64..20.0]).prop_map(|v| RiasecScores {
            r: v[0],
            i: v[1],
            a: v[2],
            s: v[3],
            e: v[4],
            c: v[5],
        })
    }

    fn arb_result() -> impl Strategy<Value = CanonicalResult> {
        (
            prop::option::of(arb_scores()),
            prop::option::of(arb_scores()),
            prop::option::of(arb_scores()),
            prop::option::of(0.0f64..100.0),
            prop::option::of(prop_oneof![Just("Ready".to_string()), Just("Not yet".to_string())]),
        )
            .prop_map(|(scores, original, blob_scores, employability, readiness)| {
                CanonicalResult {
                    riasec: scores.map(|s| RiasecBlock {
                        original_scores: original,
                        ..RiasecBlock::with_scores(s)
                    }),
                    gemini_results: blob_scores.map(|s| json!({"riasec": {"scores": s}})),
                    employability: (employability.is_some() || readiness.is_some()).then(|| {
                        EmployabilityBlock {
                            score: employability,
                            overall_readiness: readiness,
                            ..Default::default()
                        }
                    }),
                    ..Default::default()
                }
            })
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(result in arb_result()) {
            let once = normalize(result);
            let twice = normalize(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_normalized_riasec_is_complete(result in arb_result()) {
            if let Some(riasec) = normalize(result).riasec {
                prop_assert_eq!(riasec.top_three.len(), 3);
                prop_assert!(riasec.code.is_some());
                prop_assert!(riasec.max_score.unwrap_or(0.0) > 0.0);
            }
        }
    }
}
