//! Score validators.
//!
//! Each validator takes a stored score block, the raw answers, and the
//! question metadata when it is available, and returns either the same block
//! or a recomputed one tagged `_corrected`. Validators never fail: a block
//! they cannot check is returned as-is. They only touch blocks that exist;
//! a missing block is the orchestrator's concern.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::types::record::{answers_match, likert_value};
use crate::types::{
    AnswerSection, Answers, AptitudeBlock, BigFiveBlock, CanonicalResult, DomainScore,
    KnowledgeBlock, QuestionBank, RiasecBlock, RiasecScores, RiasecType, ValidationWarning,
    round1, round_pct,
};

/// Big Five traits reported on a 0-100 scale are above this
const BIG_FIVE_SCALE_MAX: f64 = 5.0;

// =============================================================================
// RIASEC
// =============================================================================

/// `1-3 → 0`, `4 → 1`, `5 → 2`
fn riasec_points(likert: f64) -> f64 {
    if likert >= 5.0 {
        2.0
    } else if likert >= 4.0 {
        1.0
    } else {
        0.0
    }
}

fn score_riasec(answers: &Answers, bank: &QuestionBank) -> Option<RiasecScores> {
    let mut scores = RiasecScores::default();
    let mut scored = 0usize;

    for (id, answer) in answers.section(AnswerSection::Riasec) {
        let Some(letter) = bank
            .find(AnswerSection::Riasec, id)
            .and_then(|q| q.subtype.as_deref())
            .and_then(RiasecType::parse)
        else {
            continue;
        };
        let Some(value) = likert_value(answer) else {
            continue;
        };
        scores.set(letter, scores.get(letter) + riasec_points(value));
        scored += 1;
    }

    (scored > 0).then_some(scores)
}

/// Recompute interest scores from answers when the stored ones are missing
/// their basis: they differ from the answers, are all zero, or exceed the
/// scale maximum.
pub fn validate_riasec(
    block: &RiasecBlock,
    answers: &Answers,
    bank: Option<&QuestionBank>,
) -> RiasecBlock {
    let Some(computed) = bank.and_then(|b| score_riasec(answers, b)) else {
        return block.clone();
    };

    let stored = &block.scores;
    let max = block.max_score_or_default();
    let needs_fix = *stored != computed || stored.is_degenerate() || stored.max() > max;
    if !needs_fix {
        return block.clone();
    }

    warn!(
        stored = ?stored,
        computed = ?computed,
        "Interest scores disagree with answers, recomputing"
    );

    let top_three: Vec<String> = computed
        .top_three()
        .iter()
        .map(|t| t.letter().to_string())
        .collect();
    RiasecBlock {
        scores: computed,
        original_scores: block.original_scores.or(Some(*stored)),
        code: Some(top_three.concat()),
        top_three,
        corrected: true,
        ..block.clone()
    }
}

// =============================================================================
// Aptitude
// =============================================================================

fn tally_aptitude(answers: &Answers, bank: &QuestionBank) -> BTreeMap<String, (f64, f64)> {
    let mut tallies: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for (id, answer) in answers.section(AnswerSection::Aptitude) {
        let Some(question) = bank.find(AnswerSection::Aptitude, id) else {
            continue;
        };
        let (Some(domain), Some(key)) = (&question.subtype, &question.correct_answer) else {
            continue;
        };
        let entry = tallies.entry(domain.to_lowercase()).or_default();
        entry.1 += 1.0;
        if answers_match(answer, key) {
            entry.0 += 1.0;
        }
    }
    tallies
}

/// Percentages follow `round(correct / total * 100)`; correct counts are
/// re-tallied from the answer key when it is known.
pub fn validate_aptitude(
    block: &AptitudeBlock,
    answers: &Answers,
    bank: Option<&QuestionBank>,
) -> AptitudeBlock {
    let mut fixed = block.clone();
    let mut changed = false;

    if let Some(bank) = bank {
        for (domain, (correct, total)) in tally_aptitude(answers, bank) {
            let entry = fixed.scores.entry(domain.clone()).or_default();
            let percentage = round_pct(correct, total);
            if entry.correct != Some(correct)
                || entry.total != Some(total)
                || entry.percentage != percentage
            {
                debug!(domain = %domain, correct, total, "Aptitude domain re-tallied");
                *entry = DomainScore {
                    correct: Some(correct),
                    total: Some(total),
                    percentage,
                    extra: std::mem::take(&mut entry.extra),
                };
                changed = true;
            }
        }
    }

    for (domain, score) in fixed.scores.iter_mut() {
        if let (Some(correct), Some(total)) = (score.correct, score.total)
            && total > 0.0
        {
            let percentage = round_pct(correct, total);
            if score.percentage != percentage {
                debug!(domain = %domain, from = score.percentage, to = percentage, "Aptitude percentage fixed");
                score.percentage = percentage;
                changed = true;
            }
        }
    }

    if !changed {
        return fixed;
    }

    warn!("Aptitude scores recomputed");
    if !fixed.scores.is_empty() {
        let sum: f64 = fixed.scores.values().map(|s| s.percentage).sum();
        fixed.overall_score = Some((sum / fixed.scores.len() as f64).round());
    }
    fixed.top_strengths = fixed.ranked_strengths();
    fixed.corrected = true;
    fixed
}

// =============================================================================
// Knowledge
// =============================================================================

/// `score = round(correct / total * 100)`. A raw correct count stored in the
/// score slot is replaced by the percentage.
pub fn validate_knowledge(
    block: &KnowledgeBlock,
    answers: &Answers,
    bank: Option<&QuestionBank>,
) -> KnowledgeBlock {
    let keyed: Vec<_> = bank
        .map(|b| {
            b.section(AnswerSection::Knowledge)
                .filter(|q| q.correct_answer.is_some())
                .collect()
        })
        .unwrap_or_default();

    let (correct, total) = if keyed.is_empty() {
        match (block.correct_count, block.total_questions) {
            (Some(c), Some(t)) if t > 0.0 => (c, t),
            _ => return block.clone(),
        }
    } else {
        let answered: BTreeMap<&str, &serde_json::Value> =
            answers.section(AnswerSection::Knowledge).collect();
        let correct = keyed
            .iter()
            .filter(|q| {
                let key = q.correct_answer.as_ref();
                answered
                    .get(q.id.as_str())
                    .zip(key)
                    .is_some_and(|(a, k)| answers_match(a, k))
            })
            .count() as f64;
        (correct, keyed.len() as f64)
    };

    let score = round_pct(correct, total);
    let unchanged = block.score == Some(score)
        && block.correct_count == Some(correct)
        && block.total_questions == Some(total)
        && block.percentage.is_none_or(|p| p == score);
    if unchanged {
        return block.clone();
    }

    warn!(
        stored = ?block.score,
        correct,
        total,
        "Knowledge score recomputed"
    );
    KnowledgeBlock {
        score: Some(score),
        percentage: Some(score),
        correct_count: Some(correct),
        total_questions: Some(total),
        corrected: true,
        extra: block.extra.clone(),
    }
}

// =============================================================================
// Big Five
// =============================================================================

fn trait_letter(subtype: &str) -> Option<char> {
    let letter = subtype.trim().chars().next()?.to_ascii_uppercase();
    BigFiveBlock::TRAITS.contains(&letter).then_some(letter)
}

/// Each trait is the mean of its 1-5 answers to one decimal. Without
/// metadata, traits reported on a 0-100 scale are rescaled to 0-5.
pub fn validate_big_five(
    block: &BigFiveBlock,
    answers: &Answers,
    bank: Option<&QuestionBank>,
) -> BigFiveBlock {
    let mut sums: BTreeMap<char, (f64, f64)> = BTreeMap::new();
    if let Some(bank) = bank {
        for (id, answer) in answers.section(AnswerSection::Bigfive) {
            let letter = bank
                .find(AnswerSection::Bigfive, id)
                .and_then(|q| q.subtype.as_deref())
                .and_then(trait_letter);
            if let (Some(letter), Some(value)) = (letter, likert_value(answer)) {
                let entry = sums.entry(letter).or_default();
                entry.0 += value;
                entry.1 += 1.0;
            }
        }
    }

    let mut fixed = block.clone();
    let mut changed = false;

    if sums.is_empty() {
        for letter in BigFiveBlock::TRAITS {
            if let Some(value) = block.get(letter)
                && value > BIG_FIVE_SCALE_MAX
            {
                fixed.set(letter, Some(round1(value / 100.0 * BIG_FIVE_SCALE_MAX)));
                changed = true;
            }
        }
    } else {
        for (letter, (sum, count)) in sums {
            let mean = round1(sum / count);
            if block.get(letter) != Some(mean) {
                fixed.set(letter, Some(mean));
                changed = true;
            }
        }
    }

    if changed {
        warn!("Personality scores recomputed");
        fixed.corrected = true;
    }
    fixed
}

// =============================================================================
// All Validators
// =============================================================================

/// Run every validator over the blocks present in `result`, returning one
/// warning per corrected block.
pub fn validate_scores(
    result: &mut CanonicalResult,
    answers: &Answers,
    bank: Option<&QuestionBank>,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if let Some(block) = &result.riasec {
        let fixed = validate_riasec(block, answers, bank);
        if fixed.corrected && !block.corrected {
            warnings.push(ValidationWarning::warning("Interest scores recomputed from answers").at("riasec.scores"));
        }
        result.riasec = Some(fixed);
    }
    if let Some(block) = &result.aptitude {
        let fixed = validate_aptitude(block, answers, bank);
        if fixed.corrected && fixed != *block {
            warnings.push(ValidationWarning::warning("Aptitude percentages recomputed").at("aptitude.scores"));
        }
        result.aptitude = Some(fixed);
    }
    if let Some(block) = &result.knowledge {
        let fixed = validate_knowledge(block, answers, bank);
        if fixed.corrected && fixed != *block {
            warnings.push(ValidationWarning::warning("Knowledge score recomputed").at("knowledge.score"));
        }
        result.knowledge = Some(fixed);
    }
    if let Some(block) = &result.big_five {
        let fixed = validate_big_five(block, answers, bank);
        if fixed.corrected && fixed != *block {
            warnings.push(ValidationWarning::warning("Personality scores recomputed").at("bigFive"));
        }
        result.big_five = Some(fixed);
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bank() -> QuestionBank {
        serde_json::from_value(json!([
            {"id": "r1", "section": "riasec", "type": "R"},
            {"id": "r2", "section": "riasec", "type": "R"},
            {"id": "i1", "section": "riasec", "type": "I"},
            {"id": "i2", "section": "riasec", "type": "Investigative"},
            {"id": "s1", "section": "riasec", "type": "S"},
            {"id": "v1", "section": "aptitude", "type": "verbal", "correct": "B"},
            {"id": "v2", "section": "aptitude", "type": "verbal", "correct": "C"},
            {"id": "n1", "section": "aptitude", "type": "numerical", "correct": "12"},
            {"id": "k1", "section": "knowledge", "correct": "A"},
            {"id": "k2", "section": "knowledge", "correct": "B"},
            {"id": "k3", "section": "knowledge", "correct": "C"},
            {"id": "k4", "section": "knowledge", "correct": "D"},
            {"id": "o1", "section": "bigfive", "type": "O"},
            {"id": "o2", "section": "bigfive", "type": "Openness"},
            {"id": "n2", "section": "bigfive", "type": "N"}
        ]))
        .unwrap()
    }

    fn answers() -> Answers {
        serde_json::from_value(json!({
            "riasec_r1": 5, "riasec_r2": 4, "riasec_i1": 5, "riasec_i2": "5", "riasec_s1": 2,
            "aptitude_v1": "b", "aptitude_v2": "A", "aptitude_n1": 12,
            "knowledge_k1": "A", "knowledge_k2": "B", "knowledge_k3": "D",
            "bigfive_o1": 4, "bigfive_o2": 5, "bigfive_n2": {"value": 2}
        }))
        .unwrap()
    }

    #[test]
    fn test_riasec_recomputed_when_zero() {
        let block = RiasecBlock::with_scores(RiasecScores::default());
        let fixed = validate_riasec(&block, &answers(), Some(&bank()));
        assert!(fixed.corrected);
        assert_eq!(fixed.scores.r, 3.0);
        assert_eq!(fixed.scores.i, 4.0);
        assert_eq!(fixed.scores.s, 0.0);
        assert_eq!(fixed.top_three, vec!["I", "R", "A"]);
        assert_eq!(fixed.code.as_deref(), Some("IRA"));
        assert_eq!(fixed.original_scores, Some(RiasecScores::default()));
    }

    #[test]
    fn test_riasec_matching_scores_untouched() {
        let block = RiasecBlock::with_scores(RiasecScores {
            r: 3.0,
            i: 4.0,
            ..Default::default()
        });
        let fixed = validate_riasec(&block, &answers(), Some(&bank()));
        assert!(!fixed.corrected);
        assert_eq!(fixed, block);
    }

    #[test]
    fn test_riasec_without_metadata_untouched() {
        let block = RiasecBlock::with_scores(RiasecScores {
            r: 40.0,
            ..Default::default()
        });
        assert_eq!(validate_riasec(&block, &answers(), None), block);
    }

    #[test]
    fn test_aptitude_retallied() {
        let block: AptitudeBlock = serde_json::from_value(json!({
            "scores": {"verbal": {"correct": 2, "total": 2, "percentage": 100}}
        }))
        .unwrap();
        let fixed = validate_aptitude(&block, &answers(), Some(&bank()));
        assert!(fixed.corrected);
        assert_eq!(fixed.scores["verbal"].correct, Some(1.0));
        assert_eq!(fixed.scores["verbal"].percentage, 50.0);
        assert_eq!(fixed.scores["numerical"].percentage, 100.0);
        assert_eq!(fixed.overall_score, Some(75.0));
        assert_eq!(fixed.top_strengths, vec!["Numerical", "Verbal"]);
    }

    #[test]
    fn test_aptitude_percentage_fixed_without_metadata() {
        let block: AptitudeBlock = serde_json::from_value(json!({
            "scores": {"spatial": {"correct": 3, "total": 6, "percentage": 3}}
        }))
        .unwrap();
        let fixed = validate_aptitude(&block, &Answers::default(), None);
        assert_eq!(fixed.scores["spatial"].percentage, 50.0);
        assert!(fixed.corrected);
    }

    #[test]
    fn test_knowledge_raw_count_corrected() {
        let block = KnowledgeBlock {
            score: Some(2.0),
            ..Default::default()
        };
        let fixed = validate_knowledge(&block, &answers(), Some(&bank()));
        assert_eq!(fixed.score, Some(50.0));
        assert_eq!(fixed.correct_count, Some(2.0));
        assert_eq!(fixed.total_questions, Some(4.0));
        assert!(fixed.corrected);
    }

    #[test]
    fn test_knowledge_correct_value_untouched() {
        let block = KnowledgeBlock {
            score: Some(50.0),
            percentage: Some(50.0),
            correct_count: Some(2.0),
            total_questions: Some(4.0),
            ..Default::default()
        };
        assert_eq!(validate_knowledge(&block, &answers(), Some(&bank())), block);
    }

    #[test]
    fn test_big_five_mean_of_answers() {
        let block = BigFiveBlock {
            o: Some(80.0),
            ..Default::default()
        };
        let fixed = validate_big_five(&block, &answers(), Some(&bank()));
        assert_eq!(fixed.o, Some(4.5));
        assert_eq!(fixed.n, Some(2.0));
        assert!(fixed.corrected);
    }

    #[test]
    fn test_big_five_rescaled_without_metadata() {
        let block = BigFiveBlock {
            o: Some(80.0),
            c: Some(3.2),
            ..Default::default()
        };
        let fixed = validate_big_five(&block, &Answers::default(), None);
        assert_eq!(fixed.o, Some(4.0));
        assert_eq!(fixed.c, Some(3.2));
    }

    #[test]
    fn test_validate_scores_is_order_independent() {
        let mut a = CanonicalResult {
            riasec: Some(RiasecBlock::default()),
            knowledge: Some(KnowledgeBlock {
                score: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut b = a.clone();

        let warnings = validate_scores(&mut a, &answers(), Some(&bank()));
        assert_eq!(warnings.len(), 2);

        b.knowledge = Some(validate_knowledge(b.knowledge.as_ref().unwrap(), &answers(), Some(&bank())));
        b.riasec = Some(validate_riasec(b.riasec.as_ref().unwrap(), &answers(), Some(&bank())));
        assert_eq!(a, b);

        // second pass is a no-op
        let again = validate_scores(&mut a, &answers(), Some(&bank()));
        assert!(again.is_empty());
        assert_eq!(a, b);
    }
}
