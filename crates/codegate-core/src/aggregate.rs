//! Verdict aggregation.

use std::time::Duration;

use crate::result::{EvaluationResult, Outcome, RuleResult, Summary};

/// Folds per-rule results into the run verdict.
pub struct Aggregator;

impl Aggregator {
    /// Overall outcome for a result list.
    ///
    /// Precedence is FAIL > ERROR > PASS. SKIPPED results are ignored, and a
    /// run where nothing actually ran is a PASS.
    pub fn overall(results: &[RuleResult]) -> Outcome {
        if results.iter().any(|r| r.outcome == Outcome::Fail) {
            Outcome::Fail
        } else if results.iter().any(|r| r.outcome == Outcome::Error) {
            Outcome::Error
        } else {
            Outcome::Pass
        }
    }

    /// Build the final [`EvaluationResult`], keeping `results` in the order given.
    pub fn finalize(results: Vec<RuleResult>, duration: Duration) -> EvaluationResult {
        let count = |outcome: Outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let total = results.len();
        let passed = count(Outcome::Pass);
        let summary = Summary {
            total,
            passed,
            failed: count(Outcome::Fail),
            errored: count(Outcome::Error),
            skipped: count(Outcome::Skipped),
            success_rate: if total == 0 {
                0.0
            } else {
                passed as f64 / total as f64
            },
            duration,
        };

        let mut warnings = Vec::new();
        for skipped in results.iter().filter(|r| r.outcome == Outcome::Skipped) {
            warnings.push(format!("rule '{}' skipped: {}", skipped.rule, skipped.message));
        }
        if summary.skipped == total {
            warnings.push(if total == 0 {
                "no rules were enabled; nothing was evaluated".to_string()
            } else {
                "every enabled rule was skipped; nothing was evaluated".to_string()
            });
        }

        let overall = Self::overall(&results);
        EvaluationResult {
            summary,
            overall,
            exit_code: if overall == Outcome::Pass { 0 } else { 1 },
            warnings,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Verdict;

    fn result(rule: &str, verdict: Verdict) -> RuleResult {
        RuleResult::from_verdict(rule, verdict, Duration::from_millis(10))
    }

    #[test]
    fn test_empty_run_is_degenerate_pass() {
        let eval = Aggregator::finalize(vec![], Duration::ZERO);
        assert_eq!(eval.overall, Outcome::Pass);
        assert_eq!(eval.exit_code, 0);
        assert_eq!(eval.summary.total, 0);
        assert_eq!(eval.summary.success_rate, 0.0);
        assert_eq!(eval.warnings.len(), 1);
    }

    #[test]
    fn test_fail_beats_error() {
        let eval = Aggregator::finalize(
            vec![
                result("a", Verdict::error("boom")),
                result("b", Verdict::fail("bad")),
                result("c", Verdict::pass("ok")),
            ],
            Duration::from_secs(1),
        );
        assert_eq!(eval.overall, Outcome::Fail);
        assert_eq!(eval.exit_code, 1);
        assert_eq!(eval.summary.failed, 1);
        assert_eq!(eval.summary.errored, 1);
        assert_eq!(eval.summary.passed, 1);
    }

    #[test]
    fn test_error_beats_pass() {
        let eval = Aggregator::finalize(
            vec![result("a", Verdict::pass("ok")), result("b", Verdict::error("boom"))],
            Duration::ZERO,
        );
        assert_eq!(eval.overall, Outcome::Error);
        assert_eq!(eval.exit_code, 1);
        assert!((eval.summary.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_skipped_is_neutral() {
        let eval = Aggregator::finalize(
            vec![
                result("a", Verdict::pass("ok")),
                result("b", Verdict::skipped("bandit missing")),
            ],
            Duration::ZERO,
        );
        assert_eq!(eval.overall, Outcome::Pass);
        assert_eq!(eval.summary.skipped, 1);
        assert_eq!(eval.warnings, vec!["rule 'b' skipped: bandit missing".to_string()]);
    }

    #[test]
    fn test_all_skipped_passes_with_warning() {
        let eval = Aggregator::finalize(
            vec![result("a", Verdict::skipped("pytest missing"))],
            Duration::ZERO,
        );
        assert_eq!(eval.overall, Outcome::Pass);
        assert_eq!(eval.exit_code, 0);
        assert!(eval.warnings.iter().any(|w| w.contains("nothing was evaluated")));
    }

    #[test]
    fn test_order_preserved() {
        let eval = Aggregator::finalize(
            vec![
                result("zeta", Verdict::pass("ok")),
                result("alpha", Verdict::pass("ok")),
            ],
            Duration::ZERO,
        );
        let names: Vec<&str> = eval.results.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
