//! Turn and submission types.
//!
//! A [`Turn`] is one participant's single submission of results for a
//! battle. Clients send loosely-shaped JSON; it is parsed once at the
//! boundary into a [`Submission`] and only the typed value flows inward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BattleId, CoinduelError, Result, UserId};

/// Raw submission payload as sent by clients.
///
/// `timeMs` is accepted as a legacy alias for `solveTimeMs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionInput {
    pub correct_count: Option<i64>,
    pub total_tasks: Option<i64>,
    #[serde(alias = "timeMs")]
    pub solve_time_ms: Option<i64>,
}

impl SubmissionInput {
    /// Validate and convert into a typed [`Submission`].
    ///
    /// # Errors
    /// Returns `InvalidSubmission` for missing or negative counts, a
    /// negative time, or more correct answers than tasks.
    pub fn parse(&self) -> Result<Submission> {
        let correct = non_negative("correctCount", self.correct_count)?;
        let total = non_negative("totalTasks", self.total_tasks)?;
        if correct > total {
            return Err(invalid(format!(
                "correctCount {correct} exceeds totalTasks {total}"
            )));
        }
        let solve_time_ms = match self.solve_time_ms {
            None => None,
            Some(ms) if ms < 0 => return Err(invalid(format!("negative solveTimeMs {ms}"))),
            Some(ms) => Some(ms.unsigned_abs()),
        };
        Ok(Submission {
            correct_count: correct,
            total_tasks: total,
            solve_time_ms,
        })
    }
}

fn invalid(reason: String) -> CoinduelError {
    CoinduelError::InvalidSubmission { reason }
}

fn non_negative(field: &str, value: Option<i64>) -> Result<u32> {
    let value = value.ok_or_else(|| invalid(format!("{field} is required")))?;
    u32::try_from(value).map_err(|_| invalid(format!("{field} out of range: {value}")))
}

/// A validated submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub correct_count: u32,
    pub total_tasks: u32,
    pub solve_time_ms: Option<u64>,
}

impl Submission {
    /// A turn counts as correct only when every task was solved.
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.total_tasks > 0 && self.correct_count >= self.total_tasks
    }

    #[must_use]
    pub fn summary(&self) -> SubmissionSummary {
        let percentage = if self.total_tasks == 0 {
            0
        } else {
            let correct = u64::from(self.correct_count);
            let total = u64::from(self.total_tasks);
            // At most 100 since correct <= total.
            u32::try_from((correct * 100 + total / 2) / total).unwrap_or(100)
        };
        SubmissionSummary {
            correct: self.correct_count,
            total: self.total_tasks,
            percentage,
            time_ms: self.solve_time_ms,
        }
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Submission {
    /// All tasks solved in the given time.
    pub fn perfect(total: u32, solve_time_ms: u64) -> Self {
        Self {
            correct_count: total,
            total_tasks: total,
            solve_time_ms: Some(solve_time_ms),
        }
    }

    pub fn scored(correct: u32, total: u32, solve_time_ms: Option<u64>) -> Self {
        Self {
            correct_count: correct,
            total_tasks: total,
            solve_time_ms,
        }
    }
}

/// Per-side result snapshot written onto the battle row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub correct: u32,
    pub total: u32,
    pub percentage: u32,
    pub time_ms: Option<u64>,
}

/// One participant's stored submission. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub battle_id: BattleId,
    pub player_id: UserId,
    pub turn_index: u32,
    pub is_correct: bool,
    pub solve_time_ms: Option<u64>,
    pub answer_payload: Submission,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    #[must_use]
    pub fn new(
        battle_id: BattleId,
        player_id: UserId,
        turn_index: u32,
        submission: Submission,
    ) -> Self {
        Self {
            battle_id,
            player_id,
            turn_index,
            is_correct: submission.is_correct(),
            solve_time_ms: submission.solve_time_ms,
            answer_payload: submission,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(json: &str) -> SubmissionInput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_solve_time_and_legacy_alias() {
        let a = input(r#"{"correctCount":4,"totalTasks":5,"solveTimeMs":3000}"#)
            .parse()
            .unwrap();
        let b = input(r#"{"correctCount":4,"totalTasks":5,"timeMs":3000}"#)
            .parse()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.solve_time_ms, Some(3000));
    }

    #[test]
    fn missing_time_is_allowed() {
        let s = input(r#"{"correctCount":5,"totalTasks":5}"#).parse().unwrap();
        assert_eq!(s.solve_time_ms, None);
        assert!(s.is_correct());
    }

    #[test]
    fn rejects_bad_shapes() {
        for json in [
            r#"{"totalTasks":5}"#,
            r#"{"correctCount":-1,"totalTasks":5}"#,
            r#"{"correctCount":6,"totalTasks":5}"#,
            r#"{"correctCount":1,"totalTasks":5,"solveTimeMs":-10}"#,
        ] {
            let err = input(json).parse().unwrap_err();
            assert_eq!(err.code(), "INVALID_SUBMISSION", "{json}");
        }
    }

    #[test]
    fn correctness_requires_all_tasks() {
        assert!(Submission::perfect(5, 1000).is_correct());
        assert!(!Submission::scored(4, 5, None).is_correct());
        assert!(!Submission::scored(0, 0, None).is_correct());
    }

    #[test]
    fn summary_percentage_rounds() {
        let s = Submission::scored(2, 3, Some(10)).summary();
        assert_eq!(s.percentage, 67);
        assert_eq!(s.time_ms, Some(10));
        assert_eq!(Submission::scored(0, 0, None).summary().percentage, 0);
    }

    #[test]
    fn summary_handles_large_counts() {
        let sub = input(r#"{"correctCount":50000000,"totalTasks":50000000}"#)
            .parse()
            .unwrap();
        assert_eq!(sub.summary().percentage, 100);

        let max = Submission {
            correct_count: u32::MAX / 2,
            total_tasks: u32::MAX,
            solve_time_ms: None,
        };
        assert_eq!(max.summary().percentage, 50);
    }

    #[test]
    fn turn_copies_derived_fields() {
        let turn = Turn::new(
            BattleId::new(),
            UserId::parse("p").unwrap(),
            1,
            Submission::perfect(3, 900),
        );
        assert!(turn.is_correct);
        assert_eq!(turn.solve_time_ms, Some(900));
        assert_eq!(turn.turn_index, 1);
    }
}
