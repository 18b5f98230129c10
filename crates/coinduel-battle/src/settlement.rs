//! Settlement: the verdict and the payout it triggers.
//!
//! [`resolve`] is a pure function of the two stored turns. Payout is
//! computed as a plan first ([`payout_plan`]) so the same plan can be
//! executed once and later compared against the ledger for reconciliation.
//!
//! Rules, in order:
//! 1. More correct answers wins (`score`)
//! 2. Equal counts, both times present, non-zero and different: faster wins (`time`)
//! 3. Otherwise `tie`

use std::cmp::Ordering;

use coinduel_ledger::LedgerService;
use coinduel_store::Store;
use coinduel_types::{
    Battle, BattleId, CoinduelError, DeltaReason, LedgerEntry, Result, ResultReason, Turn,
    UserId, Verdict, constants,
};

/// Decide the outcome of a battle from both participants' turns.
#[must_use]
pub fn resolve(
    challenger_id: &UserId,
    opponent_id: &UserId,
    challenger: &Turn,
    opponent: &Turn,
) -> Verdict {
    let c = &challenger.answer_payload;
    let o = &opponent.answer_payload;

    match c.correct_count.cmp(&o.correct_count) {
        Ordering::Greater => return Verdict::win(challenger_id.clone(), ResultReason::Score),
        Ordering::Less => return Verdict::win(opponent_id.clone(), ResultReason::Score),
        Ordering::Equal => {}
    }

    match (c.solve_time_ms, o.solve_time_ms) {
        (Some(ct), Some(ot)) if ct > 0 && ot > 0 && ct != ot => {
            let winner = if ct < ot { challenger_id } else { opponent_id };
            Verdict::win(winner.clone(), ResultReason::Time)
        }
        _ => Verdict::tie(),
    }
}

/// One credit owed by settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutCredit {
    pub user: UserId,
    pub amount: i64,
    pub reason: &'static str,
}

impl PayoutCredit {
    fn matches(&self, entry: &LedgerEntry) -> bool {
        entry.user_id == self.user && entry.delta == self.amount && entry.reason == self.reason
    }
}

/// Credits owed for `verdict`. Empty for zero-stake battles.
#[must_use]
pub fn payout_plan(battle: &Battle, verdict: &Verdict) -> Vec<PayoutCredit> {
    if battle.stake <= 0 {
        return Vec::new();
    }
    match &verdict.winner_id {
        Some(winner) => vec![PayoutCredit {
            user: winner.clone(),
            amount: battle.stake.saturating_mul(2),
            reason: constants::REASON_BATTLE_WIN,
        }],
        None => std::iter::once(&battle.challenger_id)
            .chain(battle.opponent_id.as_ref())
            .map(|user| PayoutCredit {
                user: user.clone(),
                amount: battle.stake,
                reason: constants::REASON_BATTLE_REFUND,
            })
            .collect(),
    }
}

/// Execute the payout plan. Every credit is attempted independently.
///
/// # Errors
/// [`CoinduelError::PayoutIncomplete`] naming every user whose credit
/// failed. Credits that succeeded stand.
pub fn pay_out<S: Store>(
    ledger: &LedgerService<S>,
    battle: &Battle,
    verdict: &Verdict,
) -> Result<Vec<PayoutCredit>> {
    let plan = payout_plan(battle, verdict);
    let mut failed = Vec::new();

    for credit in &plan {
        let reason = DeltaReason::new(credit.reason).with_ref(constants::BATTLE_REF_TYPE, battle.id);
        match ledger.apply_delta_with_retry(&credit.user, credit.amount, &reason) {
            Ok(change) => tracing::info!(
                battle = %battle.id,
                user = %credit.user,
                amount = credit.amount,
                reason = credit.reason,
                balance = change.updated,
                "Payout credited"
            ),
            Err(err) => {
                tracing::error!(
                    battle = %battle.id,
                    user = %credit.user,
                    amount = credit.amount,
                    reason = credit.reason,
                    error = %err,
                    "Payout credit failed; battle stays finished, needs reconciliation"
                );
                failed.push(credit.user.clone());
            }
        }
    }

    if failed.is_empty() {
        Ok(plan)
    } else {
        Err(CoinduelError::PayoutIncomplete {
            battle_id: battle.id,
            failed,
        })
    }
}

/// What settlement owed for a battle next to what the ledger recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReport {
    pub battle_id: BattleId,
    pub verdict: Option<Verdict>,
    pub expected: Vec<PayoutCredit>,
    /// Payout entries (`battle_win` / `battle_refund`) recorded for the battle.
    pub recorded: Vec<LedgerEntry>,
}

impl PayoutReport {
    #[must_use]
    pub fn build(battle: &Battle, entries: Vec<LedgerEntry>) -> Self {
        let verdict = battle.verdict();
        let expected = verdict
            .as_ref()
            .map(|v| payout_plan(battle, v))
            .unwrap_or_default();
        let recorded = entries
            .into_iter()
            .filter(|e| {
                e.reason == constants::REASON_BATTLE_WIN
                    || e.reason == constants::REASON_BATTLE_REFUND
            })
            .collect();
        Self {
            battle_id: battle.id,
            verdict,
            expected,
            recorded,
        }
    }

    /// Expected credits with no matching ledger entry.
    ///
    /// Audit entries are best-effort, so a missing entry means "check the
    /// balance", not "definitely unpaid".
    #[must_use]
    pub fn missing(&self) -> Vec<&PayoutCredit> {
        self.expected
            .iter()
            .filter(|credit| !self.recorded.iter().any(|e| credit.matches(e)))
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.verdict.is_some() && self.missing().is_empty()
    }
}
