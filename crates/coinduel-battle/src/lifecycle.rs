//! Battle lifecycle manager.
//!
//! Owns every `Battle` / `Turn` write and routes every coin movement through
//! the ledger:
//! 1. `create`: escrow the challenger's stake, then insert `Pending`
//! 2. `accept`: escrow the opponent's stake, then CAS `Pending → Running`
//! 3. `submit`: insert the caller's turn, snapshot it, and settle once both
//!    turns are in
//!
//! Settlement is guarded by a CAS `Running → Finished`; only the caller whose
//! update lands runs the payout.

use std::sync::Arc;

use chrono::Utc;
use coinduel_ledger::LedgerService;
use coinduel_store::{BattleFilter, Store};
use coinduel_types::{
    Battle, BattleId, BattleSetup, BattleStatus, CoinduelError, DeltaReason, Result, Side,
    SideSnapshot, Submission, Turn, UserId, Verdict, constants,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::settlement::{self, PayoutReport};

/// Which battles a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListView {
    /// Battles the caller created or accepted.
    #[default]
    Mine,
    /// Pending, unassigned battles created by someone else.
    Open,
}

/// Result of a `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub battle_id: BattleId,
    pub completed: bool,
    pub verdict: Option<Verdict>,
    pub challenger_score: Option<u32>,
    pub opponent_score: Option<u32>,
}

/// Drives battles through `Pending → Running → Finished`.
pub struct BattleManager<S> {
    store: Arc<S>,
    ledger: LedgerService<S>,
}

impl<S> Clone for BattleManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: Store> BattleManager<S> {
    #[must_use]
    pub fn new(ledger: LedgerService<S>) -> Self {
        Self {
            store: Arc::clone(ledger.store()),
            ledger,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerService<S> {
        &self.ledger
    }

    // =================================================================
    // Create
    // =================================================================

    /// Open a battle, escrowing the challenger's stake first.
    ///
    /// # Errors
    /// Validation errors for the setup; `InsufficientFunds` if the stake
    /// cannot be escrowed, in which case no battle exists.
    pub fn create(&self, challenger: &UserId, setup: BattleSetup) -> Result<Battle> {
        let round_count = validate_setup(challenger, &setup)?;
        let id = BattleId::new();
        let stake = setup.stake;

        if stake > 0 {
            self.ledger.apply_delta_with_retry(
                challenger,
                -stake,
                &battle_reason(constants::REASON_BATTLE_STAKE, id),
            )?;
        }

        let battle = Battle::pending(id, challenger.clone(), round_count, setup);
        if let Err(err) = self.store.insert_battle(battle.clone()) {
            tracing::warn!(battle = %id, %challenger, error = %err, "Battle insert failed after escrow");
            self.refund_escrow(id, challenger, stake)?;
            return Err(err);
        }

        tracing::info!(
            battle = %id,
            %challenger,
            stake,
            rounds = round_count,
            "Battle created"
        );
        Ok(battle)
    }

    // =================================================================
    // Accept
    // =================================================================

    /// Join a pending battle as its opponent, escrowing the stake.
    ///
    /// # Errors
    /// `BattleNotFound`, `BattleNotOpen`, `CannotAcceptOwnBattle`,
    /// `BattleAlreadyAssigned` (checked in that order), or a ledger error
    /// from the escrow debit.
    pub fn accept(&self, battle_id: BattleId, acceptor: &UserId) -> Result<Battle> {
        let battle = self.load(battle_id)?;

        if battle.status != BattleStatus::Pending {
            return Err(CoinduelError::BattleNotOpen(battle_id));
        }
        if &battle.challenger_id == acceptor {
            return Err(CoinduelError::CannotAcceptOwnBattle);
        }
        if battle.opponent_id.as_ref().is_some_and(|o| o != acceptor) {
            return Err(CoinduelError::BattleAlreadyAssigned(battle_id));
        }

        if battle.stake > 0 {
            self.ledger.apply_delta_with_retry(
                acceptor,
                -battle.stake,
                &battle_reason(constants::REASON_BATTLE_STAKE, battle_id),
            )?;
        }

        if self.store.mark_running(battle_id, acceptor, Utc::now())? == 0 {
            // Another acceptor got there between our read and our write.
            tracing::warn!(battle = %battle_id, %acceptor, "Lost accept race; returning escrow");
            self.refund_escrow(battle_id, acceptor, battle.stake)?;
            return Err(CoinduelError::BattleNotOpen(battle_id));
        }

        tracing::info!(
            battle = %battle_id,
            challenger = %battle.challenger_id,
            opponent = %acceptor,
            stake = battle.stake,
            "Battle accepted"
        );
        self.load(battle_id)
    }

    // =================================================================
    // Submit
    // =================================================================

    /// Record `player`'s single turn and settle if both turns are now in.
    ///
    /// # Errors
    /// `NotParticipant`, `BattleFinished`, `BattleNotAccepted`,
    /// `AlreadySubmitted`; `PayoutIncomplete` if the battle finished but a
    /// payout credit failed.
    pub fn submit(
        &self,
        battle_id: BattleId,
        player: &UserId,
        submission: Submission,
    ) -> Result<SubmitOutcome> {
        let battle = self.load(battle_id)?;

        let side = battle
            .side_of(player)
            .ok_or_else(|| CoinduelError::NotParticipant {
                battle_id,
                player: player.clone(),
            })?;
        if battle.is_finished() {
            return Err(CoinduelError::BattleFinished(battle_id));
        }
        if battle.opponent_id.is_none() || battle.status != BattleStatus::Running {
            return Err(CoinduelError::BattleNotAccepted(battle_id));
        }

        let already = self
            .store
            .turns_for_battle(battle_id)?
            .iter()
            .any(|t| &t.player_id == player);
        if already {
            self.settle_after_duplicate(battle_id);
            return Err(CoinduelError::AlreadySubmitted {
                battle_id,
                player: player.clone(),
            });
        }

        let turn = Turn::new(battle_id, player.clone(), side.index(), submission);
        if let Err(err) = self.store.insert_turn(turn) {
            if matches!(err, CoinduelError::AlreadySubmitted { .. }) {
                self.settle_after_duplicate(battle_id);
            }
            return Err(err);
        }
        tracing::info!(
            battle = %battle_id,
            %player,
            ?side,
            correct = submission.correct_count,
            total = submission.total_tasks,
            "Turn submitted"
        );

        self.write_snapshot(battle_id, side, &submission);

        let verdict = self.settle(battle_id)?;
        let battle = self.load(battle_id)?;
        let turns = self.store.turns_for_battle(battle_id)?;
        let score_of = |user: Option<&UserId>| {
            user.and_then(|u| turns.iter().find(|t| &t.player_id == u))
                .map(|t| t.answer_payload.correct_count)
        };

        Ok(SubmitOutcome {
            battle_id,
            completed: verdict.is_some(),
            challenger_score: score_of(Some(&battle.challenger_id)),
            opponent_score: score_of(battle.opponent_id.as_ref()),
            verdict,
        })
    }

    /// Finish a running battle whose turns are both in. Idempotent.
    ///
    /// Returns the persisted verdict if the battle is (now) finished, `None`
    /// if a turn is still outstanding. Only the call that wins the
    /// `Running → Finished` update pays out.
    ///
    /// # Errors
    /// `PayoutIncomplete` if this call finished the battle but a credit
    /// failed.
    pub fn settle(&self, battle_id: BattleId) -> Result<Option<Verdict>> {
        let battle = self.load(battle_id)?;
        if battle.is_finished() {
            return Ok(battle.verdict());
        }
        let Some(opponent_id) = battle.opponent_id.clone() else {
            return Ok(None);
        };

        let turns = self.store.turns_for_battle(battle_id)?;
        let challenger_turn = turns.iter().find(|t| t.player_id == battle.challenger_id);
        let opponent_turn = turns.iter().find(|t| t.player_id == opponent_id);
        let (Some(challenger_turn), Some(opponent_turn)) = (challenger_turn, opponent_turn) else {
            return Ok(None);
        };

        let verdict = settlement::resolve(
            &battle.challenger_id,
            &opponent_id,
            challenger_turn,
            opponent_turn,
        );

        if self.store.mark_finished(battle_id, &verdict, Utc::now())? == 0 {
            let persisted = self.load(battle_id)?.verdict();
            tracing::info!(battle = %battle_id, "Battle already finished by a concurrent submit");
            return Ok(persisted);
        }

        tracing::info!(
            battle = %battle_id,
            winner = ?verdict.winner_id,
            reason = %verdict.result_reason,
            stake = battle.stake,
            "Battle finished"
        );
        settlement::pay_out(&self.ledger, &battle, &verdict)?;
        Ok(Some(verdict))
    }

    // =================================================================
    // Reads
    // =================================================================

    pub fn get(&self, battle_id: BattleId) -> Result<Battle> {
        self.load(battle_id)
    }

    /// Battles visible to `caller` under `view`, newest first.
    pub fn list(&self, caller: &UserId, view: ListView) -> Result<Vec<Battle>> {
        let filter = match view {
            ListView::Mine => BattleFilter::Participant(caller.clone()),
            ListView::Open => BattleFilter::OpenFor(caller.clone()),
        };
        self.store.list_battles(&filter)
    }

    /// Expected payout for a battle against what the ledger recorded.
    pub fn payout_report(&self, battle_id: BattleId) -> Result<PayoutReport> {
        let battle = self.load(battle_id)?;
        let entries = self
            .ledger
            .entries_for_ref(constants::BATTLE_REF_TYPE, &battle_id.to_string())?;
        Ok(PayoutReport::build(&battle, entries))
    }

    // =================================================================
    // Internals
    // =================================================================

    fn load(&self, battle_id: BattleId) -> Result<Battle> {
        self.store
            .read_battle(battle_id)?
            .ok_or(CoinduelError::BattleNotFound(battle_id))
    }

    /// Best-effort partial-result write for spectators.
    fn write_snapshot(&self, battle_id: BattleId, side: Side, submission: &Submission) {
        let snapshot = SideSnapshot::from(submission.summary());
        match self
            .store
            .write_side_snapshot(battle_id, side, &snapshot, Utc::now())
        {
            Ok(1) => {}
            Ok(rows) => {
                tracing::warn!(battle = %battle_id, ?side, rows, "Partial result snapshot not written");
            }
            Err(err) => {
                tracing::warn!(battle = %battle_id, ?side, error = %err, "Partial result snapshot failed");
            }
        }
    }

    /// A repeated submit may be a retry of a call that inserted its turn but
    /// failed before finishing; give settlement another chance.
    fn settle_after_duplicate(&self, battle_id: BattleId) {
        if let Err(err) = self.settle(battle_id) {
            tracing::warn!(battle = %battle_id, error = %err, "Settlement on repeated submit failed");
        }
    }

    /// Return an escrowed stake after a failed create / lost accept.
    fn refund_escrow(&self, battle_id: BattleId, user: &UserId, stake: i64) -> Result<()> {
        if stake <= 0 {
            return Ok(());
        }
        let reason = battle_reason(constants::REASON_BATTLE_STAKE_REFUND, battle_id);
        if let Err(err) = self.ledger.apply_delta_with_retry(user, stake, &reason) {
            tracing::error!(battle = %battle_id, %user, stake, error = %err, "Escrow refund failed");
            return Err(CoinduelError::PayoutIncomplete {
                battle_id,
                failed: vec![user.clone()],
            });
        }
        Ok(())
    }
}

fn battle_reason(reason: &str, battle_id: BattleId) -> DeltaReason {
    DeltaReason::new(reason).with_ref(constants::BATTLE_REF_TYPE, battle_id)
}

fn validate_setup(challenger: &UserId, setup: &BattleSetup) -> Result<u32> {
    if setup.unit_id.trim().is_empty() {
        return Err(CoinduelError::InvalidUnitId);
    }
    let round_count = u32::try_from(setup.round_count)
        .ok()
        .filter(|n| *n > 0)
        .ok_or(CoinduelError::InvalidRoundCount(setup.round_count))?;
    if is_empty_bundle(&setup.task_bundle) {
        return Err(CoinduelError::TaskBundleRequired);
    }
    if setup.stake < 0 {
        return Err(CoinduelError::InvalidStake(setup.stake));
    }
    if setup.opponent_id.as_ref() == Some(challenger) {
        return Err(CoinduelError::CannotAcceptOwnBattle);
    }
    Ok(round_count)
}

fn is_empty_bundle(bundle: &Value) -> bool {
    match bundle {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
