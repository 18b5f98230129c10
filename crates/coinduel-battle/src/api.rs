//! Request/response surface.
//!
//! Field names follow the client wire format (camelCase). The caller's
//! identity arrives already resolved as a [`UserId`]; every successful
//! response carries the caller's balance after the operation.

use std::str::FromStr;
use std::sync::Arc;

use coinduel_ledger::LedgerService;
use coinduel_store::Store;
use coinduel_types::{
    Battle, BattleId, BattleSetup, CoinduelError, EngineConfig, ErrorKind, Result, ResultReason,
    SubmissionInput, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lifecycle::{BattleManager, ListView, SubmitOutcome};

// =====================================================================
// Requests
// =====================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBattleRequest {
    pub scenario_id: Option<String>,
    pub unit_id: Option<String>,
    pub unit_title: Option<String>,
    #[serde(default)]
    pub stake: i64,
    pub round_count: Option<i64>,
    #[serde(default)]
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub task_bundle: Value,
    pub opponent_id: Option<String>,
    pub metadata: Option<Value>,
}

impl CreateBattleRequest {
    /// Boundary checks that only need the request itself.
    ///
    /// # Errors
    /// `InvalidUnitId` for a missing or blank unit, `InvalidRoundCount` for a
    /// missing count. Range and bundle checks happen in the manager.
    pub fn into_setup(self) -> Result<BattleSetup> {
        let unit_id = self
            .unit_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(CoinduelError::InvalidUnitId)?;
        let round_count = self.round_count.ok_or(CoinduelError::InvalidRoundCount(0))?;
        let opponent_id = self
            .opponent_id
            .filter(|o| !o.trim().is_empty())
            .map(UserId::parse)
            .transpose()?;

        Ok(BattleSetup {
            scenario_id: self.scenario_id,
            unit_id,
            unit_title: self.unit_title,
            stake: self.stake,
            round_count,
            task_ids: self.task_ids,
            task_bundle: self.task_bundle,
            opponent_id,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBattleRequest {
    pub battle_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBattleRequest {
    pub battle_id: Option<String>,
    #[serde(default)]
    pub submission: SubmissionInput,
}

/// A missing `battleId` is reported like a malformed one.
fn parse_battle_id(raw: Option<&str>) -> Result<BattleId> {
    raw.map_or_else(
        || Err(CoinduelError::InvalidBattleId(String::new())),
        BattleId::from_str,
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBattlesRequest {
    #[serde(default)]
    pub view: ListView,
}

// =====================================================================
// Responses
// =====================================================================

/// Battle row plus the caller's current balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleResponse {
    pub battle: Battle,
    pub coins: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBattleResponse {
    pub completed: bool,
    pub winner_id: Option<UserId>,
    pub result_reason: Option<ResultReason>,
    pub challenger_score: Option<u32>,
    pub opponent_score: Option<u32>,
    pub coins: i64,
}

impl SubmitBattleResponse {
    fn new(outcome: SubmitOutcome, coins: i64) -> Self {
        let (winner_id, result_reason) = match outcome.verdict {
            Some(v) => (v.winner_id, Some(v.result_reason)),
            None => (None, None),
        };
        Self {
            completed: outcome.completed,
            winner_id,
            result_reason,
            challenger_score: outcome.challenger_score,
            opponent_score: outcome.opponent_score,
            coins,
        }
    }
}

/// Error payload: machine code, message, and balances for financial errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
}

impl ErrorBody {
    /// Build from an error. `current` is only reported alongside a
    /// `previous` balance or a partial payout.
    #[must_use]
    pub fn new(err: &CoinduelError, current: Option<i64>) -> Self {
        let message = match err.kind() {
            ErrorKind::Infrastructure => "Internal server error".to_string(),
            _ => err.to_string(),
        };
        Self {
            error: err.code().to_string(),
            message,
            previous: err.previous_balance(),
            current: current.filter(|_| err.is_financial()),
        }
    }
}

// =====================================================================
// Service
// =====================================================================

/// Entry point for resolved-caller requests.
pub struct BattleService<S> {
    manager: BattleManager<S>,
}

impl<S> Clone for BattleService<S> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
        }
    }
}

impl<S: Store> BattleService<S> {
    /// # Errors
    /// `Configuration` if the config does not validate.
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let ledger = LedgerService::new(store, config.ledger.clone());
        Ok(Self {
            manager: BattleManager::new(ledger),
        })
    }

    #[must_use]
    pub fn manager(&self) -> &BattleManager<S> {
        &self.manager
    }

    pub fn create(&self, caller: &UserId, req: CreateBattleRequest) -> Result<BattleResponse> {
        let battle = self.manager.create(caller, req.into_setup()?)?;
        self.respond(caller, battle)
    }

    pub fn accept(&self, caller: &UserId, req: &AcceptBattleRequest) -> Result<BattleResponse> {
        let battle_id = parse_battle_id(req.battle_id.as_deref())?;
        let battle = self.manager.accept(battle_id, caller)?;
        self.respond(caller, battle)
    }

    pub fn submit(&self, caller: &UserId, req: &SubmitBattleRequest) -> Result<SubmitBattleResponse> {
        let battle_id = parse_battle_id(req.battle_id.as_deref())?;
        let submission = req.submission.parse()?;
        let outcome = self.manager.submit(battle_id, caller, submission)?;
        let coins = self.coins(caller)?;
        Ok(SubmitBattleResponse::new(outcome, coins))
    }

    pub fn list(&self, caller: &UserId, req: &ListBattlesRequest) -> Result<Vec<Battle>> {
        self.manager.list(caller, req.view)
    }

    pub fn coins(&self, caller: &UserId) -> Result<i64> {
        self.manager.ledger().fetch_balance(caller)
    }

    /// Error payload for `err`, looking up the caller's balance when the
    /// error is financial.
    #[must_use]
    pub fn error_body(&self, caller: &UserId, err: &CoinduelError) -> ErrorBody {
        let current = if err.is_financial() {
            self.coins(caller).ok()
        } else {
            None
        };
        ErrorBody::new(err, current)
    }

    fn respond(&self, caller: &UserId, battle: Battle) -> Result<BattleResponse> {
        let coins = self.coins(caller)?;
        Ok(BattleResponse { battle, coins })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinduel_store::MemoryStore;
    use coinduel_types::{BattleStatus, UserRow};
    use serde_json::json;

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn service() -> BattleService<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(UserRow::new(user("c"), 50)).unwrap();
        store.insert_user(UserRow::new(user("o"), 50)).unwrap();
        BattleService::new(store, &EngineConfig::default()).unwrap()
    }

    fn create_json() -> Value {
        json!({
            "unitId": "fractions-1",
            "unitTitle": "Fractions",
            "stake": 10,
            "roundCount": 3,
            "taskIds": ["a", "b", "c"],
            "taskBundle": {"tasks": ["a", "b", "c"]}
        })
    }

    #[test]
    fn create_request_from_wire() {
        let req: CreateBattleRequest = serde_json::from_value(create_json()).unwrap();
        let setup = req.into_setup().unwrap();
        assert_eq!(setup.unit_id, "fractions-1");
        assert_eq!(setup.round_count, 3);
        assert_eq!(setup.stake, 10);
        assert!(setup.opponent_id.is_none());
    }

    #[test]
    fn missing_unit_and_rounds() {
        let mut raw = create_json();
        raw.as_object_mut().unwrap().remove("unitId");
        let req: CreateBattleRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.into_setup().unwrap_err().code(), "INVALID_UNIT_ID");

        let mut raw = create_json();
        raw.as_object_mut().unwrap().remove("roundCount");
        let req: CreateBattleRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.into_setup().unwrap_err().code(), "INVALID_ROUND_COUNT");
    }

    #[test]
    fn missing_bundle_rejected_by_service() {
        let svc = service();
        let mut raw = create_json();
        raw.as_object_mut().unwrap().remove("taskBundle");
        let req: CreateBattleRequest = serde_json::from_value(raw).unwrap();
        let err = svc.create(&user("c"), req).unwrap_err();
        assert_eq!(err.code(), "TASK_BUNDLE_REQUIRED");
        assert_eq!(svc.coins(&user("c")).unwrap(), 50);
    }

    #[test]
    fn full_flow_reports_coins() {
        let svc = service();
        let req: CreateBattleRequest = serde_json::from_value(create_json()).unwrap();
        let created = svc.create(&user("c"), req).unwrap();
        assert_eq!(created.coins, 40);

        let accept = AcceptBattleRequest {
            battle_id: Some(created.battle.id.to_string()),
        };
        let accepted = svc.accept(&user("o"), &accept).unwrap();
        assert_eq!(accepted.battle.status, BattleStatus::Running);
        assert_eq!(accepted.coins, 40);

        let submit = |who: &str, body: Value| {
            let req = SubmitBattleRequest {
                battle_id: Some(created.battle.id.to_string()),
                submission: serde_json::from_value(body).unwrap(),
            };
            svc.submit(&user(who), &req).unwrap()
        };
        let first = submit("c", json!({"correctCount": 2, "totalTasks": 3, "timeMs": 900}));
        assert!(!first.completed);
        assert_eq!(first.coins, 40);

        let last = submit("o", json!({"correctCount": 3, "totalTasks": 3, "solveTimeMs": 1200}));
        assert!(last.completed);
        assert_eq!(last.winner_id, Some(user("o")));
        assert_eq!(last.result_reason, Some(ResultReason::Score));
        assert_eq!(last.challenger_score, Some(2));
        assert_eq!(last.opponent_score, Some(3));
        assert_eq!(last.coins, 60);
    }

    #[test]
    fn bad_battle_id() {
        let svc = service();
        let err = svc
            .accept(
                &user("o"),
                &AcceptBattleRequest {
                    battle_id: Some("nope".into()),
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_BATTLE_ID");
    }

    #[test]
    fn missing_battle_id() {
        let svc = service();
        let accept: AcceptBattleRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(
            svc.accept(&user("o"), &accept).unwrap_err().code(),
            "INVALID_BATTLE_ID"
        );

        let submit: SubmitBattleRequest = serde_json::from_value(json!({
            "submission": {"correctCount": 1, "totalTasks": 1}
        }))
        .unwrap();
        assert_eq!(
            svc.submit(&user("o"), &submit).unwrap_err().code(),
            "INVALID_BATTLE_ID"
        );
    }

    #[test]
    fn list_view_defaults_to_mine() {
        let req: ListBattlesRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.view, ListView::Mine);
        let req: ListBattlesRequest = serde_json::from_value(json!({"view": "open"})).unwrap();
        assert_eq!(req.view, ListView::Open);
    }

    #[test]
    fn error_body_carries_balances_for_financial_errors() {
        let svc = service();
        let mut raw = create_json();
        raw["stake"] = json!(80);
        let req: CreateBattleRequest = serde_json::from_value(raw).unwrap();
        let err = svc.create(&user("c"), req).unwrap_err();

        let body = svc.error_body(&user("c"), &err);
        assert_eq!(body.error, "INSUFFICIENT_COINS");
        assert_eq!(body.previous, Some(50));
        assert_eq!(body.current, Some(50));
    }

    #[test]
    fn error_body_wire_shape() {
        let body = ErrorBody::new(&CoinduelError::CannotAcceptOwnBattle, Some(12));
        let wire = serde_json::to_value(&body).unwrap();
        assert_eq!(wire["error"], "CANNOT_ACCEPT_OWN_BATTLE");
        assert!(wire.get("previous").is_none());
        assert!(wire.get("current").is_none());

        let body = ErrorBody::new(&CoinduelError::StoreUnavailable("db down".into()), None);
        assert_eq!(body.error, "STORE_UNAVAILABLE");
        assert!(!body.message.contains("db down"));
    }
}
