// Familiar Market - Review Workflow
// A wizard ruling on a contract whose familiar sits in one of their groups

use rusqlite::{Connection, TransactionBehavior};
use serde::Deserialize;

use crate::contracts::{self, Contract, ContractStatus};
use crate::entities::{familiar, group};
use crate::error::MarketError;

// ============================================================================
// DECISION
// ============================================================================

/// The two rulings a wizard can hand down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Accepted,
    Rejected,
}

impl ReviewDecision {
    /// Parse the request `action` field.
    pub fn parse(action: &str) -> Result<Self, MarketError> {
        match action {
            "accepted" => Ok(ReviewDecision::Accepted),
            "rejected" => Ok(ReviewDecision::Rejected),
            other => Err(MarketError::InvalidAction(other.to_string())),
        }
    }

    fn target_status(&self) -> ContractStatus {
        match self {
            ReviewDecision::Accepted => ContractStatus::Active,
            ReviewDecision::Rejected => ContractStatus::Rejected,
        }
    }
}

// ============================================================================
// REVIEW
// ============================================================================

/// Apply a wizard's ruling to a contract.
///
/// Authorization walks Contract -> Familiar -> Group -> Wizard: the group
/// behind the contract's familiar must belong to the caller. A missing row
/// at any link is `NotFound` for that link, never a silent pass. The walk
/// and the status update share one transaction so a group reassigned
/// mid-request cannot be acted on with stale ownership.
///
/// Only `pending` contracts can be ruled on; a decided contract is final
/// and re-reviewing it is refused as an invalid transition.
pub fn review(
    conn: &mut Connection,
    wizard_id: i64,
    contract_id: i64,
    decision: ReviewDecision,
) -> Result<Contract, MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let contract = contracts::get(&tx, contract_id)?;
    let fam = familiar::get(&tx, contract.familiar_id)?;

    let group_id = fam
        .group_id
        .ok_or(MarketError::UnassignedFamiliar(fam.id))?;
    let grp = group::get(&tx, group_id)?;

    if grp.wizard_id != Some(wizard_id) {
        return Err(MarketError::NotOwner {
            wizard_id,
            group_id,
        });
    }

    let updated = contracts::update_status(&tx, contract_id, decision.target_status())?;
    tx.commit()?;
    Ok(updated)
}

// ============================================================================
// TESTS
// ============================================================================
