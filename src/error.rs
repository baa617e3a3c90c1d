// Familiar Market - Error Taxonomy
// Every fault a request can surface, with its HTTP mapping

use thiserror::Error;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Which table a lookup missed. Used by `MarketError::NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Wizard,
    Group,
    Customer,
    Familiar,
    Contract,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Wizard => "wizard",
            EntityKind::Group => "group",
            EntityKind::Customer => "customer",
            EntityKind::Familiar => "familiar",
            EntityKind::Contract => "contract",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MARKET ERROR
// ============================================================================

/// Domain errors. All variants are recovered at the request boundary;
/// `status()` gives the HTTP code each one translates to.
#[derive(Debug, Error)]
pub enum MarketError {
    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: i64 },

    /// Customer has no marketplace segment, so no roster to scan.
    #[error("customer {0} has no assigned group")]
    NoGroupAssigned(i64),

    /// Ownership chain broke: the contract's familiar sits in no group.
    /// NotFound-class, since the group link is missing rather than
    /// unauthorized.
    #[error("familiar {0} has no assigned group")]
    UnassignedFamiliar(i64),

    /// The customer's group owns no familiars.
    #[error("no familiars available in group {0}")]
    EmptyGroup(i64),

    /// Customer already holds an active contract.
    #[error("customer {0} already has an active contract")]
    AlreadyContracted(i64),

    /// Familiar is bound to a non-rejected contract.
    #[error("familiar {0} is already claimed by a contract")]
    FamiliarClaimed(i64),

    /// Deletion refused while a live contract references the row.
    #[error("{entity} {id} still holds a contract")]
    DeleteBlocked { entity: EntityKind, id: i64 },

    /// A concurrent writer won the insert; the caller may retry.
    #[error("a concurrent request claimed this contract first")]
    LostRace,

    /// Seeding refused: the database already holds data.
    #[error("database is not empty; refusing to seed")]
    NotEmpty,

    /// The wizard does not own the group behind the contract's familiar.
    #[error("wizard {wizard_id} does not own group {group_id}")]
    NotOwner { wizard_id: i64, group_id: i64 },

    /// Review action was neither "accepted" nor "rejected".
    #[error("invalid action: {0:?} (expected \"accepted\" or \"rejected\")")]
    InvalidAction(String),

    /// Status change not in the contract transition table.
    #[error("contract status cannot change from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Required request field was absent or malformed.
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl MarketError {
    /// HTTP status the request boundary maps this error to.
    ///
    /// `AlreadyContracted` is a conflict but reports 400: that is what the
    /// formation endpoint has always answered, and clients key off it.
    pub fn status(&self) -> u16 {
        match self {
            MarketError::NotFound { .. } | MarketError::UnassignedFamiliar(_) => 404,
            MarketError::NoGroupAssigned(_) | MarketError::EmptyGroup(_) => 400,
            MarketError::AlreadyContracted(_) => 400,
            MarketError::FamiliarClaimed(_)
            | MarketError::DeleteBlocked { .. }
            | MarketError::LostRace
            | MarketError::NotEmpty => 409,
            MarketError::NotOwner { .. } => 403,
            MarketError::InvalidAction(_)
            | MarketError::InvalidTransition { .. }
            | MarketError::MissingField(_) => 400,
            MarketError::Storage(_) => 500,
        }
    }

    /// True for the constraint-violation shape SQLite raises when one of
    /// the partial unique indexes rejects an insert.
    pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
