// Familiar Market - Contract Ledger
// The authoritative contracts table and the status machine over it

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::now_rfc3339;
use crate::entities::{customer, familiar, Customer, Familiar};
use crate::error::{EntityKind, MarketError};

// ============================================================================
// CONTRACT STATUS
// ============================================================================

/// Closed status set. The only legal transitions are `pending -> active`
/// and `pending -> rejected`; a decided contract never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Active,
    Rejected,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Active => "active",
            ContractStatus::Rejected => "rejected",
        }
    }

    /// Parse a stored/request status string.
    pub fn parse(s: &str) -> Result<Self, MarketError> {
        match s {
            "pending" => Ok(ContractStatus::Pending),
            "active" => Ok(ContractStatus::Active),
            "rejected" => Ok(ContractStatus::Rejected),
            _ => Err(MarketError::MissingField("status")),
        }
    }

    /// Transition table. Everything not listed here is refused.
    pub fn can_transition(&self, to: ContractStatus) -> bool {
        matches!(
            (self, to),
            (ContractStatus::Pending, ContractStatus::Active)
                | (ContractStatus::Pending, ContractStatus::Rejected)
        )
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The join artifact binding one customer to one familiar. The pair is
/// immutable once inserted; only `status` (and `updated_at`) ever change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "ContractID")]
    pub id: i64,
    #[serde(rename = "CustomerID")]
    pub customer_id: i64,
    #[serde(rename = "FamiliarID")]
    pub familiar_id: i64,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(Contract {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            familiar_id: row.get(2)?,
            status: ContractStatus::parse(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(|_| rusqlite::Error::InvalidQuery)?
                .with_timezone(&Utc),
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|_| rusqlite::Error::InvalidQuery)?
                .with_timezone(&Utc),
        })
    }
}

const COLUMNS: &str = "contract_id, customer_id, familiar_id, status, created_at, updated_at";

/// Contract joined with the two rows it binds, for detail endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ContractDetails {
    #[serde(flatten)]
    pub contract: Contract,
    pub customer: Customer,
    pub familiar: Familiar,
}

// ============================================================================
// LEDGER OPERATIONS
// ============================================================================

/// Insert a contract row. The partial unique indexes turn a lost race into
/// a `Conflict` here rather than a double claim.
pub fn insert(
    conn: &Connection,
    customer_id: i64,
    familiar_id: i64,
    status: ContractStatus,
) -> Result<Contract, MarketError> {
    // Resolve FK misses and existing claims up front so a constraint
    // failure at the insert can only mean a uniqueness race.
    customer::get(conn, customer_id)?;
    familiar::get(conn, familiar_id)?;
    if status != ContractStatus::Rejected && is_claimed(conn, familiar_id)? {
        return Err(MarketError::FamiliarClaimed(familiar_id));
    }

    let now = now_rfc3339();
    let result = conn.execute(
        "INSERT INTO contracts (customer_id, familiar_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![customer_id, familiar_id, status.as_str(), now, now],
    );

    match result {
        Ok(_) => get(conn, conn.last_insert_rowid()),
        Err(err) if MarketError::is_constraint_violation(&err) => Err(MarketError::LostRace),
        Err(err) => Err(err.into()),
    }
}

pub fn get(conn: &Connection, id: i64) -> Result<Contract, MarketError> {
    find_by_id(conn, id)?.ok_or(MarketError::NotFound {
        entity: EntityKind::Contract,
        id,
    })
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Contract>, MarketError> {
    let contract = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM contracts WHERE contract_id = ?1"),
            params![id],
            Contract::from_row,
        )
        .optional()?;
    Ok(contract)
}

pub fn find_all(conn: &Connection) -> Result<Vec<Contract>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contracts ORDER BY created_at DESC, contract_id DESC"
    ))?;
    let contracts = stmt
        .query_map([], Contract::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contracts)
}

pub fn find_by_customer(conn: &Connection, customer_id: i64) -> Result<Vec<Contract>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contracts WHERE customer_id = ?1
         ORDER BY created_at DESC, contract_id DESC"
    ))?;
    let contracts = stmt
        .query_map(params![customer_id], Contract::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contracts)
}

pub fn find_by_familiar(conn: &Connection, familiar_id: i64) -> Result<Vec<Contract>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contracts WHERE familiar_id = ?1
         ORDER BY created_at DESC, contract_id DESC"
    ))?;
    let contracts = stmt
        .query_map(params![familiar_id], Contract::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contracts)
}

pub fn find_by_status(
    conn: &Connection,
    status: ContractStatus,
) -> Result<Vec<Contract>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM contracts WHERE status = ?1
         ORDER BY created_at DESC, contract_id DESC"
    ))?;
    let contracts = stmt
        .query_map(params![status.as_str()], Contract::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(contracts)
}

/// Fast-path check for the formation precondition. Only the unique index
/// makes this airtight under concurrency.
pub fn has_active_for_customer(conn: &Connection, customer_id: i64) -> Result<bool, MarketError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contracts WHERE customer_id = ?1 AND status = 'active'",
        params![customer_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Whether a non-rejected contract already binds this familiar.
pub fn is_claimed(conn: &Connection, familiar_id: i64) -> Result<bool, MarketError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contracts WHERE familiar_id = ?1 AND status != 'rejected'",
        params![familiar_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Apply a status transition. Out-of-table transitions are refused; a
/// decided contract stays decided.
pub fn update_status(
    conn: &Connection,
    id: i64,
    to: ContractStatus,
) -> Result<Contract, MarketError> {
    let contract = get(conn, id)?;

    if !contract.status.can_transition(to) {
        return Err(MarketError::InvalidTransition {
            from: contract.status.to_string(),
            to: to.to_string(),
        });
    }

    conn.execute(
        "UPDATE contracts SET status = ?1, updated_at = ?2 WHERE contract_id = ?3",
        params![to.as_str(), now_rfc3339(), id],
    )?;
    get(conn, id)
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), MarketError> {
    get(conn, id)?;
    conn.execute("DELETE FROM contracts WHERE contract_id = ?1", params![id])?;
    Ok(())
}

/// One contract joined with its customer and familiar.
pub fn find_with_details(conn: &Connection, id: i64) -> Result<ContractDetails, MarketError> {
    let contract = get(conn, id)?;
    let customer = customer::get(conn, contract.customer_id)?;
    let familiar = familiar::get(conn, contract.familiar_id)?;
    Ok(ContractDetails {
        contract,
        customer,
        familiar,
    })
}

/// Every contract joined with its customer and familiar, newest first.
pub fn find_all_with_details(conn: &Connection) -> Result<Vec<ContractDetails>, MarketError> {
    find_all(conn)?
        .into_iter()
        .map(|contract| {
            let customer = customer::get(conn, contract.customer_id)?;
            let familiar = familiar::get(conn, contract.familiar_id)?;
            Ok(ContractDetails {
                contract,
                customer,
                familiar,
            })
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::{group, NewCustomer, NewFamiliar, NewGroup};

    fn fixture() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let grp = group::create(&conn, &NewGroup::default()).unwrap();
        let cust = customer::create(
            &conn,
            &NewCustomer {
                name: "Marcus Hale".to_string(),
                group_id: Some(grp.id),
                ..Default::default()
            },
        )
        .unwrap();
        let fam = familiar::create(
            &conn,
            &NewFamiliar {
                name: "Smaug".to_string(),
                group_id: Some(grp.id),
                ..Default::default()
            },
        )
        .unwrap();
        (conn, cust.id, fam.id)
    }

    #[test]
    fn test_insert_then_get_round_trip() {
        let (conn, cust, fam) = fixture();

        let contract = insert(&conn, cust, fam, ContractStatus::Active).unwrap();
        let fetched = get(&conn, contract.id).unwrap();

        assert_eq!(fetched.customer_id, cust);
        assert_eq!(fetched.familiar_id, fam);
        assert_eq!(fetched.status, ContractStatus::Active);
    }

    #[test]
    fn test_insert_unknown_parties_is_not_found() {
        let (conn, cust, _) = fixture();
        assert!(matches!(
            insert(&conn, cust, 999, ContractStatus::Active).unwrap_err(),
            MarketError::NotFound {
                entity: EntityKind::Familiar,
                ..
            }
        ));
        assert!(matches!(
            insert(&conn, 999, 1, ContractStatus::Active).unwrap_err(),
            MarketError::NotFound {
                entity: EntityKind::Customer,
                ..
            }
        ));
    }

    #[test]
    fn test_double_claim_is_conflict() {
        let (conn, cust, fam) = fixture();
        let cust2 = customer::create(
            &conn,
            &NewCustomer {
                name: "Elara Sunwood".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        insert(&conn, cust, fam, ContractStatus::Active).unwrap();
        let err = insert(&conn, cust2.id, fam, ContractStatus::Pending).unwrap_err();
        assert!(matches!(err, MarketError::FamiliarClaimed(id) if id == fam));
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn test_transition_table() {
        let (conn, cust, fam) = fixture();
        let contract = insert(&conn, cust, fam, ContractStatus::Pending).unwrap();

        // pending -> active is legal and bumps updated_at.
        let activated = update_status(&conn, contract.id, ContractStatus::Active).unwrap();
        assert_eq!(activated.status, ContractStatus::Active);
        assert!(activated.updated_at >= contract.updated_at);

        // active is terminal.
        let err = update_status(&conn, contract.id, ContractStatus::Rejected).unwrap_err();
        assert!(matches!(err, MarketError::InvalidTransition { .. }));
        assert_eq!(
            get(&conn, contract.id).unwrap().status,
            ContractStatus::Active
        );
    }

    #[test]
    fn test_pending_to_rejected_frees_both_parties() {
        let (conn, cust, fam) = fixture();
        let contract = insert(&conn, cust, fam, ContractStatus::Pending).unwrap();

        assert!(is_claimed(&conn, fam).unwrap());
        update_status(&conn, contract.id, ContractStatus::Rejected).unwrap();
        assert!(!is_claimed(&conn, fam).unwrap());
        assert!(!has_active_for_customer(&conn, cust).unwrap());
    }

    #[test]
    fn test_lookups_by_party_and_status() {
        let (conn, cust, fam) = fixture();
        insert(&conn, cust, fam, ContractStatus::Active).unwrap();

        assert_eq!(find_by_customer(&conn, cust).unwrap().len(), 1);
        assert_eq!(find_by_familiar(&conn, fam).unwrap().len(), 1);
        assert_eq!(
            find_by_status(&conn, ContractStatus::Active).unwrap().len(),
            1
        );
        assert!(find_by_status(&conn, ContractStatus::Pending)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_details_join_names_both_parties() {
        let (conn, cust, fam) = fixture();
        let contract = insert(&conn, cust, fam, ContractStatus::Active).unwrap();

        let details = find_with_details(&conn, contract.id).unwrap();
        assert_eq!(details.customer.name, "Marcus Hale");
        assert_eq!(details.familiar.name, "Smaug");

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["ContractID"], contract.id);
        assert_eq!(json["customer"]["name"], "Marcus Hale");
        assert_eq!(json["familiar"]["name"], "Smaug");
    }

    #[test]
    fn test_status_wire_format_is_lowercase() {
        let json = serde_json::to_string(&ContractStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        assert!(ContractStatus::parse("nonsense").is_err());
    }
}
