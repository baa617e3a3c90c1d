// Familiar Market - Customer Entity
// Buyers. At most one active contract each; the ledger indexes enforce it.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::entities::double_option;
use crate::error::{EntityKind, MarketError};

// ============================================================================
// CUSTOMER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    #[serde(rename = "CustomerID")]
    pub id: i64,
    /// Marketplace segment. A customer with no group cannot form a contract.
    #[serde(rename = "GroupID")]
    pub group_id: Option<i64>,
    pub name: String,
    #[serde(alias = "img", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    /// Credential field owned by the auth collaborator; never serialized out.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub role: Option<String>,
}

impl Customer {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            group_id: row.get(1)?,
            name: row.get(2)?,
            image: row.get(3)?,
            email: row.get(4)?,
            username: row.get(5)?,
            password: row.get(6)?,
            role: row.get(7)?,
        })
    }
}

const COLUMNS: &str = "customer_id, group_id, name, image, email, username, password, role";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(rename = "GroupID")]
    pub group_id: Option<i64>,
    #[serde(alias = "img")]
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the group assignment.
    #[serde(rename = "GroupID", default, deserialize_with = "double_option")]
    pub group_id: Option<Option<i64>>,
    #[serde(alias = "img")]
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
}

// ============================================================================
// STORE OPERATIONS
// ============================================================================

pub fn create(conn: &Connection, new: &NewCustomer) -> Result<Customer, MarketError> {
    if let Some(group_id) = new.group_id {
        crate::entities::group::get(conn, group_id)?;
    }
    conn.execute(
        "INSERT INTO customers (group_id, name, image, email, username, password, role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.group_id,
            new.name,
            new.image,
            new.email,
            new.username,
            new.password,
            new.role
        ],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Customer, MarketError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM customers WHERE customer_id = ?1"),
        params![id],
        Customer::from_row,
    )
    .optional()?
    .ok_or(MarketError::NotFound {
        entity: EntityKind::Customer,
        id,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Customer>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM customers ORDER BY customer_id"
    ))?;
    let customers = stmt
        .query_map([], Customer::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(customers)
}

pub fn find_by_group(conn: &Connection, group_id: i64) -> Result<Vec<Customer>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM customers WHERE group_id = ?1 ORDER BY customer_id"
    ))?;
    let customers = stmt
        .query_map(params![group_id], Customer::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(customers)
}

pub fn update(conn: &Connection, id: i64, patch: &CustomerPatch) -> Result<Customer, MarketError> {
    let mut cust = get(conn, id)?;

    if let Some(name) = &patch.name {
        cust.name = name.clone();
    }
    if let Some(group_id) = patch.group_id {
        if let Some(gid) = group_id {
            crate::entities::group::get(conn, gid)?;
        }
        cust.group_id = group_id;
    }
    if let Some(image) = &patch.image {
        cust.image = Some(image.clone());
    }
    if let Some(email) = &patch.email {
        cust.email = Some(email.clone());
    }
    if let Some(username) = &patch.username {
        cust.username = Some(username.clone());
    }
    if let Some(role) = &patch.role {
        cust.role = Some(role.clone());
    }

    conn.execute(
        "UPDATE customers SET group_id = ?1, name = ?2, image = ?3, email = ?4,
         username = ?5, role = ?6 WHERE customer_id = ?7",
        params![
            cust.group_id,
            cust.name,
            cust.image,
            cust.email,
            cust.username,
            cust.role,
            id
        ],
    )?;
    Ok(cust)
}

/// Delete a customer. Refused while any live (non-rejected) contract names
/// the customer; rejected contract rows are removed alongside so nothing
/// ends up orphaned.
pub fn delete(conn: &mut Connection, id: i64) -> Result<(), MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    get(&tx, id)?;

    let live: i64 = tx.query_row(
        "SELECT COUNT(*) FROM contracts WHERE customer_id = ?1 AND status != 'rejected'",
        params![id],
        |row| row.get(0),
    )?;
    if live > 0 {
        return Err(MarketError::DeleteBlocked {
            entity: EntityKind::Customer,
            id,
        });
    }

    tx.execute("DELETE FROM contracts WHERE customer_id = ?1", params![id])?;
    tx.execute("DELETE FROM customers WHERE customer_id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
