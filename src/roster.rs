// Familiar Market - Group Roster Resolver
// Who is in a group, and which group a customer shops in

use rusqlite::{params, Connection};

use crate::entities::{customer, familiar, group, Familiar, Group};
use crate::error::MarketError;

/// Familiars belonging to a group, in insertion (primary-key) order.
///
/// The order is part of the contract: the matching engine walks it in
/// sequence and the first acceptance wins, so it must not vary between
/// reads of the same database state. An empty roster is an empty vec,
/// not an error; a missing group is `NotFound`.
pub fn familiars_of(conn: &Connection, group_id: i64) -> Result<Vec<Familiar>, MarketError> {
    group::get(conn, group_id)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM familiars WHERE group_id = ?1 ORDER BY familiar_id",
        familiar::COLUMNS
    ))?;
    let familiars = stmt
        .query_map(params![group_id], Familiar::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(familiars)
}

/// The group a customer is assigned to, if any. A missing customer is
/// `NotFound`; an unassigned customer is `None`.
pub fn group_of(conn: &Connection, customer_id: i64) -> Result<Option<Group>, MarketError> {
    let cust = customer::get(conn, customer_id)?;
    match cust.group_id {
        Some(group_id) => Ok(Some(group::get(conn, group_id)?)),
        None => Ok(None),
    }
}

// ============================================================================
// TESTS
// ============================================================================
