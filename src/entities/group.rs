// Familiar Market - Group Entity
// A wizard's marketplace segment: price plus the taxonomy its familiars share

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::entities::{double_option, tags_from_sql, tags_to_sql};
use crate::error::{EntityKind, MarketError};

// ============================================================================
// GROUP
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "GroupID")]
    pub id: i64,
    /// Owning wizard. Nullable: an orphaned group lingers until deleted.
    #[serde(rename = "WizardID")]
    pub wizard_id: Option<i64>,
    pub price: Option<f64>,
    pub species: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub pattern: Option<String>,
    pub personality: Option<String>,
    pub rarity: Option<String>,
    /// Ordered elemental tags, stored as a JSON array.
    pub typing: Option<Vec<String>>,
}

impl Group {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Group {
            id: row.get(0)?,
            wizard_id: row.get(1)?,
            price: row.get(2)?,
            species: row.get(3)?,
            size: row.get(4)?,
            color: row.get(5)?,
            pattern: row.get(6)?,
            personality: row.get(7)?,
            rarity: row.get(8)?,
            typing: tags_from_sql(row.get(9)?),
        })
    }
}

const COLUMNS: &str =
    "group_id, wizard_id, price, species, size, color, pattern, personality, rarity, typing";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewGroup {
    #[serde(rename = "WizardID")]
    pub wizard_id: Option<i64>,
    pub price: Option<f64>,
    pub species: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub pattern: Option<String>,
    pub personality: Option<String>,
    pub rarity: Option<String>,
    pub typing: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupPatch {
    /// `Some(None)` reassigns the group to no wizard.
    #[serde(rename = "WizardID", default, deserialize_with = "double_option")]
    pub wizard_id: Option<Option<i64>>,
    pub price: Option<f64>,
    pub species: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub pattern: Option<String>,
    pub personality: Option<String>,
    pub rarity: Option<String>,
    pub typing: Option<Vec<String>>,
}

// ============================================================================
// STORE OPERATIONS
// ============================================================================

pub fn create(conn: &Connection, new: &NewGroup) -> Result<Group, MarketError> {
    if let Some(wizard_id) = new.wizard_id {
        crate::entities::wizard::get(conn, wizard_id)?;
    }
    conn.execute(
        "INSERT INTO groups (wizard_id, price, species, size, color, pattern, personality, rarity, typing)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new.wizard_id,
            new.price,
            new.species,
            new.size,
            new.color,
            new.pattern,
            new.personality,
            new.rarity,
            tags_to_sql(&new.typing),
        ],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Group, MarketError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM groups WHERE group_id = ?1"),
        params![id],
        Group::from_row,
    )
    .optional()?
    .ok_or(MarketError::NotFound {
        entity: EntityKind::Group,
        id,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Group>, MarketError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM groups ORDER BY group_id"))?;
    let groups = stmt
        .query_map([], Group::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

pub fn find_by_wizard(conn: &Connection, wizard_id: i64) -> Result<Vec<Group>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM groups WHERE wizard_id = ?1 ORDER BY group_id"
    ))?;
    let groups = stmt
        .query_map(params![wizard_id], Group::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

pub fn update(conn: &Connection, id: i64, patch: &GroupPatch) -> Result<Group, MarketError> {
    let mut grp = get(conn, id)?;

    if let Some(wizard_id) = patch.wizard_id {
        if let Some(wid) = wizard_id {
            crate::entities::wizard::get(conn, wid)?;
        }
        grp.wizard_id = wizard_id;
    }
    if let Some(price) = patch.price {
        grp.price = Some(price);
    }
    if let Some(species) = &patch.species {
        grp.species = Some(species.clone());
    }
    if let Some(size) = &patch.size {
        grp.size = Some(size.clone());
    }
    if let Some(color) = &patch.color {
        grp.color = Some(color.clone());
    }
    if let Some(pattern) = &patch.pattern {
        grp.pattern = Some(pattern.clone());
    }
    if let Some(personality) = &patch.personality {
        grp.personality = Some(personality.clone());
    }
    if let Some(rarity) = &patch.rarity {
        grp.rarity = Some(rarity.clone());
    }
    if let Some(typing) = &patch.typing {
        grp.typing = Some(typing.clone());
    }

    conn.execute(
        "UPDATE groups SET wizard_id = ?1, price = ?2, species = ?3, size = ?4, color = ?5,
         pattern = ?6, personality = ?7, rarity = ?8, typing = ?9 WHERE group_id = ?10",
        params![
            grp.wizard_id,
            grp.price,
            grp.species,
            grp.size,
            grp.color,
            grp.pattern,
            grp.personality,
            grp.rarity,
            tags_to_sql(&grp.typing),
            id
        ],
    )?;
    Ok(grp)
}

/// Delete a group. Its familiars and customers are durable entities
/// independent of marketplace placement: they stay, unassigned.
pub fn delete(conn: &mut Connection, id: i64) -> Result<(), MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    delete_in_tx(&tx, id)?;
    tx.commit()?;
    Ok(())
}

/// Group-delete body, shared with the wizard cascade which already holds
/// a transaction.
pub(crate) fn delete_in_tx(tx: &Connection, id: i64) -> Result<(), MarketError> {
    get(tx, id)?;
    tx.execute(
        "UPDATE familiars SET group_id = NULL WHERE group_id = ?1",
        params![id],
    )?;
    tx.execute(
        "UPDATE customers SET group_id = NULL WHERE group_id = ?1",
        params![id],
    )?;
    tx.execute("DELETE FROM groups WHERE group_id = ?1", params![id])?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
