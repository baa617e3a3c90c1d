// Familiar Market - Familiar Entity
// The creatures on offer. One live claim each, ever.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::entities::{double_option, tags_from_sql, tags_to_sql};
use crate::error::{EntityKind, MarketError};

// ============================================================================
// FAMILIAR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Familiar {
    #[serde(rename = "FamiliarID")]
    pub id: i64,
    /// Roster membership. Cleared, not deleted, when the group goes away.
    #[serde(rename = "GroupID")]
    pub group_id: Option<i64>,
    pub name: String,
    #[serde(alias = "img", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub species: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub pattern: Option<String>,
    pub personality: Option<String>,
    pub rarity: Option<String>,
    pub typing: Option<Vec<String>>,
}

impl Familiar {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Familiar {
            id: row.get(0)?,
            group_id: row.get(1)?,
            name: row.get(2)?,
            image: row.get(3)?,
            species: row.get(4)?,
            size: row.get(5)?,
            color: row.get(6)?,
            pattern: row.get(7)?,
            personality: row.get(8)?,
            rarity: row.get(9)?,
            typing: tags_from_sql(row.get(10)?),
        })
    }
}

pub(crate) const COLUMNS: &str =
    "familiar_id, group_id, name, image, species, size, color, pattern, personality, rarity, typing";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewFamiliar {
    pub name: String,
    #[serde(rename = "GroupID")]
    pub group_id: Option<i64>,
    #[serde(alias = "img")]
    pub image: Option<String>,
    pub species: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
    pub pattern: Option<String>,
    pub personality: Option<String>,
    pub rarity: Option<String>,
    pub typing: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FamiliarPatch {
    pub name: Option<String>,
    /// `Some(None)` removes the familiar from its group.
    #[serde(rename = "GroupID", default, deserialize_with = "double_option")]
    pub group_id: Option<Option<i64>>,
    #[serde(alias = "img")]
    pub image: Option<String>,
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

pub fn create(conn: &Connection, new: &NewFamiliar) -> Result<Familiar, MarketError> {
    if let Some(group_id) = new.group_id {
        crate::entities::group::get(conn, group_id)?;
    }
    conn.execute(
        "INSERT INTO familiars (group_id, name, image, species, size, color, pattern, personality, rarity, typing)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.group_id,
            new.name,
            new.image,
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

pub fn get(conn: &Connection, id: i64) -> Result<Familiar, MarketError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM familiars WHERE familiar_id = ?1"),
        params![id],
        Familiar::from_row,
    )
    .optional()?
    .ok_or(MarketError::NotFound {
        entity: EntityKind::Familiar,
        id,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Familiar>, MarketError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM familiars ORDER BY familiar_id"
    ))?;
    let familiars = stmt
        .query_map([], Familiar::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(familiars)
}

pub fn update(conn: &Connection, id: i64, patch: &FamiliarPatch) -> Result<Familiar, MarketError> {
    let mut fam = get(conn, id)?;

    if let Some(name) = &patch.name {
        fam.name = name.clone();
    }
    if let Some(group_id) = patch.group_id {
        if let Some(gid) = group_id {
            crate::entities::group::get(conn, gid)?;
        }
        fam.group_id = group_id;
    }
    if let Some(image) = &patch.image {
        fam.image = Some(image.clone());
    }
    if let Some(species) = &patch.species {
        fam.species = Some(species.clone());
    }
    if let Some(size) = &patch.size {
        fam.size = Some(size.clone());
    }
    if let Some(color) = &patch.color {
        fam.color = Some(color.clone());
    }
    if let Some(pattern) = &patch.pattern {
        fam.pattern = Some(pattern.clone());
    }
    if let Some(personality) = &patch.personality {
        fam.personality = Some(personality.clone());
    }
    if let Some(rarity) = &patch.rarity {
        fam.rarity = Some(rarity.clone());
    }
    if let Some(typing) = &patch.typing {
        fam.typing = Some(typing.clone());
    }

    conn.execute(
        "UPDATE familiars SET group_id = ?1, name = ?2, image = ?3, species = ?4, size = ?5,
         color = ?6, pattern = ?7, personality = ?8, rarity = ?9, typing = ?10
         WHERE familiar_id = ?11",
        params![
            fam.group_id,
            fam.name,
            fam.image,
            fam.species,
            fam.size,
            fam.color,
            fam.pattern,
            fam.personality,
            fam.rarity,
            tags_to_sql(&fam.typing),
            id
        ],
    )?;
    Ok(fam)
}

/// Delete a familiar. Refused while any live (non-rejected) contract claims
/// it; rejected contract rows are removed alongside so nothing ends up
/// orphaned.
pub fn delete(conn: &mut Connection, id: i64) -> Result<(), MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    get(&tx, id)?;

    let live: i64 = tx.query_row(
        "SELECT COUNT(*) FROM contracts WHERE familiar_id = ?1 AND status != 'rejected'",
        params![id],
        |row| row.get(0),
    )?;
    if live > 0 {
        return Err(MarketError::DeleteBlocked {
            entity: EntityKind::Familiar,
            id,
        });
    }

    tx.execute("DELETE FROM contracts WHERE familiar_id = ?1", params![id])?;
    tx.execute("DELETE FROM familiars WHERE familiar_id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
