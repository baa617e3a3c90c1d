// Familiar Market - Wizard Entity
// Sellers. Deleting one takes its groups with it; see delete() for the rules.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::entities::group;
use crate::error::{EntityKind, MarketError};

// ============================================================================
// WIZARD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wizard {
    #[serde(rename = "WizardID")]
    pub id: i64,
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

impl Wizard {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Wizard {
            id: row.get(0)?,
            name: row.get(1)?,
            image: row.get(2)?,
            email: row.get(3)?,
            username: row.get(4)?,
            password: row.get(5)?,
            role: row.get(6)?,
        })
    }
}

const COLUMNS: &str = "wizard_id, name, image, email, username, password, role";

/// Fields accepted when registering a wizard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWizard {
    pub name: String,
    #[serde(alias = "img")]
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
}

/// Field-level update. Password changes go through the auth collaborator,
/// not this path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WizardPatch {
    pub name: Option<String>,
    #[serde(alias = "img")]
    pub image: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
}

// ============================================================================
// STORE OPERATIONS
// ============================================================================

pub fn create(conn: &Connection, new: &NewWizard) -> Result<Wizard, MarketError> {
    conn.execute(
        "INSERT INTO wizards (name, image, email, username, password, role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
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

pub fn get(conn: &Connection, id: i64) -> Result<Wizard, MarketError> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM wizards WHERE wizard_id = ?1"),
        params![id],
        Wizard::from_row,
    )
    .optional()?
    .ok_or(MarketError::NotFound {
        entity: EntityKind::Wizard,
        id,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Wizard>, MarketError> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM wizards ORDER BY wizard_id"))?;
    let wizards = stmt
        .query_map([], Wizard::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(wizards)
}

pub fn update(conn: &Connection, id: i64, patch: &WizardPatch) -> Result<Wizard, MarketError> {
    let mut wizard = get(conn, id)?;

    if let Some(name) = &patch.name {
        wizard.name = name.clone();
    }
    if let Some(image) = &patch.image {
        wizard.image = Some(image.clone());
    }
    if let Some(email) = &patch.email {
        wizard.email = Some(email.clone());
    }
    if let Some(username) = &patch.username {
        wizard.username = Some(username.clone());
    }
    if let Some(role) = &patch.role {
        wizard.role = Some(role.clone());
    }

    conn.execute(
        "UPDATE wizards SET name = ?1, image = ?2, email = ?3, username = ?4, role = ?5
         WHERE wizard_id = ?6",
        params![
            wizard.name,
            wizard.image,
            wizard.email,
            wizard.username,
            wizard.role,
            id
        ],
    )?;
    Ok(wizard)
}

/// Delete a wizard and every group it owns. An unowned group cannot be
/// priced or reviewed, so the groups go too; their familiars and customers
/// survive with a cleared group assignment (the group-delete rule).
pub fn delete(conn: &mut Connection, id: i64) -> Result<(), MarketError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // Existence check inside the transaction so the cascade can't race a
    // concurrent delete.
    get(&tx, id)?;

    let group_ids: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT group_id FROM groups WHERE wizard_id = ?1")?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    for group_id in group_ids {
        group::delete_in_tx(&tx, group_id)?;
    }

    tx.execute("DELETE FROM wizards WHERE wizard_id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
