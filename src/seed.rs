// Familiar Market - Demo Seed Data
// A small marketplace to poke at: two wizards, two groups, buyers, creatures

use rusqlite::Connection;

use crate::entities::{customer, familiar, group, wizard};
use crate::entities::{NewCustomer, NewFamiliar, NewGroup, NewWizard};
use crate::error::MarketError;

/// Counts of what a seeding run inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub wizards: usize,
    pub groups: usize,
    pub familiars: usize,
    pub customers: usize,
}

/// Populate an empty database with the demo marketplace. Refuses to run
/// twice: seeding on top of live data would tangle the demo ids with real
/// ones.
pub fn seed_demo(conn: &Connection) -> Result<SeedSummary, MarketError> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM wizards", [], |row| row.get(0))?;
    if existing > 0 {
        return Err(MarketError::NotEmpty);
    }

    let aldren = wizard::create(
        conn,
        &NewWizard {
            name: "Aldren the Arcane".to_string(),
            image: Some("aldren.png".to_string()),
            ..Default::default()
        },
    )?;
    let seraphina = wizard::create(
        conn,
        &NewWizard {
            name: "Seraphina Stormborn".to_string(),
            image: Some("seraphina.png".to_string()),
            ..Default::default()
        },
    )?;

    let beasts = group::create(
        conn,
        &NewGroup {
            wizard_id: Some(aldren.id),
            price: Some(1500.0),
            species: Some("Beast".to_string()),
            size: Some("Small".to_string()),
            color: Some("Brown".to_string()),
            pattern: Some("Spotted".to_string()),
            personality: Some("Loyal".to_string()),
            rarity: Some("Common".to_string()),
            typing: Some(vec!["Earth".to_string()]),
        },
    )?;
    let spirits = group::create(
        conn,
        &NewGroup {
            wizard_id: Some(seraphina.id),
            price: Some(3000.0),
            species: Some("Spirit".to_string()),
            size: Some("Medium".to_string()),
            color: Some("White".to_string()),
            pattern: Some("Shimmer".to_string()),
            personality: Some("Calm".to_string()),
            rarity: Some("Rare".to_string()),
            typing: Some(vec!["Light".to_string()]),
        },
    )?;

    // (name, group, species, size, color, pattern, personality, rarity, typing)
    let roster: &[(&str, Option<i64>, &str, &str, &str, &str, &str, &str, &[&str])] = &[
        ("Smaug", Some(beasts.id), "Dragon", "Large", "Red", "Striped", "Brave", "Epic", &["Fire", "Air"]),
        ("Bramble", Some(beasts.id), "Fox", "Small", "Brown", "Spotted", "Cunning", "Common", &["Earth"]),
        ("Whiskers", Some(beasts.id), "Cat", "Small", "Black", "Plain", "Curious", "Common", &["Magic"]),
        ("Lumen", Some(spirits.id), "Owl", "Medium", "White", "Shimmer", "Calm", "Rare", &["Light", "Air"]),
        ("Nyx", Some(spirits.id), "Wolf", "Medium", "Black", "Plain", "Shy", "Uncommon", &["Water", "Magic"]),
        // Strays with no marketplace placement yet.
        ("Ember", None, "Dragon", "Small", "Red", "Plain", "Brave", "Uncommon", &["Fire"]),
        ("Mist", None, "Cat", "Small", "White", "Shimmer", "Shy", "Rare", &["Water"]),
    ];

    for (idx, (name, group_id, species, size, color, pattern, personality, rarity, typing)) in
        roster.iter().enumerate()
    {
        familiar::create(
            conn,
            &NewFamiliar {
                name: name.to_string(),
                group_id: *group_id,
                image: Some(format!("familiar_{}.png", idx + 1)),
                species: Some(species.to_string()),
                size: Some(size.to_string()),
                color: Some(color.to_string()),
                pattern: Some(pattern.to_string()),
                personality: Some(personality.to_string()),
                rarity: Some(rarity.to_string()),
                typing: Some(typing.iter().map(|t| t.to_string()).collect()),
            },
        )?;
    }

    let buyers = [
        ("Marcus Hale", Some(beasts.id), "marcus.png"),
        ("Elara Sunwood", Some(spirits.id), "elara.png"),
        // No segment assigned; cannot form a contract until placed.
        ("Tobin Ashgrove", None, "tobin.png"),
    ];
    for (name, group_id, img) in &buyers {
        customer::create(
            conn,
            &NewCustomer {
                name: name.to_string(),
                group_id: *group_id,
                image: Some(img.to_string()),
                ..Default::default()
            },
        )?;
    }

    Ok(SeedSummary {
        wizards: 2,
        groups: 2,
        familiars: roster.len(),
        customers: buyers.len(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::roster;

    #[test]
    fn test_seed_builds_a_coherent_marketplace() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let summary = seed_demo(&conn).unwrap();
        assert_eq!(summary.wizards, 2);
        assert_eq!(summary.groups, 2);

        // Every seeded group has a roster to scan.
        for grp in group::list(&conn).unwrap() {
            assert!(!roster::familiars_of(&conn, grp.id).unwrap().is_empty());
        }

        // The unplaced buyer really is unplaced.
        let customers = customer::list(&conn).unwrap();
        assert_eq!(customers.len(), 3);
        assert!(customers.iter().any(|c| c.group_id.is_none()));
    }

    #[test]
    fn test_seed_refuses_to_run_twice() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        seed_demo(&conn).unwrap();
        assert!(seed_demo(&conn).is_err());
    }
}
