// Familiar Market - Entity Store
// One module per durable entity; each owns its rows and its delete rules

pub mod customer;
pub mod familiar;
pub mod group;
pub mod wizard;

pub use customer::{Customer, CustomerPatch, NewCustomer};
pub use familiar::{Familiar, FamiliarPatch, NewFamiliar};
pub use group::{Group, GroupPatch, NewGroup};
pub use wizard::{NewWizard, Wizard, WizardPatch};

use serde::{Deserialize, Deserializer};

/// Serialize a typing tag list into its TEXT column.
pub(crate) fn tags_to_sql(tags: &Option<Vec<String>>) -> Option<String> {
    tags.as_ref().and_then(|t| serde_json::to_string(t).ok())
}

/// Parse a typing TEXT column back into tags. Malformed JSON reads as no tags.
pub(crate) fn tags_from_sql(raw: Option<String>) -> Option<Vec<String>> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

/// Distinguishes "field absent" from "field explicitly null" in PATCH-style
/// updates, so a client can unassign a group by sending `"GroupID": null`.
pub(crate) fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}
