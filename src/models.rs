//! Domain records served by the demo service.

use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::entity::{Entity, EntityKey, FieldValue};

/// A user account as returned by the user listing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

impl Entity for User {
    fn key(&self) -> EntityKey {
        EntityKey::Int(self.id)
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "email" => self.email.as_str().into(),
            "display_name" => self.display_name.clone().into(),
            "roles" => FieldValue::List(self.roles.clone()),
            "email_verified" => FieldValue::Bool(self.email_verified),
            "status" => self.status.as_str().into(),
            _ => FieldValue::Null,
        }
    }
}

impl User {
    /// Query settings for a user store.
    pub fn store_config(base: StoreConfig) -> StoreConfig {
        let mut config = base;
        if config.searchable_fields.is_empty() {
            config = config.with_searchable_fields(&["email", "display_name"]);
        }
        if config.sortable_fields.is_empty() {
            config = config.with_sortable_fields(&["id", "email", "display_name", "status"]);
        }
        if config.array_fields.is_empty() {
            config = config.with_array_fields(&["roles"]);
        }
        config
    }
}

const FIRST_NAMES: [&str; 8] = ["ada", "grace", "linus", "margaret", "ken", "barbara", "dennis", "frances"];
const LAST_NAMES: [&str; 6] = ["lovelace", "hopper", "torvalds", "hamilton", "thompson", "liskov"];
const ROLES: [&str; 4] = ["basic", "creator", "moderator", "admin"];

/// Deterministic sample users with ids `1..=count`.
pub fn sample_users(count: usize) -> Vec<User> {
    (1..=count as i64)
        .map(|id| {
            let i = id as usize;
            let first = FIRST_NAMES[i % FIRST_NAMES.len()];
            let last = LAST_NAMES[(i / FIRST_NAMES.len()) % LAST_NAMES.len()];

            let mut roles = vec!["basic".to_string()];
            let extra = ROLES[i % ROLES.len()];
            if extra != "basic" {
                roles.push(extra.to_string());
            }

            User {
                id,
                email: format!("{first}.{last}{id}@example.com"),
                display_name: (i % 7 != 0).then(|| format!("{} {}", capitalize(first), capitalize(last))),
                roles,
                email_verified: i % 3 != 0,
                status: if i % 11 == 0 { "inactive" } else { "active" }.to_string(),
            }
        })
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
