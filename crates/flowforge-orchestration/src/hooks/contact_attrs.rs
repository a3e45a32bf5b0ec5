//! Contact name/language commit hook (spec.md §4.F): last write wins per
//! attribute, the same idempotence rule as the field-value hook, applied
//! to the two first-class contact columns instead of the generic field
//! table.

use super::{CommitHook, HookBatch};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::ContactId;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContactAttrOp {
    Name { contact_id: ContactId, name: String },
    Language { contact_id: ContactId, language: String },
}

pub struct ContactAttrsHook;

#[async_trait::async_trait]
impl CommitHook for ContactAttrsHook {
    fn name(&self) -> &'static str {
        "contact_attrs"
    }

    fn is_pre_commit(&self) -> bool {
        true
    }

    async fn apply(&self, tx: &mut Transaction<'_, Postgres>, batch: &HookBatch) -> FlowforgeResult<()> {
        let mut names: HashMap<ContactId, String> = HashMap::new();
        let mut languages: HashMap<ContactId, String> = HashMap::new();

        for payloads in batch.values() {
            for payload in payloads {
                match serde_json::from_value::<ContactAttrOp>(payload.clone())? {
                    ContactAttrOp::Name { contact_id, name } => {
                        names.insert(contact_id, name);
                    }
                    ContactAttrOp::Language { contact_id, language } => {
                        languages.insert(contact_id, language);
                    }
                }
            }
        }

        for (contact_id, name) in names {
            sqlx::query("UPDATE contacts_contact SET name = $1, modified_on = now() WHERE id = $2")
                .bind(name)
                .bind(contact_id.value())
                .execute(&mut **tx)
                .await
                .map_err(FlowforgeError::Database)?;
        }
        for (contact_id, language) in languages {
            sqlx::query("UPDATE contacts_contact SET language = $1, modified_on = now() WHERE id = $2")
                .bind(language)
                .bind(contact_id.value())
                .execute(&mut **tx)
                .await
                .map_err(FlowforgeError::Database)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_name_for_same_contact_wins() {
        let mut names = HashMap::new();
        for op in [
            ContactAttrOp::Name { contact_id: ContactId::new(1), name: "Ann".into() },
            ContactAttrOp::Name { contact_id: ContactId::new(1), name: "Annie".into() },
        ] {
            if let ContactAttrOp::Name { contact_id, name } = op {
                names.insert(contact_id, name);
            }
        }
        assert_eq!(names.get(&ContactId::new(1)), Some(&"Annie".to_string()));
    }
}
