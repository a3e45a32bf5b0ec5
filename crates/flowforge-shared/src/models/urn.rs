//! URN entity (spec.md §3, §4.G).

use crate::ids::{ChannelId, ContactId, OrgId, UrnId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed contact address, e.g. `tel:+15551234567` or `whatsapp:551234567`.
///
/// `contact_id` is `None` for an orphan URN: one whose row exists (so its
/// identity is reserved against re-insertion) but that is not currently
/// owned by any contact. Orphans may be reclaimed by a later contact
/// creation or re-parented by `update_contact_urns`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Urn {
    pub id: UrnId,
    pub org_id: OrgId,
    pub identity: String,
    pub display: Option<String>,
    pub priority: i32,
    pub channel_id: Option<ChannelId>,
    pub contact_id: Option<ContactId>,
    pub auth_token: Option<String>,
    pub created_on: DateTime<Utc>,
}

impl Urn {
    pub fn is_orphan(&self) -> bool {
        self.contact_id.is_none()
    }
}

/// Splits a raw URN string (`scheme:path[?params]`) into its normalized
/// identity and the display form.
///
/// Query parameters are part of the *display* string but are stripped from
/// the *identity* used for lookup and uniqueness: `tel:+1555?foo=bar` and
/// `tel:+1555` name the same contact address, so a query-string variant of
/// an existing URN resolves to the same row.
pub fn normalize_identity(raw: &str) -> String {
    match raw.split_once('?') {
        Some((identity, _params)) => identity.to_string(),
        None => raw.to_string(),
    }
}

/// Splits a raw URN into `(scheme, path)`, e.g. `tel:+1555` -> `("tel", "+1555")`.
pub fn split_scheme(identity: &str) -> Option<(&str, &str)> {
    identity.split_once(':')
}

/// A target URN supplied by a caller of `update_contact_urns` /
/// `create_contact`, prior to resolution against persisted rows.
///
/// Serializable so it can also travel as a commit hook payload (the
/// urn-change hook's `ContactUrnsChanged` event handler enqueues these
/// directly, spec.md §4.F "URN hook: final target set replaces
/// intermediates").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrnTarget {
    pub raw: String,
    pub display: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub auth_token: Option<String>,
}

impl UrnTarget {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            display: None,
            channel_id: None,
            auth_token: None,
        }
    }

    pub fn identity(&self) -> String {
        normalize_identity(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_params_from_identity() {
        assert_eq!(normalize_identity("tel:+15551234567"), "tel:+15551234567");
        assert_eq!(
            normalize_identity("tel:+15551234567?foo=bar"),
            "tel:+15551234567"
        );
        assert_eq!(
            normalize_identity("whatsapp:551234567?channel=wa1&x=2"),
            "whatsapp:551234567"
        );
    }

    #[test]
    fn splits_scheme_and_path() {
        assert_eq!(split_scheme("tel:+1555"), Some(("tel", "+1555")));
        assert_eq!(split_scheme("no-colon-here"), None);
    }

    #[test]
    fn urn_target_identity_matches_normalize() {
        let target = UrnTarget::new("tel:+1555?foo=bar");
        assert_eq!(target.identity(), "tel:+1555");
    }
}
