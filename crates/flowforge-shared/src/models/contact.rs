//! Contact entity (spec.md §3).

use crate::ids::{ContactId, OrgId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contact status, stored as a single DB char (`'A'`/`'B'`/`'S'`/`'X'`)
/// in `contacts_contact.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactStatus {
    Active,
    Blocked,
    Stopped,
    Archived,
}

impl ContactStatus {
    pub fn code(self) -> char {
        match self {
            Self::Active => 'A',
            Self::Blocked => 'B',
            Self::Stopped => 'S',
            Self::Archived => 'X',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(Self::Active),
            'B' => Some(Self::Blocked),
            'S' => Some(Self::Stopped),
            'X' => Some(Self::Archived),
            _ => None,
        }
    }

    /// Name of the per-org system group a contact with this status belongs
    /// to. Every contact belongs to exactly one of these (spec.md §3:
    /// "the per-org system groups partition all contacts by status").
    pub fn system_group_name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for ContactStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for ContactStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        let code = raw.chars().next().ok_or("empty contact status")?;
        Self::from_code(code).ok_or_else(|| format!("invalid contact status code: {raw}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for ContactStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode(self.code().to_string(), buf)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Contact {
    pub id: ContactId,
    pub org_id: OrgId,
    pub uuid: uuid::Uuid,
    pub name: Option<String>,
    pub language: Option<String>,
    pub status: ContactStatus,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub last_seen_on: Option<DateTime<Utc>>,
    pub modified_by: Option<UserId>,
}

impl Contact {
    /// Only active contacts may be targeted by new flow runs (spec.md §3).
    pub fn is_startable(&self) -> bool {
        matches!(self.status, ContactStatus::Active)
    }
}

/// A bulk status change request for `update_contact_status` (spec.md §4.G).
#[derive(Debug, Clone)]
pub struct ContactStatusChange {
    pub contact_id: ContactId,
    pub status: ContactStatus,
}
