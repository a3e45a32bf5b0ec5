//! Ticket entity (spec.md §3).

use crate::ids::{ChannelId, ContactId, TicketId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Ticket {
    pub id: TicketId,
    pub contact_id: ContactId,
    pub channel_id: ChannelId,
    pub subject: String,
    pub body: Option<String>,
    pub status: TicketStatus,
    pub opened_on: DateTime<Utc>,
    pub closed_on: Option<DateTime<Utc>>,
}

impl sqlx::Type<sqlx::Postgres> for TicketStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TicketStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match raw.as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("invalid ticket status: {other}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TicketStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let raw = match self {
            Self::Open => "open",
            Self::Closed => "closed",
        };
        <String as sqlx::Encode<sqlx::Postgres>>::encode(raw.to_string(), buf)
    }
}

impl Ticket {
    pub fn is_open(&self) -> bool {
        matches!(self.status, TicketStatus::Open)
    }
}
