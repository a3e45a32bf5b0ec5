//! Flow definition (spec.md §3). Opaque to the core beyond its metadata.

use crate::ids::{FlowId, OrgId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    Message,
    Voice,
    Background,
}

impl sqlx::Type<sqlx::Postgres> for FlowType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for FlowType {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match raw.as_str() {
            "message" => Ok(Self::Message),
            "voice" => Ok(Self::Voice),
            "background" => Ok(Self::Background),
            other => Err(format!("invalid flow type: {other}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for FlowType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let raw = match self {
            Self::Message => "message",
            Self::Voice => "voice",
            Self::Background => "background",
        };
        <String as sqlx::Encode<sqlx::Postgres>>::encode(raw.to_string(), buf)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Flow {
    pub id: FlowId,
    pub org_id: OrgId,
    pub uuid: uuid::Uuid,
    pub name: String,
    pub flow_type: FlowType,
    pub definition: serde_json::Value,
}
