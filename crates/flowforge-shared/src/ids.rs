//! Newtype identifiers.
//!
//! Every entity id is wrapped so handlers can't accidentally pass a
//! `ContactId` where an `OrgId` is expected. Mirrors the teacher's
//! newtype-over-primitive convention (`MessageId`, `ReceiptHandle`).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($name:ident, $inner:ty) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(OrgId, i64);
id_type!(ContactId, i64);
id_type!(UrnId, i64);
id_type!(GroupId, i64);
id_type!(FlowId, i64);
id_type!(StartId, i64);
id_type!(TicketId, i64);
id_type!(ChannelId, i64);
id_type!(UserId, i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_equality_and_display() {
        let a = ContactId::new(7);
        let b = ContactId::from(7);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "7");
        assert_eq!(a.value(), 7);
    }

    #[test]
    fn distinct_id_types_dont_mix() {
        let contact = ContactId::new(1);
        let org = OrgId::new(1);
        // Compile-time guarantee: this would not compile if uncommented:
        // assert_eq!(contact, org);
        assert_eq!(contact.value(), org.value());
    }
}
