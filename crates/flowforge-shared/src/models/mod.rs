//! Data model (spec.md §3): the entities shared across the queue,
//! orchestration, and server crates.

pub mod contact;
pub mod event;
pub mod flow;
pub mod flow_start;
pub mod group;
pub mod session;
pub mod task;
pub mod ticket;
pub mod urn;

pub use contact::{Contact, ContactStatus, ContactStatusChange};
pub use event::{Event, EventRecord};
pub use flow::{Flow, FlowType};
pub use flow_start::{FlowStart, FlowStartBatch, StartStatus, StartTarget, StartType};
pub use group::{Group, GroupKind, Membership, SYSTEM_GROUP_NAMES};
pub use session::{HookEntry, Session, SessionStatus};
pub use task::{Task, TaskKind};
pub use ticket::{Ticket, TicketStatus};
pub use urn::{normalize_identity, split_scheme, Urn, UrnTarget};
