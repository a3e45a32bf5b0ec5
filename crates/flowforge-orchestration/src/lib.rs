//! Task dispatch, session commit engine, and contact resolution (spec.md
//! §4.C-§4.I): everything between "a task came off the queue" and
//! "the resulting side effects are durable."

pub mod assets;
pub mod commit;
pub mod contacts;
pub mod cron;
pub mod default_handlers;
pub mod dispatch;
pub mod events;
pub mod hooks;
pub mod session_runner;
pub mod starts;

pub use assets::{NullOrgAssetLoader, OrgAssetCache, OrgAssetLoader};
pub use commit::CommitEngine;
pub use contacts::{ContactResolver, DynamicGroupEvaluator};
pub use cron::{CronJob, LeaderLock, RedisLeaderLock, SingletonLeaderLock};
pub use default_handlers::register_default_handlers;
pub use dispatch::TaskDispatcher;
pub use events::{EventHandler, EventRegistry};
pub use session_runner::{FlowLibrary, OrgAssets, SessionInput, Trigger};
pub use starts::{SearchIndexClient, StartPlanner};
