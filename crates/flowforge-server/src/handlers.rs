//! Task handlers (spec.md §6): one per registered task kind, wired onto
//! the dispatcher by [`crate::bootstrap::bootstrap`].
//!
//! Each handler's body is a typed struct decoded from `Task::task`, the
//! same shape the fair queue's wire format carries opaquely.

use chrono::Utc;
use flowforge_orchestration::session_runner::{FlowLibrary, SessionInput, Trigger};
use flowforge_orchestration::{register_default_handlers, CommitEngine, ContactResolver, EventRegistry, OrgAssetCache, StartPlanner};
use flowforge_queue::{FairQueue, TaskHandler};
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::{ContactId, FlowId, OrgId};
use flowforge_shared::models::{Contact, FlowStartBatch, Task, TaskKind};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;

/// Everything a task handler needs, shared across all six kinds.
pub struct Handlers {
    pub pool: PgPool,
    pub flow_library: Arc<dyn FlowLibrary>,
    pub assets: Arc<OrgAssetCache>,
    pub commit: Arc<CommitEngine>,
    pub contacts: Arc<ContactResolver>,
    pub planner: Arc<StartPlanner>,
    pub batch_queue: FairQueue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFlowBody {
    pub contact_id: ContactId,
    pub flow_id: FlowId,
    #[serde(default)]
    pub trigger_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFlowBatchBody {
    pub batch: FlowStartBatch,
    pub flow_id: FlowId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleContactEventBody {
    pub contact_id: ContactId,
    pub flow_id: FlowId,
    #[serde(default)]
    pub trigger_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireCampaignEventBody {
    pub contact_id: ContactId,
    pub flow_id: FlowId,
    pub campaign_id: i64,
    pub point_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBroadcastBody {
    pub contact_ids: Vec<ContactId>,
    pub channel_id: Option<flowforge_shared::ids::ChannelId>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptSessionsBody {
    pub contact_ids: Vec<ContactId>,
}

impl Handlers {
    async fn load_contact(&self, contact_id: ContactId) -> FlowforgeResult<Contact> {
        sqlx::query_as(
            "SELECT id, org_id, uuid, name, language, status, created_on, modified_on, last_seen_on, modified_by \
             FROM contacts_contact WHERE id = $1",
        )
        .bind(contact_id.value())
        .fetch_one(&self.pool)
        .await
        .map_err(FlowforgeError::Database)
    }

    async fn load_contacts(&self, contact_ids: &[ContactId]) -> FlowforgeResult<Vec<Contact>> {
        let ids: Vec<i64> = contact_ids.iter().map(|id| id.value()).collect();
        sqlx::query_as(
            "SELECT id, org_id, uuid, name, language, status, created_on, modified_on, last_seen_on, modified_by \
             FROM contacts_contact WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(FlowforgeError::Database)
    }

    /// Advances `inputs` through the flow library, runs each resulting
    /// session's events through the event->hook binder, then commits the
    /// whole batch in one transaction (spec.md §4.D, §4.E, §4.F in
    /// sequence — this is the one place all three meet).
    ///
    /// The event registry is built fresh per call rather than shared across
    /// orgs: `urn_change` entries need the org a session belongs to, and a
    /// `Session` itself carries no org id, so the registry is the only place
    /// left to thread it through.
    async fn advance_and_commit(&self, org_id: OrgId, inputs: Vec<SessionInput>) -> FlowforgeResult<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        let assets = self.assets.get(org_id).await?;
        let mut sessions = self.flow_library.advance(assets.as_ref(), &inputs);
        let mut events = EventRegistry::new();
        register_default_handlers(&mut events, org_id);
        for session in &mut sessions {
            events.apply_events(session)?;
        }
        self.commit.commit(&sessions).await
    }

    pub async fn start_flow(&self, org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: StartFlowBody = serde_json::from_value(task.task)?;
        let contact = self.load_contact(body.contact_id).await?;
        if !contact.is_startable() {
            warn!(contact_id = %body.contact_id, "start_flow skipped, contact not active");
            return Ok(());
        }
        let input = SessionInput {
            contact,
            trigger: Trigger {
                flow_id: body.flow_id,
                payload: body.trigger_payload,
            },
        };
        self.advance_and_commit(org_id, vec![input]).await
    }

    pub async fn start_flow_batch(&self, org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: StartFlowBatchBody = serde_json::from_value(task.task)?;
        let contacts = self.load_contacts(&body.batch.contact_ids).await?;
        let inputs: Vec<SessionInput> = contacts
            .into_iter()
            .filter(Contact::is_startable)
            .map(|contact| SessionInput {
                contact,
                trigger: Trigger {
                    flow_id: body.flow_id,
                    payload: body.batch.extra.clone().unwrap_or(serde_json::Value::Null),
                },
            })
            .collect();
        self.advance_and_commit(org_id, inputs).await?;

        if body.batch.is_last {
            self.planner.mark_start_complete(body.batch.start_id).await?;
        }
        Ok(())
    }

    pub async fn handle_contact_event(&self, org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: HandleContactEventBody = serde_json::from_value(task.task)?;
        let contact = self.load_contact(body.contact_id).await?;
        let input = SessionInput {
            contact,
            trigger: Trigger {
                flow_id: body.flow_id,
                payload: body.trigger_payload,
            },
        };
        self.advance_and_commit(org_id, vec![input]).await
    }

    pub async fn fire_campaign_event(&self, org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: FireCampaignEventBody = serde_json::from_value(task.task)?;
        let contact = self.load_contact(body.contact_id).await?;
        if !contact.is_startable() {
            return Ok(());
        }
        let input = SessionInput {
            contact,
            trigger: Trigger {
                flow_id: body.flow_id,
                payload: serde_json::json!({ "campaign_id": body.campaign_id, "point_id": body.point_id }),
            },
        };
        self.advance_and_commit(org_id, vec![input]).await
    }

    /// Broadcasts bypass the flow library entirely — each target contact
    /// gets one outbound message with no flow advance, distinct from a
    /// flow-triggered send.
    pub async fn send_broadcast(&self, _org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: SendBroadcastBody = serde_json::from_value(task.task)?;
        if body.contact_ids.is_empty() {
            return Ok(());
        }
        let mut sessions = Vec::with_capacity(body.contact_ids.len());
        for contact_id in &body.contact_ids {
            let mut session = flowforge_shared::models::Session::new(
                flowforge_shared::ids::SessionId(uuid::Uuid::new_v4()),
                *contact_id,
                FlowId::new(0),
                Utc::now(),
            );
            session.status = flowforge_shared::models::SessionStatus::Completed;
            let op = flowforge_orchestration::hooks::message_outbox::MessageOutboxOp {
                contact_id: *contact_id,
                channel_id: body.channel_id,
                text: body.text.clone(),
                attachments: Vec::new(),
            };
            session.push_post_commit("message_outbox", serde_json::to_value(op)?);
            sessions.push(session);
        }
        self.commit.commit(&sessions).await
    }

    pub async fn interrupt_sessions(&self, _org_id: OrgId, task: Task) -> FlowforgeResult<()> {
        let body: InterruptSessionsBody = serde_json::from_value(task.task)?;
        self.commit.interrupt_contacts(&body.contact_ids).await
    }
}

/// Registers all six task kinds from spec.md §6 onto `dispatcher`, each
/// adapted into the closure form [`TaskHandler`]'s blanket impl accepts.
pub fn register_all(dispatcher: &mut flowforge_orchestration::TaskDispatcher, handlers: Arc<Handlers>) {
    macro_rules! register {
        ($kind:expr, $method:ident) => {{
            let handlers = handlers.clone();
            let handler: Arc<dyn TaskHandler> = Arc::new(move |org_id: OrgId, task: Task| {
                let handlers = handlers.clone();
                async move { handlers.$method(org_id, task).await }
            });
            dispatcher.register($kind, handler);
        }};
    }

    register!(TaskKind::StartFlow, start_flow);
    register!(TaskKind::StartFlowBatch, start_flow_batch);
    register!(TaskKind::HandleContactEvent, handle_contact_event);
    register!(TaskKind::FireCampaignEvent, fire_campaign_event);
    register!(TaskKind::SendBroadcast, send_broadcast);
    register!(TaskKind::InterruptSessions, interrupt_sessions);
}
