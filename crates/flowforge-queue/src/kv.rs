//! Key-value store backends for the fair queue (spec.md §4.A, §6).
//!
//! Two backends share one algorithm: `RedisBackend` runs it as a Lua
//! script so the read-modify-write sequence is atomic against a real
//! key-value store; `InMemoryBackend` runs the identical sequence under a
//! single mutex for unit tests that don't need a live Redis.

use crate::wire::WireTask;
use flowforge_shared::error::{FlowforgeError, FlowforgeResult};
use flowforge_shared::ids::OrgId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What `pop` returned.
#[derive(Debug)]
pub enum PopOutcome {
    Empty,
    Task { org_id: OrgId, task: WireTask },
}

/// Moves one queue's backing storage through its push/pop/complete/size
/// operations (spec.md §4.A "fairness model"). Implementors must make each
/// operation atomic with respect to concurrent callers.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    async fn push(&self, queue: &str, org_id: OrgId, task: WireTask, priority: bool) -> FlowforgeResult<()>;
    async fn pop(&self, queue: &str) -> FlowforgeResult<PopOutcome>;
    async fn complete(&self, queue: &str, org_id: OrgId) -> FlowforgeResult<()>;
    async fn size(&self, queue: &str) -> FlowforgeResult<u64>;
}

/// Redis-backed implementation. Keys follow spec.md §6:
/// `<queue>:active` (sorted set of org ids by earliest queued_on),
/// `<queue>:q:<org_id>` (normal tasks), `<queue>:q:<org_id>:hi` (high
/// priority), `<queue>:active:<org_id>` (in-flight counter).
#[derive(Debug, Clone)]
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
    pop_script: Arc<redis::Script>,
}

impl RedisBackend {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self {
            conn,
            pop_script: Arc::new(redis::Script::new(POP_SCRIPT)),
        }
    }
}

/// Selects the org with the smallest score, pops one task (high-priority
/// list first, else normal), and reschedules the org's score to its next
/// task's `queued_on`, removing it from the active set if it is now empty.
const POP_SCRIPT: &str = r#"
local active_key = KEYS[1]
local org = redis.call('ZRANGE', active_key, 0, 0)[1]
if not org then
  return false
end

local hi_key = ARGV[1] .. ':q:' .. org .. ':hi'
local norm_key = ARGV[1] .. ':q:' .. org
local task = redis.call('RPOP', hi_key)
if not task then
  task = redis.call('RPOP', norm_key)
end
if not task then
  redis.call('ZREM', active_key, org)
  return false
end

local next_hi = redis.call('LRANGE', hi_key, -1, -1)[1]
local next_norm = redis.call('LRANGE', norm_key, -1, -1)[1]
local next_task = next_hi or next_norm
if next_task then
  local decoded = cjson.decode(next_task)
  redis.call('ZADD', active_key, decoded.queued_on_ts, org)
else
  redis.call('ZREM', active_key, org)
end

redis.call('INCR', ARGV[1] .. ':active:' .. org)
return {org, task}
"#;

#[async_trait::async_trait]
impl QueueStore for RedisBackend {
    async fn push(&self, queue: &str, org_id: OrgId, task: WireTask, priority: bool) -> FlowforgeResult<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(&task)?;
        let list_key = if priority {
            format!("{queue}:q:{org_id}:hi")
        } else {
            format!("{queue}:q:{org_id}")
        };
        let active_key = format!("{queue}:active");

        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&list_key)
            .arg(&encoded)
            .ignore()
            .cmd("ZADD")
            .arg("NX")
            .arg(&active_key)
            .arg(task.queued_on_ts)
            .arg(org_id.value())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| FlowforgeError::Queue(e.to_string()))
    }

    async fn pop(&self, queue: &str) -> FlowforgeResult<PopOutcome> {
        let mut conn = self.conn.clone();
        let active_key = format!("{queue}:active");
        let result: Option<(i64, String)> = self
            .pop_script
            .key(active_key)
            .arg(queue)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FlowforgeError::Queue(e.to_string()))?;

        match result {
            None => Ok(PopOutcome::Empty),
            Some((org_id, encoded)) => {
                let task: WireTask = serde_json::from_str(&encoded)?;
                Ok(PopOutcome::Task {
                    org_id: OrgId::new(org_id),
                    task,
                })
            }
        }
    }

    async fn complete(&self, queue: &str, org_id: OrgId) -> FlowforgeResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("{queue}:active:{org_id}");
        let remaining: i64 = redis::cmd("DECR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| FlowforgeError::Queue(e.to_string()))?;
        if remaining <= 0 {
            let _: () = redis::cmd("DEL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| FlowforgeError::Queue(e.to_string()))?;
        }
        Ok(())
    }

    async fn size(&self, queue: &str) -> FlowforgeResult<u64> {
        let mut conn = self.conn.clone();
        let active_key = format!("{queue}:active");
        let orgs: Vec<String> = redis::cmd("ZRANGE")
            .arg(&active_key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| FlowforgeError::Queue(e.to_string()))?;

        let mut total = 0u64;
        for org in orgs {
            let hi_len: u64 = redis::cmd("LLEN")
                .arg(format!("{queue}:q:{org}:hi"))
                .query_async(&mut conn)
                .await
                .map_err(|e| FlowforgeError::Queue(e.to_string()))?;
            let norm_len: u64 = redis::cmd("LLEN")
                .arg(format!("{queue}:q:{org}"))
                .query_async(&mut conn)
                .await
                .map_err(|e| FlowforgeError::Queue(e.to_string()))?;
            total += hi_len + norm_len;
        }
        Ok(total)
    }
}

#[derive(Debug, Default)]
struct OrgLists {
    hi: VecDeque<WireTask>,
    normal: VecDeque<WireTask>,
    in_flight: i64,
}

#[derive(Debug, Default)]
struct InMemoryState {
    /// org score (earliest queued_on_ts) for orgs with pending tasks.
    active: BTreeMap<i64, Vec<OrgId>>,
    lists: HashMap<OrgId, OrgLists>,
}

/// In-process queue store for unit tests, replicating `RedisBackend`'s
/// fairness algorithm behind a single mutex instead of a Lua script.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    queues: Arc<Mutex<HashMap<String, InMemoryState>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryBackend {
    async fn push(&self, queue: &str, org_id: OrgId, task: WireTask, priority: bool) -> FlowforgeResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let score = task.queued_on_ts;
        let lists = state.lists.entry(org_id).or_default();
        let was_empty = lists.hi.is_empty() && lists.normal.is_empty();
        if priority {
            lists.hi.push_back(task);
        } else {
            lists.normal.push_back(task);
        }
        if was_empty {
            state.active.entry(score).or_default().push(org_id);
        }
        Ok(())
    }

    async fn pop(&self, queue: &str) -> FlowforgeResult<PopOutcome> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(PopOutcome::Empty);
        };

        let Some((&score, orgs)) = state.active.iter_mut().next() else {
            return Ok(PopOutcome::Empty);
        };
        let org_id = orgs[0];
        orgs.remove(0);
        if orgs.is_empty() {
            state.active.remove(&score);
        }

        let lists = state.lists.get_mut(&org_id).expect("active org has lists");
        let task = lists.hi.pop_front().or_else(|| lists.normal.pop_front());
        let Some(task) = task else {
            return Ok(PopOutcome::Empty);
        };
        lists.in_flight += 1;

        if let Some(next) = lists.hi.front().or_else(|| lists.normal.front()) {
            state.active.entry(next.queued_on_ts).or_default().push(org_id);
        }

        Ok(PopOutcome::Task { org_id, task })
    }

    async fn complete(&self, queue: &str, org_id: OrgId) -> FlowforgeResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            if let Some(lists) = state.lists.get_mut(&org_id) {
                lists.in_flight = (lists.in_flight - 1).max(0);
            }
        }
        Ok(())
    }

    async fn size(&self, queue: &str) -> FlowforgeResult<u64> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|state| {
                state
                    .lists
                    .values()
                    .map(|l| (l.hi.len() + l.normal.len()) as u64)
                    .sum()
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireTask;

    fn task(ts: i64) -> WireTask {
        WireTask {
            kind: "start_flow".into(),
            org_id: 1,
            task: serde_json::json!({}),
            queued_on_ts: ts,
        }
    }

    #[tokio::test]
    async fn pop_drains_high_priority_before_normal() {
        let store = InMemoryBackend::new();
        store.push("q", OrgId::new(1), task(1), false).await.unwrap();
        store.push("q", OrgId::new(1), task(2), true).await.unwrap();

        match store.pop("q").await.unwrap() {
            PopOutcome::Task { task, .. } => assert_eq!(task.queued_on_ts, 2),
            PopOutcome::Empty => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn pop_rotates_between_orgs_by_score() {
        let store = InMemoryBackend::new();
        store.push("q", OrgId::new(1), task(10), false).await.unwrap();
        store.push("q", OrgId::new(2), task(1), false).await.unwrap();

        match store.pop("q").await.unwrap() {
            PopOutcome::Task { org_id, .. } => assert_eq!(org_id, OrgId::new(2)),
            PopOutcome::Empty => panic!("expected a task"),
        }
    }

    #[tokio::test]
    async fn pop_on_empty_queue_returns_empty() {
        let store = InMemoryBackend::new();
        assert!(matches!(store.pop("q").await.unwrap(), PopOutcome::Empty));
    }

    #[tokio::test]
    async fn org_removed_from_active_once_drained() {
        let store = InMemoryBackend::new();
        store.push("q", OrgId::new(1), task(1), false).await.unwrap();
        store.pop("q").await.unwrap();
        assert!(matches!(store.pop("q").await.unwrap(), PopOutcome::Empty));
        assert_eq!(store.size("q").await.unwrap(), 0);
    }
}
