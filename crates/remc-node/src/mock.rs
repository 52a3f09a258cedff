//! In-memory backend for orchestration tests.
//!
//! Counts `create`/`delete` calls per node name, injects failures, and can
//! hold every `create` at a gate so a test can keep a job busy.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use remc_core::{JobSpec, NodeRole, NodeStatus, NodeType};
use remc_state::NodeRecord;

use crate::error::{NodeError, NodeResult};
use crate::node::{Node, NodeMeta};
use crate::registry::NodeFactory;

/// Which `create` calls fail.
#[derive(Debug, Clone, Default)]
pub enum FailurePlan {
    #[default]
    Never,
    Always,
    /// The n-th create call (1-based) across the backend.
    Nth(u32),
    /// Every node whose name contains the pattern.
    NameContains(String),
}

#[derive(Default)]
struct MockState {
    create_calls: u32,
    creates: HashMap<String, u32>,
    deletes: HashMap<String, u32>,
    restarts: HashMap<String, u32>,
    /// Names in the order `create` reached the backend.
    created: Vec<String>,
    alive: HashSet<String>,
    /// Peers handed to the last `create` of each node.
    peers: HashMap<String, Vec<String>>,
    in_flight: u32,
    peak_in_flight: u32,
    failure: FailurePlan,
    failing_deletes: Option<String>,
}

struct Shared {
    node_type: NodeType,
    state: Mutex<MockState>,
    gate: watch::Sender<bool>,
    /// Creates currently waiting at the gate.
    blocked: watch::Sender<u32>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloneable handle; every clone sees the same backend.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new(node_type: NodeType) -> Self {
        let (gate, _) = watch::channel(true);
        let (blocked, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                node_type,
                state: Mutex::new(MockState::default()),
                gate,
                blocked,
            }),
        }
    }

    pub fn fail_creates(&self, plan: FailurePlan) {
        self.shared.state().failure = plan;
    }

    /// Fail `delete` for nodes whose name contains `pattern`.
    pub fn fail_deletes(&self, pattern: Option<&str>) {
        self.shared.state().failing_deletes = pattern.map(str::to_string);
    }

    /// Block every subsequent `create` until [`MockBackend::release_creates`].
    pub fn hold_creates(&self) {
        self.shared.gate.send_replace(false);
    }

    pub fn release_creates(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Resolves once `count` creates are waiting at the gate.
    pub async fn wait_blocked(&self, count: u32) {
        let mut blocked = self.shared.blocked.subscribe();
        // The sender lives in `shared`, so the channel cannot close.
        let _ = blocked.wait_for(|n| *n >= count).await;
    }

    pub fn create_count(&self, name: &str) -> u32 {
        self.shared.state().creates.get(name).copied().unwrap_or(0)
    }

    pub fn delete_count(&self, name: &str) -> u32 {
        self.shared.state().deletes.get(name).copied().unwrap_or(0)
    }

    pub fn restart_count(&self, name: &str) -> u32 {
        self.shared.state().restarts.get(name).copied().unwrap_or(0)
    }

    /// Peers the last `create` of `name` was given.
    pub fn peers_of(&self, name: &str) -> Vec<String> {
        self.shared.state().peers.get(name).cloned().unwrap_or_default()
    }

    /// Creates currently waiting at the gate.
    pub fn blocked(&self) -> u32 {
        *self.shared.blocked.borrow()
    }

    /// Most creates ever in progress at once, gated ones included.
    pub fn peak_in_flight(&self) -> u32 {
        self.shared.state().peak_in_flight
    }

    pub fn total_creates(&self) -> u32 {
        self.shared.state().create_calls
    }

    /// Every name `create` was called for, in call order.
    pub fn created(&self) -> Vec<String> {
        self.shared.state().created.clone()
    }

    /// Names with a live backend resource, sorted.
    pub fn alive(&self) -> Vec<String> {
        let mut alive: Vec<String> = self.shared.state().alive.iter().cloned().collect();
        alive.sort();
        alive
    }

    /// Make a resource vanish behind the orchestrator's back.
    pub fn remove_resource(&self, name: &str) {
        self.shared.state().alive.remove(name);
    }
}

#[derive(Debug)]
pub struct MockNode {
    meta: NodeMeta,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("node_type", &self.node_type)
            .finish()
    }
}

#[async_trait]
impl Node for MockNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    async fn create(&mut self, peers: &[String]) -> NodeResult<String> {
        self.meta.assert_initialized();
        self.meta.status = NodeStatus::Creating;
        {
            let mut state = self.shared.state();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }

        let open = *self.shared.gate.borrow();
        if !open {
            self.shared.blocked.send_modify(|n| *n += 1);
            let mut gate = self.shared.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
            self.shared.blocked.send_modify(|n| *n -= 1);
        }

        let name = self.meta.name.clone();
        let (call, fail) = {
            let mut state = self.shared.state();
            state.in_flight -= 1;
            state.create_calls += 1;
            let call = state.create_calls;
            *state.creates.entry(name.clone()).or_default() += 1;
            state.created.push(name.clone());
            state.alive.insert(name.clone());
            state.peers.insert(name.clone(), peers.to_vec());
            let fail = match &state.failure {
                FailurePlan::Never => false,
                FailurePlan::Always => true,
                FailurePlan::Nth(n) => call == *n,
                FailurePlan::NameContains(pattern) => name.contains(pattern.as_str()),
            };
            (call, fail)
        };

        if fail {
            self.meta.status = NodeStatus::Failed;
            return Err(NodeError::Deployment {
                name,
                log: "==> launch\nmock failure\n".to_string(),
            });
        }
        self.meta.address = Some(format!("10.0.{}.{}", call / 250, call % 250 + 1));
        self.meta.status = NodeStatus::Running;
        Ok("==> launch\n".to_string())
    }

    async fn restart(&mut self) -> NodeResult<()> {
        let mut state = self.shared.state();
        if !state.alive.contains(&self.meta.name) {
            return Err(NodeError::MissingResource(self.meta.name.clone()));
        }
        *state.restarts.entry(self.meta.name.clone()).or_default() += 1;
        self.meta.observe(Some(NodeStatus::Running));
        Ok(())
    }

    async fn delete(&mut self) -> NodeResult<()> {
        let mut state = self.shared.state();
        *state.deletes.entry(self.meta.name.clone()).or_default() += 1;
        if state
            .failing_deletes
            .as_deref()
            .is_some_and(|pattern| self.meta.name.contains(pattern))
        {
            return Err(NodeError::Driver(format!("cannot delete {}", self.meta.name)));
        }
        if state.alive.remove(&self.meta.name) {
            self.meta.status = NodeStatus::Exited;
        }
        Ok(())
    }

    async fn refresh_status(&mut self) -> NodeResult<NodeStatus> {
        if !self.shared.state().alive.contains(&self.meta.name) {
            self.meta.observe(Some(NodeStatus::Exited));
        }
        Ok(self.meta.status)
    }
}

#[async_trait]
impl NodeFactory for MockBackend {
    fn node_type(&self) -> NodeType {
        self.shared.node_type
    }

    fn new_node(&self, name: &str, _spec: &JobSpec, role: NodeRole) -> Box<dyn Node> {
        Box::new(MockNode {
            meta: NodeMeta::new(name, role, self.shared.node_type),
            shared: Arc::clone(&self.shared),
        })
    }

    async fn restore_node(&self, _spec: &JobSpec, record: &NodeRecord) -> NodeResult<Box<dyn Node>> {
        if !self.shared.state().alive.contains(&record.name) {
            return Err(NodeError::NotFound(record.name.clone()));
        }
        Ok(Box::new(MockNode {
            meta: NodeMeta::from_record(record),
            shared: Arc::clone(&self.shared),
        }))
    }
}
