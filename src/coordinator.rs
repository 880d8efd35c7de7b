//! `EventCoordinator` — fan-in of per-agent emitters into one ordered,
//! bounded, replayable `SessionEvent` stream.
//!
//! One coordinator task is the single logical publisher: agents push
//! `AgentEvent`s onto a shared `mpsc` channel, the publisher task assigns
//! `seq`, resolves tool names, coalesces terminals, appends to the ring
//! buffer, and fans out to a `broadcast` channel for push subscribers plus
//! a local FIFO for each pull-based `aggregate()` iterator.

use crate::model::{AgentEvent, EventKind, SessionEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

struct RingBuffer {
    events: VecDeque<SessionEvent>,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self { events: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append; when capacity is exceeded, drop the oldest half atomically —
    /// a cheap amortized trim that preserves ordering of the kept suffix.
    fn push(&mut self, event: SessionEvent) {
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            let drop_count = self.events.len() / 2;
            self.events.drain(..drop_count);
        }
    }

    fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.iter().cloned().collect()
    }
}

struct PublisherState {
    seq: u64,
    tool_names: HashMap<String, String>,
    terminal_seen: HashSet<(String, String)>,
    ring: RingBuffer,
}

/// Fan-in aggregator. Cheap to clone: all shared state lives behind `Arc`.
#[derive(Clone)]
pub struct EventCoordinator {
    tx: mpsc::UnboundedSender<AgentEvent>,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    state: Arc<Mutex<PublisherState>>,
}

impl EventCoordinator {
    pub fn new(event_buffer_size: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
        let (broadcast_tx, _) = broadcast::channel(event_buffer_size.max(16));
        let state = Arc::new(Mutex::new(PublisherState {
            seq: 0,
            tool_names: HashMap::new(),
            terminal_seen: HashSet::new(),
            ring: RingBuffer::new(event_buffer_size),
        }));

        let publisher_state = state.clone();
        let publisher_broadcast = broadcast_tx.clone();
        tokio::spawn(async move {
            while let Some(agent_event) = rx.recv().await {
                let mut state = publisher_state.lock().await;
                if let Some(published) = publish_one(&mut state, agent_event) {
                    drop(state);
                    // A broadcast send failing just means there are currently
                    // no push subscribers; pull subscribers still see the
                    // event via the ring buffer / their own replay cursor.
                    let _ = publisher_broadcast.send(published);
                }
            }
        });

        Self { tx, broadcast_tx, state }
    }

    /// Emitter handle an agent/pool entry uses to push its events into the
    /// coordinator. Forwarding is idempotent with respect to `subscribe` —
    /// there is no separate per-agent registration step in this
    /// implementation; any sender holding this coordinator can publish.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    /// Push-mode subscription: a `broadcast::Receiver` yielding every event
    /// published from this point on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Pull-mode: an async iterator starting from a replay of the ring
    /// buffer's current contents, then live events thereafter. Late
    /// subscribers therefore see the most recent `N` (or however many
    /// remain after halving) events before catching up to real time.
    pub async fn aggregate(&self) -> AggregateStream {
        let backlog = {
            let state = self.state.lock().await;
            state.ring.snapshot()
        };
        let receiver = self.broadcast_tx.subscribe();
        AggregateStream { backlog: backlog.into(), receiver }
    }
}

fn publish_one(state: &mut PublisherState, event: AgentEvent) -> Option<SessionEvent> {
    let AgentEvent { agent_id, kind } = event;

    let kind = match kind {
        EventKind::ToolStart { tool_use_id, tool_name, input } => {
            state.tool_names.insert(tool_use_id.clone(), tool_name.clone());
            EventKind::ToolStart { tool_use_id, tool_name, input }
        }
        EventKind::ToolResult { tool_use_id, content, is_error, .. } => {
            // An unseen tool_use_id resolves to itself.
            let tool_name = state
                .tool_names
                .get(&tool_use_id)
                .cloned()
                .unwrap_or_else(|| tool_use_id.clone());
            EventKind::ToolResult { tool_use_id, tool_name, content, is_error }
        }
        other => other,
    };

    if kind.is_terminal() {
        let task_id = kind.task_id().unwrap_or("").to_string();
        let key = (agent_id.clone(), task_id);
        if !state.terminal_seen.insert(key) {
            // Duplicate terminal for this (agentId, taskId); drop silently.
            return None;
        }
    }

    state.seq += 1;
    let published = SessionEvent { seq: state.seq, agent_id, kind };
    state.ring.push(published.clone());
    Some(published)
}

/// Lazy, infinite pull-mode sequence. Replays the ring-buffer backlog first,
/// then yields live broadcast events.
pub struct AggregateStream {
    backlog: VecDeque<SessionEvent>,
    receiver: broadcast::Receiver<SessionEvent>,
}

impl AggregateStream {
    /// Yield the next event, or `None` if the coordinator has shut down
    /// (all senders dropped).
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
