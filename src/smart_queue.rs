//! `SmartMessageQueue` — priority bands, auto-injection, and force-inject on
//! top of the plain FIFO queue contract.
//!
//! The three priority bands map onto three `VecDeque`s guarded by one
//! `tokio::sync::Mutex`, selected in priority order by the single consumer.

use crate::error::{CoreError, Result};
use crate::model::Priority;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, Notify};

/// One queued item, carrying an optional ack — synthesized auto-injected
/// prompts have no producer waiting on an ack, so their slot is `None`.
pub struct QueuedItem {
    pub payload: String,
    ack: Option<oneshot::Sender<()>>,
}

impl QueuedItem {
    pub fn ack(self) {
        if let Some(tx) = self.ack {
            let _ = tx.send(());
        }
    }
}

/// A fixed, construction-time rule: when the next item about to be drained
/// from the NORMAL band matches `trigger`, synthesize `payload` and deliver
/// it first. `trigger` is reference-counted rather than boxed so a rule set
/// can be cloned once per spawned session sharing the same pool.
#[derive(Clone)]
pub struct InjectionRule {
    pub trigger: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    pub payload: String,
}

impl InjectionRule {
    pub fn new(payload: impl Into<String>, trigger: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            trigger: Arc::new(trigger),
            payload: payload.into(),
        }
    }
}

struct State {
    urgent: VecDeque<QueuedItem>,
    normal: VecDeque<QueuedItem>,
    todo: VecDeque<QueuedItem>,
    /// Guards against re-injecting for the same front-of-normal item on
    /// every poll; cleared once the real item is drained.
    injected_for_current_normal_head: bool,
    aborted: bool,
}

pub struct SmartMessageQueue {
    state: Mutex<State>,
    notify: Notify,
    injection_rules: Vec<InjectionRule>,
}

impl SmartMessageQueue {
    pub fn new(injection_rules: Vec<InjectionRule>) -> Self {
        Self {
            state: Mutex::new(State {
                urgent: VecDeque::new(),
                normal: VecDeque::new(),
                todo: VecDeque::new(),
                injected_for_current_normal_head: false,
                aborted: false,
            }),
            notify: Notify::new(),
            injection_rules,
        }
    }

    pub async fn enqueue(&self, priority: Priority, payload: impl Into<String>) -> Result<Ack> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.aborted {
                return Err(CoreError::Aborted);
            }
            let item = QueuedItem {
                payload: payload.into(),
                ack: Some(tx),
            };
            match priority {
                Priority::Urgent => state.urgent.push_back(item),
                Priority::Normal => {
                    state.normal.push_back(item);
                    state.injected_for_current_normal_head = false;
                }
                Priority::Todo => state.todo.push_back(item),
            }
        }
        self.notify.notify_one();
        Ok(rx)
    }

    /// Out-of-band: place an item at the head of URGENT regardless of any
    /// in-flight state.
    pub async fn force_inject(&self, payload: impl Into<String>) -> Result<Ack> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.aborted {
                return Err(CoreError::Aborted);
            }
            state.urgent.push_front(QueuedItem {
                payload: payload.into(),
                ack: Some(tx),
            });
        }
        self.notify.notify_one();
        Ok(rx)
    }

    /// Yield the next item per the selection rule: URGENT, then NORMAL
    /// (applying at most one matching auto-injection first), then TODO;
    /// `None` once aborted with nothing left to drain.
    pub async fn next(&self) -> Option<QueuedItem> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.urgent.pop_front() {
                    return Some(item);
                }
                if !state.normal.is_empty() {
                    if !state.injected_for_current_normal_head {
                        let front_payload = state.normal.front().unwrap().payload.clone();
                        if let Some(rule) = self.injection_rules.iter().find(|r| (r.trigger)(&front_payload)) {
                            state.injected_for_current_normal_head = true;
                            return Some(QueuedItem {
                                payload: rule.payload.clone(),
                                ack: None,
                            });
                        }
                    }
                    state.injected_for_current_normal_head = false;
                    return state.normal.pop_front();
                }
                if let Some(item) = state.todo.pop_front() {
                    return Some(item);
                }
                if state.aborted {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        for item in state.urgent.drain(..) {
            item.ack();
        }
        for item in state.normal.drain(..) {
            item.ack();
        }
        for item in state.todo.drain(..) {
            item.ack();
        }
    }

    pub async fn abort(&self) {
        let mut state = self.state.lock().await;
        state.aborted = true;
        for item in state.urgent.drain(..) {
            item.ack();
        }
        for item in state.normal.drain(..) {
            item.ack();
        }
        for item in state.todo.drain(..) {
            item.ack();
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

use crate::queue::Ack;
