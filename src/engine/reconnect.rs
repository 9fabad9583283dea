// RinChat Core — reconnection supervisor.
// Owns the retry and backoff state for every named connection; connections
// themselves own only their transport handle. One supervisor instance is
// constructed per client context and shared by name across its channels.

use crate::engine::ui::{ConnectionHealth, StatusSink};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Default backoff: 1200ms base growing by 1.4x per failed attempt, giving
/// up after 8 attempts.
const BASE_DELAY_MS: u64 = 1200;
const GROWTH_FACTOR: f64 = 1.4;
const MAX_RETRIES: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub growth_factor: f64,
    /// Attempt ceiling. Growth is uncapped; this bounds the chain instead.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            growth_factor: GROWTH_FACTOR,
            max_retries: MAX_RETRIES,
        }
    }
}

impl BackoffPolicy {
    /// Delay scheduled after `retries` failed attempts.
    pub fn delay_for(&self, retries: u32) -> Duration {
        self.base_delay.mul_f64(self.growth_factor.powi(retries as i32))
    }
}

type ConnectFn = Arc<dyn Fn() + Send + Sync>;

struct Item {
    connect: ConnectFn,
    connected: bool,
    retries: u32,
    timer: Option<AbortHandle>,
    failed: bool,
}

/// Supervises N named connections independently: per-connection backoff
/// timers, and one aggregate degraded/failed signal pushed to the status
/// collaborator after every state change.
pub struct ReconnectSupervisor {
    items: Mutex<HashMap<String, Item>>,
    policy: BackoffPolicy,
    status: Arc<dyn StatusSink>,
}

impl ReconnectSupervisor {
    pub fn new(policy: BackoffPolicy, status: Arc<dyn StatusSink>) -> Arc<Self> {
        Arc::new(ReconnectSupervisor {
            items: Mutex::new(HashMap::new()),
            policy,
            status,
        })
    }

    /// Idempotent: re-registering an existing name is a no-op.
    pub fn register(&self, name: &str, connect: impl Fn() + Send + Sync + 'static) {
        let mut items = self.items.lock();
        if items.contains_key(name) {
            return;
        }
        items.insert(
            name.to_string(),
            Item {
                connect: Arc::new(connect),
                connected: false,
                retries: 0,
                timer: None,
                failed: false,
            },
        );
    }

    /// The connection reached Open: reset its retry chain and cancel any
    /// pending timer, then re-evaluate the aggregate signal.
    pub fn mark_connected(&self, name: &str) {
        {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(name) else { return };
            item.connected = true;
            item.retries = 0;
            item.failed = false;
            if let Some(timer) = item.timer.take() {
                timer.abort();
            }
        }
        info!("[reconnect] {} connected", name);
        self.publish();
    }

    /// The connection dropped. A close racing an error can land here twice
    /// for the same attempt; only one backoff chain may run.
    pub fn mark_disconnected(self: &Arc<Self>, name: &str) {
        {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(name) else { return };
            if !item.connected && item.timer.is_some() {
                return;
            }
            item.connected = false;
        }
        warn!("[reconnect] {} disconnected", name);
        self.publish();
        self.schedule_retry(name);
    }

    fn schedule_retry(self: &Arc<Self>, name: &str) {
        let mut exhausted = false;
        {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(name) else { return };
            if item.timer.is_some() {
                return;
            }
            if item.retries >= self.policy.max_retries {
                item.failed = true;
                exhausted = true;
            } else {
                let delay = self.policy.delay_for(item.retries);
                info!(
                    "[reconnect] {}: attempt {} in {}ms",
                    name,
                    item.retries + 1,
                    delay.as_millis()
                );
                let supervisor = Arc::clone(self);
                let task_name = name.to_string();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    supervisor.fire_retry(&task_name);
                });
                // Holding the lock here means the timer task cannot observe
                // the item before its abort handle is stored.
                item.timer = Some(handle.abort_handle());
            }
        }
        if exhausted {
            warn!("[reconnect] {}: retry ceiling reached, giving up", name);
        }
        self.publish();
    }

    fn fire_retry(self: &Arc<Self>, name: &str) {
        let connect = {
            let mut items = self.items.lock();
            let Some(item) = items.get_mut(name) else { return };
            item.timer = None;
            if item.connected {
                return;
            }
            item.retries += 1;
            Arc::clone(&item.connect)
        };
        self.publish();
        connect();
        // A failed attempt surfaces as another close notification, which
        // schedules the next step of the chain via mark_disconnected.
    }

    /// Recompute the aggregate signal and push it to the status sink.
    /// Degraded whenever at least one managed connection is not open;
    /// cleared only when all are open.
    fn publish(&self) {
        let list = self.health();
        if list.iter().any(|h| !h.connected) {
            self.status.show_degraded(&list);
        } else {
            self.status.hide_degraded();
        }
    }

    /// Snapshot of every managed connection, ordered by name.
    pub fn health(&self) -> Vec<ConnectionHealth> {
        let items = self.items.lock();
        let mut list: Vec<ConnectionHealth> = items
            .iter()
            .map(|(name, item)| ConnectionHealth {
                name: name.clone(),
                connected: item.connected,
                retries: item.retries,
                failed: item.failed && !item.connected,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn is_degraded(&self) -> bool {
        self.health().iter().any(|h| !h.connected)
    }
}
