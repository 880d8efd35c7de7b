//! Process-wide, human-readable agent ids.
//!
//! A per-tier-prefix counter behind `lazy_static`, used for shared process
//! state. `reset()` survives as an explicit test-isolation hook, since the
//! counters are otherwise process-global.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;

lazy_static! {
    static ref COUNTERS: Mutex<HashMap<String, u64>> = Mutex::new(HashMap::new());
}

/// Generates ids of the form `<prefix>-<incrementing-counter>`, one counter
/// per prefix, process-wide.
pub struct AgentNameGenerator;

impl AgentNameGenerator {
    /// Allocate the next id for `prefix`, e.g. `"haiku-1"`, then `"haiku-2"`.
    pub fn next(prefix: &str) -> String {
        let mut counters = COUNTERS.lock().expect("agent id counter poisoned");
        let counter = counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{}-{}", prefix, counter)
    }

    /// Reset all counters to zero. Test-only hook; a real process never
    /// recycles an id, since downstream consumers key state off of it.
    pub fn reset() {
        let mut counters = COUNTERS.lock().expect("agent id counter poisoned");
        counters.clear();
    }
}

/// Generates opaque task ids. Uses `uuid` unless a deterministic seed is
/// configured (`RuntimeConfig::session_id_seed`), in which case ids are
/// sequential and reproducible for tests.
pub struct TaskIdGenerator {
    seeded: Option<Mutex<u64>>,
}

impl TaskIdGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seeded: seed.map(Mutex::new),
        }
    }

    pub fn next(&self) -> String {
        match &self.seeded {
            Some(counter) => {
                let mut n = counter.lock().expect("task id counter poisoned");
                *n += 1;
                format!("t-{}", n)
            }
            None => format!("t-{}", uuid::Uuid::new_v4()),
        }
    }
}
