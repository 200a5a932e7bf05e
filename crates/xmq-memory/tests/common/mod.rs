#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proven_xmq::{Error, Messaging, Properties, SendCallback, SendOutcome};
use proven_xmq_memory::{MemoryBroker, MemoryConnector};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
}

/// Records every outcome handed to the callback.
#[derive(Default)]
pub struct Outcomes {
    successes: Mutex<Vec<SendOutcome>>,
    failures: Mutex<Vec<(SendOutcome, String)>>,
}

impl Outcomes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callback(self: &Arc<Self>) -> Option<Arc<dyn SendCallback>> {
        Some(self.clone() as Arc<dyn SendCallback>)
    }

    pub fn successes(&self) -> Vec<SendOutcome> {
        self.successes.lock().clone()
    }

    pub fn failures(&self) -> Vec<(SendOutcome, String)> {
        self.failures.lock().clone()
    }

    pub fn total(&self) -> usize {
        self.successes.lock().len() + self.failures.lock().len()
    }
}

impl SendCallback for Outcomes {
    fn on_success(&self, outcome: &SendOutcome) {
        self.successes.lock().push(outcome.clone());
    }

    fn on_failure(&self, outcome: &SendOutcome, error: &Error) {
        self.failures.lock().push((outcome.clone(), error.to_string()));
    }
}

pub fn properties() -> Properties {
    let mut properties = Properties::new("memory://local");
    properties.consumer.thread_count = 4;
    properties.consumer.retry_attempts = 3;
    properties
}

pub fn messaging(broker: &MemoryBroker) -> Messaging<MemoryConnector> {
    Messaging::new(MemoryConnector::new(broker.clone()), properties()).unwrap()
}

pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
