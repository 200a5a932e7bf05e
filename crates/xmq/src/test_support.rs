//! Stub broker clients shared by the unit tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::callback::SendCallback;
use crate::client::{
    BrokerError, Closeable, Connector, ConsumerClient, ConsumerOptions, MessageListener,
    ProducerClient, ProducerOptions, SendReceipt, Transaction, TransactionRecheck,
};
use crate::envelope::Envelope;
use crate::error::Error;
use crate::outcome::SendOutcome;

#[derive(Debug, Error)]
#[error("stub: {0}")]
pub struct StubError(pub String);

impl BrokerError for StubError {}

fn stub_err(what: &str) -> StubError {
    StubError(format!("{what} failed"))
}

#[derive(Default)]
struct ProducerState {
    receipt: Mutex<Option<String>>,
    sent: Mutex<Vec<Envelope>>,
    half_sent: Mutex<Vec<Envelope>>,
    send_calls: AtomicUsize,
    begin_calls: AtomicUsize,
    half_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_send: AtomicBool,
    fail_begin: AtomicBool,
    fail_half: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_close: AtomicBool,
}

/// Producer returning receipt `R-1` unless told otherwise. Clones share state.
#[derive(Clone)]
pub struct StubProducer {
    state: Arc<ProducerState>,
}

impl StubProducer {
    pub fn new() -> Self {
        let state = ProducerState::default();
        *state.receipt.lock() = Some("R-1".to_string());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn empty_receipt(&self) {
        *self.state.receipt.lock() = None;
    }

    pub fn fail_send(&self) {
        self.state.fail_send.store(true, Ordering::SeqCst);
    }

    pub fn fail_begin(&self) {
        self.state.fail_begin.store(true, Ordering::SeqCst);
    }

    pub fn fail_half(&self) {
        self.state.fail_half.store(true, Ordering::SeqCst);
    }

    pub fn fail_commit(&self) {
        self.state.fail_commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self) {
        self.state.fail_rollback.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.state.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.state.sent.lock().clone()
    }

    pub fn half_sent(&self) -> Vec<Envelope> {
        self.state.half_sent.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.state.send_calls.load(Ordering::SeqCst)
    }

    pub fn begin_calls(&self) -> usize {
        self.state.begin_calls.load(Ordering::SeqCst)
    }

    pub fn half_calls(&self) -> usize {
        self.state.half_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.state.commit_calls.load(Ordering::SeqCst)
    }

    pub fn rollback_calls(&self) -> usize {
        self.state.rollback_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    fn receipt(&self) -> SendReceipt {
        SendReceipt {
            message_id: self.state.receipt.lock().clone(),
        }
    }
}

#[async_trait]
impl Closeable for StubProducer {
    type Error = StubError;

    async fn close(&self) -> Result<(), Self::Error> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(stub_err("close"));
        }
        Ok(())
    }
}

pub struct StubTransaction {
    state: Arc<ProducerState>,
}

#[async_trait]
impl Transaction for StubTransaction {
    type Error = StubError;

    async fn commit(self) -> Result<(), Self::Error> {
        self.state.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_commit.load(Ordering::SeqCst) {
            return Err(stub_err("commit"));
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        self.state.rollback_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_rollback.load(Ordering::SeqCst) {
            return Err(stub_err("rollback"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProducerClient for StubProducer {
    type Transaction = StubTransaction;

    async fn send(&self, message: Envelope) -> Result<SendReceipt, Self::Error> {
        self.state.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_send.load(Ordering::SeqCst) {
            return Err(stub_err("send"));
        }
        self.state.sent.lock().push(message);
        Ok(self.receipt())
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, Self::Error> {
        self.state.begin_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_begin.load(Ordering::SeqCst) {
            return Err(stub_err("begin"));
        }
        Ok(StubTransaction {
            state: self.state.clone(),
        })
    }

    async fn send_half(
        &self,
        message: Envelope,
        _transaction: &Self::Transaction,
    ) -> Result<SendReceipt, Self::Error> {
        self.state.half_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_half.load(Ordering::SeqCst) {
            return Err(stub_err("half send"));
        }
        self.state.half_sent.lock().push(message);
        Ok(self.receipt())
    }
}

#[derive(Clone, Debug, Default)]
pub struct StubConsumer {
    close_calls: Arc<AtomicUsize>,
}

impl StubConsumer {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Closeable for StubConsumer {
    type Error = StubError;

    async fn close(&self) -> Result<(), Self::Error> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ConsumerClient for StubConsumer {}

#[derive(Default)]
struct ConnectorState {
    producer_builds: AtomicUsize,
    consumer_builds: AtomicUsize,
    fail_build: AtomicBool,
    producer_options: Mutex<Vec<ProducerOptions>>,
    consumer_options: Mutex<Vec<ConsumerOptions>>,
    rechecks: Mutex<Vec<Arc<dyn TransactionRecheck>>>,
    listeners: Mutex<Vec<Arc<dyn MessageListener>>>,
}

/// Connector handing out clones of one shared producer and consumer.
#[derive(Clone)]
pub struct StubConnector {
    pub producer: StubProducer,
    pub consumer: StubConsumer,
    state: Arc<ConnectorState>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self {
            producer: StubProducer::new(),
            consumer: StubConsumer::default(),
            state: Arc::new(ConnectorState::default()),
        }
    }

    pub fn fail_build(&self) {
        self.state.fail_build.store(true, Ordering::SeqCst);
    }

    pub fn producer_builds(&self) -> usize {
        self.state.producer_builds.load(Ordering::SeqCst)
    }

    pub fn consumer_builds(&self) -> usize {
        self.state.consumer_builds.load(Ordering::SeqCst)
    }

    pub fn producer_options(&self) -> Vec<ProducerOptions> {
        self.state.producer_options.lock().clone()
    }

    pub fn consumer_options(&self) -> Vec<ConsumerOptions> {
        self.state.consumer_options.lock().clone()
    }

    pub fn recheck(&self, index: usize) -> Arc<dyn TransactionRecheck> {
        self.state.rechecks.lock()[index].clone()
    }

    pub fn recheck_count(&self) -> usize {
        self.state.rechecks.lock().len()
    }

    pub fn listener(&self, index: usize) -> Arc<dyn MessageListener> {
        self.state.listeners.lock()[index].clone()
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Error = StubError;
    type Producer = StubProducer;
    type Consumer = StubConsumer;

    async fn build_producer(
        &self,
        options: ProducerOptions,
        recheck: Option<Arc<dyn TransactionRecheck>>,
    ) -> Result<Self::Producer, Self::Error> {
        if self.state.fail_build.load(Ordering::SeqCst) {
            return Err(stub_err("build producer"));
        }
        self.state.producer_builds.fetch_add(1, Ordering::SeqCst);
        self.state.producer_options.lock().push(options);
        if let Some(recheck) = recheck {
            self.state.rechecks.lock().push(recheck);
        }
        Ok(self.producer.clone())
    }

    async fn build_consumer(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Self::Consumer, Self::Error> {
        if self.state.fail_build.load(Ordering::SeqCst) {
            return Err(stub_err("build consumer"));
        }
        self.state.consumer_builds.fetch_add(1, Ordering::SeqCst);
        self.state.consumer_options.lock().push(options);
        self.state.listeners.lock().push(listener);
        Ok(self.consumer.clone())
    }
}

/// Callback recording every outcome it receives.
#[derive(Default)]
pub struct RecordingCallback {
    successes: Mutex<Vec<SendOutcome>>,
    failures: Mutex<Vec<(SendOutcome, String)>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn successes(&self) -> usize {
        self.successes.lock().len()
    }

    pub fn failures(&self) -> usize {
        self.failures.lock().len()
    }

    pub fn success_outcomes(&self) -> Vec<SendOutcome> {
        self.successes.lock().clone()
    }

    pub fn failure_outcomes(&self) -> Vec<SendOutcome> {
        self.failures.lock().iter().map(|(o, _)| o.clone()).collect()
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl SendCallback for RecordingCallback {
    fn on_success(&self, outcome: &SendOutcome) {
        self.successes.lock().push(outcome.clone());
    }

    fn on_failure(&self, outcome: &SendOutcome, error: &Error) {
        self.failures
            .lock()
            .push((outcome.clone(), error.to_string()));
    }
}

/// Waits until `condition` holds, polling on the runtime.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
