//! Sends through the dispatcher against the in-memory broker

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::{Order, Outcomes, eventually, messaging};
use parking_lot::Mutex;
use proven_xmq::{
    ConsumerBinding, Envelope, Error, Interceptor, Json, MessageKind, Messaging, ProducerBinding,
    ProducerParam, ReceivedMessage, handler_fn,
};
use proven_xmq_memory::{MemoryBroker, MemoryConnector};
use tracing_test::traced_test;

fn order_producer() -> ProducerBinding {
    ProducerBinding::new("OrderProducer", "send_order", "orders").tag("created")
}

#[tokio::test]
#[traced_test]
async fn test_normal_send_reaches_consumer() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let received = Arc::new(Mutex::new(Vec::new()));

    let sink = received.clone();
    messaging
        .register(
            ConsumerBinding::new("OrderListener", "on_order", "orders", "billing"),
            handler_fn(move |Json(order): Json<Order>| {
                sink.lock().push(order);
                Ok(())
            }),
        )
        .await
        .unwrap();

    let outcomes = Outcomes::new();
    messaging
        .send(
            &order_producer(),
            ProducerParam::normal(Order { id: 42 }).with_business_id("order-42"),
            outcomes.callback(),
        )
        .await
        .unwrap();

    let successes = outcomes.successes();
    assert_eq!(successes.len(), 1);
    assert!(outcomes.failures().is_empty());
    let message_id = successes[0].message_id().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&message_id).is_ok());
    assert_eq!(
        successes[0].ext_info(),
        Some("msgExt{topic=orders,tag=created,keys=[\"order-42\"]}")
    );

    eventually(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], Order { id: 42 });

    let published = broker.published();
    assert_eq!(published[0].message_id.as_deref(), Some(message_id.as_str()));
    assert_eq!(published[0].body.as_deref(), Some(br#"{"id":42}"#.as_slice()));
    assert!(logs_contain("dispatching send"));
}

#[tokio::test]
#[traced_test]
async fn test_async_send_reports_on_callback() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let outcomes = Outcomes::new();

    messaging
        .send(
            &order_producer().async_send(true),
            ProducerParam::normal(Order { id: 1 }),
            outcomes.callback(),
        )
        .await
        .unwrap();

    eventually(|| outcomes.total() == 1).await;
    assert_eq!(outcomes.successes().len(), 1);
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_broker_failure_goes_to_callback() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let outcomes = Outcomes::new();

    // every attempt allowed by the producer's retry attempts fails
    broker.fail_next_sends(3);
    messaging
        .send(
            &order_producer(),
            ProducerParam::normal(Order { id: 7 }),
            outcomes.callback(),
        )
        .await
        .unwrap();

    assert!(outcomes.successes().is_empty());
    let failures = outcomes.failures();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].0.success());
    assert!(failures[0].1.contains("injected send failure"));
    assert!(broker.published().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_invalid_parameters_never_reach_broker() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let outcomes = Outcomes::new();

    let delayed = order_producer().kind(MessageKind::Delayed);
    let err = messaging
        .send(&delayed, ProducerParam::delayed(Order { id: 1 }, 0), outcomes.callback())
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let ordered = order_producer().kind(MessageKind::Ordered);
    let err = messaging
        .send(&ordered, ProducerParam::ordered(Order { id: 1 }, " "), outcomes.callback())
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = messaging
        .send(&ordered, ProducerParam::normal(Order { id: 1 }), outcomes.callback())
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = messaging
        .send(
            &ProducerBinding::new("OrderProducer", "send_order", ""),
            ProducerParam::normal(Order { id: 1 }),
            outcomes.callback(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingField { .. }));

    assert_eq!(outcomes.total(), 0);
    assert!(messaging.producer().registry().is_empty());
    assert!(broker.published().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_delayed_send_is_held_until_deadline() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let outcomes = Outcomes::new();

    let before = SystemTime::now();
    messaging
        .send(
            &order_producer().kind(MessageKind::Delayed),
            ProducerParam::delayed(Order { id: 3 }, 1),
            outcomes.callback(),
        )
        .await
        .unwrap();

    assert_eq!(outcomes.successes().len(), 1);
    assert!(broker.published().is_empty());

    tokio::time::timeout(Duration::from_secs(3), async {
        while broker.published().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    let released = &broker.published()[0];
    let deliver_at = released.deliver_at.unwrap();
    assert!(deliver_at >= before + Duration::from_secs(1));
    assert!(SystemTime::now() >= deliver_at);
}

#[tokio::test]
#[traced_test]
async fn test_ordered_sends_consumed_in_order_per_group() {
    let broker = MemoryBroker::new();
    let messaging = messaging(&broker);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    messaging
        .register(
            ConsumerBinding::new("OrderListener", "on_order", "orders", "billing"),
            handler_fn(move |message: ReceivedMessage| {
                let order: Order =
                    serde_json::from_slice(message.body.as_deref().unwrap_or_default())?;
                sink.lock().push((message.ordering_key, order.id));
                Ok(())
            }),
        )
        .await
        .unwrap();

    let binding = order_producer().kind(MessageKind::Ordered);
    for id in 0..10 {
        let group = if id % 2 == 0 { "even" } else { "odd" };
        messaging
            .send(&binding, ProducerParam::ordered(Order { id }, group), None)
            .await
            .unwrap();
    }

    eventually(|| seen.lock().len() == 10).await;

    let seen = seen.lock().clone();
    for group in ["even", "odd"] {
        let ids: Vec<u64> = seen
            .iter()
            .filter(|(key, _)| key.as_deref() == Some(group))
            .map(|(_, id)| *id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 5);
    }
}

struct Stamp {
    name: &'static str,
    order: i32,
    topics: Vec<String>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Interceptor<Envelope> for Stamp {
    fn before(&self, message: Envelope) -> Envelope {
        self.calls.lock().push(format!("before:{}", self.name));
        message.with_property(self.name, "1")
    }

    fn after(&self, _message: &Envelope, error: Option<&Error>) -> Result<(), proven_xmq::BoxError> {
        self.calls
            .lock()
            .push(format!("after:{}:{}", self.name, error.is_some()));
        Err("audit store offline".into())
    }

    fn match_topics(&self) -> &[String] {
        &self.topics
    }

    fn order(&self) -> i32 {
        self.order
    }
}

#[tokio::test]
#[traced_test]
async fn test_producer_interceptors_run_in_order() {
    let broker = MemoryBroker::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let stamp = |name: &'static str, order: i32, topics: Vec<&str>| -> Arc<Stamp> {
        Arc::new(Stamp {
            name,
            order,
            topics: topics.into_iter().map(str::to_string).collect(),
            calls: calls.clone(),
        })
    };

    let messaging = Messaging::builder(MemoryConnector::new(broker.clone()), common::properties())
        .producer_interceptor(stamp("late", 10, vec![]))
        .producer_interceptor(stamp("early", 1, vec!["orders"]))
        .producer_interceptor(stamp("elsewhere", 0, vec!["payments"]))
        .build()
        .unwrap();

    let outcomes = Outcomes::new();
    messaging
        .send(&order_producer(), ProducerParam::normal(Order { id: 5 }), outcomes.callback())
        .await
        .unwrap();

    assert_eq!(
        *calls.lock(),
        vec![
            "before:early".to_string(),
            "before:late".to_string(),
            "after:early:false".to_string(),
            "after:late:false".to_string(),
        ]
    );
    assert_eq!(outcomes.successes().len(), 1);

    let properties = &broker.published()[0].properties;
    assert!(properties.contains_key("early"));
    assert!(properties.contains_key("late"));
    assert!(!properties.contains_key("elsewhere"));
    assert!(logs_contain("interceptor 'after' hook failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_share_one_producer() {
    let broker = MemoryBroker::new();
    let messaging = Arc::new(messaging(&broker));

    let sends = (0..16).map(|id| {
        let messaging = messaging.clone();
        tokio::spawn(async move {
            messaging
                .send(&order_producer(), ProducerParam::normal(Order { id }), None)
                .await
        })
    });

    for send in futures::future::join_all(sends).await {
        send.unwrap().unwrap();
    }

    assert_eq!(messaging.producer().registry().len(), 1);
    assert_eq!(broker.published().len(), 16);
}
