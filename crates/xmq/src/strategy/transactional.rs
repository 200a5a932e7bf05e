use async_trait::async_trait;
use tracing::debug;

use super::{SendContext, SendStrategy, base_envelope};
use crate::binding::MessageKind;
use crate::client::ProducerClient;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::param::{SendOptions, SendRequest};
use crate::transaction::TransactionCoordinator;

/// Sends half messages resolved by a local transaction.
///
/// Always runs inline: the local action must observe the half-send result
/// before the call returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionalStrategy;

#[async_trait]
impl<P> SendStrategy<P> for TransactionalStrategy
where
    P: ProducerClient,
{
    fn kind(&self) -> MessageKind {
        MessageKind::Transactional
    }

    fn build_envelope(&self, request: &SendRequest) -> Result<Envelope> {
        if !matches!(request.options, SendOptions::Transactional { .. }) {
            return Err(Error::Validation(
                "transactional send requires a local action and a checker".to_string(),
            ));
        }
        base_envelope(request)
    }

    async fn send(&self, context: &SendContext<P>, envelope: Envelope, request: SendRequest) {
        let SendOptions::Transactional { action, .. } = request.options else {
            return;
        };

        if request.is_async {
            debug!(topic = %request.topic, "transactional sends run inline, ignoring async flag");
        }

        let coordinator =
            TransactionCoordinator::new(context.producer.clone(), context.interceptors.clone());
        let state = coordinator
            .execute(envelope, action.as_ref(), request.callback.as_ref())
            .await;
        debug!(topic = %request.topic, state = %state, "transactional send finished");
    }
}
