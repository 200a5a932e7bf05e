use async_trait::async_trait;

use super::{SendContext, SendStrategy, base_envelope, deliver};
use crate::binding::MessageKind;
use crate::client::ProducerClient;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::param::{SendOptions, SendRequest};

/// Sends messages carrying an ordering key.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderedStrategy;

#[async_trait]
impl<P> SendStrategy<P> for OrderedStrategy
where
    P: ProducerClient,
{
    fn kind(&self) -> MessageKind {
        MessageKind::Ordered
    }

    fn build_envelope(&self, request: &SendRequest) -> Result<Envelope> {
        let SendOptions::Ordered { group } = &request.options else {
            return Err(Error::Validation(
                "ordered send requires an ordering group".to_string(),
            ));
        };

        if group.trim().is_empty() {
            return Err(Error::Validation(
                "the ordered message 'group' is empty".to_string(),
            ));
        }

        Ok(base_envelope(request)?.with_ordering_key(group.clone()))
    }

    async fn send(&self, context: &SendContext<P>, envelope: Envelope, request: SendRequest) {
        deliver(context, envelope, request.is_async, request.callback).await;
    }
}
