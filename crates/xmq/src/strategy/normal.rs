use async_trait::async_trait;

use super::{SendContext, SendStrategy, base_envelope, deliver};
use crate::binding::MessageKind;
use crate::client::ProducerClient;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::param::SendRequest;

/// Sends plain messages with neither ordering key nor delivery deadline.
#[derive(Clone, Copy, Debug, Default)]
pub struct NormalStrategy;

#[async_trait]
impl<P> SendStrategy<P> for NormalStrategy
where
    P: ProducerClient,
{
    fn kind(&self) -> MessageKind {
        MessageKind::Normal
    }

    fn build_envelope(&self, request: &SendRequest) -> Result<Envelope> {
        base_envelope(request)
    }

    async fn send(&self, context: &SendContext<P>, envelope: Envelope, request: SendRequest) {
        deliver(context, envelope, request.is_async, request.callback).await;
    }
}
