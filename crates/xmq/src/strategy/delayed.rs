use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use super::{SendContext, SendStrategy, base_envelope, deliver};
use crate::binding::MessageKind;
use crate::client::ProducerClient;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::param::{SendOptions, SendRequest};

/// Sends messages that become deliverable after a delay.
#[derive(Clone, Copy, Debug, Default)]
pub struct DelayedStrategy;

#[async_trait]
impl<P> SendStrategy<P> for DelayedStrategy
where
    P: ProducerClient,
{
    fn kind(&self) -> MessageKind {
        MessageKind::Delayed
    }

    fn build_envelope(&self, request: &SendRequest) -> Result<Envelope> {
        let SendOptions::Delayed { delay_secs } = request.options else {
            return Err(Error::Validation(
                "delayed send requires a delay".to_string(),
            ));
        };

        let delay = u64::try_from(delay_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "the delayed message 'delay_secs' must be positive, got {delay_secs}"
                ))
            })?;

        Ok(base_envelope(request)?.with_deliver_at(SystemTime::now() + delay))
    }

    async fn send(&self, context: &SendContext<P>, envelope: Envelope, request: SendRequest) {
        deliver(context, envelope, request.is_async, request.callback).await;
    }
}
