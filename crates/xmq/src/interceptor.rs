use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::envelope::{Envelope, ReceivedMessage};
use crate::error::{BoxError, Error};

/// Order assigned to interceptors that do not declare one.
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// A before/after hook around a send or a consume of `M`.
pub trait Interceptor<M>
where
    Self: Send + Sync + 'static,
{
    /// Transforms the message before the operation.
    fn before(&self, message: M) -> M {
        message
    }

    /// Observes the message after the operation, with its error if it failed.
    ///
    /// # Errors
    /// Failures are logged and never replace the operation's result.
    fn after(&self, _message: &M, _error: Option<&Error>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Topics this interceptor applies to; empty means every topic.
    fn match_topics(&self) -> &[String] {
        &[]
    }

    /// Chain position; lower runs first.
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }
}

/// Interceptor around producer sends.
pub type ProducerInterceptor = dyn Interceptor<Envelope>;

/// Interceptor around consumer deliveries.
pub type ConsumerInterceptor = dyn Interceptor<ReceivedMessage>;

/// An ordered, read-only list of interceptors.
pub struct InterceptorChain<M>
where
    M: 'static,
{
    interceptors: Vec<Arc<dyn Interceptor<M>>>,
}

impl<M> Default for InterceptorChain<M> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }
}

impl<M> InterceptorChain<M> {
    /// Creates a chain sorted by ascending order, keeping discovery order on ties.
    #[must_use]
    pub fn new(mut interceptors: Vec<Arc<dyn Interceptor<M>>>) -> Self {
        interceptors.sort_by_key(|interceptor| interceptor.order());
        Self { interceptors }
    }

    /// Number of interceptors in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    fn matching<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Arc<dyn Interceptor<M>>> {
        self.interceptors.iter().filter(move |interceptor| {
            let topics = interceptor.match_topics();
            topics.is_empty() || topics.iter().any(|t| t == topic)
        })
    }

    /// Runs every matching `before` hook, feeding each the previous result.
    ///
    /// A hook that panics is skipped and the next one sees its input.
    pub fn run_before(&self, topic: &str, message: M) -> M
    where
        M: Clone,
    {
        self.matching(topic).fold(message, |message, interceptor| {
            let input = message.clone();
            panic::catch_unwind(AssertUnwindSafe(|| interceptor.before(input))).unwrap_or_else(
                |_| {
                    error!(topic, "interceptor 'before' hook panicked");
                    message
                },
            )
        })
    }

    /// Runs every matching `after` hook, logging and swallowing their failures.
    pub fn run_after(&self, topic: &str, message: &M, error: Option<&Error>) {
        for interceptor in self.matching(topic) {
            match panic::catch_unwind(AssertUnwindSafe(|| interceptor.after(message, error))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(topic, error = %e, "interceptor 'after' hook failed"),
                Err(_) => error!(topic, "interceptor 'after' hook panicked"),
            }
        }
    }
}
