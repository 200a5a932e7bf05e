use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::outcome::SendOutcome;

/// Receives the outcome of a send, exactly once per attempt.
pub trait SendCallback
where
    Self: Send + Sync + 'static,
{
    /// Called when the message was accepted (and, for transactions, committed).
    fn on_success(&self, outcome: &SendOutcome);

    /// Called with the failure cause otherwise.
    fn on_failure(&self, outcome: &SendOutcome, error: &Error);
}

struct FnCallback<S, F> {
    on_success: S,
    on_failure: F,
}

impl<S, F> SendCallback for FnCallback<S, F>
where
    S: Fn(&SendOutcome) + Send + Sync + 'static,
    F: Fn(&SendOutcome, &Error) + Send + Sync + 'static,
{
    fn on_success(&self, outcome: &SendOutcome) {
        (self.on_success)(outcome);
    }

    fn on_failure(&self, outcome: &SendOutcome, error: &Error) {
        (self.on_failure)(outcome, error);
    }
}

/// Builds a callback from a pair of closures.
pub fn callback_fn<S, F>(on_success: S, on_failure: F) -> Arc<dyn SendCallback>
where
    S: Fn(&SendOutcome) + Send + Sync + 'static,
    F: Fn(&SendOutcome, &Error) + Send + Sync + 'static,
{
    Arc::new(FnCallback {
        on_success,
        on_failure,
    })
}

/// Hands an outcome to the callback, synthesizing a failure cause with
/// `fallback` when the outcome failed without one.
pub(crate) fn respond(
    callback: Option<&Arc<dyn SendCallback>>,
    outcome: &SendOutcome,
    error: Option<Error>,
    fallback: impl FnOnce() -> Error,
) {
    if let Some(error) = &error {
        warn!(error = %error, outcome = %outcome, "send did not succeed");
    }

    let Some(callback) = callback else {
        return;
    };

    if outcome.success() {
        callback.on_success(outcome);
    } else {
        let error = error.unwrap_or_else(fallback);
        callback.on_failure(outcome, &error);
    }
}
