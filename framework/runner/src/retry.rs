use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use stampede_core::prelude::{DelegatedShutdownListener, FailureKind, RequestOutcome};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_CONTENTION_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(1500);
/// Response text that marks a transient database conflict on the server.
pub const DEFAULT_CONTENTION_MARKERS: &[&str] = &["Deadlock"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// The server reported a conflict that should clear by itself.
    Contention,
    Failure,
}

/// Tells contention apart from other failures.
pub trait FailureClassifier: Debug + Send + Sync {
    /// Only called for attempts that missed their success predicate. `body` is empty when no
    /// response was received.
    fn classify(&self, outcome: &RequestOutcome, body: &str) -> Classification;
}

/// Classifies a failure as contention when the body contains one of the markers.
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new<S: Into<String>>(markers: impl IntoIterator<Item = S>) -> Self {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENTION_MARKERS.iter().copied())
    }
}

impl FailureClassifier for MarkerClassifier {
    fn classify(&self, _outcome: &RequestOutcome, body: &str) -> Classification {
        if self.markers.iter().any(|marker| body.contains(marker.as_str())) {
            Classification::Contention
        } else {
            Classification::Failure
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    /// Set for any attempt that was not a success.
    pub reason_tag: Option<FailureKind>,
}

/// What one attempt produced, as far as the retry loop is concerned.
pub trait AttemptResult {
    fn classification(&self) -> Classification;

    /// The value to return when no more attempts will be made after a failure.
    fn exhausted(self) -> Self;
}

impl AttemptResult for (RequestOutcome, Classification) {
    fn classification(&self) -> Classification {
        self.1
    }

    fn exhausted(self) -> Self {
        (self.0.into_failed(), self.1)
    }
}

/// Bounded retries shared by login and idempotent tasks.
///
/// Contention waits a fixed delay, other failures wait a random delay between the backoff
/// bounds. Delays are not cut short by a stop signal, but no new attempt starts after one.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    contention_delay: Duration,
    backoff_min: Duration,
    backoff_max: Duration,
    classifier: Arc<dyn FailureClassifier>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            contention_delay: DEFAULT_CONTENTION_DELAY,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
            classifier: Arc::new(MarkerClassifier::default()),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first. Values below 1 are raised to 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_contention_delay(mut self, delay: Duration) -> Self {
        self.contention_delay = delay;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min = min;
        self.backoff_max = max.max(min);
        self
    }

    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, outcome: &RequestOutcome, body: &str) -> Classification {
        if outcome.is_success() {
            Classification::Success
        } else {
            self.classifier.classify(outcome, body)
        }
    }

    /// Whether to try again after attempt number `attempt` (starting at 1), and how long to wait.
    pub fn decide(&self, attempt: u32, classification: Classification) -> RetryDecision {
        let (reason, delay) = match classification {
            Classification::Success => {
                return RetryDecision {
                    should_retry: false,
                    delay: Duration::ZERO,
                    reason_tag: None,
                }
            }
            Classification::Contention => (FailureKind::TransientContention, self.contention_delay),
            Classification::Failure => (FailureKind::GenericRequestFailure, self.jitter()),
        };

        if attempt >= self.max_attempts {
            return RetryDecision {
                should_retry: false,
                delay: Duration::ZERO,
                reason_tag: Some(reason),
            };
        }

        RetryDecision {
            should_retry: true,
            delay,
            reason_tag: Some(reason),
        }
    }

    /// Run `action` until it succeeds or the attempts run out. The action is given the attempt
    /// number and the last result is returned.
    pub async fn attempt<F, Fut, T>(&self, action: F) -> T
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        T: AttemptResult,
    {
        self.run(None, action).await
    }

    /// Like [RetryPolicy::attempt], but gives up early once `stop` has been signalled.
    pub async fn attempt_until_stopped<F, Fut, T>(
        &self,
        stop: &DelegatedShutdownListener,
        action: F,
    ) -> T
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        T: AttemptResult,
    {
        self.run(Some(stop), action).await
    }

    async fn run<F, Fut, T>(&self, stop: Option<&DelegatedShutdownListener>, mut action: F) -> T
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        T: AttemptResult,
    {
        let mut attempt = 1;
        loop {
            let result = action(attempt).await;
            let classification = result.classification();
            let decision = self.decide(attempt, classification);

            if !decision.should_retry {
                return match classification {
                    Classification::Success => result,
                    _ => result.exhausted(),
                };
            }

            if stop.is_some_and(|stop| stop.should_shutdown()) {
                log::debug!("Not retrying after attempt {attempt}, stop requested");
                return result.exhausted();
            }

            if let Some(reason) = decision.reason_tag {
                log::debug!(
                    "Attempt {attempt}/{} failed ({reason}), retrying in {:?}",
                    self.max_attempts,
                    decision.delay
                );
            }
            tokio::time::sleep(decision.delay).await;
            attempt += 1;
        }
    }

    fn jitter(&self) -> Duration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }

        rand::thread_rng().gen_range(self.backoff_min..=self.backoff_max)
    }
}
