//! Retry/backoff state machine for the C4 collaborator call, per
//! §4.4/§5. A small explicit state machine using `tokio::time::sleep`.

use std::time::Duration;

use beatline_core::{SemanticConfig, SemanticError};

use super::{RawTimelineDoc, SemanticTimelineProvider};

/// Rotating pool of credentials, consumed on HTTP 429 / quota exhaustion
/// per §6 ("credentials ... read from a configured secret key list;
/// rotation on HTTP 429").
pub struct CredentialRotation {
    keys: Vec<String>,
    active: usize,
}

impl CredentialRotation {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys, active: 0 }
    }

    pub fn current(&self) -> Option<&str> {
        self.keys.get(self.active).map(String::as_str)
    }

    /// Rotates to the next credential; returns `false` if every
    /// credential in the pool has already been tried.
    pub fn rotate(&mut self) -> bool {
        if self.active + 1 >= self.keys.len() {
            return false;
        }
        self.active += 1;
        true
    }
}

/// One attempt's outcome, distinguishing retryable conditions from a
/// hard failure so the caller can decide backoff vs. credential rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Overloaded,
    QuotaExhausted,
    OtherFailure,
}

/// Classifies a [`SemanticError`] into a retry-relevant outcome.
fn classify(error: &SemanticError) -> AttemptOutcome {
    match error {
        SemanticError::QuotaExhausted => AttemptOutcome::QuotaExhausted,
        SemanticError::Unavailable { reason } if reason.to_lowercase().contains("overloaded") => {
            AttemptOutcome::Overloaded
        }
        _ => AttemptOutcome::OtherFailure,
    }
}

/// Calls `provider.fetch` with exponential backoff: doubled wait on
/// "overloaded", credential rotation on quota exhaustion, capped at
/// `config.max_attempts` total attempts (default 3), per §4.4.
pub async fn fetch_with_retry(
    provider: &dyn SemanticTimelineProvider,
    track_display_name: &str,
    duration_seconds: f64,
    config: &SemanticConfig,
    credentials: &mut CredentialRotation,
) -> Result<RawTimelineDoc, SemanticError> {
    let mut wait = Duration::from_millis(500);
    let mut last_error = SemanticError::Unavailable {
        reason: "no attempts made".to_string(),
    };

    for attempt in 1..=config.max_attempts {
        match provider.fetch(track_display_name, duration_seconds).await {
            Ok(doc) => return Ok(doc),
            Err(error) => {
                let outcome = classify(&error);
                last_error = error;

                if attempt == config.max_attempts {
                    break;
                }

                match outcome {
                    AttemptOutcome::Overloaded => {
                        wait *= 2;
                        tokio::time::sleep(wait).await;
                    }
                    AttemptOutcome::QuotaExhausted => {
                        if !credentials.rotate() {
                            log::warn!("semantic timeline: quota exhausted on every credential");
                            return Err(SemanticError::QuotaExhausted);
                        }
                        tokio::time::sleep(wait).await;
                    }
                    AttemptOutcome::OtherFailure => {
                        tokio::time::sleep(wait).await;
                        wait += Duration::from_millis(500);
                    }
                }
            }
        }
    }

    log::warn!(
        "semantic timeline unavailable for {track_display_name} after {} attempts: {last_error}",
        config.max_attempts
    );
    Err(last_error)
}

/// Polls a pending file-processing job every `poll_interval_seconds` for
/// up to `max_polls` attempts (default 2 s/30 polls = 60 s total) before
/// giving up with `SemanticError::Timeout`, per §5's file-processing
/// timeout.
pub async fn poll_until_ready<F, Fut>(config: &SemanticConfig, mut is_ready: F) -> Result<(), SemanticError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for attempt in 1..=config.max_polls {
        if is_ready().await {
            return Ok(());
        }
        if attempt < config.max_polls {
            tokio::time::sleep(Duration::from_secs_f64(config.poll_interval_seconds)).await;
        }
    }
    Err(SemanticError::Timeout {
        attempts: config.max_polls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        succeed_on_attempt: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SemanticTimelineProvider for FlakyProvider {
        async fn fetch(&self, _track_display_name: &str, _duration_seconds: f64) -> Result<RawTimelineDoc, SemanticError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on_attempt {
                Ok(RawTimelineDoc::default())
            } else {
                Err(SemanticError::Unavailable {
                    reason: "overloaded".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success_within_max_attempts() {
        let provider = FlakyProvider {
            succeed_on_attempt: 2,
            calls: AtomicU32::new(0),
        };
        let config = SemanticConfig::default();
        let mut credentials = CredentialRotation::new(vec!["key-a".to_string()]);
        let result = fetch_with_retry(&provider, "track", 180.0, &config, &mut credentials).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_unavailable() {
        let provider = FlakyProvider {
            succeed_on_attempt: 100,
            calls: AtomicU32::new(0),
        };
        let config = SemanticConfig::default();
        let mut credentials = CredentialRotation::new(vec!["key-a".to_string()]);
        let result = fetch_with_retry(&provider, "track", 180.0, &config, &mut credentials).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn credential_rotation_exhausts_after_last_key() {
        let mut credentials = CredentialRotation::new(vec!["a".to_string(), "b".to_string()]);
        assert!(credentials.rotate());
        assert_eq!(credentials.current(), Some("b"));
        assert!(!credentials.rotate());
    }
}
