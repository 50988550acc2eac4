//! Circuit breaker whose state is shared across workers via `ExecutionStore`, so one
//! worker tripping a breaker is visible to every other worker protecting the same
//! external dependency (e.g. a connector slug) without them needing to coordinate directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::persistence::{ExecutionStore, StoreError};

use super::{CircuitBreakerConfig, CircuitState};

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    #[error("circuit breaker '{0}' is half-open and has exhausted its trial calls")]
    HalfOpenExhausted(String),

    #[error("circuit breaker store error: {0}")]
    Store(#[from] StoreError),
}

/// A local cache of the last-observed store record, to avoid hitting the store on every
/// `allow()` call. Refreshed once `cache_duration` has elapsed since `fetched_at`.
struct CachedState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    fetched_at: std::time::Instant,
}

/// Granted by `allow()` when a call may proceed; the caller must consume it via `success()`
/// or `failure()` to report the outcome back to the shared state.
pub struct CircuitBreakerPermit<'a> {
    breaker: &'a DistributedCircuitBreaker,
}

impl<'a> CircuitBreakerPermit<'a> {
    pub async fn success(self) {
        self.breaker.record_success().await;
    }

    pub async fn failure(self) {
        self.breaker.record_failure().await;
    }
}

/// One named circuit breaker backed by `ExecutionStore::get_circuit_breaker` /
/// `upsert_circuit_breaker`. Construct one per protection domain (e.g. per connector slug)
/// and call `allow()` before each external call.
pub struct DistributedCircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn ExecutionStore>,
    local_cache: RwLock<Option<CachedState>>,
    cache_duration: Duration,
}

impl DistributedCircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            key: key.into(),
            config,
            store,
            local_cache: RwLock::new(None),
            cache_duration: Duration::from_millis(250),
        }
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        self.cache_duration = duration;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Checks the current state and either grants a permit or rejects the call. `HalfOpen`
    /// allows calls through (the caller is the trial); a stricter cap on concurrent trials
    /// is left to the caller if needed, since the store doesn't track in-flight counts.
    pub async fn allow(&self) -> Result<CircuitBreakerPermit<'_>, CircuitBreakerError> {
        let record = self.get_state().await?;
        match record.state {
            CircuitState::Closed => Ok(CircuitBreakerPermit { breaker: self }),
            CircuitState::HalfOpen => Ok(CircuitBreakerPermit { breaker: self }),
            CircuitState::Open => {
                if self.should_transition_to_half_open(&record) {
                    self.transition_to_half_open().await?;
                    Ok(CircuitBreakerPermit { breaker: self })
                } else {
                    Err(CircuitBreakerError::Open(self.key.clone()))
                }
            }
        }
    }

    pub async fn state(&self) -> Result<CircuitState, CircuitBreakerError> {
        Ok(self.get_state().await?.state)
    }

    pub async fn reset(&self) -> Result<(), CircuitBreakerError> {
        self.transition_to_closed().await
    }

    async fn record_success(&self) {
        let Ok(record) = self.get_state().await else {
            return;
        };
        match record.state {
            CircuitState::HalfOpen => {
                let success_count = record.success_count + 1;
                if success_count >= self.config.success_threshold {
                    let _ = self.transition_to_closed().await;
                } else {
                    let _ = self
                        .write_state(CircuitState::HalfOpen, record.failure_count, success_count)
                        .await;
                }
            }
            CircuitState::Closed => {
                let _ = self.write_state(CircuitState::Closed, 0, 0).await;
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let Ok(record) = self.get_state().await else {
            return;
        };
        match record.state {
            CircuitState::Closed => {
                let failure_count = record.failure_count + 1;
                if failure_count >= self.config.failure_threshold {
                    let _ = self.transition_to_open().await;
                } else {
                    let _ = self.write_state(CircuitState::Closed, failure_count, 0).await;
                }
            }
            CircuitState::HalfOpen => {
                let _ = self.transition_to_open().await;
            }
            CircuitState::Open => {}
        }
    }

    /// Loads the current record, preferring the local cache when it's fresh enough.
    async fn get_state(&self) -> Result<CachedRecord, CircuitBreakerError> {
        {
            let cache = self.local_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.cache_duration {
                    return Ok(CachedRecord {
                        state: cached.state,
                        failure_count: cached.failure_count,
                        success_count: cached.success_count,
                        opened_at: None,
                    });
                }
            }
        }

        let record = self.store.get_circuit_breaker(&self.key).await?;
        let (state, failure_count, success_count, opened_at) = match record {
            Some(record) => (record.state, record.failure_count, record.success_count, record.opened_at),
            None => (CircuitState::Closed, 0, 0, None),
        };

        let mut cache = self.local_cache.write().await;
        *cache = Some(CachedState {
            state,
            failure_count,
            success_count,
            fetched_at: std::time::Instant::now(),
        });

        Ok(CachedRecord {
            state,
            failure_count,
            success_count,
            opened_at,
        })
    }

    fn should_transition_to_half_open(&self, record: &CachedRecord) -> bool {
        match record.opened_at {
            Some(opened_at) => {
                Utc::now().signed_duration_since(opened_at).to_std().unwrap_or(Duration::ZERO)
                    >= self.config.reset_timeout
            }
            // No opened_at available (e.g. served from cache): conservatively refuse.
            None => false,
        }
    }

    async fn transition_to_open(&self) -> Result<(), CircuitBreakerError> {
        self.write_state(CircuitState::Open, self.config.failure_threshold, 0).await
    }

    async fn transition_to_half_open(&self) -> Result<(), CircuitBreakerError> {
        self.write_state(CircuitState::HalfOpen, 0, 0).await
    }

    async fn transition_to_closed(&self) -> Result<(), CircuitBreakerError> {
        self.write_state(CircuitState::Closed, 0, 0).await
    }

    async fn write_state(
        &self,
        state: CircuitState,
        failure_count: u32,
        success_count: u32,
    ) -> Result<(), CircuitBreakerError> {
        self.store
            .upsert_circuit_breaker(&self.key, state, failure_count, success_count)
            .await?;
        let mut cache = self.local_cache.write().await;
        *cache = Some(CachedState {
            state,
            failure_count,
            success_count,
            fetched_at: std::time::Instant::now(),
        });
        Ok(())
    }
}

struct CachedRecord {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<chrono::DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryExecutionStore;

    fn breaker(config: CircuitBreakerConfig) -> DistributedCircuitBreaker {
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        DistributedCircuitBreaker::new("test-connector", config, store).with_cache_duration(Duration::ZERO)
    }

    #[tokio::test]
    async fn starts_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn allows_calls_when_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        let permit = cb.allow().await.unwrap();
        permit.success().await;
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = breaker(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..3 {
            let permit = cb.allow().await.unwrap();
            permit.failure().await;
        }
        assert_eq!(cb.state().await.unwrap(), CircuitState::Open);
        assert!(matches!(cb.allow().await, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_timeout() {
        let cb = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(20)),
        );
        let permit = cb.allow().await.unwrap();
        permit.failure().await;
        assert_eq!(cb.state().await.unwrap(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        cb.allow().await.unwrap();
        assert_eq!(cb.state().await.unwrap(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let cb = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(2)
                .with_reset_timeout(Duration::from_millis(10)),
        );
        let permit = cb.allow().await.unwrap();
        permit.failure().await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let permit = cb.allow().await.unwrap();
        permit.success().await;
        assert_eq!(cb.state().await.unwrap(), CircuitState::HalfOpen);

        let permit = cb.allow().await.unwrap();
        permit.success().await;
        assert_eq!(cb.state().await.unwrap(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn reopens_on_failure_in_half_open() {
        let cb = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(10)),
        );
        let permit = cb.allow().await.unwrap();
        permit.failure().await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        let permit = cb.allow().await.unwrap();
        assert_eq!(cb.state().await.unwrap(), CircuitState::HalfOpen);
        permit.failure().await;
        assert_eq!(cb.state().await.unwrap(), CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let cb = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        let permit = cb.allow().await.unwrap();
        permit.failure().await;
        assert_eq!(cb.state().await.unwrap(), CircuitState::Open);

        cb.reset().await.unwrap();
        assert_eq!(cb.state().await.unwrap(), CircuitState::Closed);
    }
}
