//! Configuration for the sync engine.

use bindsync_store::BackendId;
use rand::Rng;
use std::time::Duration;

/// Which side wins when a binding is resynchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MainRecord {
    /// The local record is authoritative; resync exports it.
    #[default]
    Local,
    /// The remote record is authoritative; resync re-imports it.
    Remote,
}

/// Configuration of one remote backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend identifier stored on every binding.
    pub backend_id: BackendId,
    /// Human-readable name used in logs.
    pub name: String,
    /// Disables every export for this backend.
    pub no_export: bool,
    /// Authoritative side for resync.
    pub main_record: MainRecord,
    /// Language passed to the local store on import.
    pub default_lang: Option<String>,
    /// Delay requested when a binding row is already locked.
    pub lock_retry_delay: Duration,
    /// Delay requested when a binding insert loses a uniqueness race.
    pub conflict_retry_delay: Duration,
    /// In-process retries for the import advisory lock.
    pub advisory_retry: RetryConfig,
    /// Delay requested once the advisory lock retries are exhausted.
    pub advisory_retry_delay: Duration,
    /// Maximum nesting of dependency transfers.
    pub max_dependency_depth: usize,
}

impl BackendConfig {
    /// Creates a configuration with default delays.
    pub fn new(backend_id: BackendId) -> Self {
        Self {
            backend_id,
            name: format!("backend-{backend_id}"),
            no_export: false,
            main_record: MainRecord::Local,
            default_lang: None,
            lock_retry_delay: Duration::from_secs(5),
            conflict_retry_delay: Duration::from_secs(5),
            advisory_retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(20))
                .with_max_delay(Duration::from_millis(200)),
            advisory_retry_delay: Duration::from_secs(1),
            max_dependency_depth: 16,
        }
    }

    /// Sets the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables or disables exports.
    pub fn with_no_export(mut self, no_export: bool) -> Self {
        self.no_export = no_export;
        self
    }

    /// Sets the authoritative side.
    pub fn with_main_record(mut self, main_record: MainRecord) -> Self {
        self.main_record = main_record;
        self
    }

    /// Sets the import language.
    pub fn with_default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = Some(lang.into());
        self
    }

    /// Sets the row lock retry delay.
    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = delay;
        self
    }

    /// Sets the uniqueness race retry delay.
    pub fn with_conflict_retry_delay(mut self, delay: Duration) -> Self {
        self.conflict_retry_delay = delay;
        self
    }

    /// Sets the advisory lock retry policy.
    pub fn with_advisory_retry(mut self, retry: RetryConfig) -> Self {
        self.advisory_retry = retry;
        self
    }

    /// Sets the delay requested after advisory lock exhaustion.
    pub fn with_advisory_retry_delay(mut self, delay: Duration) -> Self {
        self.advisory_retry_delay = delay;
        self
    }

    /// Sets the maximum dependency depth.
    pub fn with_max_dependency_depth(mut self, depth: usize) -> Self {
        self.max_dependency_depth = depth;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(BackendId(1))
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates an exponential retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a fixed-delay configuration.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25% on top
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_config_builder() {
        let config = BackendConfig::new(BackendId(3))
            .with_name("odoo-prod")
            .with_no_export(true)
            .with_main_record(MainRecord::Remote)
            .with_default_lang("fr_FR")
            .with_lock_retry_delay(Duration::from_secs(2));

        assert_eq!(config.backend_id, BackendId(3));
        assert_eq!(config.name, "odoo-prod");
        assert!(config.no_export);
        assert_eq!(config.main_record, MainRecord::Remote);
        assert_eq!(config.default_lang.as_deref(), Some("fr_FR"));
        assert_eq!(config.lock_retry_delay, Duration::from_secs(2));
        assert_eq!(config.conflict_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn default_delays() {
        let config = BackendConfig::default();
        assert_eq!(config.lock_retry_delay, Duration::from_secs(5));
        assert_eq!(config.conflict_retry_delay, Duration::from_secs(5));
        assert_eq!(config.max_dependency_depth, 16);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_capped() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(false);
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = RetryConfig::fixed(3, Duration::from_millis(400)).with_jitter(true);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }
}
