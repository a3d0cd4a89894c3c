//! Reconnection with exponential backoff

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the delay
    pub max_backoff: Duration,
    /// Growth factor applied after every retry
    pub multiplier: f64,
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Tracks retries of the tunnel connection
pub struct ReconnectManager {
    config: ReconnectConfig,
    current_backoff: Duration,
    attempt: usize,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_backoff: config.initial_backoff,
            config,
            attempt: 0,
        }
    }

    /// Delay for the next attempt, or None when attempts are exhausted
    ///
    /// Advances the attempt counter and grows the backoff.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self
            .config
            .max_attempts
            .is_some_and(|max_attempts| self.attempt > max_attempts)
        {
            return None;
        }

        let delay = self.current_backoff;
        let grown = Duration::from_secs_f64(delay.as_secs_f64() * self.config.multiplier);
        self.current_backoff = grown.min(self.config.max_backoff);
        Some(delay)
    }

    /// Sleep before the next attempt; false when no attempt is left
    pub async fn wait(&mut self) -> bool {
        match self.next_backoff() {
            Some(delay) => {
                debug!(
                    attempt = self.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before reconnecting"
                );
                sleep(delay).await;
                true
            }
            None => false,
        }
    }

    /// Reset after a successful handshake
    pub fn reset(&mut self) {
        self.current_backoff = self.config.initial_backoff;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: Option<usize>) -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut manager = ReconnectManager::new(config(None));

        let delays: Vec<u64> = (0..6)
            .map(|_| manager.next_backoff().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 100, 100]);
        assert_eq!(manager.attempt(), 6);
    }

    #[test]
    fn test_reset() {
        let mut manager = ReconnectManager::new(config(None));
        manager.next_backoff();
        manager.next_backoff();

        manager.reset();
        assert_eq!(manager.attempt(), 0);
        assert_eq!(manager.next_backoff(), Some(Duration::from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let mut manager = ReconnectManager::new(config(Some(2)));

        assert!(manager.wait().await);
        assert!(manager.wait().await);
        assert!(!manager.wait().await);
    }

    #[test]
    fn test_default_policy() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
        assert_eq!(config.max_attempts, None);
    }
}
