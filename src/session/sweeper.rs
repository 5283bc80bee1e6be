use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, instrument};

use super::service::SessionManager;
use crate::shared::AppError;

/// Configuration for the sweep task
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to run the sweep
    pub interval: Duration,
    /// How long a session must have been expired or revoked before eviction
    pub grace_period: ChronoDuration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),    // 5 minutes
            grace_period: ChronoDuration::minutes(10), // 10 minutes
        }
    }
}

/// Starts the background task that periodically evicts terminal sessions.
///
/// Runs forever; spawn it and drop or abort the handle on shutdown.
#[instrument(skip(session_manager))]
pub async fn start_sweep_task(session_manager: Arc<SessionManager>, config: SweepConfig) {
    info!(
        interval_secs = config.interval.as_secs(),
        grace_period_secs = config.grace_period.num_seconds(),
        "Starting session sweep background task"
    );

    let mut sweep_interval = interval(config.interval);

    loop {
        sweep_interval.tick().await;

        match sweep_terminal_sessions(&session_manager, config.grace_period) {
            Ok(evicted) => info!(evicted = evicted, "Session sweep completed"),
            Err(e) => error!(error = %e, "Session sweep failed"),
        }
    }
}

fn sweep_terminal_sessions(
    session_manager: &SessionManager,
    grace_period: ChronoDuration,
) -> Result<usize, AppError> {
    let evicted = session_manager.sweep(grace_period)?;

    if evicted == 0 {
        info!("No terminal sessions to evict");
    } else {
        let stats = session_manager.stats()?;
        info!(
            evicted = evicted,
            remaining = stats.total_sessions,
            active = stats.active_sessions,
            "Evicted terminal sessions"
        );
    }

    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::generators::ManualClock;
    use crate::session::keys::{test_keys::RSA_PKCS8, SigningKey};
    use crate::session::repository::InMemorySessionStore;
    use crate::session::service::SessionConfig;
    use crate::session::token::TokenIssuer;

    fn create_test_manager(
        clock: Arc<ManualClock>,
    ) -> (Arc<SessionManager>, Arc<InMemorySessionStore>) {
        let key = Arc::new(SigningKey::from_pem(RSA_PKCS8.as_bytes()).unwrap());
        let issuer = TokenIssuer::new(key, "app-123", "https://api.enablebanking.com");
        let store = Arc::new(InMemorySessionStore::new());
        let config = SessionConfig {
            ttl: ChronoDuration::seconds(600),
            refresh_margin: ChronoDuration::seconds(60),
        };
        let manager = SessionManager::new(store.clone(), issuer, config).with_clock(clock);
        (Arc::new(manager), store)
    }

    #[test]
    fn test_sweep_waits_for_grace_period() {
        let clock = Arc::new(ManualClock::at(1000));
        let (manager, store) = create_test_manager(clock.clone());

        let session = manager.authenticate("client-a", "bank-x").unwrap();

        // Expired at 1600, grace runs until 2200
        clock.set(1700);
        let evicted = sweep_terminal_sessions(&manager, ChronoDuration::seconds(600)).unwrap();
        assert_eq!(evicted, 0);
        assert!(store.has_session(&session.session_id));

        clock.set(2200);
        let evicted = sweep_terminal_sessions(&manager, ChronoDuration::seconds(600)).unwrap();
        assert_eq!(evicted, 1);
        assert!(!store.has_session(&session.session_id));
    }

    #[test]
    fn test_sweep_preserves_active_sessions() {
        let clock = Arc::new(ManualClock::at(1000));
        let (manager, store) = create_test_manager(clock.clone());

        manager.authenticate("client-a", "bank-x").unwrap();
        manager.authenticate("client-a", "bank-y").unwrap();

        clock.set(1500);
        let evicted = sweep_terminal_sessions(&manager, ChronoDuration::zero()).unwrap();
        assert_eq!(evicted, 0);
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn test_sweep_evicts_revoked_sessions() {
        let clock = Arc::new(ManualClock::at(1000));
        let (manager, store) = create_test_manager(clock.clone());

        let old = manager.authenticate("client-a", "bank-x").unwrap();
        let current = manager.authenticate("client-a", "bank-x").unwrap();

        clock.set(1010);
        let evicted = sweep_terminal_sessions(&manager, ChronoDuration::seconds(10)).unwrap();
        assert_eq!(evicted, 1);
        assert!(!store.has_session(&old.session_id));
        assert!(manager.get_active_token(&current.session_id).is_ok());
    }

    #[test]
    fn test_sweep_with_no_sessions() {
        let clock = Arc::new(ManualClock::at(1000));
        let (manager, _store) = create_test_manager(clock);
        let evicted = sweep_terminal_sessions(&manager, ChronoDuration::zero()).unwrap();
        assert_eq!(evicted, 0);
    }

    #[tokio::test]
    async fn test_sweep_task_runs_on_interval() {
        let clock = Arc::new(ManualClock::at(1000));
        let (manager, store) = create_test_manager(clock.clone());

        manager.authenticate("client-a", "bank-x").unwrap();
        clock.set(5000);

        let handle = tokio::spawn(start_sweep_task(
            manager.clone(),
            SweepConfig {
                interval: Duration::from_secs(60),
                grace_period: ChronoDuration::zero(),
            },
        ));

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.session_count(), 0);

        handle.abort();
    }
}
