//! Run recorder: applies run transitions and persists each one immediately.
//!
//! Start and finish times come from the injected [`Clock`].

use std::sync::Arc;

use bridge_traits::time::{Clock, SystemClock};
use tracing::{debug, info, warn};

use crate::repository::RunStore;
use crate::run::Run;
use crate::sync_config::SyncConfigId;
use crate::Result;

#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn RunStore>,
    clock: Arc<dyn Clock>,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create and persist a `running` run for `config_id`
    pub async fn start(&self, config_id: SyncConfigId) -> Result<Run> {
        let run = Run::start_at(config_id, self.clock.unix_timestamp_millis());
        self.store.insert(&run).await?;
        debug!(run_id = %run.id, config_id = %config_id, "Run started");
        Ok(run)
    }

    pub async fn succeed(&self, run: Run, tracks_added: u32) -> Result<Run> {
        let run = self.persist(run.succeed(tracks_added)?).await?;
        info!(run_id = %run.id, tracks_added, "Run succeeded");
        Ok(run)
    }

    pub async fn fail(&self, run: Run, message: &str) -> Result<Run> {
        let run = self.persist(run.fail(message)?).await?;
        warn!(run_id = %run.id, error = ?run.error_message, "Run failed");
        Ok(run)
    }

    pub async fn not_found(&self, run: Run, message: &str) -> Result<Run> {
        let run = self.persist(run.not_found(message)?).await?;
        info!(run_id = %run.id, "Run finished: source not found");
        Ok(run)
    }

    pub async fn unauthorized(&self, run: Run, message: &str) -> Result<Run> {
        let run = self.persist(run.unauthorized(message)?).await?;
        info!(run_id = %run.id, "Run finished: unauthorized");
        Ok(run)
    }

    async fn persist(&self, mut run: Run) -> Result<Run> {
        run.stamp_finished(self.clock.unix_timestamp_millis());
        self.store.finish(&run).await?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{ConfigStore, SqliteConfigStore, SqliteRunStore};
    use crate::run::RunStatus;
    use crate::sync_config::Strategy;
    use chrono::{DateTime, TimeZone, Utc};
    use core_auth::{SqliteUserRepository, User, UserRepository};
    use core_library::create_test_pool;
    use std::sync::Mutex;

    /// Clock that only moves when told to
    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, millis: i64) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::milliseconds(millis);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn test_run_times_come_from_the_clock() {
        let pool = create_test_pool().await.unwrap();
        let user = SqliteUserRepository::new(pool.clone())
            .upsert(&User::new("remote-user"))
            .await
            .unwrap();
        let config = SqliteConfigStore::new(pool.clone())
            .get_or_create(&user.id, Strategy::DiscoverWeekly)
            .await
            .unwrap();

        let start = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let clock = Arc::new(ManualClock(Mutex::new(start)));
        let store = Arc::new(SqliteRunStore::new(pool));
        let recorder = RunRecorder::new(store.clone()).with_clock(clock.clone());

        let run = recorder.start(config.id).await.unwrap();
        assert_eq!(run.started_at, 1_700_000_000_000);

        clock.advance(2_500);
        let run = recorder.succeed(run, 3).await.unwrap();
        assert_eq!(run.finished_at, Some(1_700_000_002_500));
        assert_eq!(run.duration_millis(), Some(2_500));

        let stored = store.find_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.started_at, 1_700_000_000_000);
        assert_eq!(stored.finished_at, Some(1_700_000_002_500));
    }
}
