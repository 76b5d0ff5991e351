//! Periodic removal of abandoned upload state.
//!
//! One pass removes staging sessions nobody finalized, finalize claims past
//! their retention and idle listing cache entries. Failures are logged and
//! retried on the next pass.

use crate::cache::ListingCache;
use crate::finalize::Finalizer;
use crate::metrics::{
    CACHE_ENTRIES_EVICTED, FINALIZE_CLAIMS_PURGED, STAGING_SESSIONS_SWEPT, SWEEP_RUNS,
};
use crate::state::AppState;
use pinbox_core::config::SweepConfig;
use pinbox_metadata::MetadataStore;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub claims: u64,
    pub cache_entries: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.claims == 0 && self.cache_entries == 0
    }
}

pub struct Sweeper {
    finalizer: Arc<Finalizer>,
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<ListingCache>,
    staging_max_age: Duration,
    claim_retention: Duration,
}

impl Sweeper {
    pub fn new(
        finalizer: Arc<Finalizer>,
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<ListingCache>,
        config: &SweepConfig,
    ) -> Self {
        Self {
            finalizer,
            metadata,
            cache,
            staging_max_age: config.staging_max_age(),
            claim_retention: config.claim_retention(),
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            state.finalizer.clone(),
            state.metadata.clone(),
            state.cache.clone(),
            &state.config.sweep,
        )
    }

    pub async fn run_once(&self) -> SweepReport {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    /// One pass with ages measured from `now`.
    pub async fn run_at(&self, now: OffsetDateTime) -> SweepReport {
        SWEEP_RUNS.inc();
        let mut report = SweepReport::default();

        match self
            .finalizer
            .sweep_abandoned(now - self.staging_max_age)
            .await
        {
            Ok(sessions) => report.sessions = sessions,
            Err(e) => tracing::warn!(error = %e, "staging sweep failed"),
        }

        match self
            .metadata
            .purge_finalize_claims(now - self.claim_retention)
            .await
        {
            Ok(claims) => report.claims = claims,
            Err(e) => tracing::warn!(error = %e, "finalize claim purge failed"),
        }

        report.cache_entries = self.cache.evict_idle().total();

        STAGING_SESSIONS_SWEPT.inc_by(report.sessions as u64);
        FINALIZE_CLAIMS_PURGED.inc_by(report.claims);
        CACHE_ENTRIES_EVICTED.inc_by(report.cache_entries as u64);
        report
    }
}

/// Spawn a background task that runs a sweep pass every `interval`.
pub fn spawn_sweep_task(sweeper: Sweeper, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let report = sweeper.run_once().await;
            if !report.is_empty() {
                tracing::info!(
                    sessions = report.sessions,
                    claims = report.claims,
                    cache_entries = report.cache_entries,
                    "Sweep removed abandoned state"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalize::FinalizeRequest;
    use bytes::Bytes;
    use pinbox_core::config::AppConfig;
    use pinbox_core::{Identity, UploadId};
    use tempfile::TempDir;

    async fn state() -> (TempDir, AppState) {
        let temp = tempfile::tempdir().unwrap();
        let config = AppConfig::for_testing(temp.path());
        let staging = pinbox_storage::staging_from_config(&config.staging)
            .await
            .unwrap();
        let content = pinbox_storage::content_from_config(&config.content)
            .await
            .unwrap();
        let metadata = pinbox_metadata::from_config(&config.metadata).await.unwrap();
        (temp, AppState::new(config, staging, content, metadata))
    }

    #[tokio::test]
    async fn test_sweep_removes_abandoned_state() {
        let (_temp, state) = state().await;
        let idle = UploadId::parse("idle").unwrap();
        let done = UploadId::parse("done").unwrap();
        let wallet = Identity::parse("0xabc").unwrap();

        state
            .ingestor
            .ingest(&idle, 0, 2, Bytes::from_static(b"half"))
            .await
            .unwrap();
        state
            .ingestor
            .ingest(&done, 0, 1, Bytes::from_static(b"whole"))
            .await
            .unwrap();
        state
            .finalizer
            .finalize(FinalizeRequest {
                upload_id: done.clone(),
                file_name: "whole.txt".to_string(),
                total_chunks: 1,
                identity: wallet.clone(),
                mime_type: None,
            })
            .await
            .unwrap();

        let sweeper = Sweeper::from_state(&state);

        // Nothing is old enough yet.
        let report = sweeper.run_once().await;
        assert_eq!(report.sessions, 0);
        assert_eq!(report.claims, 0);
        assert_eq!(state.staging.declared_total(&idle).await.unwrap(), Some(2));

        let later = OffsetDateTime::now_utc() + time::Duration::days(30);
        let report = sweeper.run_at(later).await;
        assert_eq!(report.sessions, 1);
        assert_eq!(report.claims, 1);
        assert_eq!(state.staging.declared_total(&idle).await.unwrap(), None);
        assert_eq!(
            state.staging.first_missing_chunk(&idle, 2).await.unwrap(),
            Some(0)
        );
        assert!(
            state
                .metadata
                .get_finalize_claim("done")
                .await
                .unwrap()
                .is_none()
        );

        // The finalized file is untouched.
        let files = state.tree.list(&wallet).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "whole.txt");
    }
}
