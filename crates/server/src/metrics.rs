//! Prometheus metrics for the Pinbox server.
//!
//! Exposes counters for chunk ingestion, finalization, the file tree and the
//! quota ledger. Labels never carry identities or content ids.
//!
//! The `/metrics` endpoint is unauthenticated and should be network-restricted
//! to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Chunk ingestion
pub static CHUNKS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_chunks_ingested_total",
        "Total number of chunks written to staging",
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_bytes_ingested_total",
        "Total chunk bytes written to staging",
    )
    .expect("metric creation failed")
});

pub static CHUNK_INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pinbox_chunk_ingest_duration_seconds",
            "Time taken to stage a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Finalize
pub static UPLOADS_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_uploads_finalized_total",
        "Total number of chunked uploads finalized",
    )
    .expect("metric creation failed")
});

pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pinbox_finalize_duration_seconds",
            "Time taken to assemble and store a chunked upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static ACTIVE_FINALIZES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pinbox_active_finalizes",
        "Number of finalize operations currently running",
    )
    .expect("metric creation failed")
});

pub static STAGING_CLEANUP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_staging_cleanup_failures_total",
        "Total number of staging sessions that could not be removed",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pinbox_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// File tree
pub static FILES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_files_created_total",
        "Total number of file and folder records created",
    )
    .expect("metric creation failed")
});

pub static FILES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_files_deleted_total",
        "Total number of records removed, descendants included",
    )
    .expect("metric creation failed")
});

pub static BYTES_FREED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_bytes_freed_total",
        "Total bytes returned to identities by deletes",
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_ENTRIES_EXTRACTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_archive_entries_extracted_total",
        "Total number of files extracted from uploaded archives",
    )
    .expect("metric creation failed")
});

// Listing cache
pub static LISTING_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_listing_cache_hits_total",
        "Listings served from the cache",
    )
    .expect("metric creation failed")
});

pub static LISTING_CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_listing_cache_misses_total",
        "Listings loaded from the metadata store",
    )
    .expect("metric creation failed")
});

// Quota ledger
pub static QUOTA_RECOMPUTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_quota_recomputes_total",
        "Total number of used-bytes recomputations",
    )
    .expect("metric creation failed")
});

pub static QUOTA_CORRECTIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_quota_corrections_total",
        "Recomputations that found the used counter out of date",
    )
    .expect("metric creation failed")
});

pub static PURCHASES_CREDITED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_purchases_credited_total",
        "Total number of purchases credited",
    )
    .expect("metric creation failed")
});

// Sweeper
pub static SWEEP_RUNS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("pinbox_sweep_runs_total", "Total number of sweep passes")
        .expect("metric creation failed")
});

pub static STAGING_SESSIONS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_staging_sessions_swept_total",
        "Abandoned upload sessions removed from staging",
    )
    .expect("metric creation failed")
});

pub static FINALIZE_CLAIMS_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_finalize_claims_purged_total",
        "Finalize claims removed after their retention period",
    )
    .expect("metric creation failed")
});

pub static CACHE_ENTRIES_EVICTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pinbox_cache_entries_evicted_total",
        "Idle listing cache entries evicted",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(CHUNKS_INGESTED.clone()),
            Box::new(BYTES_INGESTED.clone()),
            Box::new(CHUNK_INGEST_DURATION.clone()),
            Box::new(UPLOADS_FINALIZED.clone()),
            Box::new(FINALIZE_DURATION.clone()),
            Box::new(ACTIVE_FINALIZES.clone()),
            Box::new(STAGING_CLEANUP_FAILURES.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(FILES_CREATED.clone()),
            Box::new(FILES_DELETED.clone()),
            Box::new(BYTES_FREED.clone()),
            Box::new(ARCHIVE_ENTRIES_EXTRACTED.clone()),
            Box::new(LISTING_CACHE_HITS.clone()),
            Box::new(LISTING_CACHE_MISSES.clone()),
            Box::new(QUOTA_RECOMPUTES.clone()),
            Box::new(QUOTA_CORRECTIONS.clone()),
            Box::new(PURCHASES_CREDITED.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(STAGING_SESSIONS_SWEPT.clone()),
            Box::new(FINALIZE_CLAIMS_PURGED.clone()),
            Box::new(CACHE_ENTRIES_EVICTED.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
