use std::{sync::Arc, time::Instant};

use metrics::counter;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheEntry, CacheKey, CacheStore, Lookup},
    domain::document::{DEFAULT_DISPLAY_NAME, DocumentId, NormalizedRequest, RenderRequest},
};

use super::{
    engine::{RenderEngine, display_name_of},
    single_flight::{FlightRole, SingleFlight},
    types::{PrintError, RenderArtifact},
};

const METRIC_CACHE_HIT: &str = "docprint_cache_hit_total";
const METRIC_CACHE_MISS: &str = "docprint_cache_miss_total";
const METRIC_CACHE_STALE: &str = "docprint_cache_stale_total";
const METRIC_RENDER_JOINED: &str = "docprint_render_joined_total";
const METRIC_CACHE_WRITE_FAILED: &str = "docprint_cache_write_failed_total";

type RenderOutcome = Result<RenderArtifact, PrintError>;

/// Serves print requests from the cache, rendering at most once per key
/// at a time on a miss.
pub struct PrintPipeline {
    store: Arc<dyn CacheStore>,
    engine: Arc<RenderEngine>,
    flights: SingleFlight<CacheKey, RenderOutcome>,
    fallback: DocumentId,
}

impl PrintPipeline {
    pub fn new(store: Arc<dyn CacheStore>, engine: RenderEngine, fallback: DocumentId) -> Self {
        Self {
            store,
            engine: Arc::new(engine),
            flights: SingleFlight::new(),
            fallback,
        }
    }

    /// Number of renders currently running.
    pub fn renders_in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    pub async fn serve(&self, request: &RenderRequest) -> Result<RenderArtifact, PrintError> {
        let started_at = Instant::now();
        let normalized = request.normalize(&self.fallback)?;
        let key = CacheKey::for_request(&normalized);

        if let Some(entry) = self.lookup(&key).await {
            let artifact = artifact_from_entry(entry).await;
            info!(
                target = "application::print::pipeline",
                op = "pipeline::serve",
                result = "cache_hit",
                key = %key,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                pdf_bytes = artifact.bytes.len(),
                "Print served from cache"
            );
            return Ok(artifact);
        }

        let store = Arc::clone(&self.store);
        let engine = Arc::clone(&self.engine);
        let flight_key = key.clone();
        let (outcome, role) = self
            .flights
            .run_with_role(key.clone(), move || {
                render_and_store(store, engine, flight_key, normalized)
            })
            .await;

        if role == FlightRole::Joined {
            counter!(METRIC_RENDER_JOINED).increment(1);
        }
        let outcome = outcome.map_err(|err| PrintError::aborted(err.to_string()))?;
        match &outcome {
            Ok(artifact) => info!(
                target = "application::print::pipeline",
                op = "pipeline::serve",
                result = "cache_miss",
                key = %key,
                role = ?role,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                pdf_bytes = artifact.bytes.len(),
                "Print rendered"
            ),
            Err(err) => warn!(
                target = "application::print::pipeline",
                op = "pipeline::serve",
                result = "error",
                key = %key,
                role = ?role,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Print request failed"
            ),
        }
        outcome
    }

    /// Cache lookup that records hit, miss and stale counts. The re-check
    /// inside a render flight bypasses it so each request counts once.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Lookup::Fresh(entry) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(entry)
            }
            Lookup::Stale { .. } => {
                counter!(METRIC_CACHE_STALE).increment(1);
                None
            }
            Lookup::Absent => {
                counter!(METRIC_CACHE_MISS).increment(1);
                None
            }
        }
    }
}

/// Body of a render flight: re-check the cache, render, then persist before
/// any waiter observes the result.
async fn render_and_store(
    store: Arc<dyn CacheStore>,
    engine: Arc<RenderEngine>,
    key: CacheKey,
    request: NormalizedRequest,
) -> RenderOutcome {
    if let Some(entry) = store.get(&key).await.into_fresh() {
        debug!(
            target = "application::print::pipeline",
            op = "pipeline::render_and_store",
            result = "cache_hit",
            key = %key,
            "Entry persisted by a previous flight"
        );
        return Ok(artifact_from_entry(entry).await);
    }

    let artifact = engine.render(&request).await?;
    if let Err(err) = store.put(&key, &artifact.bytes).await {
        counter!(METRIC_CACHE_WRITE_FAILED).increment(1);
        warn!(
            target = "application::print::pipeline",
            op = "pipeline::render_and_store",
            result = "cache_write_error",
            key = %key,
            error = %err,
            "Failed to persist rendered PDF; serving uncached result"
        );
    }
    Ok(artifact)
}

async fn artifact_from_entry(entry: CacheEntry) -> RenderArtifact {
    let bytes = entry.bytes;
    let pdf = bytes.clone();
    let display_name = tokio::task::spawn_blocking(move || display_name_of(&pdf))
        .await
        .unwrap_or_else(|_| DEFAULT_DISPLAY_NAME.to_string());
    RenderArtifact {
        bytes,
        display_name,
    }
}
