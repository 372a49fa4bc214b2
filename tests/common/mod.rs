//! Shared harness for the integration suites: in-memory stores plus the
//! full stage chain, driven synchronously so assertions see settled state.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use trackgraph_backend::config::{
    CanonicalizerConfig, CaptchaConfig, EnrichmentConfig, FetchConfig, GoldConfig,
    OperationalConfig, PipelineConfig,
};
use trackgraph_backend::models::{PlaylistPayload, SourceSite, TrackRecord};
use trackgraph_backend::services::gold::AggregationSummary;
use trackgraph_backend::services::silver::CanonicalizationOutcome;
use trackgraph_backend::services::{
    BronzeWriter, GoldAggregator, OperationalMaterializer, SilverCanonicalizer,
};
use trackgraph_backend::storage::Stores;
use trackgraph_backend::BronzeWriteOutcome;

pub fn fetch_config() -> FetchConfig {
    FetchConfig {
        initial_rate_per_sec: 200.0,
        bucket_capacity: 200.0,
        decrease_factor: 0.5,
        recovery_window: 5,
        default_cooldown: Duration::from_millis(20),
        retry_base_delay: Duration::from_millis(5),
        retry_jitter: Duration::from_millis(2),
        retry_max_delay: Duration::from_millis(50),
        request_timeout: Duration::from_secs(10),
        proxies: Vec::new(),
        proxy_park_threshold: -3,
        proxy_park_cooldown: Duration::from_millis(100),
        render_endpoint: None,
        captcha: CaptchaConfig {
            endpoint: None,
            min_confidence: 0.8,
            request_timeout: Duration::from_secs(2),
        },
    }
}

pub fn canonicalizer_config() -> CanonicalizerConfig {
    CanonicalizerConfig {
        fuzzy_title_threshold: 0.92,
        extra_sentinels: Vec::new(),
        alias_pairs: Vec::new(),
        enrichment: EnrichmentConfig {
            endpoint: None,
            rate_per_minute: 60,
            request_timeout: Duration::from_secs(2),
        },
    }
}

pub fn gold_config() -> GoldConfig {
    GoldConfig {
        confidence_k: 5.0,
        weight_occurrence: 0.4,
        weight_bpm: 0.2,
        weight_key: 0.2,
        weight_energy: 0.2,
        bpm_tolerance: 16.0,
    }
}

pub fn operational_config() -> OperationalConfig {
    OperationalConfig { min_edge_weight: 1 }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        queue_capacity: 64,
        high_water_fraction: 0.8,
        workers_per_request: 4,
    }
}

/// The full stage chain over one shared in-memory store.
pub struct Harness {
    pub stores: Stores,
    pub writer: BronzeWriter,
    pub canonicalizer: SilverCanonicalizer,
    pub aggregator: GoldAggregator,
    pub materializer: OperationalMaterializer,
}

impl Harness {
    pub fn new() -> Self {
        let stores = Stores::memory();
        let writer = BronzeWriter::new(stores.bronze.clone());
        let canonicalizer = SilverCanonicalizer::new(
            stores.bronze.clone(),
            stores.silver.clone(),
            &canonicalizer_config(),
        );
        let aggregator = GoldAggregator::new(
            stores.silver.clone(),
            stores.gold.clone(),
            gold_config(),
        );
        let materializer = OperationalMaterializer::new(
            stores.silver.clone(),
            stores.gold.clone(),
            stores.operational.clone(),
            operational_config(),
        );
        Self {
            stores,
            writer,
            canonicalizer,
            aggregator,
            materializer,
        }
    }

    /// Drive one payload through every stage, as the pipeline tasks would.
    pub async fn ingest(&self, payload: &PlaylistPayload) -> IngestResult {
        let bronze = self.writer.write(payload).await.expect("bronze write");
        let silver = self
            .canonicalizer
            .process_playlist(bronze.playlist_id, false)
            .await
            .expect("canonicalization");
        let gold = self
            .aggregator
            .update_pairs(&silver.affected_pairs)
            .await
            .expect("gold aggregation");
        self.materializer.materialize().await.expect("materialize");
        IngestResult {
            bronze,
            silver,
            gold,
        }
    }
}

pub struct IngestResult {
    pub bronze: BronzeWriteOutcome,
    pub silver: CanonicalizationOutcome,
    pub gold: AggregationSummary,
}

/// A dispatcher over in-memory stores and the given adapters, with its own
/// running pipeline. Workers default to the shared pipeline config.
pub fn dispatcher_with_adapters(
    adapters: Vec<Arc<dyn trackgraph_backend::services::SourceAdapter>>,
    workers_per_request: usize,
) -> (trackgraph_backend::services::ScrapeDispatcher, Stores) {
    let stores = Stores::memory();
    let writer = BronzeWriter::new(stores.bronze.clone());
    let canonicalizer = SilverCanonicalizer::new(
        stores.bronze.clone(),
        stores.silver.clone(),
        &canonicalizer_config(),
    );
    let aggregator =
        GoldAggregator::new(stores.silver.clone(), stores.gold.clone(), gold_config());
    let materializer = OperationalMaterializer::new(
        stores.silver.clone(),
        stores.gold.clone(),
        stores.operational.clone(),
        operational_config(),
    );

    let mut config = pipeline_config();
    config.workers_per_request = workers_per_request;

    let pipeline = trackgraph_backend::services::Pipeline::start(
        canonicalizer,
        aggregator,
        materializer,
        &config,
        None,
    );
    let registry = trackgraph_backend::services::AdapterRegistry::from_adapters(adapters);
    let dispatcher = trackgraph_backend::services::ScrapeDispatcher::new(
        registry, writer, pipeline, config,
    );
    (dispatcher, stores)
}

pub fn payload(source: SourceSite, url: &str, tracks: &[(&str, &str)]) -> PlaylistPayload {
    PlaylistPayload::new(source, url).with_tracks(
        tracks
            .iter()
            .map(|(artist, title)| TrackRecord::new(*artist, *title))
            .collect(),
    )
}
