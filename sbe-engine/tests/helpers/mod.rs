//! Test Helper Utilities
//!
//! Shared utilities for testing sbe-engine

#![allow(dead_code)]

pub mod audio_generator;
pub mod scripted_analyzer;

pub use audio_generator::{generate_sample_library, generate_sample_wav, AudioConfig};
pub use scripted_analyzer::{payload_for, RecordedCall, ScriptedAnalyzer};

use sbe_common::config::{EngineConfig, RateLimitConfig};
use sbe_common::events::EventBus;
use sbe_engine::models::{Manifest, Sample, SampleId};
use sbe_engine::services::{Orchestrator, RateLimiter};
use sbe_engine::store::{CacheStore, CheckpointStore, MemoryCacheStore, MemoryCheckpointStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Samples with synthetic hashes `hash-000`, `hash-001`, ...
pub fn synthetic_samples(count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample {
            id: SampleId::from_content_hash(format!("hash-{:03}", i)),
            path: PathBuf::from(format!("/library/sample_{:03}.wav", i)),
            size_bytes: 1024,
            duration_secs: Some(1.0),
            category: None,
            local_failure: None,
        })
        .collect()
}

pub fn ids(samples: &[Sample]) -> Vec<SampleId> {
    samples.iter().map(|s| s.id.clone()).collect()
}

/// Engine settings with a 5 calls / 60s budget and 60s base backoff
pub fn test_config() -> EngineConfig {
    EngineConfig {
        rate_limit: RateLimitConfig::new(5, Duration::from_secs(60)),
        ..EngineConfig::default()
    }
}

pub fn manifest_for(samples: Vec<Sample>, config: &EngineConfig) -> Manifest {
    Manifest::new(
        PathBuf::from("/library"),
        samples,
        config.batch_size,
        config.rate_limit,
        config.checkpoint_interval,
    )
}

/// In-memory collaborators for one or more orchestrator runs
pub struct Harness {
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub cache: Arc<MemoryCacheStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub event_bus: EventBus,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            analyzer: Arc::new(ScriptedAnalyzer::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            event_bus: EventBus::new(1024),
            config,
        }
    }

    /// Orchestrator over this harness' stores with a fresh limiter
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(self.analyzer.clone(), self.cache.clone(), self.checkpoints.clone())
    }

    pub fn orchestrator_with(
        &self,
        analyzer: Arc<ScriptedAnalyzer>,
        cache: Arc<dyn CacheStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Orchestrator {
        Orchestrator::new(
            analyzer,
            cache,
            checkpoints,
            Arc::new(RateLimiter::new(self.config.rate_limit)),
            self.event_bus.clone(),
            self.config.clone(),
        )
    }

    pub fn manifest(&self, samples: Vec<Sample>) -> Manifest {
        manifest_for(samples, &self.config)
    }
}
