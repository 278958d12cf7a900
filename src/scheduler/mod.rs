//! Scheduled publishing orchestrator
//!
//! The evaluator decides when a schedule fires and hands one item per firing
//! to the durable queue. Publish jobs run through the retry coordinator, which
//! drives the publisher (and through it the token manager). Imports and
//! maintenance run on their own cadence.

pub mod evaluator;
pub mod importer;
pub mod maintenance;
pub mod publisher;
pub mod retry;
pub mod sequencer;
pub mod tokens;

use std::sync::Arc;

use crate::config::Config;
use crate::domain::Store;
use crate::services::clock::Clock;
use crate::services::graph::GraphApi;
use crate::services::queue::JobQueue;

pub use evaluator::Evaluator;
pub use importer::BatchImporter;
pub use maintenance::MaintenanceSweeper;
pub use publisher::{PublishSettings, Publisher};
pub use retry::RetryCoordinator;
pub use tokens::TokenManager;

/// Every orchestrator component wired over the same store, remote and queue.
#[derive(Clone)]
pub struct Orchestrator {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub evaluator: Arc<Evaluator>,
    pub coordinator: Arc<RetryCoordinator>,
    pub tokens: Arc<TokenManager>,
    pub importer: Arc<BatchImporter>,
    pub maintenance: Arc<MaintenanceSweeper>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphApi>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(store.clone(), graph.clone(), clock.clone()));
        let publisher = Arc::new(Publisher::new(
            store.clone(),
            graph.clone(),
            tokens.clone(),
            PublishSettings {
                media_base_url: config.media_base_url.clone(),
                poll_interval: config.processing_poll_interval,
                processing_timeout: config.processing_timeout,
            },
        ));
        let coordinator = Arc::new(RetryCoordinator::new(
            store.clone(),
            publisher,
            tokens.clone(),
            queue.clone(),
            clock.clone(),
        ));
        let evaluator = Arc::new(Evaluator::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            config.timezone,
        ));
        let importer = Arc::new(BatchImporter::new(
            store.clone(),
            graph,
            queue.clone(),
            clock.clone(),
            config.import.clone(),
        ));
        let maintenance = Arc::new(MaintenanceSweeper::new(
            store.clone(),
            queue,
            clock.clone(),
            minutes_of(config.maintenance_interval),
            minutes_of(config.stuck_after),
            minutes_of(config.failure_lookback),
        ));

        Self {
            store,
            clock,
            evaluator,
            coordinator,
            tokens,
            importer,
            maintenance,
        }
    }
}

fn minutes_of(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::seconds(duration.as_secs() as i64)
}
