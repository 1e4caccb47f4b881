use std::sync::Arc;

use recon_config::ScannerConfig;
use recon_core::{ScanService, ScanServiceConfig};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    service: Arc<ScanService>,
}

impl AppState {
    pub fn new(service: Arc<ScanService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ScanService> {
        &self.service
    }
}

/// Map the loaded scanner settings onto the core service config.
pub fn service_config(scanner: &ScannerConfig) -> ScanServiceConfig {
    ScanServiceConfig {
        history_capacity: scanner.history_capacity,
        event_history_capacity: scanner.event_history_capacity,
        broadcast_capacity: scanner.broadcast_capacity,
        stats_interval: scanner.stats_interval,
        tool_timeout: scanner.tool_timeout,
        max_log_lines: scanner.max_log_lines,
    }
}
