//! Route classes and their static policy.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{RateLimitConfig, TimeoutConfig};

/// The logical backend routes the gateway forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Health,
    Status,
    Upload,
    Search,
    Ask,
    Export,
    ExportArchive,
}

impl RouteClass {
    pub const ALL: [RouteClass; 7] = [
        RouteClass::Health,
        RouteClass::Status,
        RouteClass::Upload,
        RouteClass::Search,
        RouteClass::Ask,
        RouteClass::Export,
        RouteClass::ExportArchive,
    ];

    /// Name used for limiter scoping, logs, and metrics.
    pub fn name(self) -> &'static str {
        match self {
            RouteClass::Health => "health",
            RouteClass::Status => "status",
            RouteClass::Upload => "upload",
            RouteClass::Search => "search",
            RouteClass::Ask => "ask",
            RouteClass::Export => "export",
            RouteClass::ExportArchive => "export_archive",
        }
    }

    /// Path on the worker service.
    pub fn worker_path(self) -> &'static str {
        match self {
            RouteClass::Health => "/health",
            RouteClass::Status => "/status",
            RouteClass::Upload => "/upload",
            RouteClass::Search => "/search",
            RouteClass::Ask => "/ask",
            RouteClass::Export => "/export",
            RouteClass::ExportArchive => "/export/archive",
        }
    }

    /// Query parameters that may be passed through to the worker.
    pub fn allowed_params(self) -> &'static [&'static str] {
        match self {
            RouteClass::Search => &["q", "k", "doc_id", "path", "kind"],
            RouteClass::Export => &["doc_id", "kind"],
            RouteClass::ExportArchive => &["doc_id"],
            RouteClass::Health | RouteClass::Status | RouteClass::Upload | RouteClass::Ask => &[],
        }
    }
}

/// Per-route capacity and timeout table.
#[derive(Debug, Clone)]
pub struct RouteClassification {
    capacities: HashMap<RouteClass, u32>,
    timeouts: HashMap<RouteClass, Duration>,
}

impl RouteClassification {
    pub fn from_config(limits: &RateLimitConfig, timeouts: &TimeoutConfig) -> Self {
        let capacities = [
            (RouteClass::Upload, limits.upload_per_minute),
            (RouteClass::Ask, limits.ask_per_minute),
            (RouteClass::Search, limits.search_per_minute),
        ]
        .into_iter()
        .filter(|(_, capacity)| *capacity > 0)
        .collect();

        let timeouts = [
            (RouteClass::Health, timeouts.health_probe_secs),
            (RouteClass::Status, timeouts.status_secs),
            (RouteClass::Upload, timeouts.upload_secs),
            (RouteClass::Search, timeouts.search_secs),
            (RouteClass::Ask, timeouts.ask_secs),
            (RouteClass::Export, timeouts.export_secs),
            (RouteClass::ExportArchive, timeouts.export_secs),
        ]
        .into_iter()
        .map(|(class, secs)| (class, Duration::from_secs(secs)))
        .collect();

        Self {
            capacities,
            timeouts,
        }
    }

    /// Tokens per minute, or `None` for an unlimited route.
    pub fn capacity(&self, route: RouteClass) -> Option<u32> {
        self.capacities.get(&route).copied()
    }

    pub fn timeout(&self, route: RouteClass) -> Duration {
        self.timeouts
            .get(&route)
            .copied()
            .unwrap_or(Duration::from_secs(30))
    }
}

impl Default for RouteClassification {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default(), &TimeoutConfig::default())
    }
}
