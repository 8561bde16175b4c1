//! Metrics definitions for the uplink processor.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_LEADER_ELECTED: MetricDef = MetricDef {
    name: "connection_cache.leader_elected",
    metric_type: MetricType::Counter,
    description: "Number of acquires that won the insert-if-absent race and provisioned",
};

pub const CACHE_FOLLOWER_WAIT: MetricDef = MetricDef {
    name: "connection_cache.follower_wait",
    metric_type: MetricType::Counter,
    description: "Number of acquires that waited on another caller's provisioning",
};

pub const CACHE_READY_HIT: MetricDef = MetricDef {
    name: "connection_cache.ready_hit",
    metric_type: MetricType::Counter,
    description: "Number of acquires served immediately from a Ready slot",
};

pub const CACHE_INVALIDATED: MetricDef = MetricDef {
    name: "connection_cache.invalidated",
    metric_type: MetricType::Counter,
    description: "Number of connections removed after a downstream send failure",
};

pub const CACHE_EVICTED: MetricDef = MetricDef {
    name: "connection_cache.evicted",
    metric_type: MetricType::Counter,
    description: "Number of idle connections removed by the sliding-expiration sweep",
};

pub const MESSAGES_PROCESSED: MetricDef = MetricDef {
    name: "processor.messages_processed",
    metric_type: MetricType::Counter,
    description: "Number of uplink messages fully processed",
};

pub const MESSAGES_RETRY_SKIPPED: MetricDef = MetricDef {
    name: "processor.messages_retry_skipped",
    metric_type: MetricType::Counter,
    description: "Number of uplink messages skipped because of the retry flag",
};

pub const MESSAGES_FAILED: MetricDef = MetricDef {
    name: "processor.messages_failed",
    metric_type: MetricType::Counter,
    description: "Number of uplink messages returned to the host for redelivery",
};

pub const TELEMETRY_SENT: MetricDef = MetricDef {
    name: "dispatcher.telemetry_sent",
    metric_type: MetricType::Counter,
    description: "Number of telemetry events delivered",
};

pub const TELEMETRY_SEND_FAILED: MetricDef = MetricDef {
    name: "dispatcher.telemetry_send_failed",
    metric_type: MetricType::Counter,
    description: "Number of telemetry sends that failed and invalidated the connection",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_LEADER_ELECTED,
    CACHE_FOLLOWER_WAIT,
    CACHE_READY_HIT,
    CACHE_INVALIDATED,
    CACHE_EVICTED,
    MESSAGES_PROCESSED,
    MESSAGES_RETRY_SKIPPED,
    MESSAGES_FAILED,
    TELEMETRY_SENT,
    TELEMETRY_SEND_FAILED,
];
