//! Transport metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider, which must be initialized
//! by the host application (murmur-server). Without a provider the
//! instruments are no-ops.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("murmur-core"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for frames relayed between peers (signaling and typing).
pub fn frames_relayed() -> Counter<u64> {
    meter()
        .u64_counter("murmur.frames.relayed")
        .with_description("Total frames relayed to a peer")
        .with_unit("frame")
        .build()
}

/// Counter for chat messages accepted by the fan-out router.
pub fn messages_accepted() -> Counter<u64> {
    meter()
        .u64_counter("murmur.messages.accepted")
        .with_description("Total chat messages persisted by the fan-out router")
        .with_unit("message")
        .build()
}

/// Counter for live message deliveries.
pub fn messages_delivered() -> Counter<u64> {
    meter()
        .u64_counter("murmur.messages.delivered")
        .with_description("Total live new_message deliveries")
        .with_unit("delivery")
        .build()
}

/// Counter for calls reaching a terminal state.
pub fn calls_finished() -> Counter<u64> {
    meter()
        .u64_counter("murmur.calls.finished")
        .with_description("Total calls reaching a terminal state")
        .with_unit("call")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for bound connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("murmur.connections.active")
        .with_description("Current number of identities with a live connection")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Helpers
// ============================================================================

/// Record a relayed frame of the given type.
pub fn record_relay(frame_type: &'static str, delivered: bool) {
    frames_relayed().add(
        1,
        &[
            KeyValue::new("frame_type", frame_type),
            KeyValue::new("delivered", delivered),
        ],
    );
}

/// Record a call reaching a terminal state.
pub fn record_call_finished(outcome: &'static str, reason: &'static str) {
    calls_finished().add(
        1,
        &[
            KeyValue::new("outcome", outcome),
            KeyValue::new("reason", reason),
        ],
    );
}
