//! Distributed-tracing correlation carried across orchestration boundaries,
//! and the telemetry sink trace records are reported to.
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;

/// W3C trace context propagated read-only from the caller into each
/// sub-orchestration through orchestration input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationContext {
    pub trace_parent: String,
    pub parent_span_id: String,
    pub operation_id: String,
    pub operation_parent_id: String,
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl CorrelationContext {
    /// Start a new root trace: fresh trace id and span id.
    pub fn new_root() -> Self {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span_id = Uuid::new_v4().simple().to_string()[..16].to_string();
        Self {
            trace_parent: format!("00-{trace_id}-{span_id}-01"),
            parent_span_id: span_id.clone(),
            operation_id: trace_id,
            operation_parent_id: span_id,
        }
    }

    /// Check the `traceparent` header layout (`00-<32 hex>-<16 hex>-<2 hex>`)
    /// and that the operation ids agree with it.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        let malformed = |reason: String| Err(OrchestrationError::MalformedCorrelationContext { reason });
        let parts: Vec<&str> = self.trace_parent.split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return malformed(format!("traceparent '{}' must have 4 fields", self.trace_parent));
        };
        if !is_lower_hex(version, 2) || *version == "ff" {
            return malformed(format!("unsupported traceparent version '{version}'"));
        }
        if !is_lower_hex(trace_id, 32) || trace_id.bytes().all(|b| b == b'0') {
            return malformed(format!("invalid trace id '{trace_id}'"));
        }
        if !is_lower_hex(span_id, 16) || !is_lower_hex(flags, 2) {
            return malformed(format!("invalid span id or flags in '{}'", self.trace_parent));
        }
        if !is_lower_hex(&self.parent_span_id, 16) {
            return malformed(format!("invalid parent span id '{}'", self.parent_span_id));
        }
        if self.operation_id != *trace_id {
            return malformed("operation id does not match the traceparent trace id".to_string());
        }
        if self.operation_parent_id.is_empty() {
            return malformed("operation parent id is empty".to_string());
        }
        Ok(())
    }

    /// Trace record annotated with this context's operation identifiers.
    pub fn trace_record(&self) -> TraceRecord {
        TraceRecord {
            message: format!(
                "Activity Id: {} ParentSpanId: {}",
                self.trace_parent, self.parent_span_id
            ),
            operation_id: self.operation_id.clone(),
            operation_parent_id: self.operation_parent_id.clone(),
        }
    }
}

/// One trace entry sent to the telemetry backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub message: String,
    pub operation_id: String,
    pub operation_parent_id: String,
}

/// Fire-and-forget telemetry backend.
pub trait TelemetrySink: Send + Sync {
    fn track(&self, record: TraceRecord) -> Result<(), String>;
}

/// Report a record; failures are logged and swallowed.
pub fn track_best_effort(sink: &dyn TelemetrySink, record: TraceRecord) {
    let operation_id = record.operation_id.clone();
    if let Err(e) = sink.track(record) {
        warn!(operation_id = %operation_id, error = %e, "telemetry sink rejected trace record");
    }
}

/// Sink that emits trace records as `tracing` events on the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn track(&self, record: TraceRecord) -> Result<(), String> {
        info!(
            target: "telemetry",
            operation_id = %record.operation_id,
            operation_parent_id = %record.operation_parent_id,
            "{}",
            record.message
        );
        Ok(())
    }
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    records: Mutex<Vec<TraceRecord>>,
}

impl MemoryTelemetrySink {
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn track(&self, record: TraceRecord) -> Result<(), String> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
