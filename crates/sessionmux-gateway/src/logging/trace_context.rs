//! Trace Context - Call correlation for gateway operations
//!
//! Each public gateway call gets a short trace id so the pool, classifier
//! and transfer logs of one call can be grepped together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use sessionmux_core::SecurityContext;
use tracing::{debug, info_span, Span};

/// Global call counter for trace ID generation
static CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short, unique trace ID
/// Format: 6 hex characters (e.g., "a1b2c3")
pub fn generate_trace_id() -> String {
    let counter = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mixed = counter.wrapping_add(timestamp);
    format!("{:06x}", mixed & 0xFFFFFF)
}

/// Correlation data for one gateway call.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    /// Operation name (e.g. `invoke`, `download_file`)
    pub operation: String,
    pub group_id: Option<i64>,
    pub host: Option<String>,
    pub started_at: Instant,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            operation: operation.to_string(),
            group_id: None,
            host: None,
            started_at: Instant::now(),
        }
    }

    /// Attach the security context the call runs under
    pub fn with_context(mut self, ctx: &SecurityContext) -> Self {
        self.group_id = Some(ctx.group_id);
        self.host = Some(ctx.host.clone());
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Span builder for gateway calls
pub struct CallSpan;

impl CallSpan {
    /// Span carrying the trace id into every child log line.
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "call",
            trace_id = %ctx.trace_id,
            operation = %ctx.operation,
            group_id = ctx.group_id.unwrap_or(-1),
        )
    }

    /// Log completion (single consolidated line)
    pub fn log_exit(ctx: &TraceContext, outcome: &str) {
        debug!(
            trace_id = %ctx.trace_id,
            "← {} {} ({}ms)",
            ctx.operation,
            outcome,
            ctx.elapsed_ms()
        );
    }
}
