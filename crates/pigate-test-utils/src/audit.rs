//! In-memory capture of audit events.
//!
//! [`AuditCollector`] is a `tracing` layer that keeps audit events in a
//! bounded ring buffer, with an [`AuditReader`] handle for reading them
//! back. Install it with `tracing_subscriber::registry().with(collector)`
//! and `set_default` so capture stays scoped to one test.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use pigate_core::audit::AUDIT_TARGET;

/// One captured audit event.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub level: Level,
    /// Every recorded field, rendered as text.
    pub fields: BTreeMap<String, String>,
}

impl AuditEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug)]
struct AuditBuffer {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl AuditBuffer {
    fn push(&mut self, entry: AuditEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// A `tracing` layer that keeps the most recent audit events.
///
/// Events whose target is not [`AUDIT_TARGET`] are ignored.
#[derive(Debug, Clone)]
pub struct AuditCollector {
    buffer: Arc<Mutex<AuditBuffer>>,
}

impl AuditCollector {
    /// Create a collector holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(AuditBuffer {
                entries: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            })),
        }
    }

    pub fn reader(&self) -> AuditReader {
        AuditReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for AuditCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() != AUDIT_TARGET {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Ok(mut buf) = self.buffer.lock() {
            buf.push(AuditEntry {
                level: *metadata.level(),
                fields: visitor.fields,
            });
        }
    }
}

/// A read handle for captured audit events.
#[derive(Debug, Clone)]
pub struct AuditReader {
    buffer: Arc<Mutex<AuditBuffer>>,
}

impl AuditReader {
    /// Snapshot of all captured events, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Records every field of an event as text.
#[derive(Default)]
struct FieldVisitor {
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}
