// island-registry-server/src/audit.rs
// ============================================================================
// Module: Registry Audit Logging
// Description: Structured audit events for registry request handling.
// Purpose: Emit redacted audit logs without hard dependencies.
// Dependencies: island-registry-core, serde
// ============================================================================

//! ## Overview
//! Audit events cover the decisions that matter for a registry: publishes,
//! yanks, claims, and auth allow/deny outcomes. Events are JSON lines routed
//! through a sink trait so deployments can point them at their own pipeline.
//! Bearer tokens never appear in events; only fingerprints do.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use island_registry_core::now_millis;
use serde::Serialize;

// ============================================================================
// SECTION: Event
// ============================================================================

/// Registry audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryAuditEvent {
    /// Event identifier (e.g. `publish`, `yank`, `authn`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Correlation identifier for the request.
    pub request_id: String,
    /// Decision outcome (`allow`, `deny`, `commit`, `reject`).
    pub decision: &'static str,
    /// Acting principal, when authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Package name, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Version string, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Error kind for reject/deny events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Free-form reason for deny events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RegistryAuditEvent {
    /// Creates an event with the current timestamp.
    #[must_use]
    pub fn new(event: &'static str, request_id: impl Into<String>, decision: &'static str) -> Self {
        Self {
            event,
            timestamp_ms: now_millis(),
            request_id: request_id.into(),
            decision,
            principal: None,
            package: None,
            version: None,
            error_kind: None,
            reason: None,
        }
    }

    /// Returns a copy with the principal set.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Returns a copy with the package set.
    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Returns a copy with the version set.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Returns a copy with the error kind set.
    #[must_use]
    pub fn with_error_kind(mut self, kind: &'static str) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Returns a copy with the reason set.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for registry events.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &RegistryAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &RegistryAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &RegistryAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &RegistryAuditEvent) {}
}
