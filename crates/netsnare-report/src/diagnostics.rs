//! Heartbeat diagnostics record.
//!
//! A single process-lifetime record of the last heartbeat exchange,
//! surfaced by `/api-diagnostics`. Invariant: `consecutive_failures` is
//! zero exactly when the last send completed with a 2xx response.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::Serialize;

/// The last request the client sent, with the credential redacted.
#[derive(Debug, Clone, Serialize)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub body: String,
    pub api_key: String,
}

/// The last response the backend produced.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub body: String,
}

/// The last failure, transport- or status-level.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Singleton heartbeat diagnostics, living for the process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeartbeatDiagnostics {
    pub last_request: Option<RequestInfo>,
    pub last_response: Option<ResponseInfo>,
    pub last_error: Option<ErrorInfo>,
    pub last_success: Option<SystemTime>,
    pub consecutive_failures: u32,
}

/// Shared handle over the diagnostics record.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsHandle {
    inner: Arc<Mutex<HeartbeatDiagnostics>>,
}

impl DiagnosticsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, url: &str, method: &str, body: &str, redacted_key: &str) {
        let mut diag = self.inner.lock().expect("diagnostics lock");
        diag.last_request = Some(RequestInfo {
            url: url.to_string(),
            method: method.to_string(),
            body: body.to_string(),
            api_key: redacted_key.to_string(),
        });
    }

    /// Record a 2xx exchange: failures reset, `last_success` advances.
    pub fn record_success(&self, status: u16, body: &str) {
        let mut diag = self.inner.lock().expect("diagnostics lock");
        diag.last_response = Some(ResponseInfo {
            status,
            body: body.to_string(),
        });
        diag.last_error = None;
        diag.last_success = Some(SystemTime::now());
        diag.consecutive_failures = 0;
    }

    /// Record a failed exchange. Returns the new consecutive-failure count.
    pub fn record_failure(&self, message: &str, status: Option<u16>, body: Option<&str>) -> u32 {
        let mut diag = self.inner.lock().expect("diagnostics lock");
        if let (Some(status), Some(body)) = (status, body) {
            diag.last_response = Some(ResponseInfo {
                status,
                body: body.to_string(),
            });
        }
        diag.last_error = Some(ErrorInfo {
            message: message.to_string(),
            status,
            body: body.map(str::to_string),
        });
        diag.consecutive_failures += 1;
        diag.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().expect("diagnostics lock").consecutive_failures
    }

    pub fn last_success(&self) -> Option<SystemTime> {
        self.inner.lock().expect("diagnostics lock").last_success
    }

    pub fn snapshot(&self) -> HeartbeatDiagnostics {
        self.inner.lock().expect("diagnostics lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_success() {
        let handle = DiagnosticsHandle::new();
        assert_eq!(handle.record_failure("timeout", None, None), 1);
        assert_eq!(handle.record_failure("502", Some(502), Some("bad gateway")), 2);
        assert_eq!(handle.consecutive_failures(), 2);

        handle.record_success(200, "{}");
        assert_eq!(handle.consecutive_failures(), 0);
        assert!(handle.last_success().is_some());
    }

    #[test]
    fn success_clears_last_error() {
        let handle = DiagnosticsHandle::new();
        handle.record_failure("refused", None, None);
        handle.record_success(204, "");

        let snap = handle.snapshot();
        assert!(snap.last_error.is_none());
        assert_eq!(snap.last_response.unwrap().status, 204);
    }

    #[test]
    fn failure_after_success_counts_from_one() {
        let handle = DiagnosticsHandle::new();
        handle.record_failure("a", None, None);
        handle.record_success(200, "ok");
        assert_eq!(handle.record_failure("b", Some(500), Some("boom")), 1);
        // last_success survives later failures.
        assert!(handle.last_success().is_some());
    }

    #[test]
    fn request_info_is_kept() {
        let handle = DiagnosticsHandle::new();
        handle.record_request(
            "http://backend/api/honeypot/heartbeat",
            "POST",
            r#"{"honeypot_id":"test"}"#,
            "sk-a****",
        );
        let snap = handle.snapshot();
        let req = snap.last_request.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.api_key, "sk-a****");
    }
}
