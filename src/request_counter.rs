use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Running totals of provider calls, for log lines only.
#[derive(Clone)]
pub struct RequestCounter {
    success_count: Arc<AtomicU64>,
    failure_count: Arc<AtomicU64>,
    started: Instant,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self {
            success_count: Arc::new(AtomicU64::new(0)),
            failure_count: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    pub fn log_diagnosis_request(&self, request_id: &str, model: &str, image_bytes: usize) {
        tracing::info!(
            "GEMINI API REQUEST #{} | Request: {} | Model: {} | Image: {} bytes | Elapsed: {}s | Rate: {:.2} req/min",
            self.total_requests() + 1,
            request_id,
            model,
            image_bytes,
            self.elapsed_seconds(),
            self.request_rate()
        );
    }

    pub fn log_success(&self, request_id: &str, response_chars: usize) -> u64 {
        let count = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::info!(
            "GEMINI API SUCCESS | Request: {} | Response: {} chars | Total OK: {} | Total Failed: {}",
            request_id,
            response_chars,
            count,
            self.failure_count()
        );

        count
    }

    pub fn log_failure(&self, request_id: &str, kind: &str, retryable: bool, detail: &str) -> u64 {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;

        if retryable {
            tracing::warn!(
                "GEMINI API FAILURE (retryable) | Request: {} | Kind: {} | Total OK: {} | Total Failed: {} | {}",
                request_id,
                kind,
                self.success_count(),
                count,
                detail
            );
        } else {
            tracing::error!(
                "GEMINI API FAILURE (non-retryable) | Request: {} | Kind: {} | Total OK: {} | Total Failed: {} | {}",
                request_id,
                kind,
                self.success_count(),
                count,
                detail
            );
        }

        count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count() + self.failure_count()
    }

    fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn request_rate(&self) -> f64 {
        let elapsed = self.elapsed_seconds() as f64;
        if elapsed < 1.0 {
            return 0.0;
        }
        (self.total_requests() as f64 / elapsed) * 60.0 // requests per minute
    }

    pub fn print_summary(&self) {
        tracing::info!(
            "GEMINI API SUMMARY | Total: {} requests | OK: {} | Failed: {} | Elapsed: {}s | Avg Rate: {:.2} req/min",
            self.total_requests(),
            self.success_count(),
            self.failure_count(),
            self.elapsed_seconds(),
            self.request_rate()
        );
    }
}

impl Default for RequestCounter {
    fn default() -> Self {
        Self::new()
    }
}
