pub mod client;
pub mod prompt;
pub mod report;

pub use client::{DiagnosisError, DiagnosisProvider, DiagnosisRequest, GeminiClient};
pub use report::{DiagnosisReport, extract_report};
