//! Data model for the subscan service

pub mod candidate;
pub mod options;
pub mod session;

pub use candidate::{
    BillingEventType, Cadence, Candidate, ConfidenceLabel, EvidenceSample, EvidenceType,
    Fingerprint,
};
pub use options::{DriverTimeouts, QueryMode, ScanMode, ScanOptions};
pub use session::{Provider, ScanErrorCode, ScanSession, SessionStatus};
