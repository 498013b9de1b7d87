//! Field extractors: amount, cadence, renewal date, plan, platform merchant
//!
//! All extractors are pure functions over the message haystack; confidence
//! weighting happens in the candidate builder, not here.

pub mod amount;
pub mod cadence;
pub mod plan;
pub mod platform;
pub mod renewal;

pub use amount::{extract_amount, ExtractedAmount};
pub use cadence::{extract_cadence_keyword, infer_cadence_from_dates};
pub use plan::extract_plan;
pub use platform::{extract_platform_merchant, platform_for_domain, Platform};
pub use renewal::extract_next_renewal;
