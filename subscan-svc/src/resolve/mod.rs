//! Merchant resolution: sender surface → canonical merchant

pub mod domains;
pub mod resolver;

pub use resolver::{best_domain, resolve, EmailSurface, MatchReason, MerchantMatch, ResolverSignals};
