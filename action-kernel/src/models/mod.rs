pub mod audit;
pub mod credential;
pub mod tenant;
pub mod verification;

pub use audit::{AuditEntry, AuditOutcome};
pub use credential::{ApiKey, ApiKeySummary};
pub use tenant::{Tenant, Tier};
pub use verification::VerificationToken;
