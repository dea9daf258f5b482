pub mod metrics;
pub mod orchestrator;
pub mod payment;
pub mod plan_catalog;
pub mod quota_ledger;
pub mod sessions;
pub mod upscaler;

pub use metrics::*;
pub use orchestrator::*;
pub use payment::*;
pub use plan_catalog::*;
pub use quota_ledger::*;
pub use sessions::*;
pub use upscaler::*;
