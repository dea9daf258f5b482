pub mod job;
pub mod plan;
pub mod user;

pub use job::*;
pub use plan::*;
pub use user::*;
