pub mod models;
pub mod pii;

pub use models::events::LifecycleEvent;
pub use pii::Masked;
