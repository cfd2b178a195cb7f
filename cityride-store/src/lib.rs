pub mod app_config;
pub mod database;
pub mod lifecycle_repo;
mod rows;

pub use app_config::Config;
pub use database::DbClient;
pub use lifecycle_repo::PgLifecycleStore;
