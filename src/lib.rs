pub mod config;
pub mod pipeline;

pub use config::AppConfig;
pub use pipeline::{build_localizer, Pipeline};
