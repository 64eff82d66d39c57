pub mod age_band;
pub mod cache;
pub mod compare;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod ranker;
pub mod source;
pub mod types;
pub mod util;
