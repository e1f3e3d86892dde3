pub mod aws;
pub mod cli;
pub mod datahub;
pub mod ews;
pub mod github;
pub mod gitlab;
mod http;
pub mod load_config;
pub mod pipeline;
pub mod polarion;
pub mod prometheus;
pub mod release;
pub mod report;
pub mod reportportal;
pub mod s3;

pub use cli::{run, Cli, Commands, LogFormat};
