pub mod client;
pub mod config;
pub mod http_client;
pub mod json_parser;
pub mod optimizer;
pub mod prompts;
pub mod provider;

pub use client::*;
pub use config::*;
pub use http_client::*;
pub use optimizer::*;
pub use provider::*;
