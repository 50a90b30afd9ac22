#[macro_use]
extern crate tracing;

pub mod batch;
pub mod client;
pub mod config;
pub mod event;
pub mod http;
pub mod pipeline;
pub mod processor;
pub mod shutdown;
pub mod sources;
pub mod trace;
pub mod writer;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
