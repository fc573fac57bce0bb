pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod link;
pub mod repo;
pub mod runtime;
pub mod snapshot;
pub mod source;
pub mod sync;
