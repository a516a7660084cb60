//! boop engine library
//!
//! Deployment orchestration for static sites: clone, build, upload to
//! object storage and publish routing at the edge.

pub mod app;
pub mod deploy;
pub mod edge;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod objstore;
pub mod ratelimit;
pub mod storage;
pub mod store;
pub mod utils;
pub mod webhooks;
