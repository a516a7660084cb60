//! Deployment module

pub mod build;
pub mod command;
pub mod domains;
pub mod engine;
pub mod envtext;
pub mod fsm;
pub mod git;
pub mod logger;
pub mod registry;
pub mod upload;

pub use engine::{Engine, EngineOptions, EngineParts};
