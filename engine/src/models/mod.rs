//! Record models shared by the engine and the record store

pub mod deployment;
pub mod domain;
pub mod site;
