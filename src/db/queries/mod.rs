//! Database queries

pub mod audit;
pub mod conversation;
pub mod country;
pub mod lead;
pub mod runtime_config;
pub mod task;
pub mod template;
pub mod webhook_event;
