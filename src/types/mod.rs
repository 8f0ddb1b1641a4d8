//! Type definitions

pub mod audit;
pub mod conversation;
pub mod country;
pub mod lead;
pub mod messages;
pub mod runtime_config;
pub mod task;
pub mod template;
pub mod webhook;

pub use audit::*;
pub use conversation::*;
pub use country::*;
pub use lead::*;
pub use messages::*;
pub use runtime_config::*;
pub use task::*;
pub use template::*;
pub use webhook::*;
