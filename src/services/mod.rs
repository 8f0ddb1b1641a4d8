//! Business logic services

pub mod automations;
pub mod lead_provisioning;
pub mod outbound;
pub mod runtime_config;
pub mod send_mode;
pub mod template_vars;
pub mod webhook;
pub mod whatsapp_provider;
