//! Outbound send-mode decision
//!
//! Evaluated fresh for every send. Explicit caller intent wins, then the
//! template hint, then the runtime default; `auto` resolves against the
//! customer-initiated conversation window.

use chrono::{DateTime, Duration, Utc};

use super::runtime_config::OutboundRuntimeConfig;
use crate::types::{DeliveryMode, SendMode};

/// Everything the decision depends on
#[derive(Debug, Clone)]
pub struct SendModeInputs {
    pub forced: Option<SendMode>,
    pub template_hint: Option<SendMode>,
    pub has_provider_template: bool,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// Open when the last inbound message is at most `window_hours` old.
/// No inbound message means closed.
pub fn is_window_open(
    last_inbound_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window_hours: f64,
) -> bool {
    let Some(last) = last_inbound_at else {
        return false;
    };
    let window = Duration::milliseconds((window_hours * 3_600_000.0) as i64);
    now - last <= window
}

pub fn decide_send_mode(inputs: &SendModeInputs, config: &OutboundRuntimeConfig) -> DeliveryMode {
    if let Some(mode) = inputs.forced.and_then(|m| m.explicit()) {
        return mode;
    }

    let preferred = inputs.template_hint.unwrap_or(config.default_send_mode);
    if let Some(mode) = preferred.explicit() {
        return mode;
    }

    if is_window_open(inputs.last_inbound_at, inputs.now, config.conversation_window_hours) {
        return DeliveryMode::Text;
    }

    if inputs.has_provider_template {
        return DeliveryMode::Template;
    }

    if config.allow_text_outside_window && !config.require_template_outside_window {
        return DeliveryMode::Text;
    }

    DeliveryMode::Template
}
