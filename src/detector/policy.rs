use std::time::Duration;

use crate::config::{AgentType, ProviderSettings};

/// Timing and threshold knobs of the completion protocol.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    /// Settle time after submit before the first start probe.
    pub initial_delay: Duration,
    pub start_timeout: Duration,
    pub start_poll_interval: Duration,
    pub check_interval: Duration,
    pub required_stable_samples: u32,
    /// Minimum time since generation start before completion is accepted.
    pub min_elapsed: Duration,
    /// The response must be strictly longer than this many characters.
    pub min_response_chars: usize,
    pub max_wait: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            start_timeout: Duration::from_secs(120),
            start_poll_interval: Duration::from_secs(2),
            check_interval: Duration::from_secs(3),
            required_stable_samples: 5,
            min_elapsed: Duration::from_secs(15),
            min_response_chars: 50,
            max_wait: Duration::from_secs(1800),
        }
    }
}

impl CompletionPolicy {
    pub fn from_settings(agent_type: AgentType, settings: &ProviderSettings) -> Self {
        let check_secs = settings
            .check_interval_seconds
            .unwrap_or_else(|| agent_type.default_check_interval_secs());
        let agent_mode = agent_type == AgentType::ChatGptWeb && settings.agent_mode;
        let min_elapsed_secs = settings
            .min_elapsed_seconds
            .unwrap_or(if agent_mode { 300 } else { 15 });

        Self {
            check_interval: Duration::from_secs(check_secs.max(1)),
            min_elapsed: Duration::from_secs(min_elapsed_secs),
            min_response_chars: settings.min_response_chars,
            max_wait: Duration::from_secs(settings.max_wait_per_prompt_seconds),
            ..Self::default()
        }
    }
}
