use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::browser::BrowserPage;
use crate::config::{AgentType, TaskConfig};
use crate::detector::{CompletionDetector, CompletionPolicy};
use super::base::{AgentContext, WebAgent};
use super::chatgpt::{ChatGptAgent, CHATGPT_BASE_URL};
use super::claude::{ClaudeAgent, CLAUDE_BASE_URL};

pub struct AgentDefinition {
    pub agent_type: AgentType,
    pub display_name: &'static str,
    pub base_url: &'static str,
}

pub static AGENT_REGISTRY: [AgentDefinition; 2] = [
    AgentDefinition {
        agent_type: AgentType::ClaudeWeb,
        display_name: "Claude.ai",
        base_url: CLAUDE_BASE_URL,
    },
    AgentDefinition {
        agent_type: AgentType::ChatGptWeb,
        display_name: "ChatGPT",
        base_url: CHATGPT_BASE_URL,
    },
];

pub fn definition(agent_type: AgentType) -> &'static AgentDefinition {
    match agent_type {
        AgentType::ClaudeWeb => &AGENT_REGISTRY[0],
        AgentType::ChatGptWeb => &AGENT_REGISTRY[1],
    }
}

/// Builds the provider agent for one attempt's page.
pub trait AgentFactory: Send + Sync {
    fn create(
        &self,
        page: Arc<dyn BrowserPage>,
        config: &TaskConfig,
        browser_download_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Box<dyn WebAgent>;
}

pub struct DefaultAgentFactory;

impl AgentFactory for DefaultAgentFactory {
    fn create(
        &self,
        page: Arc<dyn BrowserPage>,
        config: &TaskConfig,
        browser_download_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Box<dyn WebAgent> {
        let settings = config.provider().clone();
        let policy = CompletionPolicy::from_settings(config.agent_type, &settings);
        debug!(
            agent = definition(config.agent_type).display_name,
            min_elapsed_secs = policy.min_elapsed.as_secs(),
            check_interval_secs = policy.check_interval.as_secs(),
            "Building agent"
        );
        let ctx = AgentContext::new(
            page,
            config.prompts.clone(),
            CompletionDetector::new(policy),
            cancel,
            browser_download_dir,
        );
        match config.agent_type {
            AgentType::ClaudeWeb => Box::new(ClaudeAgent::new(ctx, settings)),
            AgentType::ChatGptWeb => Box::new(ChatGptAgent::new(ctx, settings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[test]
    fn test_registry_covers_every_agent_type() {
        for agent_type in [AgentType::ClaudeWeb, AgentType::ChatGptWeb] {
            assert_eq!(definition(agent_type).agent_type, agent_type);
        }
    }

    #[test]
    fn test_factory_picks_provider() {
        let page: Arc<dyn BrowserPage> = Arc::new(FakePage::new("about:blank"));
        let mut config = TaskConfig { prompts: vec!["p1".into(), "p2".into()], ..Default::default() };

        let claude = DefaultAgentFactory.create(page.clone(), &config, None, CancellationToken::new());
        assert!(claude.home_url().starts_with(CLAUDE_BASE_URL));
        assert_eq!(claude.context().prompts.len(), 2);

        config.agent_type = AgentType::ChatGptWeb;
        let chatgpt = DefaultAgentFactory.create(page, &config, None, CancellationToken::new());
        assert!(chatgpt.home_url().starts_with(CHATGPT_BASE_URL));
        assert_eq!(chatgpt.context().detector.policy().min_elapsed.as_secs(), 300);
    }
}
