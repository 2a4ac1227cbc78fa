use std::sync::Arc;

use courier_store::CampaignStore;

use crate::{
    clock::{Clock, SystemClock},
    config::DispatchConfig,
    error::Result,
    outcome::OutcomeRecorder,
    quota::QuotaTracker,
    render::template::{HandlebarsRenderer, TemplateRenderer},
};

/// Collaborators shared by every scheduler and expedition of a process.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub store: Arc<dyn CampaignStore>,
    pub clock: Arc<dyn Clock>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub config: Arc<DispatchConfig>,
    pub recorder: OutcomeRecorder,
    pub quota: QuotaTracker,
}

impl DispatchContext {
    /// Validate `config` and wire the default clock and template engine.
    pub fn new(store: Arc<dyn CampaignStore>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(
            store,
            Arc::new(SystemClock),
            Arc::new(HandlebarsRenderer::new()),
            Arc::new(config),
        ))
    }

    #[must_use]
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(self.store, clock, self.templates, self.config)
    }

    #[must_use]
    pub fn with_templates(self, templates: Arc<dyn TemplateRenderer>) -> Self {
        Self::assemble(self.store, self.clock, templates, self.config)
    }

    fn assemble(
        store: Arc<dyn CampaignStore>,
        clock: Arc<dyn Clock>,
        templates: Arc<dyn TemplateRenderer>,
        config: Arc<DispatchConfig>,
    ) -> Self {
        Self {
            recorder: OutcomeRecorder::new(Arc::clone(&store), Arc::clone(&clock)),
            quota: QuotaTracker::new(Arc::clone(&store), Arc::clone(&clock), &config),
            store,
            clock,
            templates,
            config,
        }
    }
}
