use std::sync::Arc;

use super::applications::ApplicationLifecycleManager;
use super::catalog::OpportunityCatalog;
use super::clock::{Clock, SystemClock};
use super::domain::{CandidateId, OpportunityId};
use super::error::WorkflowError;
use super::live::LiveViewSynchronizer;
use super::matching::{MatchEngine, MatchScore, RankingService};
use super::notify::NotificationPublisher;
use super::onboarding::ApprovalWorkflow;
use super::profiles::CandidateDirectory;
use super::store::EntityStore;
use crate::config::EngineConfig;

/// Every engine component wired to one store, notifier and clock.
pub struct Platform<S, N> {
    store: Arc<S>,
    config: EngineConfig,
    pub candidates: CandidateDirectory<S>,
    pub organizations: ApprovalWorkflow<S>,
    pub catalog: OpportunityCatalog<S>,
    pub applications: ApplicationLifecycleManager<S, N>,
    pub ranking: RankingService<S>,
}

impl<S, N> Platform<S, N>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: EngineConfig) -> Self {
        Self::with_clock(store, notifier, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<S>,
        notifier: Arc<N>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            candidates: CandidateDirectory::with_clock(store.clone(), clock.clone()),
            organizations: ApprovalWorkflow::with_clock(store.clone(), clock.clone()),
            catalog: OpportunityCatalog::with_clock(store.clone(), clock.clone()),
            applications: ApplicationLifecycleManager::with_clock(
                store.clone(),
                notifier,
                &config,
                clock,
            ),
            ranking: RankingService::new(store.clone(), MatchEngine::default()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scores a stored candidate against a candidate-visible opportunity.
    pub fn score_match(
        &self,
        candidate_id: &CandidateId,
        opportunity_id: &OpportunityId,
    ) -> Result<MatchScore, WorkflowError> {
        let candidate = self.candidates.profile(candidate_id)?;
        let opportunity = self.catalog.visible_by_id(opportunity_id)?;
        Ok(self.ranking.engine().score(&candidate, &opportunity))
    }

    /// Live views over the same store; requires a running tokio runtime to watch.
    pub fn live_views(&self) -> LiveViewSynchronizer<S> {
        LiveViewSynchronizer::new(self.store.clone(), &self.config)
    }
}
