//! Stride turns free-form onboarding text into goals, goals into breakdowns,
//! breakdowns into daily tasks and tasks into time-blocked schedules, then
//! tracks completion as XP, levels, streaks and goal progress.
//!
//! [`Stride`] wires the pipeline from a [`Config`]; the stage types are
//! public for callers that want to compose them directly.

pub mod anthropic;
pub mod config;
pub mod db;
pub mod decomposition;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod progression;
pub mod prompts;
pub mod reasoning;
pub mod scheduler;
pub mod task_generator;

use chrono::{Local, NaiveDate};
use std::path::Path;
use std::sync::Arc;

pub use config::Config;
pub use db::Store;
pub use error::{PipelineError, PipelineResult};
pub use models::{
    BehavioralProfile, CompletionMetadata, Goal, GoalDraft, Schedule, Task, UserProfile,
};
pub use orchestrator::{
    InitializeOutcome, OnboardingResult, Orchestrator, TaskCompletedResult,
};
pub use reasoning::ReasoningService;
pub use scheduler::Commitment;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The configured pipeline. Date-sensitive calls use the local calendar day.
pub struct Stride {
    config: Config,
    orchestrator: Orchestrator,
}

impl Stride {
    /// Load configuration, start logging, open the store and pick the
    /// Reasoning Service provider.
    pub fn init(config_path: Option<&Path>) -> PipelineResult<Self> {
        let config = Config::load(config_path)?;

        if let Err(e) = logging::init_logging(&config.logging) {
            eprintln!("Failed to initialize logging: {}", e);
        }
        if let Some(dir) = &config.logging.dir {
            let _ = logging::cleanup_old_logs(dir, config.logging.retention_days);
        }

        let store = Arc::new(Store::open(&config.database.path)?);
        let reasoner = reasoning::from_config(&config.reasoning);
        if !reasoner.is_available() {
            logging::log_orchestration(None, "No Reasoning Service key configured, fallbacks only");
        }

        Ok(Self::with_parts(config, store, reasoner))
    }

    /// Assemble from an existing store and service.
    pub fn with_parts(config: Config, store: Arc<Store>, reasoner: Arc<dyn ReasoningService>) -> Self {
        let orchestrator = Orchestrator::new(
            store,
            reasoner,
            config.reasoning.retry_policy(),
            config.planning.clone(),
        );
        logging::log_orchestration(None, "Stride initialized");
        Self { config, orchestrator }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn create_user(&self, display_name: &str, profile: BehavioralProfile) -> PipelineResult<UserProfile> {
        self.orchestrator.store().create_user(display_name, profile)
    }

    pub async fn complete_onboarding(&self, user_id: &str, raw_text: &str) -> PipelineResult<OnboardingResult> {
        self.orchestrator.complete_onboarding(user_id, raw_text, today()).await
    }

    pub async fn retry_onboarding(&self, user_id: &str) -> PipelineResult<OnboardingResult> {
        self.orchestrator.retry_onboarding(user_id, today()).await
    }

    pub async fn initialize(&self, user_id: &str, commitments: &[Commitment]) -> PipelineResult<InitializeOutcome> {
        self.orchestrator.initialize(user_id, today(), commitments).await
    }

    pub async fn complete_task(
        &self,
        user_id: &str,
        task_id: &str,
        metadata: CompletionMetadata,
    ) -> PipelineResult<TaskCompletedResult> {
        self.orchestrator.on_task_completed(user_id, task_id, metadata, today()).await
    }

    pub async fn add_goal(&self, user_id: &str, draft: GoalDraft) -> PipelineResult<Goal> {
        self.orchestrator.add_goal(user_id, draft, today()).await
    }

    pub async fn update_goal(&self, goal_id: &str, draft: GoalDraft) -> PipelineResult<Goal> {
        self.orchestrator.update_goal(goal_id, draft, today()).await
    }

    pub fn today_schedule(&self, user_id: &str) -> PipelineResult<Option<Schedule>> {
        self.orchestrator.schedule_for(user_id, today())
    }
}
