//! Orchestrator: the coordinating façade over the pipeline stages.
//!
//! Onboarding persists insights and goals. Initialize decomposes and expands
//! every active goal concurrently, one task per goal, then synthesizes the
//! day's schedule. Completion events go to the Progression Tracker.

use chrono::{Duration, NaiveDate};
use rand::seq::IndexedRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::PlanningConfig;
use crate::db::Store;
use crate::decomposition::GoalDecomposer;
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::{user_context, CandidateGoal, ExtractionOutcome, InsightExtractor};
use crate::logging;
use crate::models::{
    now_rfc3339, BehavioralProfile, BlockKind, CompletionMetadata, Goal, GoalDraft, InsightsStatus,
    OnboardingInsights, Schedule, ScheduleSource, Task, UserProfile,
};
use crate::progression::{CompletionResult, ProgressionTracker};
use crate::reasoning::{ReasoningService, RetryPolicy};
use crate::scheduler::{Commitment, ScheduleSynthesizer};
use crate::task_generator::TaskGenerator;

// ============ Celebration Messages ============

const CELEBRATIONS: &[&str] = &[
    "Nice work! One more step forward.",
    "Done and dusted. Keep the momentum going!",
    "That's progress. Future you says thanks.",
    "Another one checked off. You're on a roll!",
    "Small wins add up. Well done!",
];

pub const ALREADY_DONE_MESSAGE: &str = "Already done! This one was counted earlier.";

fn celebration_message(result: &CompletionResult) -> String {
    if result.duplicate {
        return ALREADY_DONE_MESSAGE.to_string();
    }
    if let Some(goal) = result.goal.as_ref().filter(|g| g.completed_now) {
        return format!("Goal complete: {}! +{} bonus XP.", goal.title, goal.bonus_xp);
    }
    if result.leveled_up {
        return format!("Level up! You're now level {}.", result.level);
    }
    CELEBRATIONS
        .choose(&mut rand::rng())
        .map(|m| m.to_string())
        .unwrap_or_else(|| CELEBRATIONS[0].to_string())
}

// ============ Results ============

#[derive(Debug, Clone, Serialize)]
pub enum OnboardingResult {
    NeedsMoreInput { min_chars: usize, provided: usize },
    Completed { insights: OnboardingInsights, goals: Vec<Goal> },
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalFailure {
    pub goal_id: String,
    pub title: String,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleRef {
    pub schedule_id: String,
    pub date: NaiveDate,
    pub task_blocks: usize,
    pub total_scheduled_hours: f64,
    pub source: ScheduleSource,
}

impl ScheduleRef {
    fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            schedule_id: schedule.id.clone(),
            date: schedule.date,
            task_blocks: schedule.blocks.iter().filter(|b| b.kind == BlockKind::Task).count(),
            total_scheduled_hours: schedule.total_scheduled_hours,
            source: schedule.source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeSummary {
    pub active_goals: usize,
    pub breakdowns_created: usize,
    pub tasks_generated: usize,
    pub tasks_reused: usize,
    pub schedules: Vec<ScheduleRef>,
    pub failures: Vec<GoalFailure>,
    pub next_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub enum InitializeOutcome {
    /// No active goals: the client should route to goal entry.
    NeedsGoals,
    /// Nothing could be planned; the client should offer manual setup.
    NeedsManualSetup { failures: Vec<GoalFailure> },
    Ready(InitializeSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskCompletedResult {
    #[serde(flatten)]
    pub completion: CompletionResult,
    pub message: String,
}

/// What one goal contributed to an Initialize run.
#[derive(Debug, Default)]
struct GoalRun {
    breakdown_created: bool,
    generated: usize,
    reused: usize,
}

// ============ Orchestrator ============

pub struct Orchestrator {
    store: Arc<Store>,
    extractor: InsightExtractor,
    decomposer: GoalDecomposer,
    generator: TaskGenerator,
    synthesizer: ScheduleSynthesizer,
    tracker: ProgressionTracker,
    planning: PlanningConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        reasoner: Arc<dyn ReasoningService>,
        policy: RetryPolicy,
        planning: PlanningConfig,
    ) -> Self {
        Self {
            extractor: InsightExtractor::new(reasoner.clone(), policy.clone()),
            decomposer: GoalDecomposer::new(reasoner.clone(), policy.clone()),
            generator: TaskGenerator::new(store.clone(), reasoner.clone(), policy.clone())
                .with_default_minutes(planning.default_task_minutes),
            synthesizer: ScheduleSynthesizer::new(store.clone(), reasoner, policy),
            tracker: ProgressionTracker::new(store.clone()),
            store,
            planning,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ============ Onboarding ============

    /// Analyze onboarding text and persist the insights and goals. When the
    /// Reasoning Service is unavailable the text is kept as pending analysis
    /// and the error is returned; `retry_onboarding` picks it up later.
    pub async fn complete_onboarding(
        &self,
        user_id: &str,
        raw_text: &str,
        today: NaiveDate,
    ) -> PipelineResult<OnboardingResult> {
        let user = self.store.require_user(user_id)?;
        if let Some(existing) = self.store.get_insights(user_id)? {
            if existing.status == InsightsStatus::Analyzed {
                return Err(PipelineError::Validation("onboarding already completed".to_string()));
            }
        }

        let now = now_rfc3339();
        let pending = OnboardingInsights {
            user_id: user_id.to_string(),
            raw_text: raw_text.trim().to_string(),
            status: InsightsStatus::PendingAnalysis,
            insights: None,
            summary: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.analyze(&user, pending, today).await
    }

    /// Re-run extraction on onboarding text stored while the service was down.
    pub async fn retry_onboarding(&self, user_id: &str, today: NaiveDate) -> PipelineResult<OnboardingResult> {
        let user = self.store.require_user(user_id)?;
        let record = self
            .store
            .get_insights(user_id)?
            .ok_or_else(|| PipelineError::not_found("onboarding insights", user_id))?;
        if record.status == InsightsStatus::Analyzed {
            return Err(PipelineError::Validation("onboarding already completed".to_string()));
        }

        logging::log_orchestration(Some(user_id), "Retrying onboarding analysis");
        self.analyze(&user, record, today).await
    }

    async fn analyze(
        &self,
        user: &UserProfile,
        mut record: OnboardingInsights,
        today: NaiveDate,
    ) -> PipelineResult<OnboardingResult> {
        let outcome = self
            .extractor
            .extract(&user.id, &record.raw_text, &user.profile, today)
            .await;

        let extraction = match outcome {
            Ok(ExtractionOutcome::NeedsMoreInput { min_chars, provided }) => {
                return Ok(OnboardingResult::NeedsMoreInput { min_chars, provided });
            }
            Ok(ExtractionOutcome::Extracted(extraction)) => extraction,
            Err(e) => {
                // Keep the user's words so analysis can be retried
                self.store.save_insights(&record)?;
                logging::log_error(Some(&user.id), &format!("Onboarding analysis failed: {}", e));
                return Err(e);
            }
        };

        let goals: Vec<Goal> = extraction
            .goals
            .into_iter()
            .map(|candidate| goal_from_candidate(&user.id, candidate))
            .collect();

        record.status = InsightsStatus::Analyzed;
        record.insights = Some(extraction.insights);
        record.summary = Some(extraction.summary);
        record.updated_at = now_rfc3339();
        self.store.record_onboarding(&record, &goals)?;

        logging::log_orchestration(Some(&user.id), &format!(
            "Onboarding complete with {} goals", goals.len()
        ));
        Ok(OnboardingResult::Completed {
            insights: record,
            goals,
        })
    }

    pub fn update_profile(&self, user_id: &str, profile: &BehavioralProfile) -> PipelineResult<UserProfile> {
        self.store.update_behavioral_profile(user_id, profile)?;
        self.store.require_user(user_id)
    }

    // ============ Initialize ============

    /// Plan the user's day: decompose goals missing a breakdown, generate
    /// tasks for each goal, then synthesize schedules for today and the
    /// configured days ahead. One goal failing does not stop the others.
    pub async fn initialize(
        &self,
        user_id: &str,
        today: NaiveDate,
        commitments: &[Commitment],
    ) -> PipelineResult<InitializeOutcome> {
        let user = self.store.require_user(user_id)?;
        let goals = self.store.active_goals(user_id)?;
        if goals.is_empty() {
            logging::log_orchestration(Some(user_id), "No active goals, asking for goals");
            return Ok(InitializeOutcome::NeedsGoals);
        }

        let insights = self.store.get_insights(user_id)?;
        let context = user_context(insights.as_ref(), &user.profile);
        let dates: Vec<NaiveDate> = (0..=self.planning.schedule_days_ahead as i64)
            .map(|offset| today + Duration::days(offset))
            .collect();

        logging::log_orchestration(Some(user_id), &format!(
            "Initializing {} goals over {} day(s) from {}", goals.len(), dates.len(), today
        ));

        let mut set = JoinSet::new();
        let mut names = HashMap::new();
        for goal in goals.iter().cloned() {
            let decomposer = self.decomposer.clone();
            let generator = self.generator.clone();
            let store = self.store.clone();
            let profile = user.profile.clone();
            let context = context.clone();
            let dates = dates.clone();
            let label = (goal.id.clone(), goal.title.clone());

            let handle = set.spawn(async move {
                plan_goal(goal, &decomposer, &generator, &store, &profile, &context, &dates, today).await
            });
            names.insert(handle.id(), label);
        }

        let mut summary = InitializeSummary {
            active_goals: goals.len(),
            breakdowns_created: 0,
            tasks_generated: 0,
            tasks_reused: 0,
            schedules: Vec::new(),
            failures: Vec::new(),
            next_actions: Vec::new(),
        };

        while let Some(joined) = set.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(e) => (e.id(), Err(PipelineError::Validation(format!("goal planning aborted: {}", e)))),
            };
            let (goal_id, title) = names.remove(&id).unwrap_or_default();
            match outcome {
                Ok(run) => {
                    summary.breakdowns_created += run.breakdown_created as usize;
                    summary.tasks_generated += run.generated;
                    summary.tasks_reused += run.reused;
                }
                Err(e) => {
                    logging::log_error(Some(user_id), &format!("Planning goal '{}' failed: {}", title, e));
                    summary.failures.push(GoalFailure {
                        goal_id,
                        title,
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if summary.failures.len() == goals.len() && self.store.open_tasks_for_date(user_id, today)?.is_empty() {
            logging::log_orchestration(Some(user_id), "Every goal failed and nothing is planned, needs manual setup");
            return Ok(InitializeOutcome::NeedsManualSetup {
                failures: summary.failures,
            });
        }

        let mut today_schedule = None;
        for date in &dates {
            let fixed: &[Commitment] = if *date == today { commitments } else { &[] };
            let schedule = self.synthesizer.synthesize(&user, *date, fixed).await?;
            summary.schedules.push(ScheduleRef::from_schedule(&schedule));
            if *date == today {
                today_schedule = Some(schedule);
            }
        }

        summary.next_actions = next_actions(&summary, today_schedule.as_ref());
        logging::log_orchestration(Some(user_id), &format!(
            "Initialize done: {} new tasks, {} reused, {} failures",
            summary.tasks_generated,
            summary.tasks_reused,
            summary.failures.len()
        ));
        Ok(InitializeOutcome::Ready(summary))
    }

    /// Rebuild one day's schedule from the tasks currently open on it.
    pub async fn regenerate_schedule(
        &self,
        user_id: &str,
        date: NaiveDate,
        commitments: &[Commitment],
    ) -> PipelineResult<Schedule> {
        let user = self.store.require_user(user_id)?;
        self.synthesizer.synthesize(&user, date, commitments).await
    }

    pub fn schedule_for(&self, user_id: &str, date: NaiveDate) -> PipelineResult<Option<Schedule>> {
        self.store.get_schedule(user_id, date)
    }

    /// Seven days of tasks for one goal, expanded from its breakdown.
    pub fn plan_week(&self, goal_id: &str, start: NaiveDate) -> PipelineResult<Vec<Task>> {
        let goal = self.store.require_goal(goal_id)?;
        let user = self.store.require_user(&goal.user_id)?;
        self.generator.generate_for_week(&goal, &user.profile, start)
    }

    // ============ Task Events ============

    pub async fn on_task_completed(
        &self,
        user_id: &str,
        task_id: &str,
        metadata: CompletionMetadata,
        today: NaiveDate,
    ) -> PipelineResult<TaskCompletedResult> {
        self.owned_task(user_id, task_id)?;

        let completion = self.tracker.complete_task(task_id, metadata, today).map_err(|e| {
            logging::log_error(Some(user_id), &format!("Completing task {} failed: {}", task_id, e));
            e
        })?;

        let message = celebration_message(&completion);
        Ok(TaskCompletedResult { completion, message })
    }

    pub fn start_task(&self, user_id: &str, task_id: &str) -> PipelineResult<Task> {
        self.owned_task(user_id, task_id)?;
        self.tracker.start_task(task_id)
    }

    pub fn skip_task(&self, user_id: &str, task_id: &str) -> PipelineResult<Task> {
        self.owned_task(user_id, task_id)?;
        self.tracker.skip_task(task_id)
    }

    pub fn reschedule_task(&self, user_id: &str, task_id: &str, new_date: Option<NaiveDate>) -> PipelineResult<Task> {
        self.owned_task(user_id, task_id)?;
        self.tracker.reschedule_task(task_id, new_date)
    }

    fn owned_task(&self, user_id: &str, task_id: &str) -> PipelineResult<Task> {
        self.store
            .get_task(task_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| PipelineError::not_found("task", task_id))
    }

    // ============ Goal Management ============

    /// Manually entered goal, decomposed right away.
    pub async fn add_goal(&self, user_id: &str, draft: GoalDraft, today: NaiveDate) -> PipelineResult<Goal> {
        let user = self.store.require_user(user_id)?;
        validate_draft(&draft)?;

        let mut goal = Goal::from_draft(user_id, draft);
        let context = user_context(self.store.get_insights(user_id)?.as_ref(), &user.profile);
        goal.breakdown = Some(self.decomposer.decompose(&goal, &context, today).await?);
        self.store.insert_goal(&goal)?;

        logging::log_orchestration(Some(user_id), &format!("Added goal '{}'", goal.title));
        Ok(goal)
    }

    /// Edit a goal's details; the breakdown is regenerated to match.
    pub async fn update_goal(&self, goal_id: &str, draft: GoalDraft, today: NaiveDate) -> PipelineResult<Goal> {
        validate_draft(&draft)?;
        let mut goal = self.store.require_goal(goal_id)?;
        let user = self.store.require_user(&goal.user_id)?;

        goal.title = draft.title;
        goal.description = draft.description;
        goal.category = draft.category;
        goal.priority = draft.priority;
        goal.target_date = draft.target_date;
        self.store.update_goal_details(&goal)?;

        let context = user_context(self.store.get_insights(&goal.user_id)?.as_ref(), &user.profile);
        let breakdown = self.decomposer.decompose(&goal, &context, today).await?;
        self.store.replace_breakdown(goal_id, breakdown)?;

        logging::log_orchestration(Some(&goal.user_id), &format!(
            "Updated goal '{}' and regenerated its breakdown", goal.title
        ));
        self.store.require_goal(goal_id)
    }

    pub fn reset_goal_progress(&self, goal_id: &str) -> PipelineResult<Goal> {
        self.store.reset_goal_progress(goal_id)?;
        let goal = self.store.require_goal(goal_id)?;
        logging::log_orchestration(Some(&goal.user_id), &format!("Reset progress on '{}'", goal.title));
        Ok(goal)
    }

    pub fn delete_goal(&self, goal_id: &str) -> PipelineResult<()> {
        let goal = self.store.require_goal(goal_id)?;
        self.store.delete_goal(goal_id)?;
        logging::log_orchestration(Some(&goal.user_id), &format!("Deleted goal '{}'", goal.title));
        Ok(())
    }
}

fn validate_draft(draft: &GoalDraft) -> PipelineResult<()> {
    if draft.title.trim().is_empty() {
        return Err(PipelineError::Validation("goal title is required".to_string()));
    }
    Ok(())
}

fn goal_from_candidate(user_id: &str, candidate: CandidateGoal) -> Goal {
    let why = candidate.why_it_matters.trim().to_string();
    let mut goal = Goal::from_draft(user_id, candidate.draft);
    if !why.is_empty() {
        goal.description = format!("{}\n\nWhy it matters: {}", goal.description, why);
    }
    goal.breakdown = candidate.seed.into_breakdown();
    goal
}

/// Decompose if needed, then generate tasks for every date, in order.
#[allow(clippy::too_many_arguments)]
async fn plan_goal(
    mut goal: Goal,
    decomposer: &GoalDecomposer,
    generator: &TaskGenerator,
    store: &Store,
    profile: &BehavioralProfile,
    context: &str,
    dates: &[NaiveDate],
    today: NaiveDate,
) -> PipelineResult<GoalRun> {
    let mut run = GoalRun::default();

    if goal.breakdown.is_none() {
        let breakdown = decomposer.decompose(&goal, context, today).await?;
        store.save_breakdown(&goal.id, &breakdown)?;
        goal.breakdown = Some(breakdown);
        run.breakdown_created = true;
    }

    for date in dates {
        let batch = generator.generate_for_date(&goal, profile, context, *date).await?;
        if batch.reused {
            run.reused += batch.tasks.len();
        } else {
            run.generated += batch.tasks.len();
        }
    }
    Ok(run)
}

fn next_actions(summary: &InitializeSummary, today: Option<&Schedule>) -> Vec<String> {
    let mut actions = Vec::new();

    if let Some(first) = today.and_then(|s| s.blocks.iter().find(|b| b.kind == BlockKind::Task)) {
        actions.push(format!("Start with '{}' at {}", first.title, first.start.format("%H:%M")));
    }
    if today.map_or(false, |s| s.source == ScheduleSource::Fallback && !s.blocks.is_empty()) {
        actions.push("Today's plan was built from priorities; regenerate it later for a tailored schedule".to_string());
    }
    if today.map_or(false, |s| s.suggestions.iter().any(|x| x.starts_with("Not scheduled today"))) {
        actions.push("Some tasks did not fit today; reschedule or skip them".to_string());
    }
    if !summary.failures.is_empty() {
        let titles = summary.failures.iter().map(|f| f.title.as_str()).collect::<Vec<_>>().join(", ");
        actions.push(format!("Review goals that could not be planned: {}", titles));
    }
    if summary.tasks_generated == 0 && summary.tasks_reused == 0 {
        actions.push("Add a task or edit a goal to fill your day".to_string());
    }
    actions
}
