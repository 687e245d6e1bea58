//! Progression Tracker.
//!
//! Task lifecycle transitions and everything a completion sets off: XP and
//! level, streak, goal progress and goal completion. A completion is a single
//! store transaction, so concurrent completions cannot lose updates and a
//! retried completion is a no-op.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{self, Store, XpReason};
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::models::{CompletionMetadata, Priority, Task, TaskStatus, TaskType, UserProfile};

pub const BASE_TASK_XP: i64 = 10;
pub const GOAL_COMPLETION_XP: i64 = 100;
/// No single task moves a goal further than this.
pub const MAX_PROGRESS_PER_TASK: i64 = 25;

pub fn task_xp(priority: Priority, difficulty: u8) -> i64 {
    let priority_bonus = match priority {
        Priority::High => 10,
        Priority::Medium => 5,
        Priority::Low => 0,
    };
    let difficulty_bonus = 5 * (difficulty.clamp(1, 5) as i64 - 1);
    BASE_TASK_XP + priority_bonus + difficulty_bonus
}

pub fn progress_increment(task_type: TaskType) -> i64 {
    let increment = match task_type {
        TaskType::Milestone => 20,
        TaskType::WeeklyTask | TaskType::OneTime => 10,
        TaskType::DailyHabit | TaskType::Recurring => 3,
    };
    increment.min(MAX_PROGRESS_PER_TASK)
}

/// Streak after activity on `today`: unchanged on the same day, +1 on the
/// next day, otherwise a fresh streak of 1.
pub fn next_streak(current: i64, longest: i64, last_active: Option<NaiveDate>, today: NaiveDate) -> (i64, i64) {
    let current = match last_active {
        Some(last) if last == today => current.max(1),
        Some(last) if last + Duration::days(1) == today => current + 1,
        _ => 1,
    };
    (current, longest.max(current))
}

// ============ Results ============

#[derive(Debug, Clone, Serialize)]
pub struct GoalProgress {
    pub goal_id: String,
    pub title: String,
    pub progress_before: i64,
    pub progress_after: i64,
    pub completed_now: bool,
    pub bonus_xp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub task: Task,
    /// Everything awarded by this call, goal bonus included.
    pub xp_awarded: i64,
    pub total_xp: i64,
    pub level: i64,
    pub leveled_up: bool,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub goal: Option<GoalProgress>,
    /// The task had already been completed; nothing changed.
    pub duplicate: bool,
}

// ============ Tracker ============

#[derive(Clone)]
pub struct ProgressionTracker {
    store: Arc<Store>,
}

impl ProgressionTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn complete_task(
        &self,
        task_id: &str,
        metadata: CompletionMetadata,
        today: NaiveDate,
    ) -> PipelineResult<CompletionResult> {
        if let Some(rating) = metadata.satisfaction {
            if !(1..=5).contains(&rating) {
                return Err(PipelineError::Validation(format!(
                    "satisfaction {} outside 1..=5",
                    rating
                )));
            }
        }

        let result = self.store.with_transaction(|tx| {
            let task = db::load_task(tx, task_id)?
                .ok_or_else(|| PipelineError::not_found("task", task_id))?;
            let user_before = db::load_user(tx, &task.user_id)?
                .ok_or_else(|| PipelineError::not_found("user", &task.user_id))?;

            if task.completed_at.is_some() {
                return Ok(duplicate_result(task, &user_before));
            }
            if !task.status.can_transition_to(TaskStatus::Completed) {
                return Err(PipelineError::InvalidTransition {
                    from: task.status.as_str().to_string(),
                    to: TaskStatus::Completed.as_str().to_string(),
                });
            }
            if !db::mark_task_completed(tx, &task.id, &metadata)? {
                return Ok(duplicate_result(task, &user_before));
            }

            let mut awarded = task_xp(task.priority, task.difficulty);
            db::award_xp(tx, &task.user_id, awarded, XpReason::TaskCompletion, Some(&task.id), None)?;

            let (current, longest) = next_streak(
                user_before.current_streak,
                user_before.longest_streak,
                user_before.last_active_date,
                today,
            );
            db::set_streak(tx, &task.user_id, current, longest, today)?;

            let goal = match task.related_goal_id.as_deref() {
                Some(goal_id) => advance_goal(tx, &task, goal_id)?,
                None => None,
            };
            if let Some(g) = &goal {
                awarded += g.bonus_xp;
            }

            let user_after = db::load_user(tx, &task.user_id)?
                .ok_or_else(|| PipelineError::not_found("user", &task.user_id))?;
            let task = db::load_task(tx, task_id)?
                .ok_or_else(|| PipelineError::not_found("task", task_id))?;

            Ok(CompletionResult {
                task,
                xp_awarded: awarded,
                total_xp: user_after.xp,
                level: user_after.level,
                leveled_up: user_after.level > user_before.level,
                current_streak: user_after.current_streak,
                longest_streak: user_after.longest_streak,
                goal,
                duplicate: false,
            })
        })?;

        let user_id = Some(result.task.user_id.as_str());
        if result.duplicate {
            logging::log_progress(user_id, &format!(
                "Task {} already completed, no XP awarded", task_id
            ));
        } else {
            logging::log_progress(user_id, &format!(
                "Completed '{}': +{} XP (total {}, level {}), streak {}",
                result.task.title, result.xp_awarded, result.total_xp, result.level, result.current_streak
            ));
            if let Some(g) = result.goal.as_ref().filter(|g| g.completed_now) {
                logging::log_progress(user_id, &format!(
                    "Goal '{}' completed, +{} bonus XP", g.title, g.bonus_xp
                ));
            }
        }
        Ok(result)
    }

    pub fn start_task(&self, task_id: &str) -> PipelineResult<Task> {
        self.transition(task_id, TaskStatus::InProgress, None)
    }

    pub fn skip_task(&self, task_id: &str) -> PipelineResult<Task> {
        self.transition(task_id, TaskStatus::Skipped, None)
    }

    /// With a date the task goes back to pending on that date; without one it
    /// is parked as rescheduled and stays off schedules until given a date.
    pub fn reschedule_task(&self, task_id: &str, new_date: Option<NaiveDate>) -> PipelineResult<Task> {
        match new_date {
            Some(date) => self.transition(task_id, TaskStatus::Pending, Some(date)),
            None => self.transition(task_id, TaskStatus::Rescheduled, None),
        }
    }

    fn transition(&self, task_id: &str, next: TaskStatus, date: Option<NaiveDate>) -> PipelineResult<Task> {
        let task = self.store.with_transaction(|tx| {
            let task = db::load_task(tx, task_id)?
                .ok_or_else(|| PipelineError::not_found("task", task_id))?;
            if !task.status.can_transition_to(next) {
                return Err(PipelineError::InvalidTransition {
                    from: task.status.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
            db::update_task_status(tx, task_id, next, date.unwrap_or(task.scheduled_date))?;
            db::load_task(tx, task_id)?.ok_or_else(|| PipelineError::not_found("task", task_id))
        })?;

        logging::log_progress(Some(&task.user_id), &format!(
            "Task '{}' is now {} on {}", task.title, task.status.as_str(), task.scheduled_date
        ));
        Ok(task)
    }
}

fn duplicate_result(task: Task, user: &UserProfile) -> CompletionResult {
    CompletionResult {
        task,
        xp_awarded: 0,
        total_xp: user.xp,
        level: user.level,
        leveled_up: false,
        current_streak: user.current_streak,
        longest_streak: user.longest_streak,
        goal: None,
        duplicate: true,
    }
}

/// Goal side of a completion: bounded progress, milestone check-off, and
/// the one-time completion bonus.
fn advance_goal(tx: &rusqlite::Connection, task: &Task, goal_id: &str) -> PipelineResult<Option<GoalProgress>> {
    let Some(goal) = db::load_goal(tx, goal_id)? else {
        return Ok(None);
    };
    if goal.is_completed {
        return Ok(Some(GoalProgress {
            goal_id: goal.id,
            title: goal.title,
            progress_before: goal.progress,
            progress_after: goal.progress,
            completed_now: false,
            bonus_xp: 0,
        }));
    }

    if let (Some(index), Some(mut breakdown)) = (task.milestone_index, goal.breakdown.clone()) {
        if let Some(milestone) = breakdown.milestones.get_mut(index) {
            milestone.completed = true;
            db::save_breakdown(tx, goal_id, &breakdown)?;
        }
    }

    let (before, after) = db::add_goal_progress(tx, goal_id, progress_increment(task.task_type))?;

    let mut completed_now = false;
    let mut bonus_xp = 0;
    if after >= 100 && db::mark_goal_completed(tx, goal_id)? {
        completed_now = true;
        if db::award_xp(tx, &task.user_id, GOAL_COMPLETION_XP, XpReason::GoalCompletion, None, Some(goal_id))? {
            bonus_xp = GOAL_COMPLETION_XP;
        }
    }

    Ok(Some(GoalProgress {
        goal_id: goal.id,
        title: goal.title,
        progress_before: before,
        progress_after: after,
        completed_now,
        bonus_xp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{breakdown, goal, store_with_user, task};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn setup() -> (ProgressionTracker, Arc<Store>, UserProfile) {
        let (store, user) = store_with_user();
        let store = Arc::new(store);
        (ProgressionTracker::new(store.clone()), store, user)
    }

    #[test]
    fn test_task_xp_formula() {
        assert_eq!(task_xp(Priority::Low, 1), 10);
        assert_eq!(task_xp(Priority::Medium, 3), 25);
        assert_eq!(task_xp(Priority::High, 5), 40);
        assert_eq!(task_xp(Priority::High, 9), 40);
    }

    #[test]
    fn test_streak_rules() {
        let yesterday = today() - Duration::days(1);
        assert_eq!(next_streak(0, 0, None, today()), (1, 1));
        assert_eq!(next_streak(4, 6, Some(yesterday), today()), (5, 6));
        assert_eq!(next_streak(6, 6, Some(yesterday), today()), (7, 7));
        assert_eq!(next_streak(3, 3, Some(today()), today()), (3, 3));
        assert_eq!(next_streak(9, 9, Some(today() - Duration::days(3)), today()), (1, 9));
    }

    #[test]
    fn test_completing_twice_awards_once() {
        let (tracker, store, user) = setup();
        let t = task(&user.id, None, "Write report", Priority::High, today());
        store.insert_tasks(&[t.clone()]).unwrap();

        let first = tracker.complete_task(&t.id, CompletionMetadata::default(), today()).unwrap();
        let second = tracker.complete_task(&t.id, CompletionMetadata::default(), today()).unwrap();

        assert_eq!(first.xp_awarded, 30);
        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(second.xp_awarded, 0);
        assert_eq!(store.require_user(&user.id).unwrap().xp, 30);
        assert_eq!(store.ledger_total(&user.id).unwrap(), 30);
    }

    #[test]
    fn test_goal_clamped_to_100_with_single_bonus() {
        let (tracker, store, user) = setup();
        let mut g = goal(&user.id, "Save 1000", Priority::Medium);
        g.progress = 95;
        store.insert_goal(&g).unwrap();
        let closing = task(&user.id, Some(&g.id), "Transfer savings", Priority::Medium, today());
        let late = task(&user.id, Some(&g.id), "Celebrate", Priority::Low, today());
        store.insert_tasks(&[closing.clone(), late.clone()]).unwrap();

        let result = tracker.complete_task(&closing.id, CompletionMetadata::default(), today()).unwrap();
        let progress = result.goal.unwrap();
        assert_eq!((progress.progress_before, progress.progress_after), (95, 100));
        assert!(progress.completed_now);
        assert_eq!(progress.bonus_xp, GOAL_COMPLETION_XP);
        assert_eq!(result.xp_awarded, 25 + GOAL_COMPLETION_XP);

        let stored = store.require_goal(&g.id).unwrap();
        assert!(stored.is_completed);
        assert_eq!(stored.progress, 100);
        assert!(stored.completed_at.is_some());

        let after = tracker.complete_task(&late.id, CompletionMetadata::default(), today()).unwrap();
        assert_eq!(after.xp_awarded, 20);
        assert!(!after.goal.unwrap().completed_now);
        assert_eq!(store.require_user(&user.id).unwrap().xp, 25 + 100 + 20);
    }

    #[test]
    fn test_milestone_task_checks_off_milestone() {
        let (tracker, store, user) = setup();
        let mut g = goal(&user.id, "Run a 10k", Priority::High);
        g.breakdown = Some(breakdown());
        store.insert_goal(&g).unwrap();
        let mut t = task(&user.id, Some(&g.id), "Milestone: First 5k", Priority::High, today());
        t.task_type = TaskType::Milestone;
        t.milestone_index = Some(0);
        store.insert_tasks(&[t.clone()]).unwrap();

        let result = tracker.complete_task(&t.id, CompletionMetadata::default(), today()).unwrap();
        assert_eq!(result.goal.unwrap().progress_after, 20);
        let stored = store.require_goal(&g.id).unwrap();
        assert!(stored.breakdown.unwrap().milestones[0].completed);
    }

    #[test]
    fn test_completion_metadata_is_stored_and_validated() {
        let (tracker, store, user) = setup();
        let t = task(&user.id, None, "Read", Priority::Low, today());
        store.insert_tasks(&[t.clone()]).unwrap();

        let bad = CompletionMetadata { satisfaction: Some(7), ..Default::default() };
        assert!(matches!(
            tracker.complete_task(&t.id, bad, today()),
            Err(PipelineError::Validation(_))
        ));

        let meta = CompletionMetadata {
            actual_minutes: Some(42),
            notes: Some("Good chapter".to_string()),
            satisfaction: Some(4),
        };
        let result = tracker.complete_task(&t.id, meta.clone(), today()).unwrap();
        assert_eq!(result.task.status, TaskStatus::Completed);
        assert_eq!(result.task.completion, Some(meta));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (tracker, store, user) = setup();
        let t = task(&user.id, None, "Call bank", Priority::Medium, today());
        store.insert_tasks(&[t.clone()]).unwrap();

        assert_eq!(tracker.start_task(&t.id).unwrap().status, TaskStatus::InProgress);
        assert_eq!(tracker.reschedule_task(&t.id, None).unwrap().status, TaskStatus::Rescheduled);

        let tomorrow = today() + Duration::days(1);
        let moved = tracker.reschedule_task(&t.id, Some(tomorrow)).unwrap();
        assert_eq!((moved.status, moved.scheduled_date), (TaskStatus::Pending, tomorrow));

        assert_eq!(tracker.skip_task(&t.id).unwrap().status, TaskStatus::Skipped);
        assert!(matches!(
            tracker.complete_task(&t.id, CompletionMetadata::default(), today()),
            Err(PipelineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            tracker.start_task("missing"),
            Err(PipelineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_streak_persisted_across_days() {
        let (tracker, store, user) = setup();
        let yesterday = today() - Duration::days(1);
        let a = task(&user.id, None, "A", Priority::Low, yesterday);
        let b = task(&user.id, None, "B", Priority::Low, today());
        store.insert_tasks(&[a.clone(), b.clone()]).unwrap();

        tracker.complete_task(&a.id, CompletionMetadata::default(), yesterday).unwrap();
        let result = tracker.complete_task(&b.id, CompletionMetadata::default(), today()).unwrap();
        assert_eq!((result.current_streak, result.longest_streak), (2, 2));
        assert_eq!(store.require_user(&user.id).unwrap().last_active_date, Some(today()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_lose_nothing() {
        let (tracker, store, user) = setup();
        let mut g = goal(&user.id, "Learn Spanish", Priority::High);
        g.progress = 0;
        store.insert_goal(&g).unwrap();

        let tasks: Vec<Task> = (0..12)
            .map(|i| {
                let mut t = task(&user.id, Some(&g.id), &format!("Lesson {}", i), Priority::Medium, today());
                t.task_type = TaskType::DailyHabit;
                t
            })
            .collect();
        store.insert_tasks(&tasks).unwrap();
        let expected: i64 = tasks.iter().map(|t| task_xp(t.priority, t.difficulty)).sum();

        let mut handles = Vec::new();
        for t in &tasks {
            let tracker = tracker.clone();
            let id = t.id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                tracker.complete_task(&id, CompletionMetadata::default(), today())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let final_user = store.require_user(&user.id).unwrap();
        assert_eq!(final_user.xp, expected);
        assert_eq!(store.ledger_total(&user.id).unwrap(), expected);
        assert_eq!(store.require_goal(&g.id).unwrap().progress, 12 * 3);
    }
}
