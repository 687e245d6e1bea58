//! Task Generator.
//!
//! Turns a goal's breakdown into concrete, persisted tasks for a date. Values
//! coming back from the Reasoning Service are coerced into valid ranges before
//! anything is written; when the service is unavailable the breakdown is
//! expanded deterministically instead.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::db::Store;
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::models::{
    now_rfc3339, parse_clock, time_at, BehavioralProfile, Breakdown, EnergyLevel, Goal, Priority,
    Task, TaskStatus, TaskType,
};
use crate::prompts::TASK_GENERATION_PROMPT;
use crate::reasoning::{request_json, ReasoningRequest, ReasoningService, RetryPolicy};

pub const DEFAULT_TASK_MINUTES: u32 = 30;
pub const DEFAULT_DIFFICULTY: u8 = 3;
const HABIT_MINUTES: u32 = 15;
const MAX_TASK_MINUTES: u32 = 8 * 60;
/// A milestone gets its own task once its target date is this close.
const MILESTONE_LOOKAHEAD_DAYS: i64 = 7;

// ============ Coercion ============

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_end_matches("minutes")
            .trim_end_matches("min")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    }
}

/// Positive whole minutes, or `default` for anything non-numeric or not positive.
pub fn coerce_minutes(value: &Value, default: u32) -> u32 {
    match as_number(value).map(f64::round) {
        Some(m) if m.is_finite() && m >= 1.0 => (m as u32).min(MAX_TASK_MINUTES),
        _ => default,
    }
}

/// Rounded and clamped to 1..=5; non-numeric becomes the default.
pub fn coerce_difficulty(value: &Value) -> u8 {
    match as_number(value) {
        Some(d) if d.is_finite() => d.round().clamp(1.0, 5.0) as u8,
        _ => DEFAULT_DIFFICULTY,
    }
}

// ============ Wire format ============

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TasksReply {
    tasks: Option<Vec<TaskReply>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TaskReply {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type", alias = "task_type")]
    task_type: Option<String>,
    priority: Option<String>,
    #[serde(alias = "duration", alias = "estimated_minutes")]
    estimated_duration: Value,
    suggested_time_slot: Option<String>,
    energy_level: Option<String>,
    #[serde(alias = "difficulty")]
    difficulty_level: Value,
    success_criteria: Option<String>,
}

// ============ Generator ============

/// Tasks for one goal on one date.
#[derive(Debug, Clone)]
pub struct TaskBatch {
    pub tasks: Vec<Task>,
    /// The tasks already existed and nothing new was written.
    pub reused: bool,
    pub fallback: bool,
}

#[derive(Clone)]
pub struct TaskGenerator {
    store: Arc<Store>,
    reasoner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
    default_minutes: u32,
}

impl TaskGenerator {
    pub fn new(store: Arc<Store>, reasoner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self {
            store,
            reasoner,
            policy,
            default_minutes: DEFAULT_TASK_MINUTES,
        }
    }

    pub fn with_default_minutes(mut self, minutes: u32) -> Self {
        self.default_minutes = minutes.max(1);
        self
    }

    /// Generate and persist the goal's tasks for `date`. Running it twice for
    /// the same (goal, date) returns the first run's tasks.
    pub async fn generate_for_date(
        &self,
        goal: &Goal,
        profile: &BehavioralProfile,
        user_context: &str,
        date: NaiveDate,
    ) -> PipelineResult<TaskBatch> {
        let breakdown = require_breakdown(goal)?;

        let existing = self.store.tasks_for_goal_on(&goal.id, date)?;
        if !existing.is_empty() {
            logging::log_generation(Some(&goal.user_id), &format!(
                "Reusing {} tasks for goal '{}' on {}", existing.len(), goal.title, date
            ));
            return Ok(TaskBatch {
                tasks: existing,
                reused: true,
                fallback: false,
            });
        }

        let request = ReasoningRequest::new(
            TASK_GENERATION_PROMPT,
            build_prompt(goal, breakdown, profile, user_context, date),
        );
        let generated = match request_json::<TasksReply>(
            self.reasoner.as_ref(),
            &self.policy,
            &request,
            Some(&goal.user_id),
        )
        .await
        {
            Ok(reply) => self.coerce_reply(reply, goal, profile, date)?,
            Err(e) if e.is_fallback_eligible() => {
                logging::log_generation(Some(&goal.user_id), &format!(
                    "Task generation failed for goal '{}' ({}), expanding breakdown", goal.title, e
                ));
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let (tasks, fallback) = if generated.is_empty() {
            (self.plan_for_date(goal, breakdown, profile, date)?, true)
        } else {
            (generated, false)
        };

        self.store.insert_tasks(&tasks)?;
        logging::log_generation(Some(&goal.user_id), &format!(
            "Generated {} tasks for goal '{}' on {}{}",
            tasks.len(),
            goal.title,
            date,
            if fallback { " (fallback)" } else { "" }
        ));

        Ok(TaskBatch {
            tasks,
            reused: false,
            fallback,
        })
    }

    /// Deterministic seven-day expansion starting at `start`: one habit row per
    /// day and weekly tasks spread over Monday to Friday. Days that already
    /// have tasks for this goal are left alone.
    pub fn generate_for_week(
        &self,
        goal: &Goal,
        profile: &BehavioralProfile,
        start: NaiveDate,
    ) -> PipelineResult<Vec<Task>> {
        let breakdown = require_breakdown(goal)?;
        let mut tasks = Vec::new();
        let mut milestone_planned = false;

        for offset in 0..7 {
            let date = start + Duration::days(offset);
            if !self.store.tasks_for_goal_on(&goal.id, date)?.is_empty() {
                continue;
            }
            let mut day = self.plan_for_date(goal, breakdown, profile, date)?;
            if milestone_planned {
                day.retain(|t| t.task_type != TaskType::Milestone);
            }
            milestone_planned |= day.iter().any(|t| t.task_type == TaskType::Milestone);
            tasks.extend(day);
        }

        self.store.insert_tasks(&tasks)?;
        logging::log_generation(Some(&goal.user_id), &format!(
            "Planned {} tasks for goal '{}' over the week from {}", tasks.len(), goal.title, start
        ));
        Ok(tasks)
    }

    fn coerce_reply(
        &self,
        reply: TasksReply,
        goal: &Goal,
        profile: &BehavioralProfile,
        date: NaiveDate,
    ) -> PipelineResult<Vec<Task>> {
        let next_milestone = self.next_open_milestone(goal)?;
        let default_minutes = profile.preferred_task_minutes.unwrap_or(self.default_minutes);

        let mut tasks = Vec::new();
        for raw in reply.tasks.unwrap_or_default() {
            // No safe default for a missing title: drop the row
            let Some(title) = raw.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
                continue;
            };
            let task_type = raw
                .task_type
                .as_deref()
                .and_then(TaskType::from_str)
                .unwrap_or(TaskType::OneTime);

            let mut task = new_task(goal, date, title, task_type);
            task.description = raw.description.unwrap_or_default();
            task.priority = raw
                .priority
                .as_deref()
                .and_then(Priority::from_str)
                .unwrap_or(goal.priority);
            task.estimated_minutes = coerce_minutes(&raw.estimated_duration, default_minutes);
            task.difficulty = coerce_difficulty(&raw.difficulty_level);
            task.energy_level = raw
                .energy_level
                .as_deref()
                .and_then(EnergyLevel::from_str)
                .unwrap_or(EnergyLevel::Medium);
            task.suggested_time_slot = raw
                .suggested_time_slot
                .as_deref()
                .and_then(parse_clock)
                .map(|t| t.format("%H:%M").to_string());
            task.success_criteria = raw.success_criteria.filter(|s| !s.trim().is_empty());
            if task_type == TaskType::Milestone {
                task.milestone_index = next_milestone;
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    fn next_open_milestone(&self, goal: &Goal) -> PipelineResult<Option<usize>> {
        let Some((index, _)) = goal.breakdown.as_ref().and_then(|b| b.next_milestone()) else {
            return Ok(None);
        };
        if self.store.has_open_milestone_task(&goal.id, index)? {
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Deterministic expansion of the breakdown for one date.
    fn plan_for_date(
        &self,
        goal: &Goal,
        breakdown: &Breakdown,
        profile: &BehavioralProfile,
        date: NaiveDate,
    ) -> PipelineResult<Vec<Task>> {
        let task_minutes = profile.preferred_task_minutes.unwrap_or(self.default_minutes).max(1);
        let mut tasks = Vec::new();

        for habit in &breakdown.daily_habits {
            let mut task = new_task(goal, date, habit.clone(), TaskType::DailyHabit);
            task.description = format!("Daily habit for {}", goal.title);
            task.estimated_minutes = HABIT_MINUTES.min(task_minutes);
            task.difficulty = 1;
            task.energy_level = EnergyLevel::Low;
            task.success_criteria = Some("Done today".to_string());
            tasks.push(task);
        }

        // Weekly task i lands on weekday i % 5
        let weekday = date.weekday().num_days_from_monday() as usize;
        for (i, weekly) in breakdown.weekly_tasks.iter().enumerate() {
            if weekday >= 5 || i % 5 != weekday {
                continue;
            }
            let mut task = new_task(goal, date, weekly.clone(), TaskType::WeeklyTask);
            task.description = format!("This week's step toward {}", goal.title);
            task.estimated_minutes = task_minutes;
            task.suggested_time_slot = Some(peak_start(profile));
            tasks.push(task);
        }

        if let Some((index, milestone)) = breakdown.next_milestone() {
            let due_soon = milestone
                .target_date
                .map_or(false, |d| d <= date + Duration::days(MILESTONE_LOOKAHEAD_DAYS));
            if due_soon && !self.store.has_open_milestone_task(&goal.id, index)? {
                let mut task = new_task(goal, date, format!("Milestone: {}", milestone.title), TaskType::Milestone);
                task.description = milestone.description.clone();
                task.estimated_minutes = (task_minutes * 2).min(90);
                task.difficulty = 4;
                task.energy_level = EnergyLevel::High;
                task.priority = Priority::High;
                task.suggested_time_slot = Some(peak_start(profile));
                task.milestone_index = Some(index);
                task.success_criteria = Some(format!("{} reached", milestone.title));
                tasks.push(task);
            }
        }

        Ok(tasks)
    }
}

fn require_breakdown(goal: &Goal) -> PipelineResult<&Breakdown> {
    goal.breakdown.as_ref().ok_or_else(|| {
        PipelineError::Validation(format!("goal {} has no breakdown to generate tasks from", goal.id))
    })
}

fn peak_start(profile: &BehavioralProfile) -> String {
    let start = match profile.energy_pattern {
        Some(pattern) => pattern
            .peak_window()
            .0
            .clamp(profile.work_start_minutes(), profile.day_end_minutes()),
        None => profile.work_start_minutes(),
    };
    time_at(start).format("%H:%M").to_string()
}

fn new_task(goal: &Goal, date: NaiveDate, title: String, task_type: TaskType) -> Task {
    let now = now_rfc3339();
    Task {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: goal.user_id.clone(),
        related_goal_id: Some(goal.id.clone()),
        title,
        description: String::new(),
        task_type,
        priority: goal.priority,
        status: TaskStatus::Pending,
        estimated_minutes: DEFAULT_TASK_MINUTES,
        suggested_time_slot: None,
        energy_level: EnergyLevel::Medium,
        difficulty: DEFAULT_DIFFICULTY,
        success_criteria: None,
        scheduled_date: date,
        is_recurring: matches!(task_type, TaskType::DailyHabit | TaskType::Recurring),
        milestone_index: None,
        completed_at: None,
        completion: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

fn build_prompt(
    goal: &Goal,
    breakdown: &Breakdown,
    profile: &BehavioralProfile,
    user_context: &str,
    date: NaiveDate,
) -> String {
    let milestones = breakdown
        .milestones
        .iter()
        .filter(|m| !m.completed)
        .map(|m| match m.target_date {
            Some(d) => format!("- {} (by {})", m.title, d),
            None => format!("- {}", m.title),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Date: {} ({})\n\nGOAL: {} [{} priority]\n\nOPEN MILESTONES\n{}\n\nWEEKLY TASKS\n{}\n\nDAILY HABITS\n{}\n\nPREFERRED TASK LENGTH: {} minutes\n\nCONTEXT\n{}",
        date,
        date.weekday(),
        goal.title,
        goal.priority.as_str(),
        if milestones.is_empty() { "none".to_string() } else { milestones },
        bullet_list(&breakdown.weekly_tasks),
        bullet_list(&breakdown.daily_habits),
        profile.preferred_task_minutes.unwrap_or(DEFAULT_TASK_MINUTES),
        user_context
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
}
