//! Goal Decomposition Engine.
//!
//! A goal that already exists must always end up with something actionable,
//! so any generation failure falls back to a breakdown built from the goal's
//! own fields.

use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::PipelineResult;
use crate::extractor::parse_date;
use crate::logging;
use crate::models::{Breakdown, BreakdownSource, DifficultyTier, Goal, GoalCategory, Milestone};
use crate::prompts::DECOMPOSITION_PROMPT;
use crate::reasoning::{request_json, ReasoningRequest, ReasoningService, RetryPolicy};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct MilestoneReply {
    pub title: Option<String>,
    pub description: Option<String>,
    pub target_date: Option<String>,
}

/// Keep titled milestones in order, pulling dates past the goal's target back to it.
pub(crate) fn milestones_from_reply(replies: Vec<MilestoneReply>, goal_target: Option<NaiveDate>) -> Vec<Milestone> {
    replies
        .into_iter()
        .filter_map(|m| {
            let title = m.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
            let target_date = match (parse_date(m.target_date.as_deref()), goal_target) {
                (Some(date), Some(limit)) => Some(date.min(limit)),
                (date, _) => date,
            };
            Some(Milestone {
                title,
                description: m.description.unwrap_or_default(),
                target_date,
                completed: false,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BreakdownReply {
    milestones: Option<Vec<MilestoneReply>>,
    weekly_tasks: Option<Vec<String>>,
    daily_habits: Option<Vec<String>>,
    estimated_timeframe: Option<String>,
    difficulty: Option<String>,
    success_tips: Option<Vec<String>>,
}

fn non_blank(items: Option<Vec<String>>) -> Vec<String> {
    items
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl BreakdownReply {
    fn into_breakdown(self, goal: &Goal) -> Breakdown {
        Breakdown {
            milestones: milestones_from_reply(self.milestones.unwrap_or_default(), goal.target_date),
            weekly_tasks: non_blank(self.weekly_tasks),
            daily_habits: non_blank(self.daily_habits),
            estimated_timeframe: self.estimated_timeframe.unwrap_or_default(),
            difficulty: self
                .difficulty
                .as_deref()
                .and_then(DifficultyTier::from_str)
                .unwrap_or(DifficultyTier::Intermediate),
            success_tips: non_blank(self.success_tips),
            source: BreakdownSource::Generated,
        }
    }
}

#[derive(Clone)]
pub struct GoalDecomposer {
    reasoner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl GoalDecomposer {
    pub fn new(reasoner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { reasoner, policy }
    }

    pub async fn decompose(&self, goal: &Goal, user_context: &str, today: NaiveDate) -> PipelineResult<Breakdown> {
        let request = ReasoningRequest::new(DECOMPOSITION_PROMPT, build_prompt(goal, user_context, today));

        match request_json::<BreakdownReply>(self.reasoner.as_ref(), &self.policy, &request, Some(&goal.user_id)).await {
            Ok(reply) => {
                let breakdown = reply.into_breakdown(goal);
                if breakdown.is_empty() {
                    logging::log_generation(Some(&goal.user_id), &format!(
                        "Empty breakdown for goal '{}', using fallback", goal.title
                    ));
                    return Ok(fallback_breakdown(goal, today));
                }
                logging::log_generation(Some(&goal.user_id), &format!(
                    "Decomposed goal '{}': {} milestones, {} weekly, {} habits",
                    goal.title,
                    breakdown.milestones.len(),
                    breakdown.weekly_tasks.len(),
                    breakdown.daily_habits.len()
                ));
                Ok(breakdown)
            }
            Err(e) if e.is_fallback_eligible() => {
                logging::log_generation(Some(&goal.user_id), &format!(
                    "Decomposition failed for goal '{}' ({}), using fallback", goal.title, e
                ));
                Ok(fallback_breakdown(goal, today))
            }
            Err(e) => Err(e),
        }
    }
}

fn build_prompt(goal: &Goal, user_context: &str, today: NaiveDate) -> String {
    let target = goal
        .target_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Today is {}.\n\nGOAL\nTitle: {}\nDescription: {}\nCategory: {}\nPriority: {}\nTarget date: {}\n\nCONTEXT\n{}",
        today.format("%Y-%m-%d"),
        goal.title,
        goal.description,
        goal.category.as_str(),
        goal.priority.as_str(),
        target,
        user_context
    )
}

fn starter_habit(category: GoalCategory) -> &'static str {
    match category {
        GoalCategory::Fitness => "Move for 20 minutes",
        GoalCategory::Health => "Take a 15 minute walk and drink water with each meal",
        GoalCategory::Career => "Spend 20 minutes on focused skill practice",
        GoalCategory::Learning => "Study for 20 minutes",
        GoalCategory::Finance => "Log today's spending",
        GoalCategory::Relationships => "Reach out to one person who matters to you",
        GoalCategory::Personal => "Spend 15 minutes on this goal",
    }
}

/// Breakdown derived only from the goal: milestones at +7 and +30 days
/// (never past the target date), one weekly review and one daily habit.
pub fn fallback_breakdown(goal: &Goal, today: NaiveDate) -> Breakdown {
    let bound = |days: i64| {
        let date = today + Duration::days(days);
        match goal.target_date {
            Some(target) if target >= today => date.min(target),
            _ => date,
        }
    };

    let timeframe = match goal.target_date {
        Some(target) if target > today => format!("{} days", (target - today).num_days()),
        _ => "1 month".to_string(),
    };

    Breakdown {
        milestones: vec![
            Milestone {
                title: format!("Get started: {}", goal.title),
                description: "Take the first concrete steps and build momentum".to_string(),
                target_date: Some(bound(7)),
                completed: false,
            },
            Milestone {
                title: format!("Halfway: {}", goal.title),
                description: "Review what is working and adjust the plan".to_string(),
                target_date: Some(bound(30)),
                completed: false,
            },
        ],
        weekly_tasks: vec![format!("Review progress on {}", goal.title)],
        daily_habits: vec![starter_habit(goal.category).to_string()],
        estimated_timeframe: timeframe,
        difficulty: DifficultyTier::Beginner,
        success_tips: vec![
            "Start small and stay consistent".to_string(),
            "Track progress every week".to_string(),
        ],
        source: BreakdownSource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GoalDraft, Priority};
    use crate::reasoning::testing::{fast_policy, ScriptedReasoner};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn goal(target_date: Option<NaiveDate>) -> Goal {
        Goal::from_draft(
            "u1",
            GoalDraft {
                title: "Run a 10k".to_string(),
                description: "Finish a 10k race".to_string(),
                category: GoalCategory::Fitness,
                priority: Priority::High,
                target_date,
            },
        )
    }

    fn decomposer(reasoner: ScriptedReasoner) -> GoalDecomposer {
        GoalDecomposer::new(Arc::new(reasoner), fast_policy())
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_default_breakdown() {
        let breakdown = decomposer(ScriptedReasoner::failing())
            .decompose(&goal(None), "", today())
            .await
            .unwrap();

        assert_eq!(breakdown.source, BreakdownSource::Fallback);
        assert_eq!(breakdown.milestones.len(), 2);
        assert_eq!(breakdown.milestones[0].target_date, Some(today() + Duration::days(7)));
        assert_eq!(breakdown.milestones[1].target_date, Some(today() + Duration::days(30)));
        assert_eq!(breakdown.weekly_tasks.len(), 1);
        assert_eq!(breakdown.daily_habits, vec!["Move for 20 minutes"]);
    }

    #[test]
    fn test_fallback_respects_target_date() {
        let target = today() + Duration::days(14);
        let breakdown = fallback_breakdown(&goal(Some(target)), today());
        assert_eq!(breakdown.milestones[0].target_date, Some(today() + Duration::days(7)));
        assert_eq!(breakdown.milestones[1].target_date, Some(target));
        assert_eq!(breakdown.estimated_timeframe, "14 days");
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let breakdown = decomposer(ScriptedReasoner::replying(r#"{"milestones": [], "weekly_tasks": []}"#))
            .decompose(&goal(None), "", today())
            .await
            .unwrap();
        assert_eq!(breakdown.source, BreakdownSource::Fallback);
    }

    #[tokio::test]
    async fn test_generated_breakdown_keeps_order_and_clamps_dates() {
        let target = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
        let reply = r#"{
            "milestones": [
                {"title": "Run 5k", "description": "", "target_date": "2026-11-01"},
                {"title": "  ", "target_date": "2026-11-10"},
                {"title": "Run 10k", "target_date": "2027-02-01"}
            ],
            "weekly_tasks": ["Long run", "Tempo run"],
            "daily_habits": ["Stretch"],
            "estimated_timeframe": "7 weeks",
            "difficulty": "hard",
            "success_tips": ["Sleep well"]
        }"#;

        let breakdown = decomposer(ScriptedReasoner::replying(reply))
            .decompose(&goal(Some(target)), "Runs in the morning", today())
            .await
            .unwrap();

        assert_eq!(breakdown.source, BreakdownSource::Generated);
        let titles: Vec<_> = breakdown.milestones.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["Run 5k", "Run 10k"]);
        assert_eq!(breakdown.milestones[1].target_date, Some(target));
        assert_eq!(breakdown.weekly_tasks, vec!["Long run", "Tempo run"]);
        assert_eq!(breakdown.difficulty, DifficultyTier::Advanced);
    }
}
