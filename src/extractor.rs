//! Insight & Goal Extractor.
//!
//! Turns free-form onboarding text into behavioral insights and a handful of
//! candidate goals. Extraction has no safe default: when the Reasoning Service
//! is unavailable or its answer cannot be parsed, the error goes back to the
//! caller and no goals are made up.

use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

use crate::decomposition::{milestones_from_reply, MilestoneReply};
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::models::{
    BehavioralInsights, BehavioralProfile, Breakdown, BreakdownSource, DifficultyTier,
    GoalCategory, GoalDraft, Milestone, OnboardingInsights, Priority,
};
use crate::prompts::EXTRACTION_PROMPT;
use crate::reasoning::{request_json, ReasoningRequest, ReasoningService, RetryPolicy};

/// Shortest onboarding text worth analyzing, in characters after trimming.
pub const MIN_ONBOARDING_CHARS: usize = 20;
pub const MIN_CANDIDATE_GOALS: usize = 2;
pub const MAX_CANDIDATE_GOALS: usize = 5;

// ============ Results ============

#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    /// Too little text to work with; nothing was sent to the service.
    NeedsMoreInput { min_chars: usize, provided: usize },
    Extracted(Extraction),
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub insights: BehavioralInsights,
    pub summary: String,
    pub goals: Vec<CandidateGoal>,
}

#[derive(Debug, Clone)]
pub struct CandidateGoal {
    pub draft: GoalDraft,
    pub why_it_matters: String,
    pub seed: BreakdownSeed,
}

/// The rough plan that comes with a candidate goal.
#[derive(Debug, Clone, Default)]
pub struct BreakdownSeed {
    pub milestones: Vec<Milestone>,
    pub suggested_tasks: Vec<String>,
    pub timeframe: String,
}

impl BreakdownSeed {
    /// A seed with milestones or tasks becomes the goal's first breakdown.
    pub fn into_breakdown(self) -> Option<Breakdown> {
        if self.milestones.is_empty() && self.suggested_tasks.is_empty() {
            return None;
        }
        Some(Breakdown {
            milestones: self.milestones,
            weekly_tasks: self.suggested_tasks,
            daily_habits: Vec::new(),
            estimated_timeframe: self.timeframe,
            difficulty: DifficultyTier::Beginner,
            success_tips: Vec::new(),
            source: BreakdownSource::Generated,
        })
    }
}

// ============ Wire format ============

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ExtractionReply {
    insights: Option<InsightsReply>,
    summary: Option<String>,
    goals: Option<Vec<GoalReply>>,
}

// Models send null as often as they omit a field, so everything is optional here.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct InsightsReply {
    primary_goals: Option<Vec<String>>,
    challenges: Option<Vec<String>>,
    lifestyle: Option<String>,
    motivation_type: Option<String>,
    availability_pattern: Option<String>,
    personality_traits: Option<Vec<String>>,
    work_preferences: Option<String>,
    stress_factors: Option<Vec<String>>,
}

impl From<InsightsReply> for BehavioralInsights {
    fn from(r: InsightsReply) -> Self {
        BehavioralInsights {
            primary_goals: r.primary_goals.unwrap_or_default(),
            challenges: r.challenges.unwrap_or_default(),
            lifestyle: r.lifestyle.unwrap_or_default(),
            motivation_type: r.motivation_type.unwrap_or_default(),
            availability_pattern: r.availability_pattern.unwrap_or_default(),
            personality_traits: r.personality_traits.unwrap_or_default(),
            work_preferences: r.work_preferences.filter(|w| !w.trim().is_empty()),
            stress_factors: r.stress_factors.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GoalReply {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    priority: Option<String>,
    target_date: Option<String>,
    why_it_matters: Option<String>,
    breakdown: Option<SeedReply>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SeedReply {
    milestones: Option<Vec<MilestoneReply>>,
    suggested_tasks: Option<Vec<String>>,
    timeframe: Option<String>,
}

pub(crate) fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

impl GoalReply {
    /// None when the candidate has no title; there is no safe default for one.
    fn into_candidate(self, today: NaiveDate) -> Option<CandidateGoal> {
        let title = self.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;

        let category = self
            .category
            .as_deref()
            .and_then(GoalCategory::from_str)
            .unwrap_or(GoalCategory::Personal);
        let priority = self
            .priority
            .as_deref()
            .and_then(Priority::from_str)
            .unwrap_or(Priority::Medium);
        let target_date = parse_date(self.target_date.as_deref()).filter(|d| *d >= today);

        let seed = self.breakdown.unwrap_or_default();
        let seed = BreakdownSeed {
            milestones: milestones_from_reply(seed.milestones.unwrap_or_default(), target_date),
            suggested_tasks: seed
                .suggested_tasks
                .unwrap_or_default()
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .collect(),
            timeframe: seed.timeframe.unwrap_or_default(),
        };

        Some(CandidateGoal {
            draft: GoalDraft {
                description: self.description.unwrap_or_else(|| title.clone()),
                title,
                category,
                priority,
                target_date,
            },
            why_it_matters: self.why_it_matters.unwrap_or_default(),
            seed,
        })
    }
}

// ============ Extractor ============

#[derive(Clone)]
pub struct InsightExtractor {
    reasoner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl InsightExtractor {
    pub fn new(reasoner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { reasoner, policy }
    }

    /// Analyze onboarding text. Never fabricates goals: an unavailable service
    /// is `ReasoningUnavailable`, an unusable answer is `MalformedGenerationResult`.
    pub async fn extract(
        &self,
        user_id: &str,
        raw_text: &str,
        profile: &BehavioralProfile,
        today: NaiveDate,
    ) -> PipelineResult<ExtractionOutcome> {
        let provided = raw_text.trim().chars().count();
        if provided < MIN_ONBOARDING_CHARS {
            logging::log_generation(Some(user_id), &format!(
                "Onboarding text too short ({} chars), asking for more", provided
            ));
            return Ok(ExtractionOutcome::NeedsMoreInput {
                min_chars: MIN_ONBOARDING_CHARS,
                provided,
            });
        }

        logging::log_generation(Some(user_id), &format!(
            "Extracting insights from {} chars of onboarding text", provided
        ));

        let request = ReasoningRequest::new(EXTRACTION_PROMPT, build_prompt(raw_text.trim(), profile, today))
            .with_max_tokens(3000);
        let reply: ExtractionReply =
            request_json(self.reasoner.as_ref(), &self.policy, &request, Some(user_id)).await?;

        let goals: Vec<CandidateGoal> = reply
            .goals
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| g.into_candidate(today))
            .take(MAX_CANDIDATE_GOALS)
            .collect();

        if goals.len() < MIN_CANDIDATE_GOALS {
            return Err(PipelineError::MalformedGenerationResult(format!(
                "extraction returned {} usable goals, expected at least {}",
                goals.len(),
                MIN_CANDIDATE_GOALS
            )));
        }

        let insights: BehavioralInsights = reply.insights.unwrap_or_default().into();
        let summary = reply
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| fallback_summary(&insights, &goals));

        logging::log_generation(Some(user_id), &format!(
            "Extracted {} candidate goals", goals.len()
        ));

        Ok(ExtractionOutcome::Extracted(Extraction {
            insights,
            summary,
            goals,
        }))
    }
}

fn build_prompt(raw_text: &str, profile: &BehavioralProfile, today: NaiveDate) -> String {
    let mut prompt = format!("Today is {}.\n\n", today.format("%Y-%m-%d"));
    prompt.push_str(&profile_lines(profile));
    prompt.push_str("\nIn their own words:\n\"\"\"\n");
    prompt.push_str(raw_text);
    prompt.push_str("\n\"\"\"");
    prompt
}

fn profile_lines(profile: &BehavioralProfile) -> String {
    let mut lines = Vec::new();
    if let Some(e) = profile.energy_pattern {
        lines.push(format!("- Energy peaks: {}", e.as_str()));
    }
    if let Some(w) = profile.work_style {
        lines.push(format!("- Work style: {}", w.as_str()));
    }
    if let Some(s) = profile.stress_response {
        lines.push(format!("- Under stress: {}", s.as_str()));
    }
    lines.push(format!(
        "- Working window: {} to {}, {} minutes of breaks",
        profile.work_start.format("%H:%M"),
        profile.work_end.format("%H:%M"),
        profile.break_minutes
    ));
    if let Some(m) = profile.preferred_task_minutes {
        lines.push(format!("- Preferred task length: {} minutes", m));
    }
    format!("About this person:\n{}\n", lines.join("\n"))
}

fn fallback_summary(insights: &BehavioralInsights, goals: &[CandidateGoal]) -> String {
    let titles = goals.iter().map(|g| g.draft.title.as_str()).collect::<Vec<_>>().join(", ");
    if insights.lifestyle.is_empty() {
        format!("Working toward: {}.", titles)
    } else {
        format!("{} Working toward: {}.", insights.lifestyle, titles)
    }
}

/// Short free-text context about the user for later generation calls.
pub fn user_context(insights: Option<&OnboardingInsights>, profile: &BehavioralProfile) -> String {
    let mut context = profile_lines(profile);
    if let Some(record) = insights {
        if let Some(summary) = &record.summary {
            context.push_str(&format!("Summary: {}\n", summary));
        }
        if let Some(i) = &record.insights {
            if !i.challenges.is_empty() {
                context.push_str(&format!("Challenges: {}\n", i.challenges.join("; ")));
            }
            if !i.motivation_type.is_empty() {
                context.push_str(&format!("Motivated by: {}\n", i.motivation_type));
            }
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_rfc3339, InsightsStatus};
    use crate::reasoning::testing::{fast_policy, ScriptedReasoner};

    const TEXT: &str = "I want to run a half marathon next spring and finally get my savings in order.";

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn extractor(reasoner: ScriptedReasoner) -> (InsightExtractor, Arc<ScriptedReasoner>) {
        let reasoner = Arc::new(reasoner);
        (InsightExtractor::new(reasoner.clone(), fast_policy()), reasoner)
    }

    fn reply_with_goals(goals: &[&str]) -> String {
        let goals = goals
            .iter()
            .map(|t| serde_json::json!({"title": t, "description": "d", "category": "fitness", "priority": "high"}))
            .collect::<Vec<_>>();
        serde_json::json!({
            "insights": {"primary_goals": ["run"], "lifestyle": "Busy office job.", "challenges": null},
            "summary": "Wants to run and save.",
            "goals": goals
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_short_text_needs_more_input() {
        let (extractor, reasoner) = extractor(ScriptedReasoner::replying("{}"));
        let outcome = extractor
            .extract("u1", "   get fit   ", &BehavioralProfile::default(), today())
            .await
            .unwrap();

        assert!(matches!(outcome, ExtractionOutcome::NeedsMoreInput { provided: 7, .. }));
        assert_eq!(reasoner.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_service_fails_loudly() {
        let (extractor, _) = extractor(ScriptedReasoner::unavailable());
        let err = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ReasoningUnavailable(_)));
    }

    #[tokio::test]
    async fn test_prose_reply_is_malformed_not_fabricated() {
        let (extractor, _) = extractor(ScriptedReasoner::replying(
            "You should really focus on running and saving money!",
        ));
        let err = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedGenerationResult(_)));
    }

    #[tokio::test]
    async fn test_reply_without_goals_is_malformed() {
        let (extractor, _) = extractor(ScriptedReasoner::replying(&reply_with_goals(&[])));
        let err = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedGenerationResult(_)));
    }

    #[tokio::test]
    async fn test_single_goal_reply_is_malformed() {
        let (extractor, _) = extractor(ScriptedReasoner::replying(&reply_with_goals(&["Run 5k", " "])));
        let err = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedGenerationResult(_)));
    }

    #[tokio::test]
    async fn test_goals_are_capped_and_normalized() {
        let reply = serde_json::json!({
            "insights": {"lifestyle": "Parent of two."},
            "goals": [
                {"title": "Half marathon", "category": "Running", "priority": "URGENT",
                 "target_date": "2027-04-12",
                 "breakdown": {"milestones": [{"title": "10k", "target_date": "2026-12-01"}],
                               "suggested_tasks": ["Long run"], "timeframe": "6 months"}},
                {"title": "", "category": "finance"},
                {"title": "Emergency fund", "category": "money", "priority": "whenever",
                 "target_date": "2020-01-01"},
                {"title": "G3"}, {"title": "G4"}, {"title": "G5"}, {"title": "G6"}
            ]
        })
        .to_string();
        let (extractor, _) = extractor(ScriptedReasoner::replying(&format!("```json\n{}\n```", reply)));

        let outcome = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap();
        let ExtractionOutcome::Extracted(extraction) = outcome else {
            panic!("expected extraction");
        };

        assert_eq!(extraction.goals.len(), MAX_CANDIDATE_GOALS);
        let first = &extraction.goals[0];
        assert_eq!(first.draft.category, GoalCategory::Personal);
        assert_eq!(first.draft.priority, Priority::High);
        assert_eq!(first.seed.milestones.len(), 1);
        assert!(first.seed.clone().into_breakdown().is_some());

        let fund = &extraction.goals[1];
        assert_eq!(fund.draft.title, "Emergency fund");
        assert_eq!(fund.draft.category, GoalCategory::Finance);
        assert_eq!(fund.draft.priority, Priority::Medium);
        assert_eq!(fund.draft.target_date, None);

        assert!(extraction.summary.starts_with("Parent of two."));
    }

    #[tokio::test]
    async fn test_insights_tolerate_nulls() {
        let (extractor, _) = extractor(ScriptedReasoner::replying(&reply_with_goals(&["Run 5k", "Save"])));
        let outcome = extractor
            .extract("u1", TEXT, &BehavioralProfile::default(), today())
            .await
            .unwrap();
        let ExtractionOutcome::Extracted(extraction) = outcome else {
            panic!("expected extraction");
        };
        assert!(extraction.insights.challenges.is_empty());
        assert_eq!(extraction.insights.primary_goals, vec!["run"]);
        assert_eq!(extraction.summary, "Wants to run and save.");
    }

    #[test]
    fn test_user_context_includes_summary() {
        let record = OnboardingInsights {
            user_id: "u1".to_string(),
            raw_text: TEXT.to_string(),
            status: InsightsStatus::Analyzed,
            insights: Some(BehavioralInsights {
                challenges: vec!["night shifts".to_string()],
                ..BehavioralInsights::default()
            }),
            summary: Some("Runner in training.".to_string()),
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        let context = user_context(Some(&record), &BehavioralProfile::default());
        assert!(context.contains("Summary: Runner in training."));
        assert!(context.contains("Challenges: night shifts"));
        assert!(context.contains("09:00 to 17:00"));
    }
}
