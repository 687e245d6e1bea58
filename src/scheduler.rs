//! Schedule Synthesizer.
//!
//! Builds the time-blocked plan for one (user, date). Whatever the Reasoning
//! Service proposes is sanitized against the day's tasks and the working
//! window; when nothing usable comes back the tasks are packed
//! deterministically, so a schedule always exists.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::Store;
use crate::error::PipelineResult;
use crate::logging;
use crate::models::{
    now_rfc3339, parse_clock, time_at, BehavioralProfile, BlockKind, Schedule,
    ScheduleSource, Task, TimeBlock, UserProfile,
};
use crate::prompts::SCHEDULING_PROMPT;
use crate::reasoning::{request_json, ReasoningRequest, ReasoningService, RetryPolicy};

/// Break inserted after long tasks by the deterministic packer.
pub const FALLBACK_BREAK_MINUTES: u32 = 10;
/// Tasks at least this long get a break after them.
pub const LONG_TASK_MINUTES: u32 = 45;

/// A fixed appointment the plan has to work around.
#[derive(Debug, Clone, PartialEq)]
pub struct Commitment {
    pub title: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Commitment {
    fn to_block(&self) -> TimeBlock {
        TimeBlock {
            kind: BlockKind::Commitment,
            task_id: None,
            title: self.title.clone(),
            start: self.start,
            end: self.end,
            flexible: false,
        }
    }
}

// ============ Wire format ============

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScheduleReply {
    blocks: Option<Vec<BlockReply>>,
    suggestions: Option<Vec<String>>,
    optimization_notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct BlockReply {
    #[serde(rename = "type", alias = "kind")]
    kind: Option<String>,
    task_id: Option<String>,
    title: Option<String>,
    #[serde(alias = "start")]
    start_time: Option<String>,
    #[serde(alias = "end")]
    end_time: Option<String>,
    flexible: Option<bool>,
}

// ============ Block bookkeeping ============

/// Commitments that fit the day, earliest first, with overlapping ones dropped.
fn commitment_blocks(commitments: &[Commitment]) -> Vec<TimeBlock> {
    let mut candidates: Vec<TimeBlock> = commitments
        .iter()
        .filter(|c| c.end > c.start)
        .map(Commitment::to_block)
        .collect();
    candidates.sort_by_key(|b| b.start_minutes());

    let mut kept: Vec<TimeBlock> = Vec::new();
    for block in candidates {
        if kept.iter().all(|k| !k.overlaps(&block)) {
            kept.push(block);
        }
    }
    kept
}

fn finish(mut blocks: Vec<TimeBlock>) -> Vec<TimeBlock> {
    blocks.sort_by_key(|b| (b.start_minutes(), b.end_minutes()));
    blocks
}

/// Keep only the proposed blocks that reference known tasks once, sit inside
/// the working window, run forward in time and collide with nothing already kept.
fn sanitize_blocks(
    proposed: Vec<BlockReply>,
    tasks: &[Task],
    profile: &BehavioralProfile,
    fixed: &[TimeBlock],
) -> Vec<TimeBlock> {
    let window = (profile.work_start_minutes(), profile.day_end_minutes());

    let mut candidates: Vec<TimeBlock> = proposed
        .into_iter()
        .filter_map(|raw| {
            let start = raw.start_time.as_deref().and_then(parse_clock)?;
            let end = raw.end_time.as_deref().and_then(parse_clock)?;
            let (kind, task_id, title) = match raw.task_id.filter(|id| !id.trim().is_empty()) {
                Some(id) => {
                    let task = tasks.iter().find(|t| t.id == id)?;
                    (BlockKind::Task, Some(id), task.title.clone())
                }
                None if raw.kind.as_deref().map(str::trim) == Some("break") => {
                    (BlockKind::Break, None, raw.title.unwrap_or_else(|| "Break".to_string()))
                }
                None => return None,
            };
            Some(TimeBlock {
                kind,
                task_id,
                title,
                start,
                end,
                flexible: raw.flexible.unwrap_or(true),
            })
        })
        .filter(|b| b.end > b.start)
        .filter(|b| b.start_minutes() >= window.0 && b.end_minutes() <= window.1)
        .collect();
    candidates.sort_by_key(|b| b.start_minutes());

    let mut kept: Vec<TimeBlock> = Vec::new();
    let mut placed: HashSet<String> = HashSet::new();
    for block in candidates {
        if let Some(id) = &block.task_id {
            if placed.contains(id) {
                continue;
            }
        }
        if fixed.iter().chain(kept.iter()).any(|k| k.overlaps(&block)) {
            continue;
        }
        if let Some(id) = &block.task_id {
            placed.insert(id.clone());
        }
        kept.push(block);
    }

    // A break with no task before it is noise
    let mut previous_was_task = false;
    kept.retain(|b| {
        let keep = b.kind != BlockKind::Break || previous_was_task;
        previous_was_task = b.kind == BlockKind::Task;
        keep
    });
    kept
}

/// Earliest start at or after `from` where `minutes` fit without touching `fixed`.
fn next_free_slot(from: u32, minutes: u32, fixed: &[TimeBlock]) -> u32 {
    let mut start = from;
    loop {
        let clash = fixed
            .iter()
            .find(|b| start < b.end_minutes() && b.start_minutes() < start + minutes);
        match clash {
            Some(block) => start = block.end_minutes(),
            None => return start,
        }
    }
}

/// Deterministic plan: priority order (ties broken by harder first), packed
/// from work start around commitments, a short break after long tasks, and
/// nothing past work end or the day's capacity. Returns the blocks and the
/// tasks that did not fit.
pub fn fallback_blocks<'a>(
    tasks: &'a [Task],
    profile: &BehavioralProfile,
    fixed: &[TimeBlock],
) -> (Vec<TimeBlock>, Vec<&'a Task>) {
    let mut ordered: Vec<&Task> = tasks.iter().collect();
    ordered.sort_by_key(|t| (t.priority.rank(), std::cmp::Reverse(t.difficulty)));

    let work_end = profile.day_end_minutes();
    let capacity = profile.available_minutes();

    let mut blocks = Vec::new();
    let mut unplaced = Vec::new();
    let mut cursor = profile.work_start_minutes();
    let mut used = 0u32;

    for task in ordered {
        let minutes = task.estimated_minutes.max(1);
        if used + minutes > capacity {
            unplaced.push(task);
            continue;
        }
        let start = next_free_slot(cursor, minutes, fixed);
        if start + minutes > work_end {
            unplaced.push(task);
            continue;
        }

        blocks.push(TimeBlock {
            kind: BlockKind::Task,
            task_id: Some(task.id.clone()),
            title: task.title.clone(),
            start: time_at(start),
            end: time_at(start + minutes),
            flexible: true,
        });
        cursor = start + minutes;
        used += minutes;

        if minutes >= LONG_TASK_MINUTES
            && cursor + FALLBACK_BREAK_MINUTES <= work_end
            && next_free_slot(cursor, FALLBACK_BREAK_MINUTES, fixed) == cursor
        {
            blocks.push(TimeBlock {
                kind: BlockKind::Break,
                task_id: None,
                title: "Break".to_string(),
                start: time_at(cursor),
                end: time_at(cursor + FALLBACK_BREAK_MINUTES),
                flexible: true,
            });
            cursor += FALLBACK_BREAK_MINUTES;
        }
    }

    if blocks.last().map_or(false, |b| b.kind == BlockKind::Break) {
        blocks.pop();
    }
    (blocks, unplaced)
}

// ============ Synthesizer ============

#[derive(Clone)]
pub struct ScheduleSynthesizer {
    store: Arc<Store>,
    reasoner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl ScheduleSynthesizer {
    pub fn new(store: Arc<Store>, reasoner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { store, reasoner, policy }
    }

    /// Build and persist the schedule for (user, date), replacing any earlier one.
    pub async fn synthesize(
        &self,
        user: &UserProfile,
        date: NaiveDate,
        commitments: &[Commitment],
    ) -> PipelineResult<Schedule> {
        let tasks = self.store.open_tasks_for_date(&user.id, date)?;
        let profile = &user.profile;
        let fixed = commitment_blocks(commitments);

        logging::log_schedule(Some(&user.id), &format!(
            "Synthesizing {} for {} tasks, {} commitments, {:.1}h available",
            date,
            tasks.len(),
            fixed.len(),
            profile.available_hours()
        ));

        let (task_blocks, mut suggestions, notes, source) = if tasks.is_empty() {
            (
                Vec::new(),
                vec!["Nothing is planned for this day yet.".to_string()],
                String::new(),
                ScheduleSource::Fallback,
            )
        } else {
            match self.generated_plan(user, date, &tasks, &fixed).await {
                Some(plan) => plan,
                None => {
                    let (blocks, unplaced) = fallback_blocks(&tasks, profile, &fixed);
                    let notes = format!(
                        "Packed {} tasks from {} in priority order with short breaks after long tasks",
                        blocks.iter().filter(|b| b.kind == BlockKind::Task).count(),
                        profile.work_start.format("%H:%M")
                    );
                    let mut suggestions = vec!["Built without the planning assistant; tasks are in priority order.".to_string()];
                    suggestions.extend(unplaced_notes(unplaced.iter().copied()));
                    (blocks, suggestions, notes, ScheduleSource::Fallback)
                }
            }
        };

        if !tasks.is_empty() && task_blocks.iter().all(|b| b.kind != BlockKind::Task) {
            suggestions.push("None of today's tasks fit in the working window.".to_string());
        }

        let blocks = finish(fixed.into_iter().chain(task_blocks).collect());
        let total_minutes: u32 = blocks.iter().map(|b| b.duration_minutes()).sum();

        let schedule = Schedule {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            date,
            blocks,
            total_scheduled_hours: total_minutes as f64 / 60.0,
            suggestions,
            optimization_notes: notes,
            source,
            created_at: now_rfc3339(),
        };

        self.store.upsert_schedule(&schedule)?;
        logging::log_schedule(Some(&user.id), &format!(
            "Saved {} schedule for {}: {} blocks, {:.2}h",
            source.as_str(),
            date,
            schedule.blocks.len(),
            schedule.total_scheduled_hours
        ));
        Ok(schedule)
    }

    /// Ask the service for a plan; None when it fails or nothing survives sanitizing.
    async fn generated_plan(
        &self,
        user: &UserProfile,
        date: NaiveDate,
        tasks: &[Task],
        fixed: &[TimeBlock],
    ) -> Option<(Vec<TimeBlock>, Vec<String>, String, ScheduleSource)> {
        let request = ReasoningRequest::new(SCHEDULING_PROMPT, build_prompt(user, date, tasks, fixed))
            .with_temperature(0.2);

        let reply = match request_json::<ScheduleReply>(self.reasoner.as_ref(), &self.policy, &request, Some(&user.id)).await {
            Ok(reply) => reply,
            Err(e) => {
                logging::log_schedule(Some(&user.id), &format!(
                    "Planning assistant failed ({}), using deterministic packing", e
                ));
                return None;
            }
        };

        let blocks = sanitize_blocks(reply.blocks.unwrap_or_default(), tasks, &user.profile, fixed);
        if blocks.iter().all(|b| b.kind != BlockKind::Task) {
            logging::log_schedule(Some(&user.id), "No usable blocks in generated plan, using deterministic packing");
            return None;
        }

        let placed: HashSet<&str> = blocks.iter().filter_map(|b| b.task_id.as_deref()).collect();
        let mut suggestions: Vec<String> = reply
            .suggestions
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        suggestions.extend(unplaced_notes(tasks.iter().filter(|t| !placed.contains(t.id.as_str()))));

        Some((
            blocks,
            suggestions,
            reply.optimization_notes.unwrap_or_default(),
            ScheduleSource::Generated,
        ))
    }
}

fn unplaced_notes<'a>(tasks: impl Iterator<Item = &'a Task>) -> Vec<String> {
    tasks
        .map(|t| format!("Not scheduled today: {} ({} min)", t.title, t.estimated_minutes))
        .collect()
}

fn build_prompt(user: &UserProfile, date: NaiveDate, tasks: &[Task], fixed: &[TimeBlock]) -> String {
    let profile = &user.profile;
    let peak = profile
        .energy_pattern
        .map(|p| {
            let (start, end) = p.peak_window();
            format!("{} to {}", time_at(start).format("%H:%M"), time_at(end).format("%H:%M"))
        })
        .unwrap_or_else(|| "unknown".to_string());

    let task_lines = tasks
        .iter()
        .map(|t| {
            format!(
                "- id={} | {} | {} priority | difficulty {} | {} min | {} energy{}",
                t.id,
                t.title,
                t.priority.as_str(),
                t.difficulty,
                t.estimated_minutes,
                t.energy_level.as_str(),
                t.suggested_time_slot
                    .as_ref()
                    .map(|s| format!(" | suggested {}", s))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let commitment_lines = if fixed.is_empty() {
        "none".to_string()
    } else {
        fixed
            .iter()
            .map(|b| format!("- {} {}-{}", b.title, b.start.format("%H:%M"), b.end.format("%H:%M")))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "Date: {}\nWorking window: {} to {}\nBreak budget: {} minutes\nAvailable for tasks: {:.1} hours\nEnergy peak: {}\n\nTASKS\n{}\n\nFIXED COMMITMENTS\n{}",
        date,
        profile.work_start.format("%H:%M"),
        profile.work_end.format("%H:%M"),
        profile.break_minutes,
        profile.available_hours(),
        peak,
        task_lines,
        commitment_lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::{store_with_user, task};
    use crate::models::Priority;
    use crate::reasoning::testing::{fast_policy, ScriptedReasoner};
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    struct Fixture {
        store: Arc<Store>,
        user: UserProfile,
        tasks: Vec<Task>,
    }

    /// Three 30 minute tasks inserted low, medium, high.
    fn fixture() -> Fixture {
        let (store, user) = store_with_user();
        let tasks = vec![
            task(&user.id, None, "Low", Priority::Low, day()),
            task(&user.id, None, "Medium", Priority::Medium, day()),
            task(&user.id, None, "High", Priority::High, day()),
        ];
        store.insert_tasks(&tasks).unwrap();
        Fixture {
            store: Arc::new(store),
            user,
            tasks,
        }
    }

    fn synthesizer(f: &Fixture, reasoner: ScriptedReasoner) -> ScheduleSynthesizer {
        ScheduleSynthesizer::new(f.store.clone(), Arc::new(reasoner), fast_policy())
    }

    fn assert_consistent(schedule: &Schedule) {
        assert!(!schedule.has_overlaps());
        let minutes = schedule.total_minutes() as f64;
        assert!((schedule.total_scheduled_hours * 60.0 - minutes).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_fallback_places_high_priority_first_at_work_start() {
        let f = fixture();
        let schedule = synthesizer(&f, ScriptedReasoner::failing())
            .synthesize(&f.user, day(), &[])
            .await
            .unwrap();

        assert_eq!(schedule.source, ScheduleSource::Fallback);
        let titles: Vec<_> = schedule.blocks.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["High", "Medium", "Low"]);
        assert_eq!(schedule.blocks[0].start, t(9, 0));
        assert_eq!(schedule.total_scheduled_hours, 1.5);
        assert_consistent(&schedule);
    }

    #[tokio::test]
    async fn test_regeneration_replaces_prior_schedule() {
        let f = fixture();
        let synth = synthesizer(&f, ScriptedReasoner::unavailable());
        let first = synth.synthesize(&f.user, day(), &[]).await.unwrap();
        let second = synth.synthesize(&f.user, day(), &[]).await.unwrap();

        assert_eq!(f.store.schedule_count(&f.user.id, day()).unwrap(), 1);
        assert_eq!(first.blocks, second.blocks);
        let stored = f.store.get_schedule(&f.user.id, day()).unwrap().unwrap();
        assert_eq!(stored.id, second.id);
        assert_eq!(stored.blocks.len(), 3);
    }

    #[tokio::test]
    async fn test_generated_plan_is_sanitized() {
        let f = fixture();
        let (low, medium, high) = (&f.tasks[0].id, &f.tasks[1].id, &f.tasks[2].id);
        let reply = json!({
            "blocks": [
                {"type": "task", "task_id": high, "start_time": "10:00", "end_time": "10:45"},
                {"type": "break", "start_time": "10:45", "end_time": "10:55"},
                {"type": "task", "task_id": medium, "start_time": "10:30", "end_time": "11:00"},
                {"type": "task", "task_id": "ghost", "start_time": "12:00", "end_time": "12:30"},
                {"type": "task", "task_id": low, "start_time": "18:00", "end_time": "18:30"},
                {"type": "task", "task_id": high, "start_time": "13:00", "end_time": "13:30"}
            ],
            "suggestions": ["Front-load the hard run"],
            "optimization_notes": "Peak morning energy"
        })
        .to_string();

        let schedule = synthesizer(&f, ScriptedReasoner::replying(&reply))
            .synthesize(&f.user, day(), &[])
            .await
            .unwrap();

        assert_eq!(schedule.source, ScheduleSource::Generated);
        assert_eq!(schedule.task_ids(), vec![high.as_str()]);
        assert_eq!(schedule.blocks.len(), 2);
        assert_eq!(schedule.blocks[1].kind, BlockKind::Break);
        assert!(schedule.suggestions.iter().any(|s| s.contains("Not scheduled today: Medium")));
        assert!(schedule.suggestions.iter().any(|s| s.contains("Not scheduled today: Low")));
        assert_eq!(schedule.optimization_notes, "Peak morning energy");
        assert_consistent(&schedule);
    }

    #[tokio::test]
    async fn test_unusable_plan_falls_back() {
        let f = fixture();
        let reply = json!({"blocks": [
            {"type": "task", "task_id": "ghost", "start_time": "09:00", "end_time": "09:30"},
            {"type": "task", "task_id": f.tasks[0].id, "start_time": "11:00", "end_time": "10:00"}
        ]})
        .to_string();

        let schedule = synthesizer(&f, ScriptedReasoner::replying(&reply))
            .synthesize(&f.user, day(), &[])
            .await
            .unwrap();
        assert_eq!(schedule.source, ScheduleSource::Fallback);
        assert_eq!(schedule.task_ids().len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_flows_around_commitments() {
        let f = fixture();
        let standup = Commitment {
            title: "Standup".to_string(),
            start: t(9, 0),
            end: t(9, 45),
        };
        let schedule = synthesizer(&f, ScriptedReasoner::unavailable())
            .synthesize(&f.user, day(), &[standup])
            .await
            .unwrap();

        assert_eq!(schedule.blocks[0].kind, BlockKind::Commitment);
        assert_eq!(schedule.blocks[1].title, "High");
        assert_eq!(schedule.blocks[1].start, t(9, 45));
        assert_eq!(schedule.total_scheduled_hours, 2.25);
        assert_consistent(&schedule);
    }

    #[test]
    fn test_fallback_respects_capacity_and_breaks() {
        let (_, user) = store_with_user();
        let profile = BehavioralProfile {
            work_start: t(9, 0),
            work_end: t(11, 0),
            break_minutes: 0,
            ..BehavioralProfile::default()
        };
        let mut long = task(&user.id, None, "Deep work", Priority::High, day());
        long.estimated_minutes = 60;
        let mut medium = task(&user.id, None, "Email", Priority::Medium, day());
        medium.estimated_minutes = 40;
        let mut overflow = task(&user.id, None, "Filing", Priority::Low, day());
        overflow.estimated_minutes = 30;
        let tasks = vec![overflow, medium, long];

        let (blocks, unplaced) = fallback_blocks(&tasks, &profile, &[]);

        let layout: Vec<_> = blocks.iter().map(|b| (b.title.as_str(), b.start, b.end)).collect();
        assert_eq!(
            layout,
            vec![
                ("Deep work", t(9, 0), t(10, 0)),
                ("Break", t(10, 0), t(10, 10)),
                ("Email", t(10, 10), t(10, 50)),
            ]
        );
        assert_eq!(unplaced.len(), 1);
        assert_eq!(unplaced[0].title, "Filing");
    }

    #[tokio::test]
    async fn test_overnight_window_gets_tasks() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let night = BehavioralProfile {
            work_start: t(22, 0),
            work_end: t(6, 0),
            ..BehavioralProfile::default()
        };
        let user = store.create_user("Nia", night).unwrap();
        let shift = task(&user.id, None, "High", Priority::High, day());
        store.insert_tasks(&[shift.clone()]).unwrap();

        let schedule = ScheduleSynthesizer::new(store.clone(), Arc::new(ScriptedReasoner::unavailable()), fast_policy())
            .synthesize(&user, day(), &[])
            .await
            .unwrap();

        assert_eq!(schedule.task_ids(), vec![shift.id.as_str()]);
        assert_eq!((schedule.blocks[0].start, schedule.blocks[0].end), (t(22, 0), t(22, 30)));
        assert!(!schedule.suggestions.iter().any(|s| s.starts_with("Not scheduled today")));
        assert_consistent(&schedule);
    }

    #[test]
    fn test_overlapping_commitments_are_dropped() {
        let blocks = commitment_blocks(&[
            Commitment { title: "A".to_string(), start: t(9, 0), end: t(10, 0) },
            Commitment { title: "B".to_string(), start: t(9, 30), end: t(10, 30) },
            Commitment { title: "C".to_string(), start: t(12, 0), end: t(11, 0) },
        ]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].title, "A");
    }

    #[tokio::test]
    async fn test_empty_day_still_gets_a_schedule() {
        let (store, user) = store_with_user();
        let store = Arc::new(store);
        let reasoner = Arc::new(ScriptedReasoner::replying("{}"));
        let synth = ScheduleSynthesizer::new(store.clone(), reasoner.clone(), fast_policy());

        let schedule = synth.synthesize(&user, day(), &[]).await.unwrap();
        assert!(schedule.blocks.is_empty());
        assert_eq!(schedule.total_scheduled_hours, 0.0);
        assert_eq!(reasoner.calls(), 0);
        assert!(store.get_schedule(&user.id, day()).unwrap().is_some());
    }
}
