//! Domain records shared by the store and the pipeline stages.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// XP needed per level step.
pub const XP_PER_LEVEL: i64 = 100;

/// Level derived from cumulative XP. Level 1 at 0 XP.
pub fn level_for_xp(xp: i64) -> i64 {
    xp.max(0) / XP_PER_LEVEL + 1
}

// ============ Behavioral Profile ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyPattern {
    Morning,
    Afternoon,
    Evening,
    Balanced,
}

impl EnergyPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyPattern::Morning => "morning",
            EnergyPattern::Afternoon => "afternoon",
            EnergyPattern::Evening => "evening",
            EnergyPattern::Balanced => "balanced",
        }
    }

    pub fn from_str(s: &str) -> Option<EnergyPattern> {
        match s.trim().to_lowercase().as_str() {
            "morning" | "early_bird" | "morning_person" => Some(EnergyPattern::Morning),
            "afternoon" | "midday" => Some(EnergyPattern::Afternoon),
            "evening" | "night" | "night_owl" => Some(EnergyPattern::Evening),
            "balanced" | "steady" => Some(EnergyPattern::Balanced),
            _ => None,
        }
    }

    /// Peak window as (start, end) minutes from midnight.
    pub fn peak_window(&self) -> (u32, u32) {
        match self {
            EnergyPattern::Morning => (8 * 60, 12 * 60),
            EnergyPattern::Afternoon => (13 * 60, 17 * 60),
            EnergyPattern::Evening => (17 * 60, 21 * 60),
            EnergyPattern::Balanced => (9 * 60, 17 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStyle {
    DeepFocus,
    ShortBursts,
    Flexible,
}

impl WorkStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStyle::DeepFocus => "deep_focus",
            WorkStyle::ShortBursts => "short_bursts",
            WorkStyle::Flexible => "flexible",
        }
    }

    pub fn from_str(s: &str) -> Option<WorkStyle> {
        match s.trim().to_lowercase().as_str() {
            "deep_focus" | "focused" | "deep" => Some(WorkStyle::DeepFocus),
            "short_bursts" | "bursts" | "pomodoro" => Some(WorkStyle::ShortBursts),
            "flexible" => Some(WorkStyle::Flexible),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressResponse {
    NeedsStructure,
    NeedsBreaks,
    PushesThrough,
    Avoids,
}

impl StressResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            StressResponse::NeedsStructure => "needs_structure",
            StressResponse::NeedsBreaks => "needs_breaks",
            StressResponse::PushesThrough => "pushes_through",
            StressResponse::Avoids => "avoids",
        }
    }

    pub fn from_str(s: &str) -> Option<StressResponse> {
        match s.trim().to_lowercase().as_str() {
            "needs_structure" | "structure" => Some(StressResponse::NeedsStructure),
            "needs_breaks" | "breaks" => Some(StressResponse::NeedsBreaks),
            "pushes_through" | "push_through" => Some(StressResponse::PushesThrough),
            "avoids" | "avoidance" => Some(StressResponse::Avoids),
            _ => None,
        }
    }
}

/// Coarse behavioral profile collected during onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub energy_pattern: Option<EnergyPattern>,
    pub work_style: Option<WorkStyle>,
    pub stress_response: Option<StressResponse>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub break_minutes: u32,
    pub preferred_task_minutes: Option<u32>,
}

impl Default for BehavioralProfile {
    fn default() -> Self {
        Self {
            energy_pattern: None,
            work_style: None,
            stress_response: None,
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            break_minutes: 60,
            preferred_task_minutes: None,
        }
    }
}

impl BehavioralProfile {
    pub fn work_start_minutes(&self) -> u32 {
        minutes_of(self.work_start)
    }

    pub fn work_end_minutes(&self) -> u32 {
        minutes_of(self.work_end)
    }

    /// Length of the working window. An end at or before the start runs
    /// through midnight.
    pub fn window_minutes(&self) -> u32 {
        let (start, end) = (self.work_start_minutes(), self.work_end_minutes());
        if end > start {
            end - start
        } else {
            end + MINUTES_PER_DAY - start
        }
    }

    /// Where one calendar day's plan has to stop. Overnight windows are
    /// planned up to the last minute of the start day.
    pub fn day_end_minutes(&self) -> u32 {
        if self.work_end_minutes() > self.work_start_minutes() {
            self.work_end_minutes()
        } else {
            LAST_MINUTE_OF_DAY
        }
    }

    /// Hours available for planned work: window minus breaks, never below one hour.
    pub fn available_hours(&self) -> f64 {
        let usable = self.window_minutes() as i64 - self.break_minutes as i64;
        (usable as f64 / 60.0).max(1.0)
    }

    pub fn available_minutes(&self) -> u32 {
        (self.available_hours() * 60.0).round() as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub profile: BehavioralProfile,
    pub xp: i64,
    pub level: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_active_date: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

// ============ Onboarding Insights ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightsStatus {
    PendingAnalysis,
    Analyzed,
}

impl InsightsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightsStatus::PendingAnalysis => "pending_analysis",
            InsightsStatus::Analyzed => "analyzed",
        }
    }

    pub fn from_str(s: &str) -> Option<InsightsStatus> {
        match s {
            "pending_analysis" => Some(InsightsStatus::PendingAnalysis),
            "analyzed" => Some(InsightsStatus::Analyzed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehavioralInsights {
    pub primary_goals: Vec<String>,
    pub challenges: Vec<String>,
    pub lifestyle: String,
    pub motivation_type: String,
    pub availability_pattern: String,
    pub personality_traits: Vec<String>,
    pub work_preferences: Option<String>,
    pub stress_factors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingInsights {
    pub user_id: String,
    pub raw_text: String,
    pub status: InsightsStatus,
    pub insights: Option<BehavioralInsights>,
    pub summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============ Goals ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalCategory {
    Fitness,
    Career,
    Learning,
    Personal,
    Finance,
    Relationships,
    Health,
}

impl GoalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalCategory::Fitness => "fitness",
            GoalCategory::Career => "career",
            GoalCategory::Learning => "learning",
            GoalCategory::Personal => "personal",
            GoalCategory::Finance => "finance",
            GoalCategory::Relationships => "relationships",
            GoalCategory::Health => "health",
        }
    }

    pub fn from_str(s: &str) -> Option<GoalCategory> {
        match s.trim().to_lowercase().as_str() {
            "fitness" => Some(GoalCategory::Fitness),
            "career" | "work" => Some(GoalCategory::Career),
            "learning" | "education" => Some(GoalCategory::Learning),
            "personal" => Some(GoalCategory::Personal),
            "finance" | "financial" | "money" => Some(GoalCategory::Finance),
            "relationships" | "relationship" | "social" => Some(GoalCategory::Relationships),
            "health" | "wellness" => Some(GoalCategory::Health),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Priority> {
        match s.trim().to_lowercase().as_str() {
            "high" | "urgent" => Some(Priority::High),
            "medium" | "normal" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Lower rank sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyTier {
    pub fn from_str(s: &str) -> Option<DifficultyTier> {
        match s.trim().to_lowercase().as_str() {
            "beginner" | "easy" => Some(DifficultyTier::Beginner),
            "intermediate" | "medium" => Some(DifficultyTier::Intermediate),
            "advanced" | "hard" => Some(DifficultyTier::Advanced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub description: String,
    pub target_date: Option<NaiveDate>,
    pub completed: bool,
}

/// Where a breakdown came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownSource {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub milestones: Vec<Milestone>,
    pub weekly_tasks: Vec<String>,
    pub daily_habits: Vec<String>,
    pub estimated_timeframe: String,
    pub difficulty: DifficultyTier,
    pub success_tips: Vec<String>,
    pub source: BreakdownSource,
}

impl Breakdown {
    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty() && self.weekly_tasks.is_empty() && self.daily_habits.is_empty()
    }

    /// Index of the first milestone not yet completed.
    pub fn next_milestone(&self) -> Option<(usize, &Milestone)> {
        self.milestones.iter().enumerate().find(|(_, m)| !m.completed)
    }

    /// Open milestone with the same title, ignoring case and surrounding space.
    pub fn open_milestone_titled(&self, title: &str) -> Option<usize> {
        let key = milestone_key(title);
        self.milestones
            .iter()
            .position(|m| !m.completed && milestone_key(&m.title) == key)
    }

    /// Keep what was already achieved when this breakdown replaces `previous`.
    /// Milestones completed before stay completed: matched by title when the
    /// new plan repeats them, otherwise kept ahead of the new milestones.
    pub fn carry_completed_from(&mut self, previous: &Breakdown) {
        let mut history = Vec::new();
        for done in previous.milestones.iter().filter(|m| m.completed) {
            match self.open_milestone_titled(&done.title) {
                Some(index) => self.milestones[index].completed = true,
                None => history.push(done.clone()),
            }
        }
        if !history.is_empty() {
            history.append(&mut self.milestones);
            self.milestones = history;
        }
    }
}

fn milestone_key(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Versioned envelope for the breakdown column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum StoredBreakdown {
    #[serde(rename = "breakdown.v1")]
    V1(Breakdown),
}

impl StoredBreakdown {
    pub fn into_breakdown(self) -> Breakdown {
        match self {
            StoredBreakdown::V1(b) => b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub category: GoalCategory,
    pub priority: Priority,
    pub target_date: Option<NaiveDate>,
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub progress: i64,
    pub breakdown: Option<Breakdown>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields a caller supplies when creating or editing a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalDraft {
    pub title: String,
    pub description: String,
    pub category: GoalCategory,
    pub priority: Priority,
    pub target_date: Option<NaiveDate>,
}

impl Goal {
    pub fn from_draft(user_id: &str, draft: GoalDraft) -> Goal {
        let now = Utc::now().to_rfc3339();
        Goal {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            priority: draft.priority,
            target_date: draft.target_date,
            is_completed: false,
            completed_at: None,
            progress: 0,
            breakdown: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

// ============ Tasks ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DailyHabit,
    WeeklyTask,
    Milestone,
    OneTime,
    Recurring,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::DailyHabit => "daily_habit",
            TaskType::WeeklyTask => "weekly_task",
            TaskType::Milestone => "milestone",
            TaskType::OneTime => "one_time",
            TaskType::Recurring => "recurring",
        }
    }

    pub fn from_str(s: &str) -> Option<TaskType> {
        match s.trim().to_lowercase().as_str() {
            "daily_habit" | "habit" | "daily" => Some(TaskType::DailyHabit),
            "weekly_task" | "weekly" => Some(TaskType::WeeklyTask),
            "milestone" => Some(TaskType::Milestone),
            "one_time" | "once" | "task" => Some(TaskType::OneTime),
            "recurring" => Some(TaskType::Recurring),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Rescheduled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn from_str(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "skipped" => Some(TaskStatus::Skipped),
            "rescheduled" => Some(TaskStatus::Rescheduled),
            _ => None,
        }
    }

    /// Allowed edges of the task lifecycle. Completed is terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, InProgress | Completed | Skipped | Rescheduled | Pending) => true,
            (InProgress, Completed | Skipped | Rescheduled | Pending) => true,
            (Rescheduled, Pending | Skipped) => true,
            (Skipped, Pending | Rescheduled) => true,
            _ => false,
        }
    }

    /// Statuses that still belong on a day's schedule.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    High,
    Medium,
    Low,
}

impl EnergyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyLevel::High => "high",
            EnergyLevel::Medium => "medium",
            EnergyLevel::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<EnergyLevel> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(EnergyLevel::High),
            "medium" | "moderate" => Some(EnergyLevel::Medium),
            "low" => Some(EnergyLevel::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub actual_minutes: Option<u32>,
    pub notes: Option<String>,
    pub satisfaction: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub related_goal_id: Option<String>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub estimated_minutes: u32,
    pub suggested_time_slot: Option<String>,
    pub energy_level: EnergyLevel,
    pub difficulty: u8,
    pub success_criteria: Option<String>,
    pub scheduled_date: NaiveDate,
    pub is_recurring: bool,
    pub milestone_index: Option<usize>,
    pub completed_at: Option<String>,
    pub completion: Option<CompletionMetadata>,
    pub created_at: String,
    pub updated_at: String,
}

// ============ Schedules ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Task,
    Break,
    Commitment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub kind: BlockKind,
    pub task_id: Option<String>,
    pub title: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub flexible: bool,
}

impl TimeBlock {
    pub fn start_minutes(&self) -> u32 {
        minutes_of(self.start)
    }

    pub fn end_minutes(&self) -> u32 {
        minutes_of(self.end)
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end_minutes().saturating_sub(self.start_minutes())
    }

    pub fn overlaps(&self, other: &TimeBlock) -> bool {
        self.start_minutes() < other.end_minutes() && other.start_minutes() < self.end_minutes()
    }
}

/// Whether a schedule came from the planning assistant or the deterministic packer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Generated,
    Fallback,
}

impl ScheduleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleSource::Generated => "generated",
            ScheduleSource::Fallback => "fallback",
        }
    }

    pub fn from_str(s: &str) -> Option<ScheduleSource> {
        match s {
            "generated" => Some(ScheduleSource::Generated),
            "fallback" => Some(ScheduleSource::Fallback),
            _ => None,
        }
    }
}

/// A time-blocked day plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub blocks: Vec<TimeBlock>,
    pub total_scheduled_hours: f64,
    pub suggestions: Vec<String>,
    pub optimization_notes: String,
    pub source: ScheduleSource,
    pub created_at: String,
}

impl Schedule {
    pub fn total_minutes(&self) -> u32 {
        self.blocks.iter().map(|b| b.duration_minutes()).sum()
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| b.task_id.as_deref())
            .collect()
    }

    pub fn has_overlaps(&self) -> bool {
        self.blocks
            .windows(2)
            .any(|w| w[0].end_minutes() > w[1].start_minutes())
    }
}

// ============ Time helpers ============

pub const MINUTES_PER_DAY: u32 = 24 * 60;
pub const LAST_MINUTE_OF_DAY: u32 = MINUTES_PER_DAY - 1;

pub fn minutes_of(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Clock time for minutes past midnight, clamped to the last minute of the day.
pub fn time_at(minutes: u32) -> NaiveTime {
    let m = minutes.min(LAST_MINUTE_OF_DAY);
    NaiveTime::from_hms_opt(m / 60, m % 60, 0).unwrap_or(NaiveTime::MIN)
}

pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(&s.to_uppercase(), "%I:%M %p"))
        .ok()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(start: &str, end: &str, break_minutes: u32) -> BehavioralProfile {
        BehavioralProfile {
            work_start: parse_clock(start).unwrap(),
            work_end: parse_clock(end).unwrap(),
            break_minutes,
            ..BehavioralProfile::default()
        }
    }

    #[test]
    fn test_available_hours_standard_day() {
        assert_eq!(profile("09:00", "17:00", 60).available_hours(), 7.0);
    }

    #[test]
    fn test_available_hours_floored_at_one() {
        assert_eq!(profile("09:00", "09:30", 60).available_hours(), 1.0);
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        let night = profile("22:00", "06:00", 60);
        assert_eq!(night.window_minutes(), 480);
        assert_eq!(night.available_hours(), 7.0);
        assert_eq!(night.day_end_minutes(), LAST_MINUTE_OF_DAY);
        assert_eq!(profile("09:00", "17:00", 60).day_end_minutes(), 17 * 60);
    }

    #[test]
    fn test_level_steps() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(1050), 11);
        assert_eq!(level_for_xp(-5), 1);
    }

    #[test]
    fn test_task_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Rescheduled.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Skipped.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_enum_aliases() {
        assert_eq!(GoalCategory::from_str("Wellness"), Some(GoalCategory::Health));
        assert_eq!(Priority::from_str(" HIGH "), Some(Priority::High));
        assert_eq!(TaskType::from_str("habit"), Some(TaskType::DailyHabit));
        assert_eq!(EnergyPattern::from_str("night_owl"), Some(EnergyPattern::Evening));
        assert_eq!(GoalCategory::from_str("astrology"), None);
    }

    #[test]
    fn test_parse_clock_formats() {
        assert_eq!(parse_clock("09:30"), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(parse_clock("2:15 pm"), NaiveTime::from_hms_opt(14, 15, 0));
        assert_eq!(parse_clock("later"), None);
    }

    fn milestone(title: &str, completed: bool) -> Milestone {
        Milestone {
            title: title.to_string(),
            description: String::new(),
            target_date: None,
            completed,
        }
    }

    #[test]
    fn test_completed_milestones_survive_replacement() {
        let previous = Breakdown {
            milestones: vec![milestone("First 5k", true), milestone("Sub-30 5k", true), milestone("10k", false)],
            weekly_tasks: vec![],
            daily_habits: vec![],
            estimated_timeframe: String::new(),
            difficulty: DifficultyTier::Beginner,
            success_tips: vec![],
            source: BreakdownSource::Generated,
        };
        let mut next = Breakdown {
            milestones: vec![milestone("sub-30 5K ", false), milestone("Race day", false)],
            ..previous.clone()
        };

        next.carry_completed_from(&previous);

        let state: Vec<_> = next.milestones.iter().map(|m| (m.title.as_str(), m.completed)).collect();
        assert_eq!(state, vec![("First 5k", true), ("sub-30 5K ", true), ("Race day", false)]);
        assert_eq!(next.next_milestone().map(|(i, _)| i), Some(2));
        assert_eq!(next.open_milestone_titled("RACE DAY"), Some(2));
        assert_eq!(next.open_milestone_titled("First 5k"), None);
    }

    #[test]
    fn test_stored_breakdown_is_tagged() {
        let breakdown = Breakdown {
            milestones: vec![],
            weekly_tasks: vec!["Review budget".to_string()],
            daily_habits: vec![],
            estimated_timeframe: "1 month".to_string(),
            difficulty: DifficultyTier::Beginner,
            success_tips: vec![],
            source: BreakdownSource::Fallback,
        };
        let json = serde_json::to_string(&StoredBreakdown::V1(breakdown.clone())).unwrap();
        assert!(json.contains("\"schema\":\"breakdown.v1\""));

        let parsed: StoredBreakdown = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.into_breakdown(), breakdown);
    }
}
