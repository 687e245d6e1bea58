//! SQLite persistence for users, insights, goals, tasks, schedules and the XP ledger.
//!
//! `Store` owns a single connection behind a mutex, so every write is
//! serialized. Multi-row changes go through [`Store::with_transaction`].

use chrono::{NaiveDate, NaiveTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::sync::Mutex;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    now_rfc3339, level_for_xp, BehavioralProfile, Breakdown, EnergyLevel, EnergyPattern, Goal,
    GoalCategory, InsightsStatus, OnboardingInsights, Priority, Schedule, ScheduleSource,
    StoredBreakdown, StressResponse, Task, TaskStatus, TaskType, UserProfile, WorkStyle,
    CompletionMetadata,
};

const SCHEMA: &str = "
    -- Users with behavioral profile and progression totals
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        energy_pattern TEXT,
        work_style TEXT,
        stress_response TEXT,
        work_start TEXT NOT NULL DEFAULT '09:00',
        work_end TEXT NOT NULL DEFAULT '17:00',
        break_minutes INTEGER NOT NULL DEFAULT 60,
        preferred_task_minutes INTEGER,
        xp INTEGER NOT NULL DEFAULT 0 CHECK (xp >= 0),
        level INTEGER NOT NULL DEFAULT 1,
        current_streak INTEGER NOT NULL DEFAULT 0,
        longest_streak INTEGER NOT NULL DEFAULT 0,
        last_active_date TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    -- One onboarding record per user
    CREATE TABLE IF NOT EXISTS onboarding_insights (
        user_id TEXT PRIMARY KEY,
        raw_text TEXT NOT NULL,
        status TEXT NOT NULL,
        insights TEXT,
        summary TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id)
    );

    -- Goals carry their breakdown as a versioned JSON document
    CREATE TABLE IF NOT EXISTS goals (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        priority TEXT NOT NULL,
        target_date TEXT,
        is_completed INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT,
        progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
        breakdown TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id)
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        goal_id TEXT,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        task_type TEXT NOT NULL,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        estimated_minutes INTEGER NOT NULL CHECK (estimated_minutes > 0),
        suggested_time_slot TEXT,
        energy_level TEXT NOT NULL,
        difficulty INTEGER NOT NULL CHECK (difficulty BETWEEN 1 AND 5),
        success_criteria TEXT,
        scheduled_date TEXT NOT NULL,
        is_recurring INTEGER NOT NULL DEFAULT 0,
        milestone_index INTEGER,
        completed_at TEXT,
        completion TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id),
        FOREIGN KEY (goal_id) REFERENCES goals(id) ON DELETE SET NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_user_date ON tasks(user_id, scheduled_date);
    CREATE INDEX IF NOT EXISTS idx_tasks_goal_date ON tasks(goal_id, scheduled_date);

    -- Exactly one schedule per (user, date)
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        date TEXT NOT NULL,
        blocks TEXT NOT NULL,
        total_scheduled_hours REAL NOT NULL,
        suggestions TEXT NOT NULL,
        optimization_notes TEXT NOT NULL,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(user_id, date),
        FOREIGN KEY (user_id) REFERENCES users(id)
    );

    -- Append-only XP ledger; users.xp is the running total
    CREATE TABLE IF NOT EXISTS xp_events (
        id INTEGER PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount INTEGER NOT NULL CHECK (amount >= 0),
        reason TEXT NOT NULL,
        task_id TEXT,
        goal_id TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(id)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_xp_task_once
        ON xp_events(task_id) WHERE reason = 'task_completion';
    CREATE UNIQUE INDEX IF NOT EXISTS idx_xp_goal_once
        ON xp_events(goal_id) WHERE reason = 'goal_completion';
";

/// Why XP was awarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpReason {
    TaskCompletion,
    GoalCompletion,
}

impl XpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            XpReason::TaskCompletion => "task_completion",
            XpReason::GoalCompletion => "goal_completion",
        }
    }
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::init(conn)
    }

    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PipelineResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_connection<F, T>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&Connection) -> PipelineResult<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. Any error rolls everything back.
    pub fn with_transaction<F, T>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&Transaction) -> PipelineResult<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ============ Users ============

    pub fn create_user(&self, display_name: &str, profile: BehavioralProfile) -> PipelineResult<UserProfile> {
        let now = now_rfc3339();
        let user = UserProfile {
            id: uuid::Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            profile,
            xp: 0,
            level: 1,
            current_streak: 0,
            longest_streak: 0,
            last_active_date: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.with_connection(|conn| insert_user(conn, &user))?;
        Ok(user)
    }

    pub fn get_user(&self, user_id: &str) -> PipelineResult<Option<UserProfile>> {
        self.with_connection(|conn| load_user(conn, user_id))
    }

    pub fn require_user(&self, user_id: &str) -> PipelineResult<UserProfile> {
        self.get_user(user_id)?
            .ok_or_else(|| PipelineError::not_found("user", user_id))
    }

    pub fn update_behavioral_profile(&self, user_id: &str, profile: &BehavioralProfile) -> PipelineResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE users SET energy_pattern = ?1, work_style = ?2, stress_response = ?3,
                    work_start = ?4, work_end = ?5, break_minutes = ?6, preferred_task_minutes = ?7,
                    updated_at = ?8
                 WHERE id = ?9",
                params![
                    profile.energy_pattern.map(|e| e.as_str()),
                    profile.work_style.map(|w| w.as_str()),
                    profile.stress_response.map(|s| s.as_str()),
                    profile.work_start.format("%H:%M").to_string(),
                    profile.work_end.format("%H:%M").to_string(),
                    profile.break_minutes,
                    profile.preferred_task_minutes,
                    now_rfc3339(),
                    user_id,
                ],
            )?;
            if updated == 0 {
                return Err(PipelineError::not_found("user", user_id));
            }
            Ok(())
        })
    }

    // ============ Onboarding Insights ============

    pub fn get_insights(&self, user_id: &str) -> PipelineResult<Option<OnboardingInsights>> {
        self.with_connection(|conn| load_insights(conn, user_id))
    }

    /// Write the onboarding record. Analyzed records are immutable.
    pub fn save_insights(&self, insights: &OnboardingInsights) -> PipelineResult<()> {
        self.with_transaction(|tx| save_insights(tx, insights))
    }

    // ============ Goals ============

    pub fn insert_goal(&self, goal: &Goal) -> PipelineResult<()> {
        self.with_connection(|conn| insert_goal(conn, goal))
    }

    /// Store analyzed insights together with the goals extracted from them.
    pub fn record_onboarding(&self, insights: &OnboardingInsights, goals: &[Goal]) -> PipelineResult<()> {
        self.with_transaction(|tx| {
            save_insights(tx, insights)?;
            for goal in goals {
                insert_goal(tx, goal)?;
            }
            Ok(())
        })
    }

    pub fn get_goal(&self, goal_id: &str) -> PipelineResult<Option<Goal>> {
        self.with_connection(|conn| load_goal(conn, goal_id))
    }

    pub fn require_goal(&self, goal_id: &str) -> PipelineResult<Goal> {
        self.get_goal(goal_id)?
            .ok_or_else(|| PipelineError::not_found("goal", goal_id))
    }

    pub fn active_goals(&self, user_id: &str) -> PipelineResult<Vec<Goal>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM goals WHERE user_id = ?1 AND is_completed = 0 ORDER BY created_at ASC",
                GOAL_COLUMNS
            ))?;
            let goals = stmt.query_map(params![user_id], row_to_goal)?;
            Ok(goals.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Persist edits to the descriptive fields of a goal.
    pub fn update_goal_details(&self, goal: &Goal) -> PipelineResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE goals SET title = ?1, description = ?2, category = ?3, priority = ?4,
                    target_date = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    goal.title,
                    goal.description,
                    goal.category.as_str(),
                    goal.priority.as_str(),
                    goal.target_date.map(format_date),
                    now_rfc3339(),
                    goal.id,
                ],
            )?;
            if updated == 0 {
                return Err(PipelineError::not_found("goal", &goal.id));
            }
            Ok(())
        })
    }

    pub fn save_breakdown(&self, goal_id: &str, breakdown: &Breakdown) -> PipelineResult<()> {
        self.with_connection(|conn| save_breakdown(conn, goal_id, breakdown))
    }

    /// Swap in a regenerated breakdown without losing achieved milestones.
    /// Open milestone tasks are pointed at the milestone with the same title
    /// in the new plan, or unlinked when it has none.
    pub fn replace_breakdown(&self, goal_id: &str, mut breakdown: Breakdown) -> PipelineResult<Breakdown> {
        self.with_transaction(|tx| {
            let goal = load_goal(tx, goal_id)?.ok_or_else(|| PipelineError::not_found("goal", goal_id))?;
            let previous = goal.breakdown;
            if let Some(previous) = &previous {
                breakdown.carry_completed_from(previous);
            }

            let linked: Vec<(String, i64)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, milestone_index FROM tasks
                     WHERE goal_id = ?1 AND milestone_index IS NOT NULL AND completed_at IS NULL",
                )?;
                let rows = stmt.query_map(params![goal_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            for (task_id, old_index) in linked {
                let new_index = previous
                    .as_ref()
                    .and_then(|p| p.milestones.get(old_index as usize))
                    .and_then(|m| breakdown.open_milestone_titled(&m.title));
                tx.execute(
                    "UPDATE tasks SET milestone_index = ?1, updated_at = ?2 WHERE id = ?3",
                    params![new_index.map(|i| i as i64), now_rfc3339(), task_id],
                )?;
            }

            save_breakdown(tx, goal_id, &breakdown)?;
            Ok(breakdown)
        })
    }

    /// The explicit reset path: progress back to zero, completion cleared.
    pub fn reset_goal_progress(&self, goal_id: &str) -> PipelineResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE goals SET progress = 0, is_completed = 0, completed_at = NULL, updated_at = ?1
                 WHERE id = ?2",
                params![now_rfc3339(), goal_id],
            )?;
            if updated == 0 {
                return Err(PipelineError::not_found("goal", goal_id));
            }
            Ok(())
        })
    }

    /// Delete a goal and null out task references to it.
    pub fn delete_goal(&self, goal_id: &str) -> PipelineResult<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "UPDATE tasks SET goal_id = NULL, updated_at = ?1 WHERE goal_id = ?2",
                params![now_rfc3339(), goal_id],
            )?;
            let deleted = tx.execute("DELETE FROM goals WHERE id = ?1", params![goal_id])?;
            if deleted == 0 {
                return Err(PipelineError::not_found("goal", goal_id));
            }
            Ok(())
        })
    }

    // ============ Tasks ============

    /// Insert a batch of tasks; either all rows land or none do.
    pub fn insert_tasks(&self, tasks: &[Task]) -> PipelineResult<()> {
        self.with_transaction(|tx| {
            for task in tasks {
                insert_task(tx, task)?;
            }
            Ok(())
        })
    }

    pub fn get_task(&self, task_id: &str) -> PipelineResult<Option<Task>> {
        self.with_connection(|conn| load_task(conn, task_id))
    }

    /// Tasks still open on `date` (pending or in progress), oldest first.
    pub fn open_tasks_for_date(&self, user_id: &str, date: NaiveDate) -> PipelineResult<Vec<Task>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks
                 WHERE user_id = ?1 AND scheduled_date = ?2 AND status IN ('pending', 'in_progress')
                 ORDER BY created_at ASC, rowid ASC",
                TASK_COLUMNS
            ))?;
            let tasks = stmt.query_map(params![user_id, format_date(date)], row_to_task)?;
            Ok(tasks.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn tasks_for_goal_on(&self, goal_id: &str, date: NaiveDate) -> PipelineResult<Vec<Task>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE goal_id = ?1 AND scheduled_date = ?2
                 ORDER BY created_at ASC, rowid ASC",
                TASK_COLUMNS
            ))?;
            let tasks = stmt.query_map(params![goal_id, format_date(date)], row_to_task)?;
            Ok(tasks.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Whether a not-yet-finished task already exists for this milestone.
    pub fn has_open_milestone_task(&self, goal_id: &str, milestone_index: usize) -> PipelineResult<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks
                 WHERE goal_id = ?1 AND milestone_index = ?2 AND completed_at IS NULL
                   AND status != 'skipped'",
                params![goal_id, milestone_index as i64],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    // ============ Schedules ============

    /// Insert or fully replace the schedule for (user, date).
    pub fn upsert_schedule(&self, schedule: &Schedule) -> PipelineResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO schedules (id, user_id, date, blocks, total_scheduled_hours, suggestions,
                    optimization_notes, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(user_id, date) DO UPDATE SET
                    id = excluded.id,
                    blocks = excluded.blocks,
                    total_scheduled_hours = excluded.total_scheduled_hours,
                    suggestions = excluded.suggestions,
                    optimization_notes = excluded.optimization_notes,
                    source = excluded.source,
                    created_at = excluded.created_at",
                params![
                    schedule.id,
                    schedule.user_id,
                    format_date(schedule.date),
                    serde_json::to_string(&schedule.blocks)?,
                    schedule.total_scheduled_hours,
                    serde_json::to_string(&schedule.suggestions)?,
                    schedule.optimization_notes,
                    schedule.source.as_str(),
                    schedule.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_schedule(&self, user_id: &str, date: NaiveDate) -> PipelineResult<Option<Schedule>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, date, blocks, total_scheduled_hours, suggestions,
                        optimization_notes, source, created_at
                     FROM schedules WHERE user_id = ?1 AND date = ?2",
                    params![user_id, format_date(date)],
                    |row| {
                        Ok(Schedule {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            date: get_date(row, 2)?,
                            blocks: get_json(row, 3)?,
                            total_scheduled_hours: row.get(4)?,
                            suggestions: get_json(row, 5)?,
                            optimization_notes: row.get(6)?,
                            source: get_enum(row, 7, ScheduleSource::from_str)?,
                            created_at: row.get(8)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn schedule_count(&self, user_id: &str, date: NaiveDate) -> PipelineResult<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM schedules WHERE user_id = ?1 AND date = ?2",
                params![user_id, format_date(date)],
                |row| row.get(0),
            )?)
        })
    }

    // ============ XP Ledger ============

    /// Sum of every ledger entry for a user.
    pub fn ledger_total(&self, user_id: &str) -> PipelineResult<i64> {
        self.with_connection(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM xp_events WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?)
        })
    }
}

// ============ Row helpers ============

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn get_enum<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unexpected value '{}'", raw)))
}

fn get_opt_enum<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|r| parse(&r)))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date '{}': {}", raw, e)))
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    parse_date(idx, &raw)
}

fn get_opt_date(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_date(idx, &r)).transpose()
}

fn get_time(row: &Row, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|e| conversion_error(idx, format!("bad time '{}': {}", raw, e)))
}

fn get_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn get_opt_json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

// ============ Users ============

const USER_COLUMNS: &str = "id, display_name, energy_pattern, work_style, stress_response, work_start,
    work_end, break_minutes, preferred_task_minutes, xp, level, current_streak, longest_streak,
    last_active_date, created_at, updated_at";

fn row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        profile: BehavioralProfile {
            energy_pattern: get_opt_enum(row, 2, EnergyPattern::from_str)?,
            work_style: get_opt_enum(row, 3, WorkStyle::from_str)?,
            stress_response: get_opt_enum(row, 4, StressResponse::from_str)?,
            work_start: get_time(row, 5)?,
            work_end: get_time(row, 6)?,
            break_minutes: row.get(7)?,
            preferred_task_minutes: row.get(8)?,
        },
        xp: row.get(9)?,
        level: row.get(10)?,
        current_streak: row.get(11)?,
        longest_streak: row.get(12)?,
        last_active_date: get_opt_date(row, 13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn insert_user(conn: &Connection, user: &UserProfile) -> PipelineResult<()> {
    let p = &user.profile;
    conn.execute(
        &format!(
            "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            USER_COLUMNS
        ),
        params![
            user.id,
            user.display_name,
            p.energy_pattern.map(|e| e.as_str()),
            p.work_style.map(|w| w.as_str()),
            p.stress_response.map(|s| s.as_str()),
            p.work_start.format("%H:%M").to_string(),
            p.work_end.format("%H:%M").to_string(),
            p.break_minutes,
            p.preferred_task_minutes,
            user.xp,
            user.level,
            user.current_streak,
            user.longest_streak,
            user.last_active_date.map(format_date),
            user.created_at,
            user.updated_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_user(conn: &Connection, user_id: &str) -> PipelineResult<Option<UserProfile>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user_id],
            row_to_user,
        )
        .optional()?)
}

/// Append a ledger entry and add it to the user's total. Returns false when
/// the entry already exists (the award was made before).
pub(crate) fn award_xp(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    reason: XpReason,
    task_id: Option<&str>,
    goal_id: Option<&str>,
) -> PipelineResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO xp_events (user_id, amount, reason, task_id, goal_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, amount, reason.as_str(), task_id, goal_id, now_rfc3339()],
    )?;
    if inserted == 0 {
        return Ok(false);
    }

    conn.execute(
        "UPDATE users SET xp = xp + ?1, updated_at = ?2 WHERE id = ?3",
        params![amount, now_rfc3339(), user_id],
    )?;
    let xp: i64 = conn.query_row("SELECT xp FROM users WHERE id = ?1", params![user_id], |row| row.get(0))?;
    conn.execute(
        "UPDATE users SET level = ?1 WHERE id = ?2",
        params![level_for_xp(xp), user_id],
    )?;
    Ok(true)
}

pub(crate) fn set_streak(
    conn: &Connection,
    user_id: &str,
    current: i64,
    longest: i64,
    active_date: NaiveDate,
) -> PipelineResult<()> {
    conn.execute(
        "UPDATE users SET current_streak = ?1, longest_streak = ?2, last_active_date = ?3, updated_at = ?4
         WHERE id = ?5",
        params![current, longest, format_date(active_date), now_rfc3339(), user_id],
    )?;
    Ok(())
}

// ============ Onboarding Insights ============

fn load_insights(conn: &Connection, user_id: &str) -> PipelineResult<Option<OnboardingInsights>> {
    Ok(conn
        .query_row(
            "SELECT user_id, raw_text, status, insights, summary, created_at, updated_at
             FROM onboarding_insights WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(OnboardingInsights {
                    user_id: row.get(0)?,
                    raw_text: row.get(1)?,
                    status: get_enum(row, 2, InsightsStatus::from_str)?,
                    insights: get_opt_json(row, 3)?,
                    summary: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            },
        )
        .optional()?)
}

fn save_insights(conn: &Connection, insights: &OnboardingInsights) -> PipelineResult<()> {
    if let Some(existing) = load_insights(conn, &insights.user_id)? {
        if existing.status == InsightsStatus::Analyzed {
            return Err(PipelineError::Validation(format!(
                "onboarding insights for user {} are already analyzed",
                insights.user_id
            )));
        }
    }

    let insights_json = insights
        .insights
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO onboarding_insights (user_id, raw_text, status, insights, summary, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
            raw_text = excluded.raw_text,
            status = excluded.status,
            insights = excluded.insights,
            summary = excluded.summary,
            updated_at = excluded.updated_at",
        params![
            insights.user_id,
            insights.raw_text,
            insights.status.as_str(),
            insights_json,
            insights.summary,
            insights.created_at,
            insights.updated_at,
        ],
    )?;
    Ok(())
}

// ============ Goals ============

const GOAL_COLUMNS: &str = "id, user_id, title, description, category, priority, target_date,
    is_completed, completed_at, progress, breakdown, created_at, updated_at";

fn row_to_goal(row: &Row) -> rusqlite::Result<Goal> {
    let stored: Option<StoredBreakdown> = get_opt_json(row, 10)?;
    Ok(Goal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        category: get_enum(row, 4, GoalCategory::from_str)?,
        priority: get_enum(row, 5, Priority::from_str)?,
        target_date: get_opt_date(row, 6)?,
        is_completed: row.get::<_, i64>(7)? != 0,
        completed_at: row.get(8)?,
        progress: row.get(9)?,
        breakdown: stored.map(StoredBreakdown::into_breakdown),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn breakdown_json(breakdown: &Breakdown) -> PipelineResult<String> {
    Ok(serde_json::to_string(&StoredBreakdown::V1(breakdown.clone()))?)
}

fn insert_goal(conn: &Connection, goal: &Goal) -> PipelineResult<()> {
    if goal.title.trim().is_empty() {
        return Err(PipelineError::Validation("goal title is required".to_string()));
    }
    if !(0..=100).contains(&goal.progress) {
        return Err(PipelineError::Validation(format!(
            "goal progress {} outside 0..=100",
            goal.progress
        )));
    }

    let breakdown = goal.breakdown.as_ref().map(breakdown_json).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO goals ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            GOAL_COLUMNS
        ),
        params![
            goal.id,
            goal.user_id,
            goal.title,
            goal.description,
            goal.category.as_str(),
            goal.priority.as_str(),
            goal.target_date.map(format_date),
            goal.is_completed as i64,
            goal.completed_at,
            goal.progress,
            breakdown,
            goal.created_at,
            goal.updated_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_goal(conn: &Connection, goal_id: &str) -> PipelineResult<Option<Goal>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM goals WHERE id = ?1", GOAL_COLUMNS),
            params![goal_id],
            row_to_goal,
        )
        .optional()?)
}

pub(crate) fn save_breakdown(conn: &Connection, goal_id: &str, breakdown: &Breakdown) -> PipelineResult<()> {
    let updated = conn.execute(
        "UPDATE goals SET breakdown = ?1, updated_at = ?2 WHERE id = ?3",
        params![breakdown_json(breakdown)?, now_rfc3339(), goal_id],
    )?;
    if updated == 0 {
        return Err(PipelineError::not_found("goal", goal_id));
    }
    Ok(())
}

/// Add to a goal's progress, clamped to 100. Returns (before, after).
pub(crate) fn add_goal_progress(conn: &Connection, goal_id: &str, increment: i64) -> PipelineResult<(i64, i64)> {
    let before: i64 = conn
        .query_row("SELECT progress FROM goals WHERE id = ?1", params![goal_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| PipelineError::not_found("goal", goal_id))?;

    conn.execute(
        "UPDATE goals SET progress = MIN(100, progress + ?1), updated_at = ?2 WHERE id = ?3",
        params![increment.max(0), now_rfc3339(), goal_id],
    )?;

    let after: i64 = conn.query_row("SELECT progress FROM goals WHERE id = ?1", params![goal_id], |row| row.get(0))?;
    Ok((before, after))
}

/// Flip a goal to completed. False when it already was.
pub(crate) fn mark_goal_completed(conn: &Connection, goal_id: &str) -> PipelineResult<bool> {
    let now = now_rfc3339();
    let updated = conn.execute(
        "UPDATE goals SET is_completed = 1, completed_at = ?1, progress = 100, updated_at = ?1
         WHERE id = ?2 AND is_completed = 0",
        params![now, goal_id],
    )?;
    Ok(updated == 1)
}

// ============ Tasks ============

const TASK_COLUMNS: &str = "id, user_id, goal_id, title, description, task_type, priority, status,
    estimated_minutes, suggested_time_slot, energy_level, difficulty, success_criteria,
    scheduled_date, is_recurring, milestone_index, completed_at, completion, created_at, updated_at";

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        related_goal_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        task_type: get_enum(row, 5, TaskType::from_str)?,
        priority: get_enum(row, 6, Priority::from_str)?,
        status: get_enum(row, 7, TaskStatus::from_str)?,
        estimated_minutes: row.get(8)?,
        suggested_time_slot: row.get(9)?,
        energy_level: get_enum(row, 10, EnergyLevel::from_str)?,
        difficulty: row.get(11)?,
        success_criteria: row.get(12)?,
        scheduled_date: get_date(row, 13)?,
        is_recurring: row.get::<_, i64>(14)? != 0,
        milestone_index: row.get::<_, Option<i64>>(15)?.map(|i| i as usize),
        completed_at: row.get(16)?,
        completion: get_opt_json(row, 17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn insert_task(conn: &Connection, task: &Task) -> PipelineResult<()> {
    if task.title.trim().is_empty() {
        return Err(PipelineError::Validation("task title is required".to_string()));
    }
    if task.estimated_minutes == 0 {
        return Err(PipelineError::Validation("task duration must be positive".to_string()));
    }
    if !(1..=5).contains(&task.difficulty) {
        return Err(PipelineError::Validation(format!(
            "task difficulty {} outside 1..=5",
            task.difficulty
        )));
    }

    let completion = task.completion.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            TASK_COLUMNS
        ),
        params![
            task.id,
            task.user_id,
            task.related_goal_id,
            task.title,
            task.description,
            task.task_type.as_str(),
            task.priority.as_str(),
            task.status.as_str(),
            task.estimated_minutes,
            task.suggested_time_slot,
            task.energy_level.as_str(),
            task.difficulty,
            task.success_criteria,
            format_date(task.scheduled_date),
            task.is_recurring as i64,
            task.milestone_index.map(|i| i as i64),
            task.completed_at,
            completion,
            task.created_at,
            task.updated_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_task(conn: &Connection, task_id: &str) -> PipelineResult<Option<Task>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            params![task_id],
            row_to_task,
        )
        .optional()?)
}

pub(crate) fn update_task_status(
    conn: &Connection,
    task_id: &str,
    status: TaskStatus,
    scheduled_date: NaiveDate,
) -> PipelineResult<()> {
    conn.execute(
        "UPDATE tasks SET status = ?1, scheduled_date = ?2, updated_at = ?3
         WHERE id = ?4 AND completed_at IS NULL",
        params![status.as_str(), format_date(scheduled_date), now_rfc3339(), task_id],
    )?;
    Ok(())
}

/// Stamp a task completed. False when a completion timestamp already exists.
pub(crate) fn mark_task_completed(
    conn: &Connection,
    task_id: &str,
    metadata: &CompletionMetadata,
) -> PipelineResult<bool> {
    let now = now_rfc3339();
    let updated = conn.execute(
        "UPDATE tasks SET status = 'completed', completed_at = ?1, completion = ?2, updated_at = ?1
         WHERE id = ?3 AND completed_at IS NULL",
        params![now, serde_json::to_string(metadata)?, task_id],
    )?;
    Ok(updated == 1)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Row builders shared by module tests.

    use super::*;
    use crate::models::{GoalDraft, Milestone, DifficultyTier, BreakdownSource};

    pub fn store_with_user() -> (Store, UserProfile) {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user("Sam", BehavioralProfile::default()).unwrap();
        (store, user)
    }

    pub fn goal(user_id: &str, title: &str, priority: Priority) -> Goal {
        Goal::from_draft(
            user_id,
            GoalDraft {
                title: title.to_string(),
                description: format!("{} description", title),
                category: GoalCategory::Fitness,
                priority,
                target_date: None,
            },
        )
    }

    pub fn breakdown() -> Breakdown {
        Breakdown {
            milestones: vec![Milestone {
                title: "First 5k".to_string(),
                description: "Run 5k without stopping".to_string(),
                target_date: NaiveDate::from_ymd_opt(2026, 11, 1),
                completed: false,
            }],
            weekly_tasks: vec!["Long run".to_string(), "Interval session".to_string()],
            daily_habits: vec!["Stretch for 10 minutes".to_string()],
            estimated_timeframe: "2 months".to_string(),
            difficulty: DifficultyTier::Beginner,
            success_tips: vec!["Start slow".to_string()],
            source: BreakdownSource::Generated,
        }
    }

    pub fn task(user_id: &str, goal_id: Option<&str>, title: &str, priority: Priority, date: NaiveDate) -> Task {
        let now = now_rfc3339();
        Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            related_goal_id: goal_id.map(|g| g.to_string()),
            title: title.to_string(),
            description: String::new(),
            task_type: TaskType::OneTime,
            priority,
            status: TaskStatus::Pending,
            estimated_minutes: 30,
            suggested_time_slot: None,
            energy_level: EnergyLevel::Medium,
            difficulty: 3,
            success_criteria: None,
            scheduled_date: date,
            is_recurring: false,
            milestone_index: None,
            completed_at: None,
            completion: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
