//! Cron-driven prompt injection.
//!
//! A 5-field cron evaluator (minute, hour, day-of-month, month,
//! day-of-week) computes each job's next minute boundary -- UTC unless
//! the job names an IANA timezone. A ticker enumerates jobs once a
//! minute and pushes due prompts into the agent's input queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use keel_domain::input::Input;
use keel_domain::{Error, Result};

use crate::agent::Agent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron expressions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One parsed cron field: `*`, `*/n`, or a list of values and ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldSpec {
    Any,
    Step(u32),
    /// Inclusive ranges; single values are `(n, n)`.
    Values(Vec<(u32, u32)>),
}

impl FieldSpec {
    fn matches(&self, value: u32) -> bool {
        match self {
            FieldSpec::Any => true,
            FieldSpec::Step(n) => value % n == 0,
            FieldSpec::Values(ranges) => ranges.iter().any(|(lo, hi)| value >= *lo && value <= *hi),
        }
    }
}

/// A validated 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    fields: [FieldSpec; 5],
}

/// Valid value bounds per field: minute, hour, dom, month, dow.
const FIELD_BOUNDS: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let raw: Vec<&str> = expr.split_whitespace().collect();
        if raw.len() != 5 {
            return Err(Error::Config(format!(
                "cron expression needs 5 fields, got {}: {expr:?}",
                raw.len()
            )));
        }

        let mut fields = Vec::with_capacity(5);
        for (i, field) in raw.iter().enumerate() {
            fields.push(parse_field(field, FIELD_BOUNDS[i])?);
        }
        let fields: [FieldSpec; 5] = fields
            .try_into()
            .map_err(|_| Error::Config("cron field conversion failed".into()))?;
        Ok(Self { fields })
    }

    /// Whether a local wall-clock minute matches.
    fn matches(&self, dt: &NaiveDateTime) -> bool {
        self.fields[0].matches(dt.minute())
            && self.fields[1].matches(dt.hour())
            && self.fields[2].matches(dt.day())
            && self.fields[3].matches(dt.month())
            && self.fields[4].matches(dt.weekday().num_days_from_sunday())
    }

    /// Next matching minute boundary strictly after `after`, evaluated
    /// in `tz` and returned in UTC. DST gaps are skipped; fall-back
    /// overlaps take the earliest mapping. Scans at most one year.
    pub fn next_after(&self, after: DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        use chrono::TimeZone;

        let local_after = after.with_timezone(&tz).naive_local();
        let to_next_minute = 60 - local_after.second() as i64;
        let mut candidate = local_after + chrono::Duration::seconds(to_next_minute);
        candidate = candidate.with_second(0).unwrap_or(candidate);

        let max_checks = 366 * 24 * 60;
        for _ in 0..max_checks {
            if self.matches(&candidate) {
                match tz.from_local_datetime(&candidate) {
                    chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earliest, _) => {
                        return Some(earliest.with_timezone(&Utc));
                    }
                    // This local minute falls in a DST gap.
                    chrono::LocalResult::None => {}
                }
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

fn parse_field(field: &str, bounds: (u32, u32)) -> Result<FieldSpec> {
    if field == "*" {
        return Ok(FieldSpec::Any);
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step
            .parse()
            .map_err(|_| Error::Config(format!("bad cron step: {field:?}")))?;
        if n == 0 {
            return Err(Error::Config("cron step of zero".into()));
        }
        return Ok(FieldSpec::Step(n));
    }

    let mut ranges = Vec::new();
    for part in field.split(',') {
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| Error::Config(format!("bad cron range: {part:?}")))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| Error::Config(format!("bad cron range: {part:?}")))?;
                (lo, hi)
            }
            None => {
                let n: u32 = part
                    .parse()
                    .map_err(|_| Error::Config(format!("bad cron value: {part:?}")))?;
                (n, n)
            }
        };
        if lo > hi || lo < bounds.0 || hi > bounds.1 {
            return Err(Error::Config(format!(
                "cron value out of range {}-{}: {part:?}",
                bounds.0, bounds.1
            )));
        }
        ranges.push((lo, hi));
    }
    Ok(FieldSpec::Values(ranges))
}

/// Parse an IANA timezone name, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub expr: String,
    pub prompt: String,
    /// Session the prompt is injected into; empty targets a fresh one.
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "d_utc")]
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn d_utc() -> String {
    "UTC".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted cron jobs plus the ticker that fires them.
pub struct Scheduler {
    path: PathBuf,
    jobs: Mutex<Vec<CronJob>>,
}

impl Scheduler {
    /// Load or create the job file at `state_dir/cron_jobs.json`.
    pub fn load(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("cron_jobs.json");
        let jobs: Vec<CronJob> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };

        tracing::info!(jobs = jobs.len(), path = %path.display(), "scheduler loaded");
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    pub fn add(
        &self,
        expr: &str,
        prompt: &str,
        session_id: &str,
        timezone: &str,
    ) -> Result<CronJob> {
        let parsed = CronExpr::parse(expr)?;
        let tz = parse_tz(timezone);
        let job = CronJob {
            id: uuid::Uuid::new_v4().to_string(),
            expr: expr.to_string(),
            prompt: prompt.to_string(),
            session_id: session_id.to_string(),
            timezone: timezone.to_string(),
            next_run: parsed.next_after(Utc::now(), tz),
            created_at: Utc::now(),
        };
        self.jobs.lock().push(job.clone());
        self.flush()?;
        tracing::info!(job_id = %job.id, expr = expr, "cron job added");
        Ok(job)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut jobs = self.jobs.lock();
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() < before
        };
        if removed {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<CronJob> {
        self.jobs.lock().clone()
    }

    /// Fire every job whose `next_run` is due, advance it, and persist.
    /// Returns the number of jobs fired.
    pub fn fire_due(&self, now: DateTime<Utc>, mut enqueue: impl FnMut(Input)) -> usize {
        let mut fired = 0;
        {
            let mut jobs = self.jobs.lock();
            for job in jobs.iter_mut() {
                let tz = parse_tz(&job.timezone);
                let expr = match CronExpr::parse(&job.expr) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "skipping unparseable cron job");
                        continue;
                    }
                };
                let due = match job.next_run {
                    Some(at) => at <= now,
                    // Jobs imported without a schedule catch up on the
                    // next boundary instead of firing immediately.
                    None => false,
                };
                if due {
                    enqueue(Input::new(
                        job.session_id.clone(),
                        job.prompt.clone(),
                        "cron",
                    ));
                    fired += 1;
                }
                if due || job.next_run.is_none() {
                    job.next_run = expr.next_after(now, tz);
                }
            }
        }
        if fired > 0 {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "failed to persist cron jobs after firing");
            }
        }
        fired
    }

    /// Spawn the ticker task. Default cadence is one minute.
    pub fn spawn_ticker(
        self: &Arc<Self>,
        agent: Agent,
        tick: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let fired = scheduler.fire_due(Utc::now(), |input| agent.enqueue(input));
                if fired > 0 {
                    tracing::debug!(fired, "cron jobs fired");
                }
            }
        })
    }

    fn flush(&self) -> Result<()> {
        let json = {
            let jobs = self.jobs.lock();
            serde_json::to_string_pretty(&*jobs)?
        };
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
