//! Schedule evaluation: cron and interval next-run computation, the due
//! predicate, dispatch jitter, and interval estimation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use legator_types::agent::Agent;
use legator_types::duration::parse_duration;
use legator_types::error::{TypesError, TypesResult};
use rand::Rng;
use std::time::Duration;

/// Compute the next scheduled run time for an agent.
///
/// Returns `None` for paused and trigger-only agents (the "no scheduled
/// time" sentinel). Cron takes precedence over interval when both are set.
pub fn next_run(agent: &Agent, now: DateTime<Utc>) -> TypesResult<Option<DateTime<Utc>>> {
    if agent.spec.paused {
        return Ok(None);
    }
    let spec = &agent.spec.schedule;
    let tz = load_timezone(&spec.timezone)?;

    if !spec.cron.is_empty() {
        return Ok(Some(next_cron_after(&spec.cron, tz, now)?));
    }
    if !spec.interval.is_empty() {
        let interval = parse_duration(&spec.interval)?;
        return Ok(Some(match agent.status.last_run_time {
            // Never run — due now.
            None => now,
            Some(last) => last + ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::zero()),
        }));
    }
    Ok(None)
}

/// Whether the agent should run now.
///
/// The reference point is `last_run`, not wall clock: a scheduler resuming
/// after a pause sees each missed tick as one catch-up rather than
/// coalescing them, and never-run agents are immediately due.
pub fn is_due(agent: &Agent, now: DateTime<Utc>) -> TypesResult<bool> {
    if agent.spec.paused || !agent.has_schedule() {
        return Ok(false);
    }
    let last = match agent.status.last_run_time {
        None => return Ok(true),
        Some(last) => last,
    };
    let next_after_last = next_run_after(agent, last)?;
    Ok(match next_after_last {
        None => false,
        Some(next) => now > next,
    })
}

/// Next run time strictly after a reference instant.
fn next_run_after(agent: &Agent, after: DateTime<Utc>) -> TypesResult<Option<DateTime<Utc>>> {
    let spec = &agent.spec.schedule;
    let tz = load_timezone(&spec.timezone)?;

    if !spec.cron.is_empty() {
        return Ok(Some(next_cron_after(&spec.cron, tz, after)?));
    }
    if !spec.interval.is_empty() {
        let interval = parse_duration(&spec.interval)?;
        return Ok(Some(after + ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::zero())));
    }
    Ok(None)
}

/// Parse a 5-field cron expression and return the first fire strictly after
/// `after`, evaluated in `tz`.
fn next_cron_after(expr: &str, tz: Tz, after: DateTime<Utc>) -> TypesResult<DateTime<Utc>> {
    // The cron crate wants 7 fields (sec min hour dom month dow year);
    // the 5-field form gains a zero seconds column and a wildcard year.
    let trimmed = expr.trim();
    let fields = trimmed.split_whitespace().count();
    let full = match fields {
        5 => format!("0 {trimmed} *"),
        6 => format!("{trimmed} *"),
        _ => trimmed.to_string(),
    };

    let schedule: cron::Schedule = full.parse().map_err(|e| TypesError::InvalidCron {
        expr: expr.to_string(),
        reason: format!("{e}"),
    })?;

    let local = after.with_timezone(&tz);
    schedule
        .after(&local)
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TypesError::InvalidCron {
            expr: expr.to_string(),
            reason: "no upcoming fire time".to_string(),
        })
}

fn load_timezone(tz: &str) -> TypesResult<Tz> {
    if tz.is_empty() || tz == "UTC" {
        return Ok(chrono_tz::UTC);
    }
    tz.parse()
        .map_err(|_| TypesError::InvalidTimezone(tz.to_string()))
}

/// Offset a scheduled time by uniform random jitter so identically-scheduled
/// agents don't all fire at the same instant.
///
/// Jitter spans ±(percent/2) of the interval, capped at 30s total; below a
/// 100ms floor no jitter is applied. A non-positive percent uses the 10%
/// default.
pub fn apply_jitter(
    scheduled: DateTime<Utc>,
    interval: Duration,
    jitter_percent: f64,
) -> DateTime<Utc> {
    let percent = if jitter_percent <= 0.0 { 10.0 } else { jitter_percent };

    let mut max_jitter = interval.mul_f64(percent / 100.0);
    if max_jitter > Duration::from_secs(30) {
        max_jitter = Duration::from_secs(30);
    }
    if max_jitter < Duration::from_millis(100) {
        return scheduled;
    }

    let max_ms = max_jitter.as_millis() as i64;
    let offset_ms = rand::thread_rng().gen_range(0..max_ms) - max_ms / 2;
    scheduled + ChronoDuration::milliseconds(offset_ms)
}

/// Effective scheduling interval for jitter calculation: the declared
/// interval, else the gap between two consecutive cron fires, else 5m.
pub fn compute_interval(agent: &Agent, now: DateTime<Utc>) -> Duration {
    let spec = &agent.spec.schedule;
    if !spec.interval.is_empty() {
        if let Ok(d) = parse_duration(&spec.interval) {
            return d;
        }
    }
    if !spec.cron.is_empty() {
        if let Ok(tz) = load_timezone(&spec.timezone) {
            if let Ok(first) = next_cron_after(&spec.cron, tz, now) {
                if let Ok(second) = next_cron_after(&spec.cron, tz, first) {
                    if let Ok(gap) = (second - first).to_std() {
                        return gap;
                    }
                }
            }
        }
    }
    Duration::from_secs(300)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use legator_types::agent::{AgentSpec, AgentStatus, ScheduleSpec, TriggerSpec, TriggerType};
    use legator_types::meta::ObjectMeta;

    fn make_agent(schedule: ScheduleSpec) -> Agent {
        Agent {
            meta: ObjectMeta::new("default", "agent"),
            spec: AgentSpec {
                description: "test".into(),
                emoji: String::new(),
                schedule,
                model: Default::default(),
                skills: vec![],
                capabilities: None,
                guardrails: Default::default(),
                reporting: None,
                environment_ref: "env".into(),
                paused: false,
            },
            status: AgentStatus::default(),
        }
    }

    fn cron_agent(expr: &str, tz: &str) -> Agent {
        make_agent(ScheduleSpec {
            cron: expr.into(),
            timezone: tz.into(),
            ..Default::default()
        })
    }

    // -- cron ---------------------------------------------------------------

    #[test]
    fn cron_every_five_minutes() {
        // at 10:02, "*/5" fires next at 10:05
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 2, 0).unwrap();
        let next = next_run(&cron_agent("*/5 * * * *", "UTC"), now)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap());
    }

    #[test]
    fn cron_on_the_boundary_advances() {
        // exactly at 10:05:00, the next fire is 10:10
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap();
        let next = next_run(&cron_agent("*/5 * * * *", "UTC"), now)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 19, 10, 10, 0).unwrap());
    }

    #[test]
    fn cron_daily() {
        // daily at 5am, checked at 6am → tomorrow 5am
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 6, 0, 0).unwrap();
        let next = next_run(&cron_agent("0 5 * * *", "UTC"), now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 20, 5, 0, 0).unwrap());
    }

    #[test]
    fn cron_in_new_york() {
        // 2026-02-19 10:00:01 UTC is just past 05:00 EST; the next 5am
        // Eastern fire is 2026-02-20 05:00 EST = 10:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 0, 1).unwrap();
        let next = next_run(&cron_agent("0 5 * * *", "America/New_York"), now)
            .unwrap()
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 20, 10, 0, 0).unwrap());
    }

    #[test]
    fn invalid_cron_is_an_error() {
        assert!(next_run(&cron_agent("not-a-cron", "UTC"), Utc::now()).is_err());
    }

    #[test]
    fn invalid_timezone_is_an_error() {
        assert!(next_run(&cron_agent("*/5 * * * *", "Not/A/Timezone"), Utc::now()).is_err());
    }

    // -- interval -----------------------------------------------------------

    #[test]
    fn interval_is_anchored_on_last_run() {
        let last = Utc.with_ymd_and_hms(2026, 2, 19, 10, 0, 0).unwrap();
        let mut agent = make_agent(ScheduleSpec {
            interval: "5m".into(),
            ..Default::default()
        });
        agent.status.last_run_time = Some(last);

        // next-run = lastRun + 5m regardless of now
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 3, 0).unwrap();
        let next = next_run(&agent, now).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap());
    }

    #[test]
    fn interval_never_run_is_due_now() {
        let agent = make_agent(ScheduleSpec {
            interval: "5m".into(),
            ..Default::default()
        });
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 0, 0).unwrap();
        assert_eq!(next_run(&agent, now).unwrap().unwrap(), now);
    }

    #[test]
    fn invalid_interval_is_an_error() {
        let agent = make_agent(ScheduleSpec {
            interval: "not-a-duration".into(),
            ..Default::default()
        });
        assert!(next_run(&agent, Utc::now()).is_err());
    }

    // -- sentinels ----------------------------------------------------------

    #[test]
    fn paused_agent_has_no_next_run() {
        let mut agent = cron_agent("*/5 * * * *", "UTC");
        agent.spec.paused = true;
        assert!(next_run(&agent, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn trigger_only_agent_has_no_next_run() {
        let agent = make_agent(ScheduleSpec {
            triggers: vec![TriggerSpec {
                trigger_type: TriggerType::Webhook,
                source: "alertmanager".into(),
            }],
            ..Default::default()
        });
        assert!(next_run(&agent, Utc::now()).unwrap().is_none());
    }

    // -- is_due -------------------------------------------------------------

    #[test]
    fn never_run_is_due() {
        assert!(is_due(&cron_agent("*/5 * * * *", "UTC"), Utc::now()).unwrap());
    }

    #[test]
    fn recent_run_is_not_due() {
        let mut agent = cron_agent("*/5 * * * *", "UTC");
        agent.status.last_run_time = Some(Utc.with_ymd_and_hms(2026, 2, 19, 10, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 3, 0).unwrap();
        assert!(!is_due(&agent, now).unwrap());
    }

    #[test]
    fn past_tick_is_due() {
        let mut agent = cron_agent("*/5 * * * *", "UTC");
        agent.status.last_run_time = Some(Utc.with_ymd_and_hms(2026, 2, 19, 10, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 2, 19, 10, 6, 0).unwrap();
        assert!(is_due(&agent, now).unwrap());
    }

    #[test]
    fn paused_agent_is_never_due() {
        let mut agent = cron_agent("*/5 * * * *", "UTC");
        agent.spec.paused = true;
        assert!(!is_due(&agent, Utc::now()).unwrap());
    }

    #[test]
    fn trigger_only_agent_is_never_due() {
        let agent = make_agent(ScheduleSpec {
            triggers: vec![TriggerSpec {
                trigger_type: TriggerType::Webhook,
                source: "alertmanager".into(),
            }],
            ..Default::default()
        });
        assert!(!is_due(&agent, Utc::now()).unwrap());
    }

    // -- jitter -------------------------------------------------------------

    #[test]
    fn jitter_is_bounded() {
        let base = Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap();
        for _ in 0..100 {
            // 10% of 5m = 30s total span → offset within ±15s
            let jittered = apply_jitter(base, Duration::from_secs(300), 10.0);
            let diff = (jittered - base).num_milliseconds().abs();
            assert!(diff <= 15_000, "offset {diff}ms exceeds ±15s");
        }
    }

    #[test]
    fn zero_percent_uses_default() {
        let base = Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap();
        for _ in 0..50 {
            let jittered = apply_jitter(base, Duration::from_secs(300), 0.0);
            let diff = (jittered - base).num_milliseconds().abs();
            assert!(diff <= 15_000);
        }
    }

    #[test]
    fn tiny_interval_gets_no_jitter() {
        let base = Utc.with_ymd_and_hms(2026, 2, 19, 10, 5, 0).unwrap();
        let jittered = apply_jitter(base, Duration::from_millis(500), 10.0);
        assert_eq!(jittered, base);
    }

    // -- compute_interval ---------------------------------------------------

    #[test]
    fn interval_from_spec() {
        let agent = make_agent(ScheduleSpec {
            interval: "5m".into(),
            ..Default::default()
        });
        assert_eq!(compute_interval(&agent, Utc::now()), Duration::from_secs(300));
    }

    #[test]
    fn interval_estimated_from_cron() {
        let agent = cron_agent("*/5 * * * *", "UTC");
        assert_eq!(compute_interval(&agent, Utc::now()), Duration::from_secs(300));
    }

    #[test]
    fn interval_default_without_schedule() {
        let agent = make_agent(ScheduleSpec::default());
        assert_eq!(compute_interval(&agent, Utc::now()), Duration::from_secs(300));
    }
}
