use crate::models::{LifetimeProgress, TodayProgress};
use chrono::{Duration, Local, NaiveDate};

/// Beads on one mala.
pub const BEADS_PER_ROUND: u64 = 108;
/// Rounds that make the lifetime bar full.
pub const LIFETIME_GOAL_ROUNDS: u64 = 10;
pub const HISTORY_DEFAULT_DAYS: i64 = 7;

pub fn rounds(beads: u64) -> u64 {
    beads / BEADS_PER_ROUND
}

pub fn beads_into_round(beads: u64) -> u64 {
    beads % BEADS_PER_ROUND
}

pub fn today_percent(beads: u64) -> f64 {
    percent_of(beads, BEADS_PER_ROUND)
}

pub fn lifetime_percent(beads: u64) -> f64 {
    percent_of(beads, BEADS_PER_ROUND * LIFETIME_GOAL_ROUNDS)
}

fn percent_of(value: u64, goal: u64) -> f64 {
    (value as f64 / goal as f64 * 100.0).min(100.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSummary {
    pub today_beads: u64,
    pub today_rounds: u64,
    pub total_beads: u64,
    pub total_rounds: u64,
    pub today_percent: f64,
    pub lifetime_percent: f64,
}

pub fn build_summary(today: &TodayProgress, lifetime: &LifetimeProgress) -> DashboardSummary {
    DashboardSummary {
        today_beads: today.today_beads,
        today_rounds: today.today_rounds,
        total_beads: lifetime.total_beads,
        total_rounds: lifetime.total_rounds,
        today_percent: today_percent(today.today_beads),
        lifetime_percent: lifetime_percent(lifetime.total_beads),
    }
}

pub fn default_history_range() -> (String, String) {
    default_history_range_at(Local::now().date_naive())
}

pub fn default_history_range_at(today: NaiveDate) -> (String, String) {
    let start = today - Duration::days(HISTORY_DEFAULT_DAYS);
    (date_key(start), date_key(today))
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
