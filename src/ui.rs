use crate::counter::CounterSnapshot;
use crate::models::{HistoryRecord, UserProfile};
use crate::progress::{beads_into_round, rounds, today_percent, DashboardSummary, BEADS_PER_ROUND};

const BAR_WIDTH: usize = 20;

pub fn render_counter(snapshot: &CounterSnapshot) -> String {
    let beads = snapshot.display;
    let mut line = format!(
        "{beads} beads | round {} + {}/{BEADS_PER_ROUND} {}",
        rounds(beads),
        beads_into_round(beads),
        progress_bar(today_percent(beads)),
    );
    if snapshot.syncing || snapshot.pending != 0 {
        line.push_str(" (saving...)");
    }
    if snapshot.auth_required {
        line.push_str(" [login required]");
    } else if let Some(err) = &snapshot.last_error {
        line.push_str(&format!(" [{err}]"));
    }
    line
}

pub fn render_round_completed() -> String {
    format!("Congratulations! You completed a round ({BEADS_PER_ROUND} beads)!")
}

pub fn render_dashboard(username: &str, summary: &DashboardSummary) -> String {
    DASHBOARD_TEMPLATE
        .replace("{{USER}}", username)
        .replace("{{TODAY_BEADS}}", &summary.today_beads.to_string())
        .replace("{{TODAY_ROUNDS}}", &summary.today_rounds.to_string())
        .replace("{{TOTAL_BEADS}}", &summary.total_beads.to_string())
        .replace("{{TOTAL_ROUNDS}}", &summary.total_rounds.to_string())
        .replace("{{TODAY_BAR}}", &progress_bar(summary.today_percent))
        .replace("{{LIFETIME_BAR}}", &progress_bar(summary.lifetime_percent))
}

const DASHBOARD_TEMPLATE: &str = "\
Hare Krishna, {{USER}}

Today     {{TODAY_BEADS}} beads, {{TODAY_ROUNDS}} rounds
          {{TODAY_BAR}}
Lifetime  {{TOTAL_BEADS}} beads, {{TOTAL_ROUNDS}} rounds
          {{LIFETIME_BAR}}";

pub fn render_history(records: &[HistoryRecord]) -> String {
    if records.is_empty() {
        return "No data found for the selected date range".to_string();
    }

    let mut out = format!(
        "{:<12} {:>8} {:>8} {:>10}  {}",
        "Date", "Beads", "Rounds", "Total", "Created"
    );
    for record in records {
        out.push('\n');
        out.push_str(&format!(
            "{:<12} {:>8} {:>8} {:>10}  {}",
            record.japa_date,
            record.current_beads,
            record.current_rounds,
            record.total_bead_counts,
            record.created_at.as_deref().unwrap_or("-"),
        ));
    }
    out
}

pub fn render_profile(profile: &UserProfile) -> String {
    format!("Username: {}\nEmail:    {}", profile.username, profile.email)
}

fn progress_bar(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!(
        "[{}{}] {}%",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        percent.floor() as u64
    )
}
