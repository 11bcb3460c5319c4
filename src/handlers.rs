use crate::api::ApiClient;
use crate::app::{guard, Page};
use crate::config::CounterSettings;
use crate::counter::{CounterSnapshot, CounterSync, UserCounter};
use crate::errors::ClientError;
use crate::progress::{build_summary, default_history_range};
use crate::ui::{render_counter, render_dashboard, render_history, render_profile, render_round_completed};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info};

/// Resolves the stored user for a protected page.
async fn require_user(api: &ApiClient, page: Page) -> Result<(String, String), ClientError> {
    if guard(page, api.is_authenticated().await).is_some() {
        return Err(ClientError::NotLoggedIn);
    }
    let session = api.session().await;
    match session.user_id {
        Some(user_id) => Ok((user_id, session.username.unwrap_or_default())),
        None => Err(ClientError::NotLoggedIn),
    }
}

pub async fn login(api: &ApiClient, username: &str, password: &str) -> Result<String, ClientError> {
    if guard(Page::Login, api.is_authenticated().await) == Some(Page::Dashboard) {
        let username = api.session().await.username.unwrap_or_default();
        return Ok(format!("Already logged in as {username}"));
    }
    let login = api.login(username, password).await?;
    Ok(format!("Logged in as {}", login.username))
}

pub async fn register(
    api: &ApiClient,
    username: &str,
    email: &str,
    password: &str,
    confirm_password: &str,
) -> Result<String, ClientError> {
    if password != confirm_password {
        return Err(ClientError::Validation("Passwords do not match".into()));
    }
    api.register(username, email, password).await?;
    Ok("Registration successful! You can now log in.".to_string())
}

pub async fn logout(api: &ApiClient) -> Result<String, ClientError> {
    api.clear_tokens().await?;
    Ok("Logged out".to_string())
}

pub async fn dashboard(api: &ApiClient) -> Result<String, ClientError> {
    let (user_id, username) = require_user(api, Page::Dashboard).await?;
    let today = api.today_progress(&user_id).await?;
    let lifetime = api.lifetime_progress(&user_id).await?;
    Ok(render_dashboard(&username, &build_summary(&today, &lifetime)))
}

pub async fn profile(api: &ApiClient) -> Result<String, ClientError> {
    let (user_id, _) = require_user(api, Page::Profile).await?;
    let user = api.user_by_id(&user_id).await?;
    Ok(render_profile(&user))
}

pub async fn history(
    api: &ApiClient,
    start: Option<String>,
    end: Option<String>,
) -> Result<String, ClientError> {
    let (user_id, _) = require_user(api, Page::History).await?;
    let (default_start, default_end) = default_history_range();
    let start = start.unwrap_or(default_start);
    let end = end.unwrap_or(default_end);
    let records = api.history(&user_id, &start, &end).await?;
    Ok(render_history(&records))
}

pub async fn reset(api: &ApiClient) -> Result<String, ClientError> {
    let (user_id, _) = require_user(api, Page::Counter).await?;
    let totals = api.reset_beads(&user_id).await?;
    info!(user_id = %user_id, "today's beads reset");
    Ok(format!("Today's count reset to {}", totals.today_beads))
}

/// Interactive counter page. Reads one command per line: `+` counts a bead,
/// `-` takes one back, `f` syncs now and `q` leaves. Leaving, end of input,
/// or `unload` completing all flush pending beads first.
pub async fn counter<R, W, U>(
    api: Arc<ApiClient>,
    settings: CounterSettings,
    input: R,
    out: &mut W,
    unload: U,
) -> Result<CounterSnapshot, ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    U: Future<Output = ()>,
{
    let (user_id, _) = require_user(&api, Page::Counter).await?;
    let sync = CounterSync::start(UserCounter::new(Arc::clone(&api), user_id), settings);

    let mut lines = input.lines();
    tokio::pin!(unload);

    // Terminal failures end the page like `q` does; the beads still go out.
    let io_result = loop {
        let line = tokio::select! {
            _ = &mut unload => break Ok(()),
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(ClientError::from(err)),
        };
        let command = line.trim();
        if command == "q" {
            break Ok(());
        }
        if let Err(err) = counter_command(&sync, command, out).await {
            break Err(err);
        }
    };

    let flushed = sync.shutdown().await;
    if let Err(err) = &io_result {
        error!("counter page terminal failed: {err}");
    }
    match flushed {
        Ok(snapshot) => {
            io_result?;
            write_line(out, &render_counter(&snapshot)).await?;
            Ok(snapshot)
        }
        Err(err) => {
            error!("failed to save beads before leaving: {err}");
            Err(err)
        }
    }
}

async fn counter_command<W: AsyncWrite + Unpin>(
    sync: &CounterSync,
    command: &str,
    out: &mut W,
) -> Result<(), ClientError> {
    match command {
        "+" | "" => {
            let outcome = sync.increment().await;
            if outcome.round_completed {
                write_line(out, &render_round_completed()).await?;
            }
        }
        "-" => {
            if !sync.decrement().await.accepted {
                write_line(out, "Count is already zero").await?;
            }
        }
        "f" => sync.flush_now(),
        other => {
            return write_line(out, &format!("Unknown command {other:?} (use +, -, f, q)")).await;
        }
    }
    write_line(out, &render_counter(&sync.snapshot())).await
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<(), ClientError> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}
