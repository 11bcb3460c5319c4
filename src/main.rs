use clap::{Parser, Subcommand};
use japa_counter::{handlers, ApiClient, ClientConfig, ClientError};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::BufReader;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// Japa mala bead counter client.
#[derive(Parser, Debug)]
#[command(name = "japa", version)]
struct Cli {
    /// Backend base URL without the /api prefix [env: JAPA_API_URL]
    #[arg(long = "api-url")]
    api_url: Option<String>,

    /// Where the login session is kept [env: JAPA_SESSION_PATH]
    #[arg(long = "session")]
    session: Option<PathBuf>,

    /// Quiet time after the last click before beads are sent [env: JAPA_DEBOUNCE_MS]
    #[arg(long = "debounce-ms")]
    debounce_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and remember the session
    Login {
        username: String,
        #[arg(long, env = "JAPA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Register {
        username: String,
        email: String,
        #[arg(long, env = "JAPA_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long = "confirm-password")]
        confirm_password: String,
    },
    /// Forget the stored session
    Logout,
    /// Today's and lifetime progress
    Dashboard,
    /// Count beads interactively (+, -, f, q)
    Counter,
    /// Show the logged-in user
    Profile,
    /// Daily records, last 7 days by default
    History {
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Reset today's count
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config.base_url = url;
    }
    if let Some(path) = cli.session {
        config.session_path = path;
    }
    if let Some(ms) = cli.debounce_ms {
        config.counter.debounce = Duration::from_millis(ms);
    }

    let api = Arc::new(ApiClient::open(&config).await?);

    let result = match cli.command {
        Command::Login { username, password } => handlers::login(&api, &username, &password).await,
        Command::Register {
            username,
            email,
            password,
            confirm_password,
        } => handlers::register(&api, &username, &email, &password, &confirm_password).await,
        Command::Logout => handlers::logout(&api).await,
        Command::Dashboard => handlers::dashboard(&api).await,
        Command::Profile => handlers::profile(&api).await,
        Command::History { start, end } => handlers::history(&api, start, end).await,
        Command::Reset => handlers::reset(&api).await,
        Command::Counter => {
            let mut stdout = tokio::io::stdout();
            let unload = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for ctrl-c: {err}");
                    std::future::pending::<()>().await;
                }
            };
            handlers::counter(
                Arc::clone(&api),
                config.counter,
                BufReader::new(tokio::io::stdin()),
                &mut stdout,
                unload,
            )
            .await
            .map(|_| String::new())
        }
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
            Ok(())
        }
        Err(ClientError::NotLoggedIn | ClientError::Unauthorized) => {
            eprintln!("Please log in first: japa login <username> --password <password>");
            std::process::exit(2);
        }
        Err(err) => {
            error!("{err}");
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
