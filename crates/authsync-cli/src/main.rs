//! authsync - sign in and inspect the locally persisted session.
//!
//! Usage:
//!   authsync [--headless] <command>
//!
//! Commands:
//!   login [identifier]   Sign in (password is prompted)
//!   status               Show the current session
//!   logout               Sign out and clear the stored session
//!   refresh              Exchange the refresh token for a new session
//!   watch                Print every session change until Ctrl+C

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authsync_core::auth::remote::AUTO_REFRESH_TICK;
use authsync_core::{
    Config, IdentityConfig, Platform, RemoteIdentityClient, SessionContext, SessionScope,
    SessionStoreState, StorageAdapter, StoreOptions, Subscription,
};

/// Log file written by `watch` inside the data directory
const LOG_FILE_PREFIX: &str = "authsync.log";

/// How long `login` waits for the sign-in to reach the store
const SIGN_IN_WAIT: Duration = Duration::from_secs(2);

/// Environment variable supplying the login identifier
const IDENTIFIER_ENV: &str = "AUTHSYNC_IDENTIFIER";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login(Option<String>),
    Status,
    Logout,
    Refresh,
    Watch,
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    headless: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut headless = false;
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--headless" => headless = true,
            flag if flag.starts_with("--") => bail!("unknown flag '{}'", flag),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("login") => Command::Login(positional.next()),
        Some("status") | None => Command::Status,
        Some("logout") => Command::Logout,
        Some("refresh") => Command::Refresh,
        Some("watch") => Command::Watch,
        Some(other) => bail!("unknown command '{}'", other),
    };
    if let Some(extra) = positional.next() {
        bail!("unexpected argument '{}'", extra);
    }
    Ok(Args { headless, command })
}

/// Build the log subscriber: stderr always, plus a daily log file when `log_dir` is given.
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
fn build_subscriber(log_dir: Option<&Path>) -> (impl Subscriber + Send + Sync, Option<WorkerGuard>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file);
    (subscriber, guard)
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (subscriber, guard) = build_subscriber(log_dir);
    subscriber.init();
    guard
}

/// Everything a command needs, wired from configuration
struct Runtime {
    config: Config,
    platform: Platform,
    medium: &'static str,
    client: Arc<RemoteIdentityClient>,
    scope: SessionScope,
}

impl Runtime {
    fn connect(config: Config, headless: bool) -> Result<Self> {
        let identity = IdentityConfig::from_env();
        let platform = if headless {
            Platform::Web { windowed: false }
        } else {
            config.platform()
        };

        let options = config
            .storage_options(&identity)
            .context("Failed to locate storage directory")?;
        let storage = StorageAdapter::for_platform(platform, &options)
            .context("Failed to open session storage")?;
        let medium = storage.medium();

        let client = Arc::new(
            RemoteIdentityClient::new(identity, Arc::new(storage))
                .context("Failed to create identity client")?,
        );
        let scope = SessionScope::start(
            client.clone(),
            StoreOptions {
                login_confirmation: config.login_confirmation(),
            },
        );
        info!(%platform, medium, "Session store started");

        Ok(Self {
            config,
            platform,
            medium,
            client,
            scope,
        })
    }

    fn context(&self) -> SessionContext {
        self.scope.context()
    }
}

fn describe(state: &SessionStoreState) -> String {
    if state.is_loading {
        return "loading".to_string();
    }
    match &state.session {
        Some(session) => format!(
            "signed in as {} (user {}), expires {} ({} min left)",
            session.user.email.as_deref().unwrap_or("<no email>"),
            session.user_id(),
            session.expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            session.minutes_until_expiry()
        ),
        None => "signed out".to_string(),
    }
}

fn prompt_identifier(config: &Config) -> Result<String> {
    if let Ok(identifier) = std::env::var(IDENTIFIER_ENV) {
        if !identifier.trim().is_empty() {
            return Ok(identifier.trim().to_string());
        }
    }

    let default = config.last_identifier.clone().unwrap_or_default();
    if default.is_empty() {
        eprint!("Email: ");
    } else {
        eprint!("Email [{}]: ", default);
    }
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let entered = line.trim();
    let identifier = if entered.is_empty() { default } else { entered.to_string() };
    if identifier.is_empty() {
        bail!("An email address is required");
    }
    Ok(identifier)
}

/// Wait until an observed state carries a session. False when `wait` runs out first.
async fn wait_for_session(observer: &mut Subscription<SessionStoreState>, wait: Duration) -> bool {
    let arrived = tokio::time::timeout(wait, async {
        while let Some(state) = observer.recv().await {
            if state.session.is_some() {
                return true;
            }
        }
        false
    })
    .await;
    matches!(arrived, Ok(true))
}

async fn login(runtime: &mut Runtime, identifier: Option<String>) -> Result<()> {
    let ctx = runtime.context();
    ctx.wait_until_resolved().await;

    let identifier = match identifier {
        Some(identifier) => identifier,
        None => prompt_identifier(&runtime.config)?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if password.is_empty() {
        bail!("A password is required");
    }

    // Subscribed first so a change applied while `login` returns is not missed
    let mut observer = ctx.observe();
    ctx.login(&identifier, &password)
        .await
        .context("Login failed")?;

    runtime.config.last_identifier = Some(identifier);
    if let Err(e) = runtime.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    // Detached logins return before the change lands; wait for it briefly
    if ctx.session().is_none() && !wait_for_session(&mut observer, SIGN_IN_WAIT).await {
        warn!(wait = ?SIGN_IN_WAIT, "Signed in, but no session change arrived yet");
    }
    println!("{}", describe(&ctx.state()));
    Ok(())
}

async fn status(runtime: &Runtime) -> Result<()> {
    let state = runtime.context().wait_until_resolved().await;
    println!("platform: {} (storage: {})", runtime.platform, runtime.medium);
    println!("{}", describe(&state));
    Ok(())
}

async fn logout(runtime: &Runtime) -> Result<()> {
    let ctx = runtime.context();
    ctx.wait_until_resolved().await;
    ctx.logout().await.context("Logout failed")?;
    println!("signed out");
    Ok(())
}

async fn refresh(runtime: &Runtime) -> Result<()> {
    let ctx = runtime.context();
    ctx.wait_until_resolved().await;
    let session = ctx.refresh().await.context("Refresh failed")?;
    println!(
        "refreshed, expires {} ({} min left)",
        session.expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        session.minutes_until_expiry()
    );
    Ok(())
}

async fn watch(runtime: &Runtime) -> Result<()> {
    let ctx = runtime.context();
    let mut observer = ctx.observe();
    let _auto_refresh = runtime
        .config
        .auto_refresh
        .then(|| runtime.client.start_auto_refresh(AUTO_REFRESH_TICK));

    println!("{}", describe(&ctx.state()));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            state = observer.recv() => match state {
                Some(state) => println!(
                    "[{}] {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    describe(&state)
                ),
                None => break,
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&raw)?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config, using defaults: {}", e);
            Config::default()
        }
    };

    let log_dir = match args.command {
        Command::Watch => config.data_dir().ok(),
        _ => None,
    };
    let _log_guard = init_tracing(log_dir.as_deref());
    info!("authsync starting");

    let mut runtime = Runtime::connect(config, args.headless)?;
    let result = match args.command {
        Command::Login(identifier) => login(&mut runtime, identifier).await,
        Command::Status => status(&runtime).await,
        Command::Logout => logout(&runtime).await,
        Command::Refresh => refresh(&runtime).await,
        Command::Watch => watch(&runtime).await,
    };

    runtime.scope.close().await;
    info!("authsync shutting down");
    result
}
