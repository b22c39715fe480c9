//! Command implementations on top of `stockroom-core`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use stockroom_core::idle::{Activity, IdleMonitor, IdleSettings, IdleState};
use stockroom_core::routes::{self, Navigator, RouteDecision};
use stockroom_core::storage::{FileStorage, Storage};
use stockroom_core::{ApiClient, Config, CredentialStore, Credentials, SessionStore};

use crate::cli::{Cli, Command, IdleAction};

/// How often `watch` looks for changes written by other processes
const STORAGE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Environment variable holding the password for non-interactive login
const PASSWORD_ENV: &str = "STOCKROOM_PASSWORD";

/// Shared handles for one invocation.
struct Context {
    config: Config,
    api: Arc<ApiClient>,
    storage: Arc<FileStorage>,
}

impl Context {
    fn new(api_url: Option<String>) -> Result<Self> {
        let mut config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        if let Some(url) = api_url {
            config.api_base_url = url;
        }
        debug!(api = %config.api_base_url, "Config loaded");

        let api = ApiClient::new(&config.api_base_url, config.request_timeout())
            .context("Failed to build HTTP client")?
            .with_keychain(CredentialStore::default())
            .with_cookie_file(config.cookie_path()?);

        let storage_path = config.storage_path()?;
        let storage = FileStorage::open(storage_path.clone())
            .with_context(|| format!("Failed to open storage at {}", storage_path.display()))?;
        debug!(storage = %storage.path().display(), "Storage opened");

        Ok(Self {
            config,
            api: Arc::new(api),
            storage: Arc::new(storage),
        })
    }

    fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    /// Session as persisted, without asking the backend.
    fn restore_store(&self) -> SessionStore {
        SessionStore::restore(self.api.clone(), self.storage())
    }

    /// Session reconciled with the backend.
    async fn open_store(&self) -> SessionStore {
        SessionStore::open(self.api.clone(), self.storage()).await
    }
}

/// Prints redirects instead of switching screens.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn navigate(&self, path: &str) {
        println!("Redirecting to {}", path);
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut ctx = Context::new(cli.api_url)?;
    match cli.command {
        Command::Login { name, remember_me } => login(&mut ctx, name, remember_me).await,
        Command::Logout => {
            ctx.restore_store().logout();
            println!("Logged out");
            Ok(())
        }
        Command::Whoami => whoami(&ctx).await,
        Command::Menu => menu(&ctx).await,
        Command::Open { path } => open(&ctx, &path).await,
        Command::Idle { action } => idle(&ctx, action),
        Command::Watch => watch(&ctx).await,
    }
}

fn prompt_username() -> Result<String> {
    print!("Name: ");
    std::io::Write::flush(&mut std::io::stdout())?;
    let mut name = String::new();
    std::io::stdin().read_line(&mut name)?;
    Ok(name.trim().to_string())
}

async fn login(ctx: &mut Context, name: Option<String>, remember_me: bool) -> Result<()> {
    let name = match name.or_else(|| ctx.config.last_username.clone()) {
        Some(name) => name,
        None => prompt_username()?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", name))?,
    };

    if name.is_empty() || password.is_empty() {
        anyhow::bail!("Username and password required");
    }

    let mut credentials = Credentials::new(name.clone(), password);
    if remember_me {
        credentials = credentials.remember_me(true);
    }

    let store = ctx.restore_store();
    let user = store
        .login(&credentials)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    ctx.config.last_username = Some(name);
    if let Err(e) = ctx.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {} ({})", user.name, user.id);
    Ok(())
}

async fn whoami(ctx: &Context) -> Result<()> {
    let store = ctx.open_store().await;
    let Some(user) = store.user() else {
        println!("Not logged in");
        return Ok(());
    };

    println!("{} ({})", user.name, user.id);
    if let Some(ref email) = user.email {
        println!("  email:       {}", email);
    }
    if let Some(ref role) = user.role {
        println!("  role:        {}", role);
    }
    let permissions: Vec<&str> = user.permissions.iter().map(|p| p.as_str()).collect();
    println!("  permissions: {}", permissions.join(", "));
    if let Some(at) = store.last_validated() {
        println!("  validated:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

async fn menu(ctx: &Context) -> Result<()> {
    let store = ctx.open_store().await;
    let entries = routes::navigation(&store.session());
    if entries.is_empty() {
        println!("Not logged in");
        return Ok(());
    }
    for route in entries {
        println!("{:<14} {}", route.path, route.title);
    }
    Ok(())
}

async fn open(ctx: &Context, path: &str) -> Result<()> {
    let store = ctx.open_store().await;
    match routes::protect(&store.session(), path) {
        RouteDecision::Render(route) => println!("{}", route.title),
        RouteDecision::Redirect(target) => TerminalNavigator.navigate(target),
        RouteDecision::NotFound => anyhow::bail!("No screen at {}", path),
    }
    Ok(())
}

fn idle(ctx: &Context, action: IdleAction) -> Result<()> {
    let settings = IdleSettings::new(ctx.storage());
    match action {
        IdleAction::On => settings.set_enabled(true)?,
        IdleAction::Off => settings.set_enabled(false)?,
        IdleAction::Status => {}
    }
    let state = if settings.is_enabled() { "on" } else { "off" };
    println!(
        "Idle logout is {} (after {} minutes)",
        state, ctx.config.idle_timeout_minutes
    );
    Ok(())
}

async fn watch(ctx: &Context) -> Result<()> {
    let store = ctx.open_store().await;
    if !store.is_authenticated() {
        println!("Not logged in. Run `stockroom login` first.");
        return Ok(());
    }

    let follower = store.follow_external_changes();
    let monitor = IdleMonitor::spawn(
        store.clone(),
        ctx.storage(),
        Arc::new(TerminalNavigator),
        ctx.config.idle_timeout(),
    );
    match monitor.state() {
        IdleState::Armed => println!(
            "Watching. Idle logout after {} minutes; press Enter to stay active.",
            ctx.config.idle_timeout_minutes
        ),
        IdleState::Disarmed => println!("Watching. Idle logout is off."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session = store.subscribe();
    let mut poll = tokio::time::interval(STORAGE_POLL_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(_) => monitor.record(Activity::KeyPress),
                    None => break,
                }
            }
            changed = session.changed() => {
                if changed.is_err() || !session.borrow_and_update().is_authenticated() {
                    println!("Session ended");
                    break;
                }
            }
            _ = poll.tick() => {
                if let Err(e) = ctx.storage.sync() {
                    warn!(error = %e, "Failed to check storage for changes");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    monitor.shutdown();
    follower.abort();
    Ok(())
}
