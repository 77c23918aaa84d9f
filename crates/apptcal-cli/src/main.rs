//! apptcal - command-line client for the appointment calendar.
//!
//! Signs in against the configured auth backend, keeps the session in the
//! configured credential storage, and reports whether a stored session is
//! still valid.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use apptcal_core::auth::{open_store, AuthPhase, RestoreOutcome};
use apptcal_core::{
    Backend, Config, CredentialStore, SessionManager, SessionOptions, User, VerificationOutcome,
};

/// Environment variable that supplies the password non-interactively
const ENV_PASSWORD: &str = "APPTCAL_PASSWORD";

const USAGE: &str = "\
Usage: apptcal <command>

Commands:
  login [email]   Sign in and store the session
  logout          Clear the stored session
  status          Restore the stored session and verify it with the backend
  whoami          Show the stored user without contacting the backend
";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();

    guard
}

struct Cli {
    config: Config,
    store: CredentialStore,
    session: SessionManager<Backend>,
}

fn build() -> Result<Cli> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let cache_dir = config
        .cache_dir()
        .unwrap_or_else(|_| PathBuf::from("./cache"));
    let store = CredentialStore::new(open_store(config.storage, &cache_dir));
    let backend = Backend::from_config(&config).context("Failed to create auth backend")?;
    info!(api = ?backend.kind(), storage = ?config.storage, "Backend configured");

    let session =
        SessionManager::with_options(backend, store.clone(), SessionOptions::from_config(&config));

    Ok(Cli {
        config,
        store,
        session,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let mut ctx = build()?;
    match command.as_str() {
        "login" => login(&mut ctx, args.get(2).cloned()).await,
        "logout" => logout(&ctx).await,
        "status" => status(&ctx).await,
        "whoami" => whoami(&ctx),
        "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("{}", USAGE);
            anyhow::bail!("Unknown command: {}", other)
        }
    }
}

async fn login(ctx: &mut Cli, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    let result = ctx.session.login(&email, &password).await;
    if !result.success {
        anyhow::bail!("Login failed: {}", result.message);
    }

    ctx.config.last_email = Some(email);
    if let Err(e) = ctx.config.save() {
        warn!(error = %e, "Failed to save config");
    }

    if let Some(user) = ctx.session.user() {
        println!("Logged in as {}", describe(&user));
    }
    Ok(())
}

async fn logout(ctx: &Cli) -> Result<()> {
    ctx.session.logout().await;
    println!("Logged out");
    Ok(())
}

async fn status(ctx: &Cli) -> Result<()> {
    let handle = match ctx.session.load_stored_auth() {
        RestoreOutcome::NoCredentials => {
            println!("Not logged in");
            return Ok(());
        }
        RestoreOutcome::Rejected => {
            println!("Stored session was invalid and has been cleared");
            return Ok(());
        }
        RestoreOutcome::AlreadyActive => {
            println!("Session already active");
            return Ok(());
        }
        RestoreOutcome::Restored(handle) => handle,
    };

    if let Some(user) = ctx.session.user() {
        println!("Restored session for {} (verifying...)", describe(&user));
    }

    match handle.wait().await {
        VerificationOutcome::Verified => println!("Session verified"),
        VerificationOutcome::Unreachable(error) => {
            println!("Backend unreachable, keeping session: {}", error)
        }
        VerificationOutcome::Mismatch => {
            println!("Stored user does not match the backend, session cleared")
        }
        VerificationOutcome::Rejected(message) => {
            println!("Session rejected by backend: {}", message)
        }
        VerificationOutcome::Superseded => println!("Session changed during verification"),
    }

    let phase = ctx.session.phase();
    println!("State: {}", phase_label(phase));
    Ok(())
}

fn whoami(ctx: &Cli) -> Result<()> {
    let Some(stored) = ctx.store.load() else {
        println!("Not logged in");
        return Ok(());
    };
    let user = User::from_json(&stored.user_json).context("Stored user record is unreadable")?;
    println!("{}", describe(&user));
    Ok(())
}

fn describe(user: &User) -> String {
    let mut out = user.display_name().to_string();
    if let Some(ref email) = user.email {
        if email != user.display_name() {
            out.push_str(&format!(" <{}>", email));
        }
    }
    if let Some(role) = user.role {
        out.push_str(&format!(" [{}]", role));
    }
    out
}

fn phase_label(phase: AuthPhase) -> &'static str {
    match phase {
        AuthPhase::Anonymous => "logged out",
        AuthPhase::Authenticating => "logging in",
        AuthPhase::OptimisticallyAuthenticated => "logged in (unverified)",
        AuthPhase::Authenticated => "logged in",
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptcal_core::Role;

    #[test]
    fn test_describe_full_user() {
        let user = User::new("2", "admin_user")
            .with_email("admin@clinic.com")
            .with_role(Role::Admin);
        assert_eq!(describe(&user), "admin_user <admin@clinic.com> [admin]");
    }

    #[test]
    fn test_describe_email_only() {
        let user = User::new("3", "").with_email("x@y.com");
        assert_eq!(describe(&user), "x@y.com");
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(phase_label(AuthPhase::OptimisticallyAuthenticated), "logged in (unverified)");
        assert_eq!(phase_label(AuthPhase::Anonymous), "logged out");
    }
}
