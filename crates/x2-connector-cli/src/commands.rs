//! Command line parsing and command handlers.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::info;
use x2_connector_core::{Clock, Event, EventKind, Method, Session, SessionState, SystemClock, X2Connector};

use crate::config::{CliConfig, EMAIL_ENV, PASSWORD_ENV};

pub const USAGE: &str = "\
Usage: x2 <command> [args]

Commands:
  login [email]                   Log in and store the session token
  logout                          Forget the stored session
  status                          Show environment and session state
  get <path>                      Authenticated GET, prints the response
  post <path> [json]              Authenticated POST with an optional JSON body
  put <path> [json]               Authenticated PUT with an optional JSON body
  delete <path>                   Authenticated DELETE
  reset-password-request <email>  Ask the backend to send a reset email
  reset-password <reset-token>    Set a new password with a reset token
  watch [--logout-on-expiry]      Keep the session alive; each stdin line counts as activity
  help                            Show this message

Environment:
  X2_BASE_URL, X2_CONFIG_PATH, X2_EMAIL, X2_PASSWORD, X2_LOG_DIR, RUST_LOG";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Login { email: Option<String> },
    Logout,
    Status,
    Request {
        method: Method,
        path: String,
        body: Option<Value>,
    },
    ResetPasswordRequest { email: String },
    ResetPassword { reset_token: String },
    Watch { logout_on_expiry: bool },
    Help,
}

impl Command {
    /// Parse the arguments following the program name.
    pub fn parse(args: &[String]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Ok(Command::Help);
        };
        let arg = |i: usize, what: &str| -> Result<String> {
            args.get(i)
                .cloned()
                .ok_or_else(|| anyhow!("`{}` needs {}\n\n{}", name, what, USAGE))
        };

        let command = match name.as_str() {
            "login" => Command::Login {
                email: args.get(1).cloned(),
            },
            "logout" => Command::Logout,
            "status" => Command::Status,
            "get" | "delete" => Command::Request {
                method: if name == "get" { Method::GET } else { Method::DELETE },
                path: arg(1, "a path")?,
                body: None,
            },
            "post" | "put" => {
                let body = match args.get(2) {
                    Some(raw) => Some(
                        serde_json::from_str(raw).with_context(|| format!("Request body is not JSON: {}", raw))?,
                    ),
                    None => None,
                };
                Command::Request {
                    method: if name == "post" { Method::POST } else { Method::PUT },
                    path: arg(1, "a path")?,
                    body,
                }
            }
            "reset-password-request" => Command::ResetPasswordRequest {
                email: arg(1, "an email")?,
            },
            "reset-password" => Command::ResetPassword {
                reset_token: arg(1, "a reset token")?,
            },
            "watch" => match args.get(1).map(String::as_str) {
                None => Command::Watch { logout_on_expiry: false },
                Some("--logout-on-expiry") => Command::Watch { logout_on_expiry: true },
                Some(other) => bail!("Unknown watch option `{}`\n\n{}", other, USAGE),
            },
            "help" | "-h" | "--help" => Command::Help,
            other => bail!("Unknown command `{}`\n\n{}", other, USAGE),
        };
        Ok(command)
    }
}

pub async fn run(command: Command, x2: &X2Connector, config: &CliConfig) -> Result<()> {
    match command {
        Command::Login { email } => login(x2, config, email).await,
        Command::Logout => {
            x2.logout()?;
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            status(x2);
            Ok(())
        }
        Command::Request { method, path, body } => {
            let response = x2.request(method, &path, body, true).await?;
            print_value(&response.data())
        }
        Command::ResetPasswordRequest { email } => {
            let result = x2.reset_password_request(&email).await?;
            print_value(&result)
        }
        Command::ResetPassword { reset_token } => {
            let password = rpassword::prompt_password("New password: ")?;
            let confirm = rpassword::prompt_password("Confirm new password: ")?;
            if password != confirm {
                bail!("Passwords do not match");
            }
            let result = x2.reset_password(&password, &reset_token).await?;
            print_value(&result)
        }
        Command::Watch { logout_on_expiry } => watch(x2, logout_on_expiry).await,
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

async fn login(x2: &X2Connector, config: &CliConfig, email: Option<String>) -> Result<()> {
    let email = match email
        .or_else(|| std::env::var(EMAIL_ENV).ok())
        .or_else(|| config.last_email.clone())
    {
        Some(email) => email,
        None => prompt_email()?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password(format!("Password for {}: ", email))?,
    };

    x2.login(&email, &password).await.context("Login failed")?;

    // Saved without this run's environment overrides.
    let mut saved = CliConfig::load()?;
    saved.last_email = Some(email);
    saved.save()?;

    println!("Login successful!");
    Ok(())
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();
    if email.is_empty() {
        bail!("Email required");
    }
    Ok(email)
}

fn status(x2: &X2Connector) {
    let session = x2.session();
    println!("Environment: {}", x2.get_environment());
    println!("Base URL:    {}", x2.base_url());
    let state = match x2.state() {
        SessionState::Anonymous => "logged out",
        SessionState::AuthenticatedIdle | SessionState::AuthenticatedWatching => "logged in",
    };
    println!("Session:     {}", state);
    if let Some(summary) = expiry_summary(&session, SystemClock.now()) {
        println!("Expires:     {}", summary);
    }
    if let Some(email) = session
        .profile
        .as_ref()
        .and_then(|p| p.get("email"))
        .and_then(Value::as_str)
    {
        println!("User:        {}", email);
    }
}

/// Token expiry with the time left in whole minutes.
fn expiry_summary(session: &Session, now: DateTime<Utc>) -> Option<String> {
    let expires_at = session.token_expires_at?;
    if session.is_expired(now) {
        return Some(format!("{} (expired)", expires_at.to_rfc3339()));
    }
    let minutes = session.time_until_expiry(now)?.num_minutes();
    Some(format!("{} (in {} min)", expires_at.to_rfc3339(), minutes))
}

fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::String(text) => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

/// Keep the session alive until it expires from inactivity or the user
/// interrupts. Every line read from stdin counts as activity.
///
/// With `logout_on_expiry` the stored token is dropped when that happens.
async fn watch(x2: &X2Connector, logout_on_expiry: bool) -> Result<()> {
    if !x2.is_authenticated() {
        bail!("Not logged in. Run `x2 login` first.");
    }
    x2.sessions().set_logout_on_expiry(logout_on_expiry);

    let expired = std::sync::Arc::new(Notify::new());
    let on_expiry = {
        let expired = std::sync::Arc::clone(&expired);
        x2.subscribe(EventKind::SessionExpired, move |_| expired.notify_one())
    };
    let on_error = x2.subscribe(EventKind::Error, |event| {
        if let Event::Error { message, .. } = event {
            eprintln!("warning: {}", message);
        }
    });

    let activity = x2.watch_for_inactivity();
    let timeout = x2.sessions().settings().token_duration;
    println!(
        "Watching session; it expires after {}s without input. Ctrl-C to stop.",
        timeout.as_secs()
    );
    info!("Watch mode started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let outcome: Result<()> = loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => activity.record_activity(),
                Ok(None) => stdin_open = false,
                Err(e) => break Err(e.into()),
            },
            _ = expired.notified() => {
                if logout_on_expiry {
                    println!("Session expired after inactivity; logged out.");
                } else {
                    println!("Session expired after inactivity.");
                }
                break Ok(());
            }
            result = tokio::signal::ctrl_c() => {
                break result.map_err(anyhow::Error::from);
            }
        }
    };

    on_expiry.unsubscribe();
    on_error.unsubscribe();
    info!("Watch mode stopped");
    outcome
}
