//! biolearn - command-line client for the biolearn e-learning backend.
//!
//! Signs in, keeps the persisted session fresh and answers whether a route
//! would be allowed for the current user.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use biolearn_core::auth::token::expiry_display;
use biolearn_core::auth::{check_route, GuardOutcome, TracingNavigator};
use biolearn_core::models::RegisterRequest;
use biolearn_core::{AuthService, Config};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: biolearn <command> [args]

Commands:
  login [email]                      Sign in (password from prompt or BIOLEARN_PASSWORD)
  logout                             Sign out and forget the stored session
  status                             Show the stored session
  refresh                            Renew the token now
  register <first> <last> <email>    Create an account
  forgot-password <email>            Request a password reset email
  verify-reset-token <token>         Check a password reset token
  reset-password <token>             Set a new password
  check-route <path>                 Evaluate route guards for the current session
  watch                              Keep the session refreshed until Ctrl-C";

/// Set `BIOLEARN_LOG_FILE=1` to also write logs to the data directory.
const ENV_LOG_FILE: &str = "BIOLEARN_LOG_FILE";
const ENV_EMAIL: &str = "BIOLEARN_EMAIL";
const ENV_PASSWORD: &str = "BIOLEARN_PASSWORD";

/// Initialize the tracing subscriber for logging
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_layer = std::env::var(ENV_LOG_FILE)
        .ok()
        .filter(|v| v == "1")
        .and_then(|_| config.data_dir().ok())
        .map(|dir| {
            let appender = tracing_appender::rolling::daily(dir, "biolearn.log");
            tracing_appender::non_blocking(appender)
        });

    let (file_writer, guard) = match file_layer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load_or_default();
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let service = AuthService::from_config(&config, Arc::new(TracingNavigator))?;
    info!(command = command.as_str(), "biolearn starting");

    let result = run(&service, &mut config, command, &args[1..]).await;
    service.shutdown();
    result
}

async fn run(service: &AuthService, config: &mut Config, command: &str, args: &[String]) -> Result<()> {
    match command {
        "login" => login(service, config, args.first().cloned()).await,
        "logout" => {
            service.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "status" => {
            print_status(service);
            Ok(())
        }
        "refresh" => {
            let user = service.refresh_now().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Token renewed for {}.", user.display_name());
            print_status(service);
            Ok(())
        }
        "register" => {
            let [first, last, email] = args else {
                bail!("usage: biolearn register <first> <last> <email>");
            };
            let password = prompt_password("Choose a password: ")?;
            let request = RegisterRequest {
                first_name: first.clone(),
                last_name: last.clone(),
                email: email.clone(),
                password,
            };
            let message = service.register(&request).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", message);
            Ok(())
        }
        "forgot-password" => {
            let email = required(args, "forgot-password <email>")?;
            let message = service.forgot_password(email).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", message);
            Ok(())
        }
        "verify-reset-token" => {
            let token = required(args, "verify-reset-token <token>")?;
            let valid = service.verify_reset_token(token).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", if valid { "Token is valid." } else { "Token is invalid or expired." });
            Ok(())
        }
        "reset-password" => {
            let token = required(args, "reset-password <token>")?;
            let password = prompt_password("New password: ")?;
            let message = service.reset_password(token, &password).await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", message);
            Ok(())
        }
        "check-route" => {
            let path = required(args, "check-route <path>")?;
            match check_route(service.session(), path) {
                GuardOutcome::Allow => println!("allow {}", path),
                GuardOutcome::Redirect(target) => println!("redirect {} -> {}", path, target),
            }
            Ok(())
        }
        "watch" => watch(service).await,
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

fn required<'a>(args: &'a [String], usage: &str) -> Result<&'a str> {
    match args.first() {
        Some(value) => Ok(value.as_str()),
        None => bail!("usage: biolearn {}", usage),
    }
}

async fn login(service: &AuthService, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email
        .or_else(|| std::env::var(ENV_EMAIL).ok())
        .or_else(|| config.last_email.clone())
    {
        Some(email) => email,
        None => prompt_line("Email: ")?,
    };
    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => prompt_password("Password: ")?,
    };

    let user = service
        .login(&email, &password)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Welcome, {} ({}).", user.display_name(), user.role.as_str());
    Ok(())
}

fn print_status(service: &AuthService) {
    let session = service.session().current();
    match (&session.token, &session.user) {
        (None, None) => println!("Not logged in."),
        (token, user) => {
            if let Some(user) = user {
                println!("User:         {} <{}>", user.display_name(), user.email);
                println!("Role:         {}", user.role.as_str());
                println!("Subscription: {:?}", user.subscription_status);
                println!(
                    "Courses:      {} enrolled, {} completed",
                    user.enrolled_courses_count, user.completed_courses_count
                );
            }
            if let Some(token) = token {
                println!("Token:        {}", expiry_display(token));
            }
            println!("Logged in:    {}", if session.is_logged_in() { "yes" } else { "no" });
        }
    }
}

/// Keep the refresh loop alive and print every session change.
async fn watch(service: &AuthService) -> Result<()> {
    if !service.is_logged_in() {
        bail!("Not logged in. Run `biolearn login` first.");
    }
    println!(
        "Watching session (refresh check every {}s). Press Ctrl-C to stop.",
        service.refresh_loop().period().as_secs()
    );

    let mut rx = service.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping.");
                return Ok(());
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let session = rx.borrow_and_update().clone();
                match (&session.token, session.is_logged_in()) {
                    (Some(token), true) => println!("Session renewed: {}", expiry_display(token)),
                    _ => {
                        println!("Session ended. Please log in again.");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_password(prompt: &str) -> Result<String> {
    Ok(rpassword::prompt_password(prompt)?)
}
