//! Tessera CLI - Command line session client.

mod identity;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_access as access;
use tessera_session::{
    codec, Action, AuthError, CredentialStore, Credentials, Module, Role, SessionConfig,
    SessionManager, SessionPhase, SessionState, SignupData, User,
};
use tessera_storage::MemoryBackend;
use tessera_storage_sqlite::SqliteBackend;

use crate::identity::HttpIdentityService;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera - sign in, keep the session fresh, inspect role access")]
#[command(version)]
struct Cli {
    /// Identity Service base URL
    #[arg(long, default_value = "http://localhost:8080", env = "TESSERA_IDENTITY_URL")]
    identity_url: String,

    /// Directory holding remembered sessions
    #[arg(long, default_value = ".tessera", env = "TESSERA_DATA_DIR")]
    data_dir: PathBuf,

    /// Profile name; each profile remembers its own session
    #[arg(long, default_value = "default", env = "TESSERA_PROFILE")]
    profile: String,

    /// Seconds before expiry at which the access token is renewed
    #[arg(long, default_value = "300", env = "TESSERA_REFRESH_SKEW_SECS")]
    refresh_skew_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in
    Login {
        /// Account email
        email: String,
        /// Password (read from stdin if not provided)
        #[arg(long, env = "TESSERA_PASSWORD")]
        password: Option<String>,
        /// Remember the session across runs
        #[arg(long)]
        remember: bool,
    },
    /// Register an account and sign in for this run only
    Signup {
        /// Account email
        email: String,
        /// First name
        #[arg(long)]
        first_name: String,
        /// Last name
        #[arg(long)]
        last_name: String,
        /// Organization to join
        #[arg(long)]
        organization: Option<String>,
        /// Password (read from stdin if not provided)
        #[arg(long, env = "TESSERA_PASSWORD")]
        password: Option<String>,
    },
    /// Sign out and forget the remembered session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Renew the access token now
    Refresh,
    /// Switch the active role and show what it grants
    Role {
        /// Role to act as
        role: Role,
    },
    /// Check whether the active role may perform an action on a module
    Can {
        /// Action (view, create, edit, delete, export)
        action: Action,
        /// Module name
        module: String,
        /// Check as this role instead of the active one
        #[arg(long = "as")]
        as_role: Option<Role>,
    },
    /// List modules the active role may view
    Modules {
        /// List for this role instead of the active one
        #[arg(long = "as")]
        as_role: Option<Role>,
    },
    /// Keep the session alive and print every transition until Ctrl-C
    Watch,
    /// Request a password reset email
    ForgotPassword {
        /// Account email
        email: String,
    },
    /// Set a new password with a reset token
    ResetPassword {
        /// Reset token from the email
        #[arg(long)]
        token: String,
        /// Account identifier from the email
        #[arg(long)]
        user_id: String,
        /// New password (read from stdin if not provided)
        #[arg(long)]
        password: Option<String>,
    },
}

// ============================================================================
// Setup
// ============================================================================

async fn open_session(cli: &Cli) -> Result<SessionManager> {
    let identity = HttpIdentityService::new(
        &cli.identity_url,
        Duration::from_secs(cli.timeout_secs),
    )?;

    let durable = SqliteBackend::open(&cli.data_dir, &cli.profile)
        .await
        .with_context(|| format!("Failed to open profile '{}'", cli.profile))?;
    let store = CredentialStore::new(Arc::new(durable), Arc::new(MemoryBackend::new()));

    let config =
        SessionConfig::default().with_refresh_skew(Duration::from_secs(cli.refresh_skew_secs));

    Ok(SessionManager::new(Arc::new(identity), store, config))
}

fn read_secret(prompt: &str, given: Option<String>) -> Result<String> {
    let value = match given {
        Some(v) => v,
        None => {
            print!("{prompt}: ");
            io::stdout().flush()?;
            let stdin = io::stdin();
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        },
    };

    if value.is_empty() {
        bail!("{prompt} cannot be empty");
    }

    Ok(value)
}

/// Restores the remembered session or fails with a hint.
async fn require_session(session: &SessionManager) -> Result<User> {
    let state = session.initialize().await;
    match state.user {
        Some(user) => Ok(user),
        None => bail!("Not signed in. Run `tessera login <email> --remember` first"),
    }
}

fn print_user(user: &User) {
    println!("  User:        {} <{}>", user.display_name, user.email);
    println!("  Id:          {}", user.id);
    if let Some(org) = &user.organization_id {
        println!("  Org:         {}", org);
    }
    let roles: Vec<&str> = user.roles().iter().map(Role::as_str).collect();
    println!("  Roles:       {}", roles.join(", "));
    println!("  Active role: {}", user.active_role());
    println!("  MFA:         {}", user.mfa_enabled);
}

fn print_expiry(session: &SessionManager) {
    let Some(tokens) = session.tokens() else {
        return;
    };
    match codec::decode(&tokens.access_token) {
        Some(claims) => println!("  Expires at:  {} (unix ms)", claims.expires_at_epoch_ms),
        None => println!("  Expires at:  unknown (token not decodable)"),
    }
    if let Some(at) = session.next_refresh_at() {
        println!("  Refresh at:  {} (unix ms)", at);
    }
}

fn describe(state: &SessionState) -> String {
    let mut line = state.phase.to_string();
    if let Some(user) = &state.user {
        line.push_str(&format!(" as {} ({})", user.email, user.active_role()));
    }
    if let Some(error) = &state.error {
        line.push_str(&format!(" - {}", error));
    }
    line
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_login(
    session: &SessionManager,
    email: String,
    password: Option<String>,
    remember: bool,
) -> Result<()> {
    let password = read_secret("Password", password)?;

    let user = session
        .login(Credentials::new(email, password), remember)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message().unwrap_or_else(|| e.to_string())))?;

    println!("Signed in.");
    print_user(&user);
    print_expiry(session);
    if !remember {
        println!();
        println!("Session-only: it ends with this process. Use --remember to keep it.");
    }

    Ok(())
}

async fn cmd_signup(session: &SessionManager, data: SignupData) -> Result<()> {
    let user = session
        .signup(data)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message().unwrap_or_else(|| e.to_string())))?;

    println!("Account created. Signed in for this run only.");
    print_user(&user);

    Ok(())
}

async fn cmd_logout(session: &SessionManager) -> Result<()> {
    session.initialize().await;
    session.logout().await;
    println!("Signed out.");
    Ok(())
}

async fn cmd_whoami(session: &SessionManager) -> Result<()> {
    let user = require_session(session).await?;
    print_user(&user);
    print_expiry(session);
    Ok(())
}

async fn cmd_refresh(session: &SessionManager) -> Result<()> {
    require_session(session).await?;

    match session.refresh_token().await {
        Ok(_) => {
            println!("Access token renewed.");
            print_expiry(session);
            Ok(())
        },
        Err(e) => bail!(
            "Refresh failed, signed out: {}",
            e.user_message().unwrap_or_else(|| e.to_string())
        ),
    }
}

async fn cmd_role(session: &SessionManager, role: Role) -> Result<()> {
    require_session(session).await?;

    let user = match session.change_role(role) {
        Ok(user) => user,
        Err(AuthError::RoleNotGranted(role)) => bail!("Role '{}' is not granted to you", role),
        Err(e) => return Err(e.into()),
    };

    println!("Active role: {}", user.active_role());
    println!("Permissions:");
    for permission in user.permissions() {
        println!("  {}", permission);
    }

    Ok(())
}

async fn cmd_can(
    session: &SessionManager,
    action: Action,
    module_name: &str,
    as_role: Option<Role>,
) -> Result<()> {
    let role = match as_role {
        Some(role) => role,
        None => require_session(session).await?.active_role(),
    };

    let allowed = match module_name.parse::<Module>() {
        Ok(module) => access::can(role, action, module),
        Err(_) => {
            tracing::warn!(module = %module_name, "Unknown module, denied");
            false
        },
    };

    println!(
        "{} may {}{} {}",
        role,
        if allowed { "" } else { "NOT " },
        action,
        module_name
    );

    Ok(())
}

async fn cmd_modules(session: &SessionManager, as_role: Option<Role>) -> Result<()> {
    let (role, modules) = match as_role {
        Some(role) => (role, access::accessible_modules(role)),
        None => {
            let user = require_session(session).await?;
            (user.active_role(), session.accessible_modules())
        },
    };

    println!("Modules visible to {}:", role);
    if modules.is_empty() {
        println!("  (none)");
    }
    for module in modules {
        println!("  {}", module);
    }

    Ok(())
}

async fn cmd_watch(session: &SessionManager) -> Result<()> {
    let mut updates = session.subscribe();
    let state = session.initialize().await;
    println!("{}", describe(&state));
    updates.borrow_and_update();

    if !state.is_authenticated() {
        bail!("Not signed in. Run `tessera login <email> --remember` first");
    }
    print_expiry(session);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                println!("{}", describe(&state));
                if state.phase == SessionPhase::Authenticated {
                    print_expiry(session);
                }
                if !state.is_authenticated() && !state.is_loading() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn cmd_forgot_password(session: &SessionManager, email: &str) -> Result<()> {
    session
        .request_password_reset(email)
        .await
        .context("Password reset request failed")?;
    println!("If an account exists for {}, a reset email is on its way.", email);
    Ok(())
}

async fn cmd_reset_password(
    session: &SessionManager,
    token: &str,
    user_id: &str,
    password: Option<String>,
) -> Result<()> {
    let password = read_secret("New password", password)?;
    session
        .reset_password(token, user_id, &password)
        .await
        .context("Password reset failed")?;
    println!("Password updated. Sign in with the new password.");
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let session = open_session(&cli).await?;

    match cli.command {
        Commands::Login {
            email,
            password,
            remember,
        } => cmd_login(&session, email, password, remember).await,
        Commands::Signup {
            email,
            first_name,
            last_name,
            organization,
            password,
        } => {
            let password = read_secret("Password", password)?;
            let data = SignupData {
                email,
                password,
                first_name,
                last_name,
                organization_id: organization,
            };
            cmd_signup(&session, data).await
        },
        Commands::Logout => cmd_logout(&session).await,
        Commands::Whoami => cmd_whoami(&session).await,
        Commands::Refresh => cmd_refresh(&session).await,
        Commands::Role { role } => cmd_role(&session, role).await,
        Commands::Can {
            action,
            module,
            as_role,
        } => cmd_can(&session, action, &module, as_role).await,
        Commands::Modules { as_role } => cmd_modules(&session, as_role).await,
        Commands::Watch => cmd_watch(&session).await,
        Commands::ForgotPassword { email } => cmd_forgot_password(&session, &email).await,
        Commands::ResetPassword {
            token,
            user_id,
            password,
        } => cmd_reset_password(&session, &token, &user_id, password).await,
    }
}
