//! Command handlers. Each returns the process exit code.

use inventaku_core::auth::AuthError;
use inventaku_core::auth::gate::{default_navigation, visible_nav};
use inventaku_core::auth::session::SessionAuthority;
use inventaku_core::auth::storage;
use inventaku_core::config::SessionConfig;
use inventaku_core::models::auth::{Credentials, Identity};
use serde_json::{Map, Value};

use crate::cli::{Cli, Commands};
use crate::{Error, Result};

/// Exit code when nobody is logged in or a login fails.
const EXIT_NOT_LOGGED_IN: i32 = 1;

/// Exit code for a denied role check.
const EXIT_DENIED: i32 = 2;

pub async fn dispatch(cli: &Cli) -> Result<i32> {
    if let Commands::Version = cli.command {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(0);
    }

    let config = load_config(cli)?;
    log::debug!(
        "api {} session file {}",
        config.api_url,
        config.session_file.display()
    );
    let authority = SessionAuthority::from_config(&config)?;

    let code = match &cli.command {
        Commands::Login {
            username,
            password,
            remember,
        } => login(&authority, username.as_deref(), password.as_deref(), *remember).await?,
        Commands::Logout => {
            authority.logout().await;
            println!("logged out");
            0
        }
        Commands::Whoami { json } => whoami(&authority, *json).await?,
        Commands::Refresh { json } => refresh(&authority, *json).await?,
        Commands::Profile { name, email } => {
            profile(&authority, name.as_deref(), email.as_deref()).await?
        }
        Commands::Can { roles, all } => can(&authority, roles, *all).await,
        Commands::Nav => nav(&authority).await,
        Commands::Version => 0,
    };

    authority.shutdown();
    Ok(code)
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = SessionConfig::from_env()?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(path) = &cli.session_file {
        config.session_file = path.clone();
    }
    Ok(config)
}

async fn login(
    authority: &SessionAuthority,
    username: Option<&str>,
    password: Option<&str>,
    remember: bool,
) -> Result<i32> {
    let username = match username {
        Some(u) => u.to_string(),
        None => storage::remembered_username(authority.storage().as_ref())
            .ok_or_else(|| Error::Custom("no --username given and none remembered".into()))?,
    };
    let password = password
        .ok_or_else(|| Error::Custom("no --password given (or INVENTAKU_PASSWORD)".into()))?;

    match authority.login(&Credentials::new(&username, password)).await {
        Ok(outcome) => {
            if remember
                && let Err(e) = storage::remember_username(authority.storage().as_ref(), &username)
            {
                log::warn!("could not remember username: {e}");
            }
            println!(
                "logged in as {} ({})",
                outcome.user.display_name(),
                role_label(&outcome.user)
            );
            Ok(0)
        }
        Err(e) => {
            eprintln!("login failed: {}", e.user_message());
            Ok(EXIT_NOT_LOGGED_IN)
        }
    }
}

async fn whoami(authority: &SessionAuthority, json: bool) -> Result<i32> {
    authority.initialize().await;
    match authority.current_user() {
        Some(user) => {
            print_identity(&user, json)?;
            Ok(0)
        }
        None => {
            println!("not logged in");
            Ok(EXIT_NOT_LOGGED_IN)
        }
    }
}

async fn refresh(authority: &SessionAuthority, json: bool) -> Result<i32> {
    authority.initialize().await;
    if !authority.is_authenticated() {
        println!("not logged in");
        return Ok(EXIT_NOT_LOGGED_IN);
    }
    match authority.refresh_user().await {
        Ok(user) => {
            print_identity(&user, json)?;
            Ok(0)
        }
        Err(AuthError::SessionExpired) => {
            println!("session expired, please log in again");
            Ok(EXIT_NOT_LOGGED_IN)
        }
        Err(e) => Err(e.into()),
    }
}

async fn profile(
    authority: &SessionAuthority,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<i32> {
    let mut fields = Map::new();
    if let Some(name) = name {
        fields.insert("name".into(), Value::String(name.to_string()));
    }
    if let Some(email) = email {
        fields.insert("email".into(), Value::String(email.to_string()));
    }
    if fields.is_empty() {
        return Err(Error::Custom("nothing to update, pass --name and/or --email".into()));
    }

    authority.initialize().await;
    match authority.update_profile(fields)? {
        Some(user) => {
            print_identity(&user, false)?;
            Ok(0)
        }
        None => {
            println!("not logged in");
            Ok(EXIT_NOT_LOGGED_IN)
        }
    }
}

async fn can(authority: &SessionAuthority, roles: &[String], all: bool) -> i32 {
    authority.initialize().await;
    let allowed = if all {
        authority.has_all_roles(roles)
    } else {
        authority.has_any_role(roles)
    };
    if allowed {
        println!("allowed");
        0
    } else {
        println!("denied");
        EXIT_DENIED
    }
}

async fn nav(authority: &SessionAuthority) -> i32 {
    authority.initialize().await;
    let state = authority.snapshot();
    let items = default_navigation();
    let visible = visible_nav(&state, &items);
    if visible.is_empty() {
        println!("nothing visible, not logged in");
        return EXIT_NOT_LOGGED_IN;
    }
    for item in visible {
        println!("{}\t{}", item.label, item.path);
    }
    0
}

fn role_label(user: &Identity) -> &str {
    if user.role.is_empty() {
        "no role"
    } else {
        &user.role
    }
}

fn print_identity(user: &Identity, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
        return Ok(());
    }
    println!("id:       {}", user.id);
    println!("username: {}", user.username);
    println!("name:     {}", user.display_name());
    if let Some(email) = &user.email {
        println!("email:    {email}");
    }
    println!("role:     {}", role_label(user));
    if let Some(permissions) = user.permissions.as_ref().filter(|p| !p.is_empty()) {
        println!("perms:    {}", permissions.join(", "));
    }
    Ok(())
}
