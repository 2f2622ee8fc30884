use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inventaku session client.
#[derive(Parser, Debug)]
#[command(name = "inventaku", version, about = "Inventaku session client")]
pub struct Cli {
    /// Base URL of the Inventaku API.
    #[arg(long, global = true, env = "INVENTAKU_API_URL")]
    pub api_url: Option<String>,

    /// File holding the persisted session.
    #[arg(long, global = true, env = "INVENTAKU_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and keep the session for later commands.
    Login {
        /// Username; defaults to the remembered one.
        #[arg(long, short)]
        username: Option<String>,

        #[arg(long, env = "INVENTAKU_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Remember the username for the next login.
        #[arg(long)]
        remember: bool,
    },

    /// End the session (always succeeds locally).
    Logout,

    /// Validate the session and show who is logged in.
    Whoami {
        #[arg(long)]
        json: bool,
    },

    /// Re-fetch the profile from the server.
    Refresh {
        #[arg(long)]
        json: bool,
    },

    /// Update the local profile snapshot.
    Profile {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Check whether the current user holds any (or all) of the given roles.
    Can {
        #[arg(required = true)]
        roles: Vec<String>,

        /// Require every role instead of any.
        #[arg(long)]
        all: bool,
    },

    /// List the navigation entries visible to the current user.
    Nav,

    /// Print version.
    Version,
}
