use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "stockroom", version, about = "Warehouse-management session from the terminal")]
pub struct Cli {
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true, env = "STOCKROOM_API_URL")]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and remember the session
    Login {
        /// Account name (defaults to the last one used)
        #[arg(long, env = "STOCKROOM_USERNAME")]
        name: Option<String>,

        /// Ask the backend for a long-lived session
        #[arg(long)]
        remember_me: bool,
    },
    /// Forget the current session
    Logout,
    /// Show the logged-in user after checking with the backend
    Whoami,
    /// List the screens the current user can reach from the menu
    Menu,
    /// Navigate to a screen
    Open {
        /// Path such as `/orders` or `/orders/42`
        path: String,
    },
    /// Show or change the idle logout setting
    Idle {
        #[arg(value_enum, default_value_t = IdleAction::Status)]
        action: IdleAction,
    },
    /// Stay logged in until idle; each line typed counts as activity
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdleAction {
    On,
    Off,
    Status,
}
