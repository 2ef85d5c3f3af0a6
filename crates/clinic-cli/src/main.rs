//! Clinic CLI - administration for clinic identity and access.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::config::ConfigAction;
use commands::permission::PermissionAction;
use commands::role::RoleAction;
use commands::seed::SeedArgs;
use commands::session::LoginArgs;
use commands::user::UserAction;
use commands::{Context, GlobalArgs};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic identity and access administration")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.clinic/clinic.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity database directory override
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default permission, ADMIN role and admin user
    Seed {
        /// Admin password (prompted for when absent)
        #[arg(long)]
        password: Option<String>,

        /// Generate a random admin password
        #[arg(long)]
        generate_password: bool,

        /// Admin email
        #[arg(long)]
        email: Option<String>,
    },

    /// Permission management
    Permission {
        #[command(subcommand)]
        action: PermissionCommands,
    },

    /// Role management
    Role {
        #[command(subcommand)]
        action: RoleCommands,
    },

    /// User management
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Log in and print an access token
    Login {
        /// Username
        #[arg(long)]
        username: String,

        /// Password (prompted for when absent)
        #[arg(long)]
        password: Option<String>,

        /// Print the full login response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify an access token and show its user
    Verify {
        /// Token, optionally with a "Bearer " prefix
        token: String,
    },

    /// Generate a signing secret
    Secret,

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum PermissionCommands {
    /// Create a permission
    Create {
        /// Unique name (e.g., user_management)
        #[arg(long)]
        name: String,

        /// Resource it applies to (e.g., user)
        #[arg(long)]
        resource: String,

        /// Action it allows (e.g., manage)
        #[arg(long)]
        action: String,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// Update a permission
    Update {
        /// Current name
        #[arg(long)]
        name: String,

        /// New name
        #[arg(long)]
        rename: Option<String>,

        /// New resource
        #[arg(long)]
        resource: Option<String>,

        /// New action
        #[arg(long)]
        action: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,
    },

    /// List permissions
    List {
        #[command(flatten)]
        paging: Paging,
    },

    /// Delete a permission
    Delete {
        /// Name of the permission
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum RoleCommands {
    /// Create a role
    Create {
        /// Unique name (e.g., ADMIN)
        #[arg(long)]
        name: String,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Permission to grant (repeatable)
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },

    /// Replace the permissions a role grants
    Grant {
        /// Name of the role
        #[arg(long)]
        name: String,

        /// Permission to grant (repeatable; none clears)
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },

    /// Rename or describe a role
    Update {
        /// Current name
        #[arg(long)]
        name: String,

        /// New name
        #[arg(long)]
        rename: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,
    },

    /// Show a role
    Show {
        /// Name of the role
        #[arg(long)]
        name: String,
    },

    /// List roles
    List {
        #[command(flatten)]
        paging: Paging,
    },

    /// Delete a role
    Delete {
        /// Name of the role
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Username
        #[arg(long)]
        username: String,

        /// Email address
        #[arg(long)]
        email: String,

        /// Password (or use --generate-password, or be prompted)
        #[arg(long)]
        password: Option<String>,

        /// Generate a random password
        #[arg(long)]
        generate_password: bool,

        /// Role to assign (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,

        /// First name
        #[arg(long)]
        first_name: Option<String>,

        /// Last name
        #[arg(long)]
        last_name: Option<String>,

        /// Clinic the user belongs to
        #[arg(long)]
        clinic_id: Option<String>,
    },

    /// List users
    List {
        #[command(flatten)]
        paging: Paging,
    },

    /// Show a user with effective permissions
    Show {
        /// Username of the user
        #[arg(long)]
        username: String,
    },

    /// Replace a user's roles
    SetRoles {
        /// Username of the user
        #[arg(long)]
        username: String,

        /// Role to assign (repeatable; none clears)
        #[arg(long = "role")]
        roles: Vec<String>,
    },

    /// Reset a user's password
    ResetPassword {
        /// Username of the user
        #[arg(long)]
        username: String,

        /// New password (generated when absent)
        #[arg(long)]
        password: Option<String>,
    },

    /// Enable a user account
    Enable {
        /// Username of the user
        #[arg(long)]
        username: String,
    },

    /// Disable a user account
    Disable {
        /// Username of the user
        #[arg(long)]
        username: String,
    },

    /// Delete a user
    Delete {
        /// Username of the user to delete
        #[arg(long)]
        username: String,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective configuration
    Show,

    /// Validate configuration
    Validate,
}

#[derive(clap::Args)]
struct Paging {
    /// Page number, from 1
    #[arg(long)]
    page: Option<u32>,

    /// Page size
    #[arg(long)]
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Commands::Secret) {
        commands::session::run_secret();
        return Ok(());
    }

    let ctx = Context::load(&GlobalArgs {
        config: cli.config,
        data_dir: cli.data_dir,
    })?;

    match cli.command {
        Commands::Seed {
            password,
            generate_password,
            email,
        } => {
            let args = SeedArgs {
                password,
                generate_password,
                email,
            };
            commands::seed::run_seed(&ctx, args).await?;
        }

        Commands::Permission { action } => {
            let action = match action {
                PermissionCommands::Create {
                    name,
                    resource,
                    action,
                    description,
                } => PermissionAction::Create {
                    name,
                    resource,
                    action,
                    description,
                },
                PermissionCommands::Update {
                    name,
                    rename,
                    resource,
                    action,
                    description,
                } => PermissionAction::Update {
                    name,
                    rename,
                    resource,
                    action,
                    description,
                },
                PermissionCommands::List { paging } => PermissionAction::List {
                    page: paging.page,
                    limit: paging.limit,
                },
                PermissionCommands::Delete { name } => PermissionAction::Delete { name },
            };
            commands::permission::run_permission(&ctx, action).await?;
        }

        Commands::Role { action } => {
            let action = match action {
                RoleCommands::Create {
                    name,
                    description,
                    permissions,
                } => RoleAction::Create {
                    name,
                    description,
                    permissions,
                },
                RoleCommands::Grant { name, permissions } => RoleAction::Grant { name, permissions },
                RoleCommands::Update {
                    name,
                    rename,
                    description,
                } => RoleAction::Update {
                    name,
                    rename,
                    description,
                },
                RoleCommands::Show { name } => RoleAction::Show { name },
                RoleCommands::List { paging } => RoleAction::List {
                    page: paging.page,
                    limit: paging.limit,
                },
                RoleCommands::Delete { name } => RoleAction::Delete { name },
            };
            commands::role::run_role(&ctx, action).await?;
        }

        Commands::User { action } => {
            let action = match action {
                UserCommands::Create {
                    username,
                    email,
                    password,
                    generate_password,
                    roles,
                    first_name,
                    last_name,
                    clinic_id,
                } => UserAction::Create {
                    username,
                    email,
                    password,
                    generate_password,
                    roles,
                    first_name,
                    last_name,
                    clinic_id,
                },
                UserCommands::List { paging } => UserAction::List {
                    page: paging.page,
                    limit: paging.limit,
                },
                UserCommands::Show { username } => UserAction::Show { username },
                UserCommands::SetRoles { username, roles } => UserAction::SetRoles { username, roles },
                UserCommands::ResetPassword { username, password } => {
                    UserAction::ResetPassword { username, password }
                }
                UserCommands::Enable { username } => UserAction::Enable { username },
                UserCommands::Disable { username } => UserAction::Disable { username },
                UserCommands::Delete { username, yes } => UserAction::Delete { username, yes },
            };
            commands::user::run_user(&ctx, action).await?;
        }

        Commands::Login {
            username,
            password,
            json,
        } => {
            let args = LoginArgs {
                username,
                password,
                json,
            };
            commands::session::run_login(&ctx, args).await?;
        }

        Commands::Verify { token } => {
            commands::session::run_verify(&ctx, &token).await?;
        }

        Commands::Secret => commands::session::run_secret(),

        Commands::Config { action } => {
            let action = match action {
                Some(ConfigCommands::Validate) => ConfigAction::Validate,
                Some(ConfigCommands::Show) | None => ConfigAction::Show,
            };
            commands::config::run_config(&ctx, action)?;
        }
    }

    Ok(())
}
