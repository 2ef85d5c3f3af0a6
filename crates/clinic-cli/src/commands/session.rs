//! Login, token verification and secret generation.

use clinic_identity::{Credentials, TokenManager};

use super::user::print_user;
use super::{Context, auth_service};
use crate::ui;

/// Arguments for `clinic login`.
#[derive(Debug)]
pub struct LoginArgs {
    /// Username.
    pub username: String,
    /// Password; prompted for when absent.
    pub password: Option<String>,
    /// Print the login response as JSON.
    pub json: bool,
}

/// Log in and print an access token.
///
/// # Errors
///
/// Returns error if the credentials are rejected or the secret is unusable.
pub async fn run_login(ctx: &Context, args: LoginArgs) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let auth = auth_service(ctx, &db)?;

    let password = match args.password {
        Some(password) => password,
        None => ui::prompts::password("Password")?,
    };
    let response = auth
        .login_with_credentials(&Credentials::new(args.username, password))
        .await?;
    db.flush().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    ui::success(&format!("Logged in as '{}'", response.user.username));
    ui::kv("expires", &response.expires_at.to_rfc3339());
    println!("{}", response.access_token);
    Ok(())
}

/// Verify a token and print the user it resolves to.
///
/// # Errors
///
/// Returns error if the token does not resolve to a user.
pub async fn run_verify(ctx: &Context, token: &str) -> anyhow::Result<()> {
    let db = ctx.open_db()?;
    let auth = auth_service(ctx, &db)?;

    let token = TokenManager::extract_from_header(token).unwrap_or(token);
    match auth.validate_token(token).await? {
        Some(user) => {
            ui::success("Token is valid");
            print_user(&user);
            Ok(())
        }
        None => anyhow::bail!("Token is invalid, expired, or its user no longer exists"),
    }
}

/// Print a fresh signing secret.
pub fn run_secret() {
    println!("{}", TokenManager::generate_hex_secret());
    ui::info("Set it as CLINIC_JWT_SECRET or auth.jwtSecret in the config file.");
}
