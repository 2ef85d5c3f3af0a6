//! CLI command implementations.

pub mod config;
pub mod permission;
pub mod role;
pub mod seed;
pub mod session;
pub mod user;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clinic_core::{Config, PageRequest};
use clinic_identity::{
    AuthService, IdentityDb, IdentityService, PermissionId, RoleId, SledPermissionStore,
    SledRoleStore, SledUserStore, TokenManager, UserStore,
};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file override.
    pub config: Option<PathBuf>,
    /// Data directory override.
    pub data_dir: Option<PathBuf>,
}

/// Loaded configuration plus the database location.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: Config,
    /// Identity database directory.
    pub data_dir: PathBuf,
}

impl Context {
    /// Load configuration and apply overrides.
    ///
    /// Precedence: command-line flags, then environment, then file.
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let config = match &args.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load_default().context("Failed to load config")?,
        };
        Self::new(config.with_env_overrides(), args)
    }

    /// Validate an already overridden config and pick the data directory.
    pub fn new(config: Config, args: &GlobalArgs) -> anyhow::Result<Self> {
        config
            .validate()
            .context("Invalid configuration after environment overrides")?;
        let data_dir = args.data_dir.clone().unwrap_or_else(|| config.data_dir());
        Ok(Self { config, data_dir })
    }

    /// Open the identity database, creating its directory.
    pub fn open_db(&self) -> anyhow::Result<IdentityDb> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;
        IdentityDb::open(&self.data_dir).context("Failed to open identity database")
    }

    /// Page request from optional flags, bounded by config.
    #[must_use]
    pub fn page(&self, page: Option<u32>, limit: Option<u32>) -> PageRequest {
        self.config.pagination.page(page, limit)
    }
}

/// Identity service over a database.
#[must_use]
pub fn identity_service(db: &IdentityDb) -> IdentityService {
    IdentityService::new(
        Arc::new(SledUserStore::new(db.clone())),
        Arc::new(SledRoleStore::new(db.clone())),
        Arc::new(SledPermissionStore::new(db.clone())),
    )
}

/// Auth service over a database. Requires a usable signing secret.
pub fn auth_service(ctx: &Context, db: &IdentityDb) -> anyhow::Result<AuthService> {
    let tokens = TokenManager::from_config(&ctx.config.auth)
        .context("Signing secret is not usable; run 'clinic secret' and set CLINIC_JWT_SECRET")?;
    let users: Arc<dyn UserStore> = Arc::new(SledUserStore::new(db.clone()));
    Ok(AuthService::new(users, tokens))
}

/// Resolve role names to ids.
pub async fn role_ids(identity: &IdentityService, names: &[String]) -> anyhow::Result<Vec<RoleId>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let role = identity
            .roles()
            .find_by_name(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Role not found: {name}"))?;
        ids.push(role.id);
    }
    Ok(ids)
}

/// Resolve permission names to ids.
pub async fn permission_ids(
    identity: &IdentityService,
    names: &[String],
) -> anyhow::Result<Vec<PermissionId>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let permission = identity
            .permissions()
            .find_by_name(name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Permission not found: {name}"))?;
        ids.push(permission.id);
    }
    Ok(ids)
}

/// Random alphanumeric password.
#[must_use]
pub fn generate_password(len: usize) -> String {
    use rand::Rng;
    use rand::distributions::Alphanumeric;

    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Password from a flag, a generator, or an interactive prompt.
pub fn resolve_password(password: Option<String>, generate: bool) -> anyhow::Result<String> {
    if generate {
        let password = generate_password(16);
        crate::ui::success(&format!("Generated password: {password}"));
        return Ok(password);
    }
    match password {
        Some(password) => Ok(password),
        None => Ok(crate::ui::prompts::new_password("Password")?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    fn overridden(vars: &[(&str, &str)]) -> Config {
        Config::default().with_overrides(|name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        })
    }

    #[test]
    fn test_context_rejects_invalid_overrides() {
        let args = GlobalArgs::default();
        assert!(Context::new(overridden(&[("CLINIC_TOKEN_EXPIRY_HOURS", "0")]), &args).is_err());
        assert!(Context::new(overridden(&[("CLINIC_TOKEN_EXPIRY_HOURS", "99999999")]), &args).is_err());

        let ctx = Context::new(overridden(&[("CLINIC_TOKEN_EXPIRY_HOURS", "2")]), &args).unwrap();
        assert_eq!(ctx.config.auth.token_expiry_hours, 2);
    }

    #[test]
    fn test_context_data_dir_flag_wins() {
        let args = GlobalArgs {
            config: None,
            data_dir: Some(PathBuf::from("/tmp/flag")),
        };
        let ctx = Context::new(overridden(&[("CLINIC_DATA_DIR", "/tmp/env")]), &args).unwrap();
        assert_eq!(ctx.data_dir, PathBuf::from("/tmp/flag"));
    }

    #[test]
    fn test_generate_password() {
        let a = generate_password(16);
        let b = generate_password(16);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_password_prefers_generated() {
        let password = resolve_password(Some("given".to_string()), true).unwrap();
        assert_eq!(password.len(), 16);
        assert_eq!(resolve_password(Some("given".to_string()), false).unwrap(), "given");
    }
}
