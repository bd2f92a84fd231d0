//! Credentials and account scope.
//!
//! Each emitter instance is bound to an account scope
//! `{server_url, username, team_slug}`; queue entries are keyed by scope so
//! switching accounts does not leak events from the previous account.
//! Switching with pending events in the old scope is refused unless forced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::queue::OfflineQueue;

/// Identity a queue row is isolated under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountScope {
    pub server_url: String,
    pub username: String,
    pub team_slug: String,
}

impl AccountScope {
    /// Stable key used to tag queue rows.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.server_url, self.username, self.team_slug)
    }
}

/// Persisted credentials for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub server_url: String,
    pub username: String,
    pub team_slug: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn scope(&self) -> AccountScope {
        AccountScope {
            server_url: self.server_url.clone(),
            username: self.username.clone(),
            team_slug: self.team_slug.clone(),
        }
    }
}

/// Credentials file under the runtime home, owner read/write only.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    #[must_use]
    pub fn new(home: &Path) -> Self {
        Self {
            path: home.join("credentials.json"),
        }
    }

    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Option<Credentials>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io(&self.path, err)),
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let raw = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, raw).map_err(|e| Error::io(&self.path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| Error::io(&self.path, e))?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::io(&self.path, err)),
        }
    }
}

/// Authentication state over a credential store.
#[derive(Debug, Clone)]
pub struct AuthClient {
    store: CredentialStore,
}

impl AuthClient {
    #[must_use]
    pub const fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.store
            .load()
            .ok()
            .flatten()
            .is_some_and(|c| !c.access_token.trim().is_empty())
    }

    #[must_use]
    pub fn get_access_token(&self) -> Option<String> {
        self.store
            .load()
            .ok()
            .flatten()
            .map(|c| c.access_token)
            .filter(|t| !t.trim().is_empty())
    }

    #[must_use]
    pub fn current_scope(&self) -> Option<AccountScope> {
        self.store.load().ok().flatten().map(|c| c.scope())
    }

    /// Persist new account credentials.
    ///
    /// If the previous account's scope still has pending queued events, the
    /// switch is refused unless `force` is set; abandoning the old scope
    /// would strand its events.
    pub async fn obtain_tokens(
        &self,
        new_credentials: &Credentials,
        queue: &OfflineQueue,
        force: bool,
    ) -> Result<()> {
        if let Some(previous) = self.current_scope() {
            if previous != new_credentials.scope() && !force {
                let pending = queue.size(&previous.key()).await?;
                if pending > 0 {
                    return Err(Error::Auth(format!(
                        "Refusing to switch accounts: {pending} events still pending for \
                         {}. Run `spec-kitty sync now` first, or pass --force to abandon them.",
                        previous.key()
                    )));
                }
            }
        }
        self.store.save(new_credentials)
    }

    pub fn logout(&self) -> Result<bool> {
        self.store.clear()
    }
}
