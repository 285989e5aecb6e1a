//! Durable storage for the credential pair.
//!
//! Stores are dumb key/value surfaces: no validation happens here. Every
//! backend keeps an in-memory mirror so a `set` or `clear` is visible to the
//! next `get` immediately, whatever the persistence medium does.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

const KEYRING_SERVICE: &str = "stockroom";

/// The two fixed keys credentials are persisted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn key(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Access/refresh credentials as issued by the login and renewal endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Storage backend for the credential pair.
///
/// Only the session layer talks to a `TokenStore`. Implementations must be
/// safe to share between tasks.
pub trait TokenStore: Send + Sync {
    /// Current value for `kind`, if any.
    fn get(&self, kind: TokenKind) -> Option<String>;

    /// Replace both credentials.
    fn set(&self, pair: &TokenPair) -> Result<()>;

    /// Remove both credentials. Succeeds when nothing is stored.
    fn clear(&self) -> Result<()>;

    /// Backend name, for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Slots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<String>,
}

impl Slots {
    fn get(&self, kind: TokenKind) -> Option<String> {
        match kind {
            TokenKind::Access => self.access.clone(),
            TokenKind::Refresh => self.refresh.clone(),
        }
    }

    fn from_pair(pair: &TokenPair) -> Self {
        Self {
            access: Some(pair.access.clone()),
            refresh: Some(pair.refresh.clone()),
        }
    }
}

/// Mirror shared by every backend. Poisoning is ignored: the slots are
/// always replaced wholesale so a panicking writer cannot leave them torn.
#[derive(Debug, Default)]
struct Mirror(RwLock<Slots>);

impl Mirror {
    fn new(slots: Slots) -> Self {
        Self(RwLock::new(slots))
    }

    fn get(&self, kind: TokenKind) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).get(kind)
    }

    fn replace(&self, slots: Slots) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = slots;
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slots: Mirror,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: &TokenPair) -> Self {
        Self {
            slots: Mirror::new(Slots::from_pair(pair)),
        }
    }

    /// Store a single credential, leaving the other untouched.
    pub fn with_only(kind: TokenKind, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        let slots = match kind {
            TokenKind::Access => Slots {
                access: value,
                refresh: None,
            },
            TokenKind::Refresh => Slots {
                access: None,
                refresh: value,
            },
        };
        Self {
            slots: Mirror::new(slots),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        self.slots.get(kind)
    }

    fn set(&self, pair: &TokenPair) -> Result<()> {
        self.slots.replace(Slots::from_pair(pair));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slots.replace(Slots::default());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// File
// ============================================================================

/// JSON file in the cache directory, so a restart does not force a new login.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    slots: Mirror,
}

impl FileTokenStore {
    /// Open the store in `cache_dir`, loading any previously saved session.
    ///
    /// An unreadable or corrupt file is treated as "no session" rather than
    /// an error, so the user is simply asked to log in again.
    pub fn open(cache_dir: impl AsRef<Path>) -> Self {
        let path = cache_dir.as_ref().join(SESSION_FILE);
        let slots = match Self::read(&path) {
            Ok(slots) => slots,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                Slots::default()
            }
        };
        debug!(
            path = %path.display(),
            has_access = slots.access.is_some(),
            has_refresh = slots.refresh.is_some(),
            "Session file loaded"
        );
        Self {
            path,
            slots: Mirror::new(slots),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<Slots> {
        if !path.exists() {
            return Ok(Slots::default());
        }
        let contents = std::fs::read_to_string(path).context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn write(&self, slots: &Slots) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(slots)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .context("Failed to open session file")?;

        // A file left over from an older version may still be world-readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .context("Failed to restrict session file permissions")?;
        }
        file.write_all(contents.as_bytes())
            .context("Failed to write session file")?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        self.slots.get(kind)
    }

    fn set(&self, pair: &TokenPair) -> Result<()> {
        let slots = Slots::from_pair(pair);
        self.slots.replace(slots.clone());
        self.write(&slots)
    }

    fn clear(&self) -> Result<()> {
        self.slots.replace(Slots::default());
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ============================================================================
// Keyring
// ============================================================================

/// OS keychain, one entry per credential kind.
pub struct KeyringTokenStore {
    service: String,
    slots: Mirror,
}

impl KeyringTokenStore {
    pub fn open() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        let service = service.into();
        let slots = Slots {
            access: Self::load(&service, TokenKind::Access),
            refresh: Self::load(&service, TokenKind::Refresh),
        };
        Self {
            service,
            slots: Mirror::new(slots),
        }
    }

    fn entry(service: &str, kind: TokenKind) -> Result<Entry> {
        Entry::new(service, kind.key()).context("Failed to create keyring entry")
    }

    fn load(service: &str, kind: TokenKind) -> Option<String> {
        match Self::entry(service, kind).and_then(|e| {
            e.get_password()
                .context("Failed to retrieve credential from keychain")
        }) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(kind = kind.key(), error = %e, "No credential in keychain");
                None
            }
        }
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        self.slots.get(kind)
    }

    fn set(&self, pair: &TokenPair) -> Result<()> {
        self.slots.replace(Slots::from_pair(pair));
        Self::entry(&self.service, TokenKind::Access)?
            .set_password(&pair.access)
            .context("Failed to store access credential in keychain")?;
        Self::entry(&self.service, TokenKind::Refresh)?
            .set_password(&pair.refresh)
            .context("Failed to store refresh credential in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slots.replace(Slots::default());
        for kind in [TokenKind::Access, TokenKind::Refresh] {
            match Self::entry(&self.service, kind)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(e).context("Failed to delete credential from keychain");
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "keyring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_set_get_clear() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get(TokenKind::Access), None);

        store.set(&TokenPair::new("a1", "r1")).unwrap();
        assert_eq!(store.get(TokenKind::Access).as_deref(), Some("a1"));
        assert_eq!(store.get(TokenKind::Refresh).as_deref(), Some("r1"));

        store.clear().unwrap();
        assert_eq!(store.get(TokenKind::Access), None);
        assert_eq!(store.get(TokenKind::Refresh), None);
    }

    #[test]
    fn test_memory_store_partial() {
        let store = MemoryTokenStore::with_only(TokenKind::Refresh, "r1");
        assert_eq!(store.get(TokenKind::Access), None);
        assert_eq!(store.get(TokenKind::Refresh).as_deref(), Some("r1"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileTokenStore::open(dir.path());
        store.set(&TokenPair::new("a1", "r1")).unwrap();
        assert!(store.path().exists());

        let reopened = FileTokenStore::open(dir.path());
        assert_eq!(reopened.get(TokenKind::Access).as_deref(), Some("a1"));
        assert_eq!(reopened.get(TokenKind::Refresh).as_deref(), Some("r1"));

        reopened.clear().unwrap();
        assert!(!reopened.path().exists());
        assert_eq!(FileTokenStore::open(dir.path()).get(TokenKind::Access), None);
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").unwrap();

        let store = FileTokenStore::open(dir.path());
        assert_eq!(store.get(TokenKind::Access), None);

        // Clearing an empty store is fine, twice.
        store.clear().unwrap();
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_uses_fixed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path());
        store.set(&TokenPair::new("a1", "r1")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["access"], "a1");
        assert_eq!(value["refresh"], "r1");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileTokenStore::open(dir.path());
        store.set(&TokenPair::new("a1", "r1")).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        store.clear().unwrap();
        store.set(&TokenPair::new("a2", "r2")).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_token_pair_debug_redacts() {
        let pair = TokenPair::new("secret-access", "secret-refresh");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("secret"));
    }
}
