//! Two-scope credential storage for the terminal client.
//!
//! Mirrors browser storage semantics: a `local` scope that persists across
//! sessions (config dir) and a `session` scope the OS clears per login
//! session (runtime dir). Saving to one scope clears the other, so each
//! entry lives in exactly one place at a time. Storage failures never
//! propagate: reads fall back to empty values, writes are best-effort.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

/// Entry names, matching the environment variables they mirror.
pub const GATEWAY_KEY_ENTRY: &str = "AI_GATEWAY_API_KEY";
pub const OPENAI_KEY_ENTRY: &str = "OPENAI_API_KEY";

const ENTRIES: [&str; 2] = [GATEWAY_KEY_ENTRY, OPENAI_KEY_ENTRY];

#[derive(Debug, Error)]
enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed credential file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Local,
    Session,
}

impl KeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScope::Local => "local",
            KeyScope::Session => "session",
        }
    }
}

/// One storage scope backed by a TOML file of string entries.
#[derive(Debug, Clone)]
struct ScopeFile {
    path: PathBuf,
}

impl ScopeFile {
    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(toml::from_str(&s)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string(entries)?)?;
        Ok(())
    }

    /// An empty stored value counts as absent, like an unset browser key.
    fn read_entry(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .read_all()?
            .get(name)
            .cloned()
            .filter(|v| !v.is_empty()))
    }

    fn write_entry(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(e) => {
                debug!("resetting credential file {}: {}", self.path.display(), e);
                BTreeMap::new()
            }
        };
        entries.insert(name.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove_entry(&self, name: &str) -> Result<(), StoreError> {
        let Ok(mut entries) = self.read_all() else {
            return Ok(());
        };
        if entries.remove(name).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// The client's credential store. Keeps an in-memory mirror of the last
/// successfully loaded or saved state.
#[derive(Debug)]
pub struct CredentialStore {
    session: ScopeFile,
    local: ScopeFile,
    gateway_key: String,
    openai_key: String,
    scope: KeyScope,
}

impl CredentialStore {
    pub fn new(session_path: PathBuf, local_path: PathBuf) -> Self {
        Self {
            session: ScopeFile { path: session_path },
            local: ScopeFile { path: local_path },
            gateway_key: String::new(),
            openai_key: String::new(),
            scope: KeyScope::Local,
        }
    }

    /// Store under the user's runtime dir (session) and config dir (local).
    /// Distinct file names keep the scopes apart even when both directories
    /// fall back to the temp dir.
    pub fn from_default_dirs() -> Self {
        let session = dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("atelier")
            .join("session-credentials.toml");
        let local = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("atelier")
            .join("credentials.toml");
        Self::new(session, local)
    }

    /// Load both keys, session scope first per key, empty when neither
    /// scope has a value. Failed reads count as absent.
    pub fn load(&mut self) -> (String, String) {
        let read = |scope: &ScopeFile, name: &str| {
            scope.read_entry(name).unwrap_or_else(|e| {
                debug!("credential read failed: {}", e);
                None
            })
        };

        let session_gateway = read(&self.session, GATEWAY_KEY_ENTRY);
        let session_openai = read(&self.session, OPENAI_KEY_ENTRY);
        let in_session = session_gateway.is_some() || session_openai.is_some();

        let gateway = session_gateway
            .or_else(|| read(&self.local, GATEWAY_KEY_ENTRY))
            .unwrap_or_default();
        let openai = session_openai
            .or_else(|| read(&self.local, OPENAI_KEY_ENTRY))
            .unwrap_or_default();

        self.gateway_key = gateway.clone();
        self.openai_key = openai.clone();
        self.scope = if in_session {
            KeyScope::Session
        } else {
            KeyScope::Local
        };

        (gateway, openai)
    }

    /// Write both keys to the chosen scope and drop them from the other.
    /// The in-memory mirror moves only if the writes went through.
    pub fn save(&mut self, gateway_key: &str, openai_key: &str, scope: KeyScope) {
        let (target, other) = match scope {
            KeyScope::Session => (&self.session, &self.local),
            KeyScope::Local => (&self.local, &self.session),
        };

        let mut written = true;
        for (name, value) in [
            (GATEWAY_KEY_ENTRY, gateway_key),
            (OPENAI_KEY_ENTRY, openai_key),
        ] {
            if let Err(e) = target.write_entry(name, value) {
                debug!("credential write failed: {}", e);
                written = false;
            }
        }
        for name in ENTRIES {
            if let Err(e) = other.remove_entry(name) {
                debug!("credential clear failed: {}", e);
            }
        }

        if written {
            self.gateway_key = gateway_key.to_string();
            self.openai_key = openai_key.to_string();
            self.scope = scope;
        }
    }

    /// Remove both keys from both scopes and reset the in-memory state.
    pub fn clear(&mut self) {
        for scope in [&self.session, &self.local] {
            for name in ENTRIES {
                if let Err(e) = scope.remove_entry(name) {
                    debug!("credential clear failed: {}", e);
                }
            }
        }
        self.gateway_key.clear();
        self.openai_key.clear();
        self.scope = KeyScope::Local;
    }

    pub fn gateway_key(&self) -> &str {
        &self.gateway_key
    }

    pub fn openai_key(&self) -> &str {
        &self.openai_key
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }
}
