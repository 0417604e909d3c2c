//! Connection/session management: one scoped storage handle per namespace

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use teamsync_schema::SchemaRegistry;
use teamsync_storage::{InMemoryStorage, RedbStorage, StorageProvider};
use tracing::info;

use crate::{Backend, OperatorConfig, OperatorError, Result};

/// Hands out [`ConnectionHandle`]s and tracks which namespaces are open
///
/// A namespace stays open while any clone of its handle is alive. Opening
/// it again meanwhile returns the same session if the schema version
/// agrees, and fails with a connection error otherwise.
pub struct ConnectionManager {
    config: OperatorConfig,
    sessions: Mutex<HashMap<String, Weak<Session>>>,
    /// Memory namespaces outlive their handles for the manager's lifetime
    memory: Mutex<HashMap<String, InMemoryStorage>>,
}

impl ConnectionManager {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// A manager backed by in-memory storage
    pub fn in_memory() -> Self {
        Self::new(OperatorConfig {
            backend: Backend::Memory,
            ..OperatorConfig::default()
        })
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Open `namespace` under `registry`'s schema version
    pub fn open(&self, namespace: &str, registry: &SchemaRegistry) -> Result<ConnectionHandle> {
        validate_namespace(namespace)?;

        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| OperatorError::connection(namespace, e))?;
        sessions.retain(|_, weak| weak.strong_count() > 0);

        if let Some(session) = sessions.get(namespace).and_then(Weak::upgrade) {
            if session.schema_version != registry.version() {
                return Err(OperatorError::connection(
                    namespace,
                    format!(
                        "already open with schema version {}, requested {}",
                        session.schema_version,
                        registry.version()
                    ),
                ));
            }
            return Ok(ConnectionHandle { session });
        }

        let mut storage = self.open_storage(namespace)?;
        reconcile_schema(namespace, storage.as_mut(), registry.version())?;

        let session = Arc::new(Session {
            namespace: namespace.to_string(),
            schema_version: registry.version(),
            storage: Mutex::new(storage),
        });
        sessions.insert(namespace.to_string(), Arc::downgrade(&session));

        info!(namespace, backend = ?self.config.backend, "opened namespace");
        Ok(ConnectionHandle { session })
    }

    /// Release a handle; the namespace closes once every clone is released
    pub fn close(&self, handle: ConnectionHandle) {
        drop(handle);
    }

    pub fn is_open(&self, namespace: &str) -> bool {
        self.sessions
            .lock()
            .map(|sessions| {
                sessions
                    .get(namespace)
                    .is_some_and(|weak| weak.strong_count() > 0)
            })
            .unwrap_or(false)
    }

    fn open_storage(&self, namespace: &str) -> Result<Box<dyn StorageProvider>> {
        match self.config.backend {
            Backend::Memory => {
                let mut memory = self
                    .memory
                    .lock()
                    .map_err(|e| OperatorError::connection(namespace, e))?;
                let storage = memory.entry(namespace.to_string()).or_default().clone();
                Ok(Box::new(storage))
            }
            Backend::Redb => {
                let path = self.config.namespace_path(namespace);
                let storage =
                    RedbStorage::new(&path).map_err(|e| OperatorError::connection(namespace, e))?;
                Ok(Box::new(storage))
            }
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate_namespace(namespace: &str) -> Result<()> {
    let valid = !namespace.is_empty()
        && namespace != "."
        && namespace != ".."
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OperatorError::connection(
            namespace,
            "namespace may only contain ASCII letters, digits, '-', '_' and '.'",
        ))
    }
}

/// Stamp a fresh store, upgrade an older one, refuse a newer one
fn reconcile_schema(namespace: &str, storage: &mut dyn StorageProvider, wanted: u32) -> Result<()> {
    let stamped = storage
        .schema_version()
        .map_err(|e| OperatorError::connection(namespace, e))?;

    match stamped {
        Some(found) if found == wanted => return Ok(()),
        Some(found) if found > wanted => {
            return Err(OperatorError::connection(
                namespace,
                teamsync_storage::StorageError::SchemaMismatch {
                    expected: wanted,
                    found,
                },
            ))
        }
        Some(found) => info!(namespace, from = found, to = wanted, "migrating namespace schema"),
        None => {}
    }

    storage
        .set_schema_version(wanted)
        .map_err(|e| OperatorError::connection(namespace, e))
}

struct Session {
    namespace: String,
    schema_version: u32,
    storage: Mutex<Box<dyn StorageProvider>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        info!(namespace = %self.namespace, "closed namespace");
    }
}

/// Scoped access to one open namespace
///
/// Cloning is cheap and shares the session. All access to storage goes
/// through [`ConnectionHandle::with_storage`], which serializes callers:
/// two commits against one namespace never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    session: Arc<Session>,
}

impl ConnectionHandle {
    pub fn namespace(&self) -> &str {
        &self.session.namespace
    }

    pub fn schema_version(&self) -> u32 {
        self.session.schema_version
    }

    /// Run `f` with exclusive access to the namespace's storage
    pub fn with_storage<T>(&self, f: impl FnOnce(&mut dyn StorageProvider) -> Result<T>) -> Result<T> {
        let mut storage = self
            .session
            .storage
            .lock()
            .map_err(|e| OperatorError::connection(&self.session.namespace, e))?;
        f(storage.as_mut())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("namespace", &self.session.namespace)
            .field("schema_version", &self.session.schema_version)
            .finish()
    }
}
