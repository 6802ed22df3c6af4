//! The shared Xray configuration document and its client entries.
//!
//! Every edit follows the same discipline: exclusive lock, read, in-memory
//! edit, backup of the pre-edit document, atomic replace, release. Reload is
//! a separate best-effort step that never rolls back a completed write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fs4::FileExt;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::error::ProvisionError;
use crate::model::ServiceKind;
use crate::provisioning::command;

/// An in-memory edit applied under the document lock.
pub type ConfigMutation = Box<dyn FnOnce(&mut Value) -> Result<(), ProvisionError> + Send>;

#[async_trait]
pub trait ServiceConfigResource: Send + Sync {
    /// Current document. Takes no lock.
    async fn read(&self) -> Result<Value, ProvisionError>;

    /// Apply `edit` atomically. A failed edit leaves the document untouched.
    async fn mutate(&self, edit: ConfigMutation) -> Result<(), ProvisionError>;

    /// Ask the tunnel service to pick up the new document.
    async fn notify_reload(&self) -> Result<(), ProvisionError>;
}

/// Xray JSON document on disk.
pub struct FileConfigResource {
    path: PathBuf,
    in_process: Mutex<()>,
    reload_command: Vec<String>,
    timeout: Duration,
}

impl FileConfigResource {
    pub fn new(path: impl Into<PathBuf>, reload_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            in_process: Mutex::new(()),
            reload_command,
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

fn mutation_error(reason: impl Into<String>) -> ProvisionError {
    ProvisionError::ConfigMutationFailed {
        reason: reason.into(),
    }
}

/// Holds the advisory lock on `<config>.lock`; released on drop.
struct FileLockGuard {
    file: File,
}

impl FileLockGuard {
    fn acquire(config_path: &Path) -> Result<Self, ProvisionError> {
        let lock_path = sibling(config_path, "lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| mutation_error(format!("open {}: {e}", lock_path.display())))?;
        file.lock_exclusive()
            .map_err(|e| mutation_error(format!("lock {}: {e}", lock_path.display())))?;
        Ok(Self { file })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "Failed to release config lock");
        }
    }
}

fn read_document(path: &Path) -> Result<(Vec<u8>, Value), ProvisionError> {
    let original = std::fs::read(path)
        .map_err(|e| mutation_error(format!("read {}: {e}", path.display())))?;
    let doc = serde_json::from_slice(&original)
        .map_err(|e| mutation_error(format!("parse {}: {e}", path.display())))?;
    Ok((original, doc))
}

fn mutate_locked(path: &Path, edit: ConfigMutation) -> Result<(), ProvisionError> {
    let _lock = FileLockGuard::acquire(path)?;

    let (original, mut doc) = read_document(path)?;
    edit(&mut doc)?;

    let rendered = serde_json::to_vec_pretty(&doc)
        .map_err(|e| mutation_error(format!("serialize: {e}")))?;

    let backup = sibling(path, "bak");
    std::fs::write(&backup, &original)
        .map_err(|e| mutation_error(format!("write backup {}: {e}", backup.display())))?;

    let tmp = sibling(path, "tmp");
    {
        let mut file = File::create(&tmp)
            .map_err(|e| mutation_error(format!("create {}: {e}", tmp.display())))?;
        file.write_all(&rendered)
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| mutation_error(format!("write {}: {e}", tmp.display())))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        mutation_error(format!("replace {}: {e}", path.display()))
    })?;
    Ok(())
}

#[async_trait]
impl ServiceConfigResource for FileConfigResource {
    async fn read(&self) -> Result<Value, ProvisionError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_document(&path).map(|(_, doc)| doc))
            .await
            .map_err(|e| mutation_error(format!("read task failed: {e}")))?
    }

    async fn mutate(&self, edit: ConfigMutation) -> Result<(), ProvisionError> {
        let _guard = self.in_process.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || mutate_locked(&path, edit))
            .await
            .map_err(|e| mutation_error(format!("mutation task failed: {e}")))?
    }

    async fn notify_reload(&self) -> Result<(), ProvisionError> {
        let Some((program, args)) = self.reload_command.split_first() else {
            return Ok(());
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run_checked("reload", "xray", program, &args, None, self.timeout).await
    }
}

/// Document held in memory. Counts committed mutations and reloads.
pub struct InMemoryConfigResource {
    doc: Mutex<Value>,
    mutations: AtomicUsize,
    reloads: AtomicUsize,
    fail_reload: AtomicBool,
    history: StdMutex<Vec<Value>>,
}

impl InMemoryConfigResource {
    pub fn new(doc: Value) -> Self {
        Self {
            doc: Mutex::new(doc),
            mutations: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
            fail_reload: AtomicBool::new(false),
            history: StdMutex::new(Vec::new()),
        }
    }

    /// Empty vless/vmess/trojan inbounds, in that order.
    pub fn with_default_inbounds() -> Self {
        Self::new(default_document())
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn set_fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    /// Pre-edit snapshots, one per committed mutation.
    pub fn backups(&self) -> Vec<Value> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ServiceConfigResource for InMemoryConfigResource {
    async fn read(&self) -> Result<Value, ProvisionError> {
        Ok(self.doc.lock().await.clone())
    }

    async fn mutate(&self, edit: ConfigMutation) -> Result<(), ProvisionError> {
        let mut doc = self.doc.lock().await;
        let mut draft = doc.clone();
        edit(&mut draft)?;
        if let Ok(mut history) = self.history.lock() {
            history.push(doc.clone());
        }
        *doc = draft;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_reload(&self) -> Result<(), ProvisionError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(ProvisionError::HostOperationFailed {
                operation: "reload",
                username: "xray".to_string(),
                reason: "simulated reload failure".to_string(),
            });
        }
        Ok(())
    }
}

pub fn default_document() -> Value {
    json!({
        "inbounds": [
            {"protocol": "vless", "settings": {"clients": []}},
            {"protocol": "vmess", "settings": {"clients": []}},
            {"protocol": "trojan", "settings": {"clients": []}}
        ]
    })
}

fn protocol_and_fallback(kind: ServiceKind) -> Result<(&'static str, usize), ProvisionError> {
    match kind {
        ServiceKind::Vless => Ok(("vless", 0)),
        ServiceKind::Vmess => Ok(("vmess", 1)),
        ServiceKind::Trojan => Ok(("trojan", 2)),
        ServiceKind::Ssh => Err(ProvisionError::InvalidInput {
            reason: "ssh accounts have no tunnel inbound".to_string(),
        }),
    }
}

/// Index of the inbound serving `kind`: by `protocol` field, else positional.
pub fn inbound_index(doc: &Value, kind: ServiceKind) -> Result<usize, ProvisionError> {
    let (protocol, fallback) = protocol_and_fallback(kind)?;
    let inbounds = doc
        .get("inbounds")
        .and_then(Value::as_array)
        .ok_or_else(|| mutation_error("document has no inbounds array"))?;

    if let Some(idx) = inbounds
        .iter()
        .position(|ib| ib.get("protocol").and_then(Value::as_str) == Some(protocol))
    {
        return Ok(idx);
    }
    if fallback < inbounds.len() {
        return Ok(fallback);
    }
    Err(mutation_error(format!("no inbound for {protocol}")))
}

fn clients_mut(doc: &mut Value, kind: ServiceKind) -> Result<&mut Vec<Value>, ProvisionError> {
    let idx = inbound_index(doc, kind)?;
    let inbound = doc
        .get_mut("inbounds")
        .and_then(Value::as_array_mut)
        .and_then(|inbounds| inbounds.get_mut(idx))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| mutation_error("inbound is not an object"))?;

    let settings = inbound
        .entry("settings")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| mutation_error("inbound settings is not an object"))?;
    settings
        .entry("clients")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| mutation_error("inbound clients is not an array"))
}

/// Client entries of the inbound serving `kind`.
pub fn clients(doc: &Value, kind: ServiceKind) -> Result<Vec<Value>, ProvisionError> {
    let idx = inbound_index(doc, kind)?;
    Ok(doc["inbounds"][idx]["settings"]["clients"]
        .as_array()
        .cloned()
        .unwrap_or_default())
}

pub fn client_entry(
    kind: ServiceKind,
    username: &str,
    credential: &str,
) -> Result<Value, ProvisionError> {
    match kind {
        ServiceKind::Vless => Ok(json!({"id": credential, "email": username})),
        ServiceKind::Vmess => Ok(json!({"id": credential, "alterId": 0, "email": username})),
        ServiceKind::Trojan => Ok(json!({"password": credential, "email": username})),
        ServiceKind::Ssh => Err(ProvisionError::InvalidInput {
            reason: "ssh accounts have no tunnel client entry".to_string(),
        }),
    }
}

/// Append a client. An existing entry for `username` is an error.
pub fn add_client(
    doc: &mut Value,
    kind: ServiceKind,
    username: &str,
    credential: &str,
) -> Result<(), ProvisionError> {
    let entry = client_entry(kind, username, credential)?;
    let clients = clients_mut(doc, kind)?;
    if clients
        .iter()
        .any(|c| c.get("email").and_then(Value::as_str) == Some(username))
    {
        return Err(mutation_error(format!(
            "{kind} client '{username}' already exists"
        )));
    }
    clients.push(entry);
    Ok(())
}

/// Remove every client for `username`. Returns how many were removed.
pub fn remove_client(
    doc: &mut Value,
    kind: ServiceKind,
    username: &str,
) -> Result<usize, ProvisionError> {
    let clients = clients_mut(doc, kind)?;
    let before = clients.len();
    clients.retain(|c| c.get("email").and_then(Value::as_str) != Some(username));
    Ok(before - clients.len())
}
