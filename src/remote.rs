//! Remote collaborators: target naming and object delivery
//!
//! The sweeper and the tracker never build URLs or speak HTTP themselves.
//! They ask a [`TargetResolver`] for the remote name of a logical file and
//! hand a local file to an [`ObjectStore`]. Callers use the resolved value
//! literally; a resolver may return a different target on every call.
//!
//! ## Implementations
//!
//! - [`DiagnosticUrlResolver`] names objects under the diagnostic service,
//!   bucketed by namespace, UTC time (second precision) and pod.
//! - [`StaticResolver`] always returns `{base}/{file}`.
//! - [`HttpObjectStore`] issues blocking `PUT`/`DELETE` requests with `ureq`.
//! - [`MemoryStore`] keeps everything in memory and can be told to fail.

use crate::config::RemoteConfig;
use crate::error::{RelayError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// A local file (or a range of it) to deliver
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    /// Local file holding the bytes to send, starting at its offset 0
    pub path: &'a Path,
    /// Position of the first byte within the logical remote object
    pub offset: u64,
    /// Number of bytes to send
    pub len: u64,
}

impl<'a> Upload<'a> {
    /// A whole-file upload
    pub fn whole(path: &'a Path, len: u64) -> Self {
        Self { path, offset: 0, len }
    }
}

/// Maps a logical file name to a remote target
pub trait TargetResolver: Send + Sync {
    /// Resolve the target for `file_name`
    fn resolve(&self, file_name: &str) -> Result<String>;
}

/// Delivers local files to, and deletes objects from, the remote store
pub trait ObjectStore: Send + Sync {
    /// Deliver `upload` under `target`
    fn put(&self, target: &str, upload: &Upload<'_>) -> Result<()>;

    /// Delete the object at `target`
    fn delete(&self, target: &str) -> Result<()>;
}

/// Resolver producing diagnostic-service URLs
///
/// Targets look like
/// `{service}/diagnostic/{namespace}/{YYYY}/{MM}/{DD}/{HH}/{mm}/{ss}/{pod}/{file}`.
/// Two calls within the same second resolve to the same target.
#[derive(Debug, Clone)]
pub struct DiagnosticUrlResolver {
    remote: RemoteConfig,
}

impl DiagnosticUrlResolver {
    /// Create a resolver for the given remote settings
    pub fn new(remote: RemoteConfig) -> Self {
        Self { remote }
    }

    /// Resolve `file_name` as of `now`
    pub fn resolve_at(&self, file_name: &str, now: DateTime<Utc>) -> Result<String> {
        if file_name.is_empty() || file_name.contains('/') {
            return Err(RelayError::resolve(file_name, "not a plain file name"));
        }
        let service = self.remote.service_url.trim_end_matches('/');
        if service.is_empty() {
            return Err(RelayError::resolve(file_name, "diagnostic service URL is not configured"));
        }
        if self.remote.namespace.is_empty() {
            return Err(RelayError::resolve(file_name, "namespace is not configured"));
        }

        Ok(format!(
            "{}/diagnostic/{}/{}/{}/{}",
            service,
            self.remote.namespace,
            now.format("%Y/%m/%d/%H/%M/%S"),
            self.remote.pod_name,
            file_name
        ))
    }
}

impl TargetResolver for DiagnosticUrlResolver {
    fn resolve(&self, file_name: &str) -> Result<String> {
        self.resolve_at(file_name, Utc::now())
    }
}

/// Resolver that always returns `{base}/{file}`
#[derive(Debug, Clone)]
pub struct StaticResolver {
    base: String,
}

impl StaticResolver {
    /// Create a resolver rooted at `base`
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }
}

impl TargetResolver for StaticResolver {
    fn resolve(&self, file_name: &str) -> Result<String> {
        Ok(format!("{}/{}", self.base.trim_end_matches('/'), file_name))
    }
}

/// Blocking HTTP object store
pub struct HttpObjectStore {
    agent: ureq::Agent,
}

impl HttpObjectStore {
    /// Create a store whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl fmt::Debug for HttpObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpObjectStore").finish_non_exhaustive()
    }
}

impl ObjectStore for HttpObjectStore {
    fn put(&self, target: &str, upload: &Upload<'_>) -> Result<()> {
        let body = File::open(upload.path)?.take(upload.len);

        let mut request = self
            .agent
            .put(target)
            .set("Content-Type", "application/octet-stream")
            .set("Content-Length", &upload.len.to_string());
        if upload.offset > 0 && upload.len > 0 {
            let last = upload.offset + upload.len - 1;
            request = request.set("Content-Range", &format!("bytes {}-{}/*", upload.offset, last));
        }

        trace!("PUT {} ({} bytes at offset {})", target, upload.len, upload.offset);
        request
            .send(body)
            .map(|_| ())
            .map_err(|e| http_error("PUT", target, e))
    }

    fn delete(&self, target: &str) -> Result<()> {
        trace!("DELETE {}", target);
        match self.agent.delete(target).call() {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(404, _)) => {
                debug!("{} was already gone", target);
                Ok(())
            }
            Err(e) => Err(http_error("DELETE", target, e)),
        }
    }
}

fn http_error(method: &'static str, target: &str, error: ureq::Error) -> RelayError {
    match error {
        ureq::Error::Status(status, _) => RelayError::RemoteStatus {
            method,
            target: target.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => RelayError::transport(target, transport.to_string()),
    }
}

/// A put recorded by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPut {
    /// Target it was sent to
    pub target: String,
    /// Offset it claimed
    pub offset: u64,
    /// Bytes received
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    puts: Vec<StoredPut>,
    deletes: Vec<String>,
    objects: BTreeMap<String, Vec<u8>>,
}

/// In-memory object store
///
/// A put at offset 0 replaces the object; a put at a later offset writes
/// the body at that offset, so incremental deliveries to a stable target
/// reassemble the original file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent put fail (or succeed again)
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail (or succeed again)
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Every successful put, in order
    pub fn puts(&self) -> Vec<StoredPut> {
        self.state.lock().puts.clone()
    }

    /// Every successful delete, in order
    pub fn deletes(&self) -> Vec<String> {
        self.state.lock().deletes.clone()
    }

    /// Current content of the object at `target`
    pub fn object(&self, target: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(target).cloned()
    }

    /// Targets currently holding an object
    pub fn targets(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }
}

impl ObjectStore for MemoryStore {
    fn put(&self, target: &str, upload: &Upload<'_>) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(RelayError::RemoteStatus {
                method: "PUT",
                target: target.to_string(),
                status: 503,
            });
        }

        let mut body = Vec::with_capacity(upload.len as usize);
        File::open(upload.path)?.take(upload.len).read_to_end(&mut body)?;

        let mut state = self.state.lock();
        let object = state.objects.entry(target.to_string()).or_default();
        object.truncate(upload.offset as usize);
        object.resize(upload.offset as usize, 0);
        object.extend_from_slice(&body);

        state.puts.push(StoredPut {
            target: target.to_string(),
            offset: upload.offset,
            body,
        });
        Ok(())
    }

    fn delete(&self, target: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RelayError::transport(target, "injected delete failure"));
        }

        let mut state = self.state.lock();
        state.objects.remove(target);
        state.deletes.push(target.to_string());
        Ok(())
    }
}
