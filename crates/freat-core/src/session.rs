//! Per-client session state.
//!
//! Each connected client owns one session. A session is either unattached
//! or holds exactly one process attachment, and a scan episode can only
//! exist inside an attachment. All command handlers for a session run under
//! its inner lock, so a scan and a result retrieval on the same session
//! never interleave. Attach and detach to the same target PID are
//! additionally serialized across sessions.

use crate::backend::{Instrumentation, ProcessHandle};
use crate::scan::ScanState;
use freat_common::{AttachTarget, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live attachment: the handle exists exactly as long as the pid is set,
/// and the scan episode exists only inside the attachment.
pub struct Attachment {
    pub(crate) pid: u32,
    pub(crate) handle: Box<dyn ProcessHandle>,
    pub(crate) scan: Option<ScanState>,
}

struct SessionInner {
    attachment: Option<Attachment>,
}

struct Session {
    inner: Mutex<SessionInner>,
}

/// Owns every session and the shared instrumentation backend
pub struct SessionManager {
    backend: Arc<dyn Instrumentation>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    // Serializes attach/detach per target PID across sessions
    attach_locks: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Instrumentation>) -> Self {
        Self {
            backend,
            sessions: RwLock::new(HashMap::new()),
            attach_locks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Instrumentation> {
        &self.backend
    }

    /// Create a fresh unattached session
    pub fn open(&self) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().insert(
            id,
            Arc::new(Session {
                inner: Mutex::new(SessionInner { attachment: None }),
            }),
        );
        debug!(target: "freat_core::session", session = %id, "Session opened");
        id
    }

    /// Tear down and forget a session. Safe to call for a session that was
    /// already closed, and never fails: teardown errors are logged only.
    pub fn close(&self, id: SessionId) {
        let session = self.sessions.write().remove(&id);
        if let Some(session) = session {
            self.release_current(id, &session);
            debug!(target: "freat_core::session", session = %id, "Session closed");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Attach the session to a process, replacing any prior attachment.
    ///
    /// A failed attach leaves the session unattached. Returns the resolved
    /// PID on success.
    pub fn attach(&self, id: SessionId, target: &AttachTarget) -> Result<u32> {
        let session = self.session(id)?;

        // Any prior attachment goes away first, whether or not the new
        // attach succeeds; a failure below leaves the session detached,
        // never half-attached
        self.release_current(id, &session);

        let pid = self.resolve(target)?;
        let pid_lock = self.pid_lock(pid);
        let _serialize = pid_lock.lock();
        let mut inner = session.inner.lock();
        if let Some(previous) = inner.attachment.take() {
            teardown(id, previous);
        }

        let handle = self.backend.attach(pid)?;
        inner.attachment = Some(Attachment {
            pid,
            handle,
            scan: None,
        });
        info!(target: "freat_core::session", session = %id, pid = pid, "Attached");
        Ok(pid)
    }

    /// Detach the session from its process. Backend detach failures are
    /// logged, not surfaced: the session ends up unattached either way.
    pub fn detach(&self, id: SessionId) -> Result<u32> {
        let session = self.session(id)?;

        let pid = session
            .inner
            .lock()
            .attachment
            .as_ref()
            .map(|a| a.pid)
            .ok_or(Error::NotAttached)?;

        let pid_lock = self.pid_lock(pid);
        let _serialize = pid_lock.lock();
        let mut inner = session.inner.lock();

        // Re-check under the pid lock in case another command raced us
        let attachment = inner.attachment.take().ok_or(Error::NotAttached)?;
        let pid = attachment.pid;
        teardown(id, attachment);
        info!(target: "freat_core::session", session = %id, pid = pid, "Detached");
        Ok(pid)
    }

    /// Run `f` against the session's attachment under the session lock.
    /// Fails with `NotAttached` when the session has no process.
    pub fn with_attachment<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Attachment) -> Result<R>,
    ) -> Result<R> {
        let session = self.session(id)?;
        let mut inner = session.inner.lock();
        let attachment = inner.attachment.as_mut().ok_or(Error::NotAttached)?;
        f(attachment)
    }

    /// The PID the session is attached to, if any
    pub fn attached_pid(&self, id: SessionId) -> Result<Option<u32>> {
        let session = self.session(id)?;
        let inner = session.inner.lock();
        Ok(inner.attachment.as_ref().map(|a| a.pid))
    }

    /// Tear down the session's current attachment, if any, under its PID
    /// lock. Errors are swallowed; the session ends up unattached.
    fn release_current(&self, id: SessionId, session: &Arc<Session>) {
        let Some(pid) = session.inner.lock().attachment.as_ref().map(|a| a.pid) else {
            return;
        };
        let pid_lock = self.pid_lock(pid);
        let _serialize = pid_lock.lock();
        if let Some(previous) = session.inner.lock().attachment.take() {
            info!(
                target: "freat_core::session",
                session = %id,
                pid = previous.pid,
                "Releasing attachment"
            );
            teardown(id, previous);
        }
    }

    fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown session {id}")))
    }

    fn pid_lock(&self, pid: u32) -> Arc<Mutex<()>> {
        self.attach_locks
            .lock()
            .entry(pid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve an attach target to a PID. Names must match exactly one
    /// running process.
    fn resolve(&self, target: &AttachTarget) -> Result<u32> {
        match target {
            AttachTarget::Pid(pid) => Ok(*pid),
            AttachTarget::Name(name) => {
                let matches: Vec<u32> = self
                    .backend
                    .processes()?
                    .into_iter()
                    .filter(|p| p.name == *name)
                    .map(|p| p.pid)
                    .collect();
                match matches.as_slice() {
                    [] => Err(Error::ProcessNotFound(name.clone())),
                    [pid] => Ok(*pid),
                    pids => Err(Error::backend(format!(
                        "ambiguous process name '{name}': pids {pids:?}"
                    ))),
                }
            }
        }
    }
}

fn teardown(id: SessionId, attachment: Attachment) {
    if let Err(e) = attachment.handle.detach() {
        warn!(
            target: "freat_core::session",
            session = %id,
            pid = attachment.pid,
            error = %e,
            "Detach failed during teardown"
        );
    }
}
