//! The session manager: the catalog of candidate and active sessions.
//!
//! Candidates are device identifiers the connection manager currently
//! fuses; actives are sessions with at least one controller. A device is
//! available when it is a candidate with no active session and no foreign
//! soft lock, or an active session with room and a bound device. Candidate
//! lifecycle, lock flips, and session notices all refresh the published
//! availability view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use edmo_types::AdmissionError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::ControllerHandle;
use super::core::{Session, SessionNotice};
use super::plugin::PluginFactory;
use crate::device::fused::FusedDevice;
use crate::device::manager::DeviceLifecycleEvent;

struct ManagerInner {
    candidates: HashMap<String, Arc<FusedDevice>>,
    actives: HashMap<String, Arc<Session>>,
}

/// Admission front door and availability view over all known devices.
pub struct SessionManager {
    inner: Mutex<ManagerInner>,
    plugin_factory: Option<Arc<dyn PluginFactory>>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    available: watch::Sender<Vec<String>>,
    reconcile_interval: Duration,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Start the manager over a device lifecycle stream.
    pub fn spawn(
        lifecycle: broadcast::Receiver<DeviceLifecycleEvent>,
        plugin_factory: Option<Arc<dyn PluginFactory>>,
        reconcile_interval: Duration,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (available_tx, _) = watch::channel(Vec::new());
        let manager = Arc::new(Self {
            inner: Mutex::new(ManagerInner {
                candidates: HashMap::new(),
                actives: HashMap::new(),
            }),
            plugin_factory,
            notices: notices_tx,
            available: available_tx,
            reconcile_interval,
            cancel: parent.child_token(),
        });
        tokio::spawn(run(manager.clone(), lifecycle, notices_rx));
        manager
    }

    /// Identifiers a new controller could join right now.
    pub fn available_sessions(&self) -> Vec<String> {
        self.available.borrow().clone()
    }

    /// Subscribe to availability changes.
    pub fn watch_available(&self) -> watch::Receiver<Vec<String>> {
        self.available.subscribe()
    }

    /// Admit `user_name` to the device named `identifier`.
    ///
    /// Delegates to the active session when one exists; otherwise creates a
    /// session around the candidate's fused device, honoring its soft lock.
    pub fn attempt_connection_to(
        self: &Arc<Self>,
        identifier: &str,
        user_name: &str,
    ) -> Result<ControllerHandle, AdmissionError> {
        let session = {
            let mut inner = self.lock();
            if let Some(active) = inner.actives.get(identifier) {
                active.clone()
            } else {
                let Some(device) = inner.candidates.get(identifier).cloned() else {
                    return Err(AdmissionError::NoSuchSession(identifier.to_owned()));
                };
                if device.is_locked() {
                    return Err(AdmissionError::LockedByOtherHost(identifier.to_owned()));
                }
                let plugins = self
                    .plugin_factory
                    .as_ref()
                    .map(|factory| factory.build(identifier))
                    .unwrap_or_default();
                info!(identifier, plugins = plugins.len(), "creating session");
                let session = Session::new(
                    identifier,
                    plugins,
                    self.notices.clone(),
                    self.reconcile_interval,
                );
                session.bind_device(device);
                inner.actives.insert(identifier.to_owned(), session.clone());
                session
            }
        };
        let result = session.create_context(user_name);
        self.recompute_available();
        result
    }

    /// Close every active session and stop the manager.
    pub fn shutdown(&self) {
        let actives: Vec<_> = {
            let inner = self.lock();
            inner.actives.values().cloned().collect()
        };
        for session in actives {
            session.close();
        }
        self.cancel.cancel();
    }

    fn recompute_available(&self) {
        let mut available: Vec<String> = {
            let inner = self.lock();
            inner
                .candidates
                .iter()
                .filter_map(|(identifier, device)| {
                    let open = match inner.actives.get(identifier) {
                        None => !device.is_locked(),
                        Some(session) => {
                            !session.is_closed() && !session.is_full() && session.has_device()
                        }
                    };
                    open.then(|| identifier.clone())
                })
                .collect()
        };
        available.sort();
        self.available.send_if_modified(|current| {
            if *current == available {
                return false;
            }
            *current = available;
            true
        });
    }

    fn lock(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().expect("session manager lock poisoned")
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SessionManager")
            .field("candidates", &inner.candidates.len())
            .field("actives", &inner.actives.len())
            .finish()
    }
}

async fn run(
    manager: Arc<SessionManager>,
    mut lifecycle: broadcast::Receiver<DeviceLifecycleEvent>,
    mut notices: mpsc::UnboundedReceiver<SessionNotice>,
) {
    let cancel = manager.cancel.clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = lifecycle.recv() => match event {
                Ok(DeviceLifecycleEvent::DeviceConnected(device)) => {
                    let identifier = device.identifier().to_owned();
                    debug!(identifier = %identifier, "candidate device appeared");
                    {
                        let mut inner = manager.lock();
                        inner.candidates.insert(identifier.clone(), device.clone());
                        if let Some(session) = inner.actives.get(&identifier) {
                            // The device returned while its session survived.
                            session.bind_device(device);
                        }
                    }
                    manager.recompute_available();
                }
                Ok(DeviceLifecycleEvent::DeviceLost(identifier)) => {
                    debug!(identifier = %identifier, "candidate device departed");
                    {
                        let mut inner = manager.lock();
                        inner.candidates.remove(&identifier);
                        if let Some(session) = inner.actives.get(&identifier) {
                            session.unbind_device();
                        }
                    }
                    manager.recompute_available();
                }
                Ok(DeviceLifecycleEvent::DeviceLockChanged { identifier, locked }) => {
                    debug!(identifier = %identifier, locked, "candidate lock flag changed");
                    manager.recompute_available();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "device lifecycle stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            notice = notices.recv() => match notice {
                Some(SessionNotice::Closed(identifier)) => {
                    manager.lock().actives.remove(&identifier);
                    manager.recompute_available();
                }
                Some(SessionNotice::AvailabilityChanged) => {
                    manager.recompute_available();
                }
                None => break,
            },
        }
    }
}
