use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use crate::detect::backend::{Detector, DetectorCall, TrackSessionId};
use crate::detect::result::{ClassTable, RawDetection};
use crate::error::PipelineError;
use crate::frame::Frame;

type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;
type CallResult = Result<Vec<RawDetection>, PipelineError>;

/// The one detector call a scope may have outstanding.
///
/// A call that outlives its timeout stays parked here. Until it returns, the
/// owning scope issues no further calls: each later frame waits out its own
/// timeout on the parked call instead.
#[derive(Debug, Default)]
pub struct CallSlot {
    pending: Option<Receiver<CallResult>>,
}

impl CallSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timed-out call is still running.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for a parked call until `deadline` (forever with `None`). Returns
    /// true once the slot is free. A late result belongs to a frame that was
    /// already answered and is dropped.
    fn settle(&mut self, deadline: Option<Instant>) -> bool {
        let Some(rx) = self.pending.take() else {
            return true;
        };
        let outcome = match deadline {
            Some(deadline) => {
                rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Err(RecvTimeoutError::Timeout) => {
                self.pending = Some(rx);
                false
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                log::debug!("ModelHandle: timed-out detector call finished");
                true
            }
        }
    }
}

/// Process-wide handle to the loaded detector.
///
/// Initialized once at startup and injected into every job and session. A
/// handle whose initialization failed stays unavailable for the life of the
/// process: every call fails fast with `ModelUnavailable`.
///
/// The detector sits behind a `Mutex` because `Detector` methods take
/// `&mut self`; concurrent scopes serialize on it.
#[derive(Clone)]
pub struct ModelHandle {
    state: Arc<ModelState>,
}

enum ModelState {
    Ready {
        name: &'static str,
        classes: ClassTable,
        detector: SharedDetector,
    },
    Unavailable {
        reason: String,
    },
}

impl ModelHandle {
    /// Build the detector and warm it up. Failures are logged and leave the
    /// handle unavailable rather than aborting the caller.
    pub fn init<F>(factory: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Box<dyn Detector>>,
    {
        let built = factory().and_then(|mut detector| {
            detector.warm_up()?;
            Ok(detector)
        });
        match built {
            Ok(detector) => Self::from_boxed(detector),
            Err(err) => {
                log::error!("ModelHandle: detector failed to initialize: {:#}", err);
                Self::unavailable(format!("{:#}", err))
            }
        }
    }

    pub fn from_detector<D: Detector + 'static>(detector: D) -> Self {
        Self::from_boxed(Box::new(detector))
    }

    fn from_boxed(detector: Box<dyn Detector>) -> Self {
        let name = detector.name();
        let classes = detector.class_table();
        log::info!(
            "ModelHandle: detector '{}' ready ({} classes)",
            name,
            classes.len()
        );
        Self {
            state: Arc::new(ModelState::Ready {
                name,
                classes,
                detector: Arc::new(Mutex::new(detector)),
            }),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ModelState::Unavailable {
                reason: reason.into(),
            }),
        }
    }

    pub fn ready(&self) -> bool {
        matches!(*self.state, ModelState::Ready { .. })
    }

    pub fn ensure_ready(&self) -> Result<(), PipelineError> {
        match &*self.state {
            ModelState::Ready { .. } => Ok(()),
            ModelState::Unavailable { reason } => {
                Err(PipelineError::ModelUnavailable(reason.clone()))
            }
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        match &*self.state {
            ModelState::Ready { name, .. } => Some(*name),
            ModelState::Unavailable { .. } => None,
        }
    }

    pub fn classes(&self) -> Result<&ClassTable, PipelineError> {
        match &*self.state {
            ModelState::Ready { classes, .. } => Ok(classes),
            ModelState::Unavailable { reason } => {
                Err(PipelineError::ModelUnavailable(reason.clone()))
            }
        }
    }

    fn detector(&self) -> Result<&SharedDetector, PipelineError> {
        match &*self.state {
            ModelState::Ready { detector, .. } => Ok(detector),
            ModelState::Unavailable { reason } => {
                Err(PipelineError::ModelUnavailable(reason.clone()))
            }
        }
    }

    /// Run one detector call on `frame` for the scope that owns `slot`.
    ///
    /// With a timeout, the call runs on a helper thread and expiry yields
    /// `DetectorTimeout`. The expired call is parked in `slot`; while it runs,
    /// later calls through the same slot wait for it within their own timeout
    /// and never reach the detector, so a scope has at most one call in
    /// flight and its calls arrive in frame order.
    pub fn invoke(
        &self,
        slot: &mut CallSlot,
        frame: &Frame,
        call: DetectorCall,
        timeout: Option<Duration>,
    ) -> Result<Vec<RawDetection>, PipelineError> {
        let detector = self.detector()?;
        let Some(timeout) = timeout else {
            slot.settle(None);
            let mut guard = lock_detector(detector)?;
            return call.run(&mut **guard, frame).map_err(PipelineError::from);
        };

        let deadline = Instant::now() + timeout;
        if !slot.settle(Some(deadline)) {
            log::debug!(
                "ModelHandle: frame {} not sent, earlier call still running",
                frame.index
            );
            return Err(PipelineError::DetectorTimeout(timeout));
        }

        let (tx, rx) = mpsc::channel();
        let detector = Arc::clone(detector);
        let frame = frame.clone();
        std::thread::Builder::new()
            .name("detector-call".to_string())
            .spawn(move || {
                let result = lock_detector(&detector).and_then(|mut guard| {
                    call.run(&mut **guard, &frame).map_err(PipelineError::from)
                });
                // Receiver is gone once the owning scope has been dropped.
                let _ = tx.send(result);
            })
            .map_err(|e| PipelineError::Internal(format!("failed to spawn detector call: {}", e)))?;

        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                slot.pending = Some(rx);
                Err(PipelineError::DetectorTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PipelineError::Internal(
                "detector call panicked".to_string(),
            )),
        }
    }

    /// Tell the detector a tracking scope is closed. Never blocks: when the
    /// detector is busy the release runs on a helper thread after the current
    /// call.
    pub fn end_track_session(&self, session: &TrackSessionId) {
        let Ok(detector) = self.detector() else {
            return;
        };
        match detector.try_lock() {
            Ok(mut guard) => guard.end_session(session),
            Err(TryLockError::WouldBlock) => {
                let detector = Arc::clone(detector);
                let owned_session = session.clone();
                let spawned = std::thread::Builder::new()
                    .name("detector-release".to_string())
                    .spawn(move || match lock_detector(&detector) {
                        Ok(mut guard) => guard.end_session(&owned_session),
                        Err(err) => log::warn!(
                            "ModelHandle: could not end track session {}: {}",
                            owned_session,
                            err
                        ),
                    });
                if let Err(err) = spawned {
                    log::warn!("ModelHandle: could not defer end of {}: {}", session, err);
                }
            }
            Err(TryLockError::Poisoned(_)) => log::warn!(
                "ModelHandle: could not end track session {}: lock poisoned",
                session
            ),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state {
            ModelState::Ready { name, classes, .. } => f
                .debug_struct("ModelHandle")
                .field("detector", name)
                .field("classes", &classes.len())
                .finish(),
            ModelState::Unavailable { reason } => f
                .debug_struct("ModelHandle")
                .field("unavailable", reason)
                .finish(),
        }
    }
}

fn lock_detector(
    detector: &SharedDetector,
) -> Result<std::sync::MutexGuard<'_, Box<dyn Detector>>, PipelineError> {
    detector
        .lock()
        .map_err(|_| PipelineError::Internal("detector lock poisoned".to_string()))
}
