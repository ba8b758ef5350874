//! Read-evaluate-respond loop for one live connection.

use anyhow::Result;
use serde::Serialize;

use super::{CaptureSession, SessionEvent, SessionState};

/// Message transport for one live connection (a WebSocket, a pipe, a replay).
pub trait SessionTransport {
    /// Next inbound payload. `Ok(None)` means the peer disconnected.
    fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    fn send(&mut self, event: &SessionEvent) -> Result<()>;
}

/// Summary of a finished session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub final_state: SessionState,
    pub frames_received: u64,
    pub frames_evaluated: u64,
    pub events_sent: u64,
}

/// Drive `session` until it reaches a terminal state, the peer disconnects,
/// or the transport fails.
///
/// The next message is read only after the previous event was sent, so a slow
/// detector applies backpressure to the peer. Transport failures end the
/// session without a final event.
pub fn run_session<T>(mut session: CaptureSession, transport: &mut T) -> SessionOutcome
where
    T: SessionTransport + ?Sized,
{
    let mut events_sent = 0u64;

    if let Some(event) = session.start() {
        if transport.send(&event).is_ok() {
            events_sent += 1;
        }
        return outcome(&session, events_sent);
    }

    loop {
        let payload = match transport.recv() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                session.disconnect();
                break;
            }
            Err(err) => {
                log::warn!("CaptureSession {}: transport receive failed: {:#}", session.id(), err);
                session.disconnect();
                break;
            }
        };

        if let Some(event) = session.handle_frame(&payload) {
            if let Err(err) = transport.send(&event) {
                log::warn!("CaptureSession {}: transport send failed: {:#}", session.id(), err);
                session.disconnect();
                break;
            }
            events_sent += 1;
        }
        if session.state().is_terminal() {
            break;
        }
    }

    outcome(&session, events_sent)
}

fn outcome(session: &CaptureSession, events_sent: u64) -> SessionOutcome {
    SessionOutcome {
        final_state: session.state(),
        frames_received: session.frames_received(),
        frames_evaluated: session.frames_evaluated(),
        events_sent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use anyhow::anyhow;

    use crate::artifact::InMemoryArtifactSink;
    use crate::detect::{ClassTable, ModelHandle, RawDetection, ScriptedDetector};
    use crate::error::PipelineError;
    use crate::frame::Frame;
    use crate::ingest::FrameDecoder;
    use crate::session::CaptureSettings;

    struct AnyDecoder;

    impl FrameDecoder for AnyDecoder {
        fn decode(&self, _payload: &[u8]) -> Result<Frame, PipelineError> {
            Frame::from_rgb(vec![0u8; 12], 2, 2)
        }
    }

    #[derive(Default)]
    struct QueueTransport {
        inbound: VecDeque<Vec<u8>>,
        sent: Vec<SessionEvent>,
        fail_recv: bool,
    }

    impl SessionTransport for QueueTransport {
        fn recv(&mut self) -> Result<Option<Vec<u8>>> {
            if self.fail_recv && self.inbound.is_empty() {
                return Err(anyhow!("connection reset"));
            }
            Ok(self.inbound.pop_front())
        }

        fn send(&mut self, event: &SessionEvent) -> Result<()> {
            self.sent.push(event.clone());
            Ok(())
        }
    }

    fn session(model: ModelHandle) -> CaptureSession {
        let settings = CaptureSettings {
            detector_timeout: None,
            ..CaptureSettings::default()
        };
        CaptureSession::new(
            model,
            Arc::new(AnyDecoder),
            Arc::new(InMemoryArtifactSink::new()),
            settings,
        )
    }

    fn transport(frames: usize) -> QueueTransport {
        QueueTransport {
            inbound: (0..frames).map(|i| vec![i as u8]).collect(),
            ..QueueTransport::default()
        }
    }

    #[test]
    fn stops_reading_after_capture() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["pug"]))
            .push_frame(vec![])
            .push_frame(vec![RawDetection::new(0, 0.95, [0.0, 0.0, 1.0, 1.0])]);
        let mut transport = transport(5);
        let outcome = run_session(session(ModelHandle::from_detector(detector)), &mut transport);

        assert_eq!(outcome.final_state, SessionState::Captured);
        assert_eq!(outcome.frames_evaluated, 2);
        assert_eq!(outcome.events_sent, 2);
        assert_eq!(transport.inbound.len(), 3);
        assert!(matches!(transport.sent.last(), Some(SessionEvent::Captured { .. })));
    }

    #[test]
    fn disconnect_closes_silently() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["pug"]));
        let mut transport = transport(2);
        let outcome = run_session(session(ModelHandle::from_detector(detector)), &mut transport);

        assert_eq!(outcome.final_state, SessionState::Closed);
        assert_eq!(transport.sent.len(), 2);
        assert!(transport
            .sent
            .iter()
            .all(|e| matches!(e, SessionEvent::Ok { .. })));
    }

    #[test]
    fn transport_failure_closes_without_event() {
        let detector = ScriptedDetector::new(ClassTable::from_names(["pug"]));
        let mut transport = transport(1);
        transport.fail_recv = true;
        let outcome = run_session(session(ModelHandle::from_detector(detector)), &mut transport);

        assert_eq!(outcome.final_state, SessionState::Closed);
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn rejected_session_sends_one_error_and_reads_nothing() {
        let mut transport = transport(3);
        let outcome = run_session(session(ModelHandle::unavailable("no weights")), &mut transport);

        assert_eq!(outcome.final_state, SessionState::Rejected);
        assert_eq!(outcome.frames_received, 0);
        assert_eq!(transport.inbound.len(), 3);
        assert!(matches!(transport.sent.as_slice(), [SessionEvent::Error { .. }]));
    }
}
