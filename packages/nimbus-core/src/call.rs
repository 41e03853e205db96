//! # Call Session State Machine
//!
//! One-to-one audio/video call negotiation over the relay.
//!
//! States move strictly forward:
//!
//! ```text
//! idle ──initiate──► outgoing ──accept received──► connected ──► ended
//!   └──offer received──► incoming ──accept──────► connected ──► ended
//! ```
//!
//! `ended` is terminal; a fresh session starts from `idle` again once the
//! ended session is acknowledged. The machine owns all of its state and
//! talks to the world through three seams: a [`NegotiationFactory`] that
//! produces one [`NegotiationHandle`] per session, a [`MediaSource`] for
//! local capture, and mpsc senders for outbound relay events and
//! user-visible notifications. All three are trait objects, so the whole
//! machine is unit tested with fakes.
//!
//! The ordering hazard this module exists to resolve: remote network
//! candidates can arrive before the remote description they belong to,
//! because candidates ride an independent, lower-latency event while the
//! description exchange needs an extra relay round trip. Candidates that
//! arrive early are buffered in arrival order and drained exactly once,
//! immediately after the remote description installs; candidates arriving
//! later are applied directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::relay::{IceCandidate, RelayClientEvent, SessionDescription};

// ── Status & roles ────────────────────────────────────────────────────────────

/// Lifecycle of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Outgoing,
    Incoming,
    Connected,
    Ended,
}

/// Which side of the negotiation this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Caller,
    Callee,
}

/// Status reported by the negotiation resource itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Connected,
    Disconnected,
    Failed(String),
}

/// User-visible call notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// An incoming call is ringing.
    IncomingRing { from: String },
    /// The session moved to a new status.
    StatusChanged(CallStatus),
    /// A user-visible failure (media denied, negotiation lost, timeout).
    Failed { message: String },
}

// ── Capability seams ──────────────────────────────────────────────────────────

/// One peer-to-peer negotiation resource. Created per session, closed on
/// teardown. The concrete implementation wraps the platform's peer
/// connection; tests use a recording fake.
#[async_trait]
pub trait NegotiationHandle: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription>;
    async fn create_answer(&mut self) -> Result<SessionDescription>;
    async fn install_remote_description(&mut self, description: SessionDescription) -> Result<()>;
    async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()>;
    async fn close(&mut self);
}

/// Creates a fresh negotiation handle for each session.
pub trait NegotiationFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn NegotiationHandle>>;
}

/// Live local capture tracks. Stopped exactly once on teardown.
pub trait MediaTracks: Send {
    fn stop(&mut self);
}

/// Acquires local audio/video capture. Acquisition can suspend (permission
/// prompt) and can fail (device denied/unavailable).
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MediaTracks>>;
}

/// Read-only reachability view consulted before dialing. Implemented by
/// the session store, which tracks the relay's presence updates.
pub trait ReachabilityView: Send + Sync {
    fn is_reachable(&self, identity: &str) -> bool;
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Call behavior knobs.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How long an outgoing call rings, and an incoming call waits for
    /// accept, before it is ended as unanswered.
    pub ring_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(60),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct CallSession {
    remote: String,
    role: NegotiationRole,
    status: CallStatus,
    handle: Option<Box<dyn NegotiationHandle>>,
    media: Option<Box<dyn MediaTracks>>,
    /// Offer stashed on the callee side until the user accepts.
    pending_offer: Option<SessionDescription>,
    /// Remote candidates that arrived before the remote description.
    pending_remote_candidates: Vec<IceCandidate>,
    remote_description_installed: bool,
    ring_deadline: Option<Instant>,
    torn_down: bool,
}

impl CallSession {
    fn new(remote: String, role: NegotiationRole, status: CallStatus) -> Self {
        Self {
            remote,
            role,
            status,
            handle: None,
            media: None,
            pending_offer: None,
            pending_remote_candidates: Vec::new(),
            remote_description_installed: false,
            ring_deadline: None,
            torn_down: false,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Drives the call session state machine for one local identity.
///
/// Single-threaded cooperative use: the owning task calls these methods in
/// sequence, so the current status is the only guard needed against
/// conflicting transitions. At most one session exists at a time; an ended
/// session lingers as a tombstone until acknowledged or replaced.
pub struct CallManager {
    local_identity: String,
    config: CallConfig,
    factory: Box<dyn NegotiationFactory>,
    media: Box<dyn MediaSource>,
    reachability: Arc<dyn ReachabilityView>,
    relay_tx: mpsc::UnboundedSender<RelayClientEvent>,
    events_tx: mpsc::UnboundedSender<CallEvent>,
    session: Option<CallSession>,
}

impl CallManager {
    pub fn new(
        local_identity: impl Into<String>,
        config: CallConfig,
        factory: Box<dyn NegotiationFactory>,
        media: Box<dyn MediaSource>,
        reachability: Arc<dyn ReachabilityView>,
        relay_tx: mpsc::UnboundedSender<RelayClientEvent>,
        events_tx: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            local_identity: local_identity.into(),
            config,
            factory,
            media,
            reachability,
            relay_tx,
            events_tx,
            session: None,
        }
    }

    /// Current session status; `Idle` when no session exists.
    pub fn status(&self) -> CallStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(CallStatus::Idle)
    }

    /// The other participant, while a session exists.
    pub fn remote(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.remote.as_str())
    }

    /// Whether a non-terminal session exists.
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.status != CallStatus::Ended)
            .unwrap_or(false)
    }

    /// Drop an ended session's tombstone, returning to `idle`.
    pub fn acknowledge_ended(&mut self) {
        if self.status() == CallStatus::Ended {
            self.session = None;
        }
    }

    // ── User-driven transitions ───────────────────────────────────────────

    /// Start a call to `target`.
    ///
    /// The reachability check happens before any resource is touched: an
    /// unreachable target never creates a negotiation handle and leaves
    /// the machine in `idle`.
    pub async fn initiate(&mut self, target: &str) -> Result<()> {
        if self.is_active() {
            return Err(Error::CallBusy);
        }
        if !self.reachability.is_reachable(target) {
            let err = Error::Unreachable(target.to_string());
            self.emit(CallEvent::Failed {
                message: err.to_string(),
            });
            return Err(err);
        }

        // Session installed before the first suspension point so the
        // status guard rejects a conflicting transition while media
        // acquisition or offer creation is in flight.
        self.session = Some(CallSession::new(
            target.to_string(),
            NegotiationRole::Caller,
            CallStatus::Outgoing,
        ));

        let media = match self.media.acquire().await {
            Ok(tracks) => tracks,
            Err(err) => {
                self.session = None;
                self.emit(CallEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };
        // Park media on the session immediately so every failure path
        // below can release it.
        if let Some(session) = self.session.as_mut() {
            session.media = Some(media);
        }

        let mut handle = match self.factory.create() {
            Ok(handle) => handle,
            Err(err) => {
                self.release_media_of_session();
                self.session = None;
                self.emit(CallEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let offer = match handle.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                if let Some(session) = self.session.as_mut() {
                    session.handle = Some(handle);
                }
                self.teardown(false).await;
                self.emit(CallEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("session vanished during initiate".into()))?;
        session.handle = Some(handle);
        session.ring_deadline = Some(Instant::now() + self.config.ring_timeout);

        self.send_relay(RelayClientEvent::CallInitiate {
            to: target.to_string(),
            offer,
        });
        self.emit(CallEvent::StatusChanged(CallStatus::Outgoing));
        tracing::info!(
            local = self.local_identity.as_str(),
            remote = target,
            "Call initiated"
        );
        Ok(())
    }

    /// Accept the ringing incoming call.
    pub async fn accept(&mut self) -> Result<()> {
        if self.status() != CallStatus::Incoming {
            return Err(Error::InvalidCallState(
                "no incoming call to accept".to_string(),
            ));
        }

        let mut handle = match self.factory.create() {
            Ok(handle) => handle,
            Err(err) => {
                self.fail_session(err.to_string()).await;
                return Err(err);
            }
        };

        let offer = self
            .session
            .as_mut()
            .and_then(|session| session.pending_offer.take())
            .ok_or_else(|| Error::Internal("incoming session without offer".into()))?;

        if let Err(err) = handle.install_remote_description(offer).await {
            if let Some(session) = self.session.as_mut() {
                session.handle = Some(handle);
            }
            self.fail_session(err.to_string()).await;
            return Err(err);
        }

        // Remote description is in: drain the early candidates exactly
        // once, in arrival order, before anything else touches the handle.
        let queued = match self.session.as_mut() {
            Some(session) => {
                session.remote_description_installed = true;
                std::mem::take(&mut session.pending_remote_candidates)
            }
            None => Vec::new(),
        };
        for candidate in queued {
            if let Err(err) = handle.add_remote_candidate(candidate).await {
                tracing::warn!(error = %err, "Failed to apply buffered candidate");
            }
        }

        let answer = match handle.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                if let Some(session) = self.session.as_mut() {
                    session.handle = Some(handle);
                }
                self.fail_session(err.to_string()).await;
                return Err(err);
            }
        };

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("session vanished during accept".into()))?;
        session.handle = Some(handle);
        session.status = CallStatus::Connected;
        session.ring_deadline = None;
        let remote = session.remote.clone();

        self.send_relay(RelayClientEvent::CallAccept { to: remote, answer });
        self.emit(CallEvent::StatusChanged(CallStatus::Connected));
        Ok(())
    }

    /// Reject the ringing incoming call.
    pub async fn reject(&mut self) -> Result<()> {
        if self.status() != CallStatus::Incoming {
            return Err(Error::InvalidCallState(
                "no incoming call to reject".to_string(),
            ));
        }
        self.teardown(true).await;
        Ok(())
    }

    /// Hang up whatever call is in progress. Safe to call at any time;
    /// repeated calls are no-ops.
    pub async fn hang_up(&mut self) {
        if self.is_active() {
            self.teardown(true).await;
        }
    }

    // ── Relay-driven transitions ──────────────────────────────────────────

    /// An offer arrived. Rings locally, or answers busy when a session
    /// already exists.
    ///
    /// No reachability check happens here: the offer may outrun the
    /// presence update announcing its sender, and that race is legal.
    pub async fn handle_incoming(&mut self, from: &str, offer: SessionDescription) -> Result<()> {
        if self.is_active() {
            // Busy signal: the existing session is untouched and the
            // second caller gets an immediate terminate.
            tracing::info!(
                from = from,
                current = self.remote().unwrap_or_default(),
                "Rejecting call while busy"
            );
            self.send_relay(RelayClientEvent::CallTerminate {
                to: from.to_string(),
            });
            return Ok(());
        }

        self.session = Some(CallSession::new(
            from.to_string(),
            NegotiationRole::Callee,
            CallStatus::Incoming,
        ));

        let media = match self.media.acquire().await {
            Ok(tracks) => tracks,
            Err(err) => {
                self.session = None;
                // Don't leave the caller ringing against a dead callee.
                self.send_relay(RelayClientEvent::CallTerminate {
                    to: from.to_string(),
                });
                self.emit(CallEvent::Failed {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("session vanished during ring setup".into()))?;
        session.media = Some(media);
        session.pending_offer = Some(offer);
        session.ring_deadline = Some(Instant::now() + self.config.ring_timeout);

        self.emit(CallEvent::IncomingRing {
            from: from.to_string(),
        });
        self.emit(CallEvent::StatusChanged(CallStatus::Incoming));
        Ok(())
    }

    /// The callee accepted our outgoing call.
    pub async fn handle_accept(&mut self, answer: SessionDescription) -> Result<()> {
        let valid = matches!(
            self.session.as_ref(),
            Some(session)
                if session.status == CallStatus::Outgoing
                    && session.role == NegotiationRole::Caller
        );
        if !valid {
            // Late or duplicate accept; transitions never move backwards.
            tracing::debug!(status = ?self.status(), "Ignoring call-accept");
            return Ok(());
        }

        let mut handle = self
            .session
            .as_mut()
            .and_then(|s| s.handle.take())
            .ok_or_else(|| Error::Internal("outgoing session without handle".into()))?;

        if let Err(err) = handle.install_remote_description(answer).await {
            if let Some(session) = self.session.as_mut() {
                session.handle = Some(handle);
            }
            self.fail_session(err.to_string()).await;
            return Err(err);
        }

        let queued = match self.session.as_mut() {
            Some(session) => {
                session.remote_description_installed = true;
                std::mem::take(&mut session.pending_remote_candidates)
            }
            None => Vec::new(),
        };
        for candidate in queued {
            if let Err(err) = handle.add_remote_candidate(candidate).await {
                tracing::warn!(error = %err, "Failed to apply buffered candidate");
            }
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("session vanished during accept".into()))?;
        session.handle = Some(handle);
        session.status = CallStatus::Connected;
        session.ring_deadline = None;

        self.emit(CallEvent::StatusChanged(CallStatus::Connected));
        Ok(())
    }

    /// A remote network candidate arrived. Buffered until the remote
    /// description is installed, applied directly afterwards.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        let session = match self.session.as_mut() {
            Some(session) if session.status != CallStatus::Ended => session,
            // Candidates straggling in after teardown are expected noise.
            _ => return Ok(()),
        };

        if session.remote_description_installed {
            if let Some(handle) = session.handle.as_mut() {
                if let Err(err) = handle.add_remote_candidate(candidate).await {
                    tracing::warn!(error = %err, "Failed to apply candidate");
                }
            }
        } else {
            session.pending_remote_candidates.push(candidate);
        }
        Ok(())
    }

    /// The other side ended the call. Never echoed back.
    pub async fn handle_terminate(&mut self) {
        if self.is_active() {
            self.teardown(false).await;
        }
    }

    /// The negotiation resource reported a status change.
    pub async fn handle_link_status(&mut self, status: LinkStatus) {
        match status {
            LinkStatus::Connected => {
                // Status refinement only; no message is emitted to the peer.
                if self.status() == CallStatus::Connected {
                    tracing::debug!("Peer link established");
                }
            }
            LinkStatus::Connecting => {}
            LinkStatus::Disconnected | LinkStatus::Failed(_) => {
                if self.is_active() {
                    let message = match status {
                        LinkStatus::Failed(reason) => {
                            Error::NegotiationFailed(reason).to_string()
                        }
                        _ => Error::NegotiationFailed("connection lost".to_string()).to_string(),
                    };
                    self.teardown(true).await;
                    self.emit(CallEvent::Failed { message });
                }
            }
        }
    }

    /// The relay connection itself dropped: the session cannot survive and
    /// a terminate could not be delivered anyway.
    pub async fn handle_relay_disconnected(&mut self) {
        if self.is_active() {
            self.teardown(false).await;
        }
    }

    /// Ring timeout sweep; called periodically by the owning event loop.
    pub async fn check_ring_timeout(&mut self, now: Instant) {
        let expired = matches!(
            self.session.as_ref(),
            Some(session)
                if matches!(session.status, CallStatus::Outgoing | CallStatus::Incoming)
                    && session.ring_deadline.map(|d| now >= d).unwrap_or(false)
        );
        if expired {
            self.teardown(true).await;
            self.emit(CallEvent::Failed {
                message: "Call was not answered.".to_string(),
            });
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Release everything the session holds. Idempotent: overlapping
    /// hangup and failure callbacks run the release path once, emit at
    /// most one terminate notice, and always land in `ended`.
    async fn teardown(&mut self, notify_peer: bool) {
        let session = match self.session.as_mut() {
            Some(session) if !session.torn_down => session,
            _ => return,
        };
        session.torn_down = true;
        session.status = CallStatus::Ended;
        session.pending_offer = None;
        session.pending_remote_candidates.clear();
        session.ring_deadline = None;

        if let Some(mut media) = session.media.take() {
            media.stop();
        }
        let remote = session.remote.clone();
        let handle = session.handle.take();
        if let Some(mut handle) = handle {
            handle.close().await;
        }

        if notify_peer {
            self.send_relay(RelayClientEvent::CallTerminate { to: remote });
        }
        self.emit(CallEvent::StatusChanged(CallStatus::Ended));
        tracing::info!(notify_peer = notify_peer, "Call ended");
    }

    /// Negotiation failure mid-transition: notify the peer, end, surface.
    async fn fail_session(&mut self, message: String) {
        self.teardown(true).await;
        self.emit(CallEvent::Failed { message });
    }

    fn release_media_of_session(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if let Some(mut media) = session.media.take() {
                media.stop();
            }
        }
    }

    fn send_relay(&self, event: RelayClientEvent) {
        if self.relay_tx.send(event).is_err() {
            tracing::warn!("Relay outbox closed; dropping event");
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events_tx.send(event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every operation performed on it, in order.
    struct FakeHandle {
        log: Arc<Mutex<Vec<String>>>,
        fail_install: bool,
    }

    #[async_trait]
    impl NegotiationHandle for FakeHandle {
        async fn create_offer(&mut self) -> Result<SessionDescription> {
            self.log.lock().push("create_offer".to_string());
            Ok(SessionDescription::offer("local-offer"))
        }

        async fn create_answer(&mut self) -> Result<SessionDescription> {
            self.log.lock().push("create_answer".to_string());
            Ok(SessionDescription::answer("local-answer"))
        }

        async fn install_remote_description(
            &mut self,
            description: SessionDescription,
        ) -> Result<()> {
            if self.fail_install {
                return Err(Error::NegotiationFailed("install failed".to_string()));
            }
            self.log
                .lock()
                .push(format!("install_remote:{}", description.sdp_type));
            Ok(())
        }

        async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
            self.log
                .lock()
                .push(format!("add_candidate:{}", candidate.candidate));
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().push("close".to_string());
        }
    }

    struct FakeFactory {
        log: Arc<Mutex<Vec<String>>>,
        created: Arc<AtomicUsize>,
        fail_install: bool,
    }

    impl NegotiationFactory for FakeFactory {
        fn create(&self) -> Result<Box<dyn NegotiationHandle>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeHandle {
                log: self.log.clone(),
                fail_install: self.fail_install,
            }))
        }
    }

    struct FakeTracks {
        stopped: Arc<AtomicBool>,
    }

    impl MediaTracks for FakeTracks {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct FakeMedia {
        fail: bool,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MediaSource for FakeMedia {
        async fn acquire(&self) -> Result<Box<dyn MediaTracks>> {
            if self.fail {
                Err(Error::MediaUnavailable("permission denied".to_string()))
            } else {
                Ok(Box::new(FakeTracks {
                    stopped: self.stopped.clone(),
                }))
            }
        }
    }

    struct FakeReachability {
        reachable: HashSet<String>,
    }

    impl ReachabilityView for FakeReachability {
        fn is_reachable(&self, identity: &str) -> bool {
            self.reachable.contains(identity)
        }
    }

    struct Rig {
        manager: CallManager,
        relay_rx: mpsc::UnboundedReceiver<RelayClientEvent>,
        events_rx: mpsc::UnboundedReceiver<CallEvent>,
        handle_log: Arc<Mutex<Vec<String>>>,
        handles_created: Arc<AtomicUsize>,
        media_stopped: Arc<AtomicBool>,
    }

    fn rig_for(identity: &str, reachable: &[&str]) -> Rig {
        rig_with(identity, reachable, false, false)
    }

    fn rig_with(identity: &str, reachable: &[&str], media_fails: bool, install_fails: bool) -> Rig {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle_log = Arc::new(Mutex::new(Vec::new()));
        let handles_created = Arc::new(AtomicUsize::new(0));
        let media_stopped = Arc::new(AtomicBool::new(false));

        let manager = CallManager::new(
            identity,
            CallConfig::default(),
            Box::new(FakeFactory {
                log: handle_log.clone(),
                created: handles_created.clone(),
                fail_install: install_fails,
            }),
            Box::new(FakeMedia {
                fail: media_fails,
                stopped: media_stopped.clone(),
            }),
            Arc::new(FakeReachability {
                reachable: reachable.iter().map(|s| s.to_string()).collect(),
            }),
            relay_tx,
            events_tx,
        );

        Rig {
            manager,
            relay_rx,
            events_rx,
            handle_log,
            handles_created,
            media_stopped,
        }
    }

    fn candidate(label: &str) -> IceCandidate {
        IceCandidate {
            candidate: label.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn drain_relay(rx: &mut mpsc::UnboundedReceiver<RelayClientEvent>) -> Vec<RelayClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn terminate_count(events: &[RelayClientEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, RelayClientEvent::CallTerminate { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_initiate_to_unreachable_target_creates_nothing() {
        let mut rig = rig_for("alice", &[]);

        let err = rig.manager.initiate("bob").await.unwrap_err();
        assert!(matches!(err, Error::Unreachable(_)));
        assert_eq!(rig.manager.status(), CallStatus::Idle);
        assert_eq!(rig.handles_created.load(Ordering::SeqCst), 0);
        assert!(drain_relay(&mut rig.relay_rx).is_empty());

        // The failure is user-visible.
        assert!(matches!(
            rig.events_rx.try_recv().unwrap(),
            CallEvent::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_initiate_sends_offer_and_rings() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Outgoing);
        assert_eq!(rig.manager.remote(), Some("bob"));

        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayClientEvent::CallInitiate { to, offer } => {
                assert_eq!(to, "bob");
                assert_eq!(offer.sdp_type, "offer");
            }
            other => panic!("Expected CallInitiate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_media_failure_aborts_to_idle() {
        let mut rig = rig_with("alice", &["bob"], true, false);

        let err = rig.manager.initiate("bob").await.unwrap_err();
        assert!(matches!(err, Error::MediaUnavailable(_)));
        assert_eq!(rig.manager.status(), CallStatus::Idle);
        assert_eq!(rig.handles_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_initiate_while_busy_is_rejected() {
        let mut rig = rig_for("alice", &["bob", "carol"]);

        rig.manager.initiate("bob").await.unwrap();
        let err = rig.manager.initiate("carol").await.unwrap_err();
        assert!(matches!(err, Error::CallBusy));
        assert_eq!(rig.manager.remote(), Some("bob"));
    }

    #[tokio::test]
    async fn test_callee_buffers_candidates_until_accept_then_drains_in_order() {
        let mut rig = rig_for("bob", &[]);

        rig.manager
            .handle_incoming("alice", SessionDescription::offer("remote-offer"))
            .await
            .unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Incoming);

        // Candidates outrun the accept — they must queue.
        rig.manager.handle_candidate(candidate("c1")).await.unwrap();
        rig.manager.handle_candidate(candidate("c2")).await.unwrap();
        assert!(rig.handle_log.lock().is_empty());

        rig.manager.accept().await.unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Connected);

        // Exactly once, in arrival order, before the answer is created.
        let log = rig.handle_log.lock().clone();
        assert_eq!(
            log,
            vec![
                "install_remote:offer",
                "add_candidate:c1",
                "add_candidate:c2",
                "create_answer",
            ]
        );

        // Late candidates bypass the (now empty) queue.
        rig.manager.handle_candidate(candidate("c3")).await.unwrap();
        assert_eq!(
            rig.handle_log.lock().last().map(String::as_str),
            Some("add_candidate:c3")
        );
    }

    #[tokio::test]
    async fn test_caller_buffers_candidates_until_answer_installed() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager.handle_candidate(candidate("b1")).await.unwrap();
        rig.manager.handle_candidate(candidate("b2")).await.unwrap();

        let before: Vec<String> = rig.handle_log.lock().clone();
        assert_eq!(before, vec!["create_offer"]);

        rig.manager
            .handle_accept(SessionDescription::answer("remote-answer"))
            .await
            .unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Connected);

        let log = rig.handle_log.lock().clone();
        assert_eq!(
            log,
            vec![
                "create_offer",
                "install_remote:answer",
                "add_candidate:b1",
                "add_candidate:b2",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_accept_is_ignored() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager
            .handle_accept(SessionDescription::answer("a1"))
            .await
            .unwrap();
        rig.manager
            .handle_accept(SessionDescription::answer("a2"))
            .await
            .unwrap();

        let installs = rig
            .handle_log
            .lock()
            .iter()
            .filter(|op| op.starts_with("install_remote"))
            .count();
        assert_eq!(installs, 1);
    }

    #[tokio::test]
    async fn test_double_teardown_emits_exactly_one_terminate() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager
            .handle_accept(SessionDescription::answer("a"))
            .await
            .unwrap();
        drain_relay(&mut rig.relay_rx);

        // User hangup and failure callback fire back-to-back.
        rig.manager.hang_up().await;
        rig.manager
            .handle_link_status(LinkStatus::Failed("ice failed".to_string()))
            .await;

        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 1);
        assert_eq!(rig.manager.status(), CallStatus::Ended);
        assert!(rig.media_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_received_terminate_is_never_echoed() {
        let mut rig = rig_for("bob", &[]);

        rig.manager
            .handle_incoming("alice", SessionDescription::offer("o"))
            .await
            .unwrap();
        rig.manager.accept().await.unwrap();
        drain_relay(&mut rig.relay_rx);

        rig.manager.handle_terminate().await;
        assert_eq!(rig.manager.status(), CallStatus::Ended);

        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 0);
    }

    #[tokio::test]
    async fn test_link_failure_acts_as_hangup_with_user_visible_error() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager
            .handle_accept(SessionDescription::answer("a"))
            .await
            .unwrap();
        drain_relay(&mut rig.relay_rx);

        rig.manager
            .handle_link_status(LinkStatus::Disconnected)
            .await;

        assert_eq!(rig.manager.status(), CallStatus::Ended);
        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 1);

        let mut saw_failure = false;
        while let Ok(event) = rig.events_rx.try_recv() {
            if matches!(event, CallEvent::Failed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_busy_callee_sends_busy_signal_and_keeps_session() {
        let mut rig = rig_for("bob", &["alice"]);

        rig.manager.initiate("alice").await.unwrap();
        drain_relay(&mut rig.relay_rx);

        rig.manager
            .handle_incoming("carol", SessionDescription::offer("o"))
            .await
            .unwrap();

        // Busy signal went to carol, session with alice untouched.
        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RelayClientEvent::CallTerminate { to } => assert_eq!(to, "carol"),
            other => panic!("Expected CallTerminate, got {:?}", other),
        }
        assert_eq!(rig.manager.remote(), Some("alice"));
        assert_eq!(rig.manager.status(), CallStatus::Outgoing);
    }

    #[tokio::test]
    async fn test_incoming_call_rings_even_before_presence_update() {
        // The offer may arrive just before the presence broadcast that
        // announces its sender; it must still be treated as valid.
        let mut rig = rig_for("bob", &[]);

        rig.manager
            .handle_incoming("alice", SessionDescription::offer("o"))
            .await
            .unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Incoming);
        assert!(matches!(
            rig.events_rx.try_recv().unwrap(),
            CallEvent::IncomingRing { .. }
        ));
    }

    #[tokio::test]
    async fn test_reject_notifies_caller_once() {
        let mut rig = rig_for("bob", &[]);

        rig.manager
            .handle_incoming("alice", SessionDescription::offer("o"))
            .await
            .unwrap();
        rig.manager.reject().await.unwrap();

        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 1);
        assert_eq!(rig.manager.status(), CallStatus::Ended);
        assert!(rig.media_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_ring_timeout_ends_unanswered_call() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        drain_relay(&mut rig.relay_rx);

        // Not yet expired.
        rig.manager.check_ring_timeout(Instant::now()).await;
        assert_eq!(rig.manager.status(), CallStatus::Outgoing);

        let later = Instant::now() + CallConfig::default().ring_timeout + Duration::from_secs(1);
        rig.manager.check_ring_timeout(later).await;
        assert_eq!(rig.manager.status(), CallStatus::Ended);

        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 1);
    }

    #[tokio::test]
    async fn test_relay_disconnect_forces_ended_without_terminate() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        drain_relay(&mut rig.relay_rx);

        rig.manager.handle_relay_disconnected().await;
        assert_eq!(rig.manager.status(), CallStatus::Ended);
        assert_eq!(terminate_count(&drain_relay(&mut rig.relay_rx)), 0);
    }

    #[tokio::test]
    async fn test_accept_without_incoming_call_is_invalid() {
        let mut rig = rig_for("bob", &[]);
        let err = rig.manager.accept().await.unwrap_err();
        assert!(matches!(err, Error::InvalidCallState(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_ended_returns_to_idle() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager.hang_up().await;
        assert_eq!(rig.manager.status(), CallStatus::Ended);

        rig.manager.acknowledge_ended();
        assert_eq!(rig.manager.status(), CallStatus::Idle);

        // A fresh session can start after acknowledgement.
        rig.manager.initiate("bob").await.unwrap();
        assert_eq!(rig.manager.status(), CallStatus::Outgoing);
    }

    #[tokio::test]
    async fn test_late_candidate_after_teardown_is_ignored() {
        let mut rig = rig_for("alice", &["bob"]);

        rig.manager.initiate("bob").await.unwrap();
        rig.manager.hang_up().await;

        rig.manager.handle_candidate(candidate("late")).await.unwrap();
        let log = rig.handle_log.lock().clone();
        assert!(!log.iter().any(|op| op.contains("late")));
    }

    #[tokio::test]
    async fn test_install_failure_fails_session_with_notice() {
        let mut rig = rig_with("bob", &[], false, true);

        rig.manager
            .handle_incoming("alice", SessionDescription::offer("o"))
            .await
            .unwrap();
        let err = rig.manager.accept().await.unwrap_err();
        assert!(matches!(err, Error::NegotiationFailed(_)));
        assert_eq!(rig.manager.status(), CallStatus::Ended);

        // The peer is told the call is over.
        let events = drain_relay(&mut rig.relay_rx);
        assert_eq!(terminate_count(&events), 1);
    }

    #[tokio::test]
    async fn test_full_call_scenario_between_two_managers() {
        let mut alice = rig_for("alice", &["bob"]);
        let mut bob = rig_for("bob", &["alice"]);

        // A dials B.
        alice.manager.initiate("bob").await.unwrap();
        let offer = match drain_relay(&mut alice.relay_rx).remove(0) {
            RelayClientEvent::CallInitiate { to, offer } => {
                assert_eq!(to, "bob");
                offer
            }
            other => panic!("Expected CallInitiate, got {:?}", other),
        };

        // The relay forwards the offer to B.
        bob.manager.handle_incoming("alice", offer).await.unwrap();
        assert_eq!(alice.manager.status(), CallStatus::Outgoing);
        assert_eq!(bob.manager.status(), CallStatus::Incoming);

        // B accepts; the answer travels back to A.
        bob.manager.accept().await.unwrap();
        let answer = match drain_relay(&mut bob.relay_rx).remove(0) {
            RelayClientEvent::CallAccept { to, answer } => {
                assert_eq!(to, "alice");
                answer
            }
            other => panic!("Expected CallAccept, got {:?}", other),
        };
        alice.manager.handle_accept(answer).await.unwrap();

        assert_eq!(alice.manager.status(), CallStatus::Connected);
        assert_eq!(bob.manager.status(), CallStatus::Connected);

        // A hangs up; B receives the terminate and does not re-emit it.
        alice.manager.hang_up().await;
        let events = drain_relay(&mut alice.relay_rx);
        assert_eq!(terminate_count(&events), 1);

        bob.manager.handle_terminate().await;
        assert_eq!(bob.manager.status(), CallStatus::Ended);
        assert_eq!(terminate_count(&drain_relay(&mut bob.relay_rx)), 0);
    }
}
