//! Room session coordinator.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};

use derive_more::{Display, From};
use futures::{
    channel::mpsc,
    stream::{self, LocalBoxStream},
    StreamExt as _,
};
use medea_reactive::ObservableCell;
use playroom_signalling_proto::{
    Command, Event, EventKind, IceServer, IncomingSignal, JoinAck, JoinRoom,
    LeaveRoom, PeerConnectionState, PeerId, PeerJoined, PeerLeft, RoomId,
    Signal,
};
use tracerr::Traced;

use crate::{
    conf::{self, Conf},
    media::{
        LocalMediaStream, MediaAccessError, MediaManager,
        MediaStreamConstraints, RemoteMediaStream,
    },
    peer::{
        Epoch, NegotiationError, NegotiationState, PeerConnection, PeerEvent,
        PeerTask, PeerTaskError, Role, TaskQueue,
    },
    platform::{self, RtcPeerConnectionFactory},
    rpc::{HandlerId, SignallingChannel, SignallingError},
    utils::{spawn_abortable, TaskHandle},
};

/// Lifecycle state of a [`Room`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SessionState {
    /// [`Room::join()`] was not called yet.
    Idle,

    /// Local media is being acquired or the server didn't acknowledge the
    /// join yet.
    Joining,

    /// [`Room`] is joined, connections with the `Peer`s are maintained.
    Joined,

    /// Connections are being torn down.
    Leaving,

    /// [`Room`] is left. Terminal.
    Left,
}

/// Errors surfaced by a [`Room`].
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum RoomError {
    /// Local media cannot be acquired.
    #[display(fmt = "local media is unavailable: {}", _0)]
    MediaAccess(MediaAccessError),

    /// Signalling server is unreachable or misbehaves.
    #[display(fmt = "signalling failed: {}", _0)]
    Signalling(SignallingError),

    /// Negotiation with a `Peer` failed.
    #[display(fmt = "negotiation with `{}` failed: {}", peer_id, error)]
    #[from(ignore)]
    Negotiation {
        /// `Peer` the negotiation failed with.
        peer_id: PeerId,

        /// Cause of the failure.
        error: NegotiationError,
    },

    /// Connectivity with a `Peer` failed or didn't recover in time.
    #[display(fmt = "ICE connection with `{}` failed", _0)]
    #[from(ignore)]
    IceFailure(PeerId),

    /// Operation is not allowed in the current [`SessionState`].
    #[display(fmt = "not allowed in `{}` state", _0)]
    #[from(ignore)]
    InvalidState(SessionState),

    /// [`Room`] was left before the operation completed.
    #[display(fmt = "room was left before the operation completed")]
    #[from(ignore)]
    Aborted,
}

impl RoomError {
    fn from_task(peer_id: PeerId, err: PeerTaskError) -> Self {
        match err {
            PeerTaskError::Negotiation(error) => {
                Self::Negotiation { peer_id, error }
            }
            PeerTaskError::Signalling(e) => Self::Signalling(e),
        }
    }
}

type Result<T> = std::result::Result<T, Traced<RoomError>>;

/// Whole read model of a [`Room`] at some moment.
#[derive(Clone, Debug)]
pub struct RoomSnapshot {
    /// [`SessionState`] of the [`Room`].
    pub state: SessionState,

    /// Local media, present while joined.
    pub local_stream: Option<Rc<LocalMediaStream>>,

    /// Media received from each `Peer` that sent any.
    pub remote_streams: HashMap<PeerId, Rc<RemoteMediaStream>>,

    /// [`NegotiationState`] of the connection with each `Peer`.
    pub peer_states: HashMap<PeerId, NegotiationState>,

    /// Whether at least one `Peer` is connected.
    pub is_connected: bool,

    /// Last surfaced error.
    pub error: Option<RoomError>,
}

/// Input of the [`Room`] event loop.
enum RoomEvent {
    /// Inbound signalling message.
    Signalling(Event),

    /// Event of a [`PeerConnection`].
    Peer(PeerEvent),

    /// Grace period of a disconnected [`PeerConnection`] is over.
    DisconnectTimeout { peer_id: PeerId, epoch: Epoch },

    /// Failed [`PeerConnection`] is due to be started anew.
    Retry { peer_id: PeerId, epoch: Epoch },
}

/// Connection with a `Peer` together with its worker and timers.
struct PeerEntry {
    peer: Rc<PeerConnection>,
    tasks: TaskQueue,

    /// Number of the fresh negotiations started before this one.
    attempt: u32,

    disconnect_timer: Option<TaskHandle>,
    retry_timer: Option<TaskHandle>,
}

impl PeerEntry {
    fn is_alive(&self) -> bool {
        !self.peer.state().is_terminal()
    }

    /// Closes the connection, aborting its worker and timers.
    fn close(self) {
        drop(self.disconnect_timer);
        drop(self.retry_timer);
        drop(self.tasks);
        self.peer.close();
    }
}

/// Video room: local media, one [`PeerConnection`] per remote participant
/// and the read model exposed to the presentation layer.
///
/// Leaves the room when dropped.
pub struct Room(Rc<InnerRoom>);

struct InnerRoom {
    room_id: RoomId,
    user_id: PeerId,
    state: ObservableCell<SessionState>,

    conf: conf::Peer,
    ice_servers: Vec<IceServer>,
    constraints: RefCell<MediaStreamConstraints>,

    channel: Rc<SignallingChannel>,
    media_manager: Rc<MediaManager>,
    peer_factory: Rc<dyn RtcPeerConnectionFactory>,

    /// Connections with the remote `Peer`s.
    ///
    /// Mutated by the event loop, `join()` and `leave()` only.
    peers: RefCell<HashMap<PeerId, PeerEntry>>,
    next_epoch: Cell<u64>,

    events_sender: mpsc::UnboundedSender<RoomEvent>,
    peer_events_sender: mpsc::UnboundedSender<PeerEvent>,

    /// Receiving ends of the event loop, taken once it's spawned.
    #[allow(clippy::type_complexity)]
    receivers: RefCell<
        Option<(
            mpsc::UnboundedReceiver<RoomEvent>,
            mpsc::UnboundedReceiver<PeerEvent>,
        )>,
    >,
    event_loop: RefCell<Option<TaskHandle>>,
    handlers: RefCell<Vec<HandlerId>>,

    /// Whether the server may consider us a member, so it must be told
    /// about leaving.
    membership_requested: Cell<bool>,

    error: ObservableCell<Option<RoomError>>,
    error_subs: RefCell<Vec<mpsc::UnboundedSender<RoomError>>>,
    remote_stream_subs:
        RefCell<Vec<mpsc::UnboundedSender<(PeerId, Rc<RemoteMediaStream>)>>>,
}

impl Room {
    /// Creates a new [`Room`] in [`SessionState::Idle`].
    ///
    /// Local media is acquired according to [`Conf::media`] unless replaced
    /// with [`Room::set_media_constraints()`] before joining.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        user_id: PeerId,
        conf: &Conf,
        channel: Rc<SignallingChannel>,
        media_manager: Rc<MediaManager>,
        peer_factory: Rc<dyn RtcPeerConnectionFactory>,
    ) -> Self {
        let (events_sender, events_rx) = mpsc::unbounded();
        let (peer_events_sender, peer_events_rx) = mpsc::unbounded();
        Self(Rc::new(InnerRoom {
            room_id,
            user_id,
            state: ObservableCell::new(SessionState::Idle),
            conf: conf.peer.clone(),
            ice_servers: conf.ice.servers(),
            constraints: RefCell::new(conf.media.constraints()),
            channel,
            media_manager,
            peer_factory,
            peers: RefCell::default(),
            next_epoch: Cell::new(0),
            events_sender,
            peer_events_sender,
            receivers: RefCell::new(Some((events_rx, peer_events_rx))),
            event_loop: RefCell::default(),
            handlers: RefCell::default(),
            membership_requested: Cell::new(false),
            error: ObservableCell::new(None),
            error_subs: RefCell::default(),
            remote_stream_subs: RefCell::default(),
        }))
    }

    /// Acquires local media and joins the room.
    ///
    /// An offer is sent to every participant the server reports.
    ///
    /// # Errors
    ///
    /// With [`RoomError::InvalidState`] if not [`SessionState::Idle`].
    ///
    /// With [`RoomError::MediaAccess`] or [`RoomError::Signalling`] if joining
    /// fails, leaving the [`Room`] in [`SessionState::Left`].
    ///
    /// With [`RoomError::Aborted`] if [`Room::leave()`] is called meanwhile.
    pub async fn join(&self) -> Result<()> {
        self.0.join().await
    }

    /// Closes every connection, releases local media and tells the server
    /// the room is left.
    ///
    /// Idempotent.
    pub fn leave(&self) {
        self.0.leave();
    }

    /// Sets the [`MediaStreamConstraints`] to acquire local media with on
    /// [`Room::join()`].
    pub fn set_media_constraints(&self, constraints: MediaStreamConstraints) {
        drop(self.0.constraints.replace(constraints));
    }

    /// Replaces the local media with one acquired with the provided
    /// [`MediaStreamConstraints`] and switches every connection to it.
    ///
    /// # Errors
    ///
    /// With [`RoomError::InvalidState`] if not [`SessionState::Joined`].
    ///
    /// With [`RoomError::MediaAccess`] if new media cannot be acquired, the
    /// current one stays in use.
    ///
    /// With [`RoomError::Aborted`] if [`Room::leave()`] is called meanwhile.
    pub async fn replace_local_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<()> {
        self.0.replace_local_media(constraints).await
    }

    /// Enables or disables the local camera. Returns the new state.
    pub fn toggle_camera(&self) -> bool {
        self.0.media_manager.toggle_camera()
    }

    /// Enables or disables the local microphone. Returns the new state.
    pub fn toggle_microphone(&self) -> bool {
        self.0.media_manager.toggle_microphone()
    }

    /// Current [`SessionState`].
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.0.state.get()
    }

    /// Stream of the [`SessionState`] changes, starting with the current one.
    pub fn on_state_change(&self) -> LocalBoxStream<'static, SessionState> {
        self.0.state.subscribe()
    }

    /// Held local media, if any.
    #[must_use]
    pub fn local_stream(&self) -> Option<Rc<LocalMediaStream>> {
        self.0.media_manager.stream()
    }

    /// Media received from each `Peer` that sent any.
    #[must_use]
    pub fn remote_streams(&self) -> HashMap<PeerId, Rc<RemoteMediaStream>> {
        self.0.remote_streams()
    }

    /// Stream of the `Peer`s media updates, emitted whenever a new remote
    /// track arrives.
    pub fn on_remote_stream(
        &self,
    ) -> LocalBoxStream<'static, (PeerId, Rc<RemoteMediaStream>)> {
        let (tx, rx) = mpsc::unbounded();
        self.0.remote_stream_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// [`NegotiationState`] of the connection with each `Peer`.
    #[must_use]
    pub fn peer_states(&self) -> HashMap<PeerId, NegotiationState> {
        self.0.peer_states()
    }

    /// Indicates whether at least one `Peer` is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0
            .peers
            .borrow()
            .values()
            .any(|e| e.peer.state() == NegotiationState::Connected)
    }

    /// Last surfaced error.
    #[must_use]
    pub fn error(&self) -> Option<RoomError> {
        self.0.error.get()
    }

    /// Stream of the errors surfaced after subscribing, each one emitted even
    /// if equal to the previous.
    pub fn on_error(&self) -> LocalBoxStream<'static, RoomError> {
        let (tx, rx) = mpsc::unbounded();
        self.0.error_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Collects the whole read model.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            state: self.state(),
            local_stream: self.local_stream(),
            remote_streams: self.remote_streams(),
            peer_states: self.peer_states(),
            is_connected: self.is_connected(),
            error: self.error(),
        }
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.0.room_id)
            .field("user_id", &self.0.user_id)
            .field("state", &self.0.state.get())
            .field("peers", &self.0.peer_states())
            .finish()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.0.leave();
    }
}

impl InnerRoom {
    async fn join(self: &Rc<Self>) -> Result<()> {
        let state = self.state.get();
        if state != SessionState::Idle {
            return Err(tracerr::new!(RoomError::InvalidState(state)));
        }
        self.state.set(SessionState::Joining);
        log::info!("Joining room `{}` as `{}`", self.room_id, self.user_id);

        let constraints = self.constraints.borrow().clone();
        let acquired = self
            .media_manager
            .acquire(constraints)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RoomError));
        if self.state.get() != SessionState::Joining {
            self.media_manager.release();
            return Err(tracerr::new!(RoomError::Aborted));
        }
        if let Err(e) = acquired {
            self.fail_join(&e);
            return Err(e);
        }

        self.subscribe_signalling();
        self.membership_requested.set(true);
        let ack = self
            .channel
            .request::<JoinAck>(&Command::JoinRoom(JoinRoom {
                room_id: self.room_id.clone(),
                user_id: self.user_id.clone(),
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RoomError));
        if self.state.get() != SessionState::Joining {
            return Err(tracerr::new!(RoomError::Aborted));
        }
        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                self.fail_join(&e);
                return Err(e);
            }
        };

        self.state.set(SessionState::Joined);
        log::info!(
            "Joined room `{}` with {} participant(s)",
            self.room_id,
            ack.participants.len(),
        );
        self.spawn_event_loop();
        for peer_id in ack.participants {
            if peer_id == self.user_id
                || self.peers.borrow().contains_key(&peer_id)
            {
                continue;
            }
            self.create_peer(peer_id, Role::Initiator, 0);
        }
        Ok(())
    }

    /// Surfaces the provided error and leaves the [`Room`].
    fn fail_join(&self, err: &Traced<RoomError>) {
        log::error!("Failed to join room `{}`: {}", self.room_id, err);
        self.surface(err.as_ref().clone());
        self.state.set(SessionState::Leaving);
        self.teardown();
        self.state.set(SessionState::Left);
    }

    fn leave(&self) {
        match self.state.get() {
            SessionState::Leaving | SessionState::Left => return,
            SessionState::Idle => {
                self.state.set(SessionState::Left);
                return;
            }
            SessionState::Joining | SessionState::Joined => (),
        }
        log::info!("Leaving room `{}`", self.room_id);
        self.state.set(SessionState::Leaving);
        self.teardown();
        self.state.set(SessionState::Left);
    }

    /// Releases everything the [`Room`] holds.
    fn teardown(&self) {
        drop(self.event_loop.borrow_mut().take());

        let handlers: Vec<_> = self.handlers.borrow_mut().drain(..).collect();
        for id in handlers {
            let _ = self.channel.off(id);
        }

        let peers: Vec<_> =
            self.peers.borrow_mut().drain().map(|(_, e)| e).collect();
        for entry in peers {
            entry.close();
        }

        self.media_manager.release();

        if self.membership_requested.replace(false) {
            let leave = Command::LeaveRoom(LeaveRoom {
                room_id: self.room_id.clone(),
                user_id: self.user_id.clone(),
            });
            if let Err(e) = self.channel.send(&leave) {
                log::warn!("Failed to notify about leaving: {}", e);
            }
        }
    }

    /// Routes inbound signalling messages into the event loop.
    fn subscribe_signalling(&self) {
        let mut handlers = self.handlers.borrow_mut();
        for kind in &EventKind::ALL {
            let tx = self.events_sender.clone();
            handlers.push(self.channel.on(*kind, move |event| {
                let _ = tx.unbounded_send(RoomEvent::Signalling(event));
            }));
        }
    }

    fn spawn_event_loop(self: &Rc<Self>) {
        let (events, peer_events) = match self.receivers.borrow_mut().take() {
            Some(receivers) => receivers,
            None => return,
        };
        let mut events =
            stream::select(events, peer_events.map(RoomEvent::Peer));
        let weak = Rc::downgrade(self);
        let handle = spawn_abortable(async move {
            while let Some(event) = events.next().await {
                let room = upgrade_or_break!(weak);
                room.handle_event(event);
            }
        });
        drop(self.event_loop.replace(Some(handle)));
    }

    fn handle_event(&self, event: RoomEvent) {
        if self.state.get() != SessionState::Joined {
            return;
        }
        match event {
            RoomEvent::Signalling(event) => match event {
                Event::PeerJoined(PeerJoined { peer_id }) => {
                    self.on_peer_joined(peer_id);
                }
                Event::PeerLeft(PeerLeft { peer_id }) => {
                    self.on_peer_left(&peer_id);
                }
                Event::Signal(IncomingSignal {
                    from_peer_id,
                    signal,
                }) => self.on_signal(from_peer_id, signal),
            },
            RoomEvent::Peer(event) => self.on_peer_event(event),
            RoomEvent::DisconnectTimeout { peer_id, epoch } => {
                self.on_disconnect_timeout(peer_id, epoch);
            }
            RoomEvent::Retry { peer_id, epoch } => {
                self.on_retry(peer_id, epoch);
            }
        }
    }

    fn on_peer_joined(&self, peer_id: PeerId) {
        if peer_id == self.user_id {
            return;
        }
        if self.peers.borrow().contains_key(&peer_id) {
            log::debug!("Peer `{}` is already known", peer_id);
            return;
        }
        log::info!("Peer `{}` joined", peer_id);
        self.create_peer(peer_id, Role::Responder, 0);
    }

    fn on_peer_left(&self, peer_id: &PeerId) {
        let entry = self.peers.borrow_mut().remove(peer_id);
        if let Some(entry) = entry {
            log::info!("Peer `{}` left", peer_id);
            entry.close();
        }
    }

    fn on_signal(&self, from: PeerId, signal: Signal) {
        match signal {
            Signal::Offer(sdp) => {
                let alive =
                    self.peers.borrow().get(&from).map(PeerEntry::is_alive);
                let attempt = match alive {
                    Some(true) => None,
                    Some(false) => {
                        log::info!("Peer `{}` offers anew", from);
                        let old = self.peers.borrow_mut().remove(&from);
                        Some(old.map_or(0, |old| {
                            let attempt = old.attempt + 1;
                            old.close();
                            attempt
                        }))
                    }
                    None => Some(0),
                };
                if let Some(attempt) = attempt {
                    self.create_peer(from.clone(), Role::Responder, attempt);
                }
                self.push_task(&from, PeerTask::HandleOffer(sdp));
            }
            Signal::Answer(sdp) => {
                self.push_task(&from, PeerTask::HandleAnswer(sdp));
            }
            Signal::Candidate(candidate) => {
                self.push_task(&from, PeerTask::AddIceCandidate(candidate));
            }
        }
    }

    fn on_peer_event(&self, event: PeerEvent) {
        let (peer_id, epoch) = event.origin();
        let is_current = self
            .peers
            .borrow()
            .get(peer_id)
            .map_or(false, |e| e.peer.epoch() == epoch);
        if !is_current {
            log::debug!("Dropping event of stale `{}` #{}", peer_id, epoch);
            return;
        }

        match event {
            PeerEvent::IceCandidateDiscovered {
                peer_id, candidate, ..
            } => {
                self.push_task(&peer_id, PeerTask::SendIceCandidate(candidate));
            }
            PeerEvent::RemoteTrackAdded { peer_id, .. } => {
                self.notify_remote_stream(&peer_id);
            }
            PeerEvent::ConnectionStateChanged {
                peer_id,
                epoch,
                state,
            } => self.on_connection_state(peer_id, epoch, state),
            PeerEvent::TaskFailed { peer_id, error, .. } => {
                let err = RoomError::from_task(peer_id.clone(), error);
                self.on_peer_failed(peer_id, err);
            }
        }
    }

    fn on_connection_state(
        &self,
        peer_id: PeerId,
        epoch: Epoch,
        state: PeerConnectionState,
    ) {
        let changed = self
            .peers
            .borrow()
            .get(&peer_id)
            .and_then(|e| e.peer.handle_connection_state(state));
        match changed {
            Some(NegotiationState::Connected) => {
                log::info!("Peer `{}` connected", peer_id);
                if let Some(entry) = self.peers.borrow_mut().get_mut(&peer_id) {
                    entry.disconnect_timer = None;
                }
            }
            Some(NegotiationState::Disconnected) => {
                log::warn!("Peer `{}` disconnected", peer_id);
                let timer = self.schedule(
                    self.conf.disconnect_grace_period,
                    RoomEvent::DisconnectTimeout {
                        peer_id: peer_id.clone(),
                        epoch,
                    },
                );
                if let Some(entry) = self.peers.borrow_mut().get_mut(&peer_id) {
                    entry.disconnect_timer = Some(timer);
                }
            }
            Some(NegotiationState::Failed) => {
                let err = RoomError::IceFailure(peer_id.clone());
                self.on_peer_failed(peer_id, err);
            }
            _ => (),
        }
    }

    fn on_disconnect_timeout(&self, peer_id: PeerId, epoch: Epoch) {
        let expired = self.peers.borrow().get(&peer_id).map_or(false, |e| {
            e.peer.epoch() == epoch
                && e.peer.state() == NegotiationState::Disconnected
        });
        if expired {
            log::warn!("Peer `{}` didn't reconnect in time", peer_id);
            let err = RoomError::IceFailure(peer_id.clone());
            self.on_peer_failed(peer_id, err);
        }
    }

    /// Surfaces the failure of the connection with the provided `Peer` and
    /// either schedules a fresh attempt or drops the connection.
    fn on_peer_failed(&self, peer_id: PeerId, err: RoomError) {
        log::error!("{}", err);
        self.surface(err);

        let mut peers = self.peers.borrow_mut();
        let entry = match peers.get_mut(&peer_id) {
            Some(entry) => entry,
            None => return,
        };
        let _ = entry.peer.fail();
        entry.disconnect_timer = None;

        if entry.attempt < self.conf.max_retries {
            log::info!(
                "Retrying connection with `{}` in {:?}",
                peer_id,
                self.conf.retry_delay,
            );
            let epoch = entry.peer.epoch();
            entry.retry_timer = Some(self.schedule(
                self.conf.retry_delay,
                RoomEvent::Retry { peer_id, epoch },
            ));
        } else {
            let removed = peers.remove(&peer_id);
            drop(peers);
            if let Some(entry) = removed {
                log::warn!("Giving up on connection with `{}`", peer_id);
                entry.close();
            }
        }
    }

    fn on_retry(&self, peer_id: PeerId, epoch: Epoch) {
        let old = {
            let mut peers = self.peers.borrow_mut();
            let due = peers.get(&peer_id).map_or(false, |e| {
                e.peer.epoch() == epoch
                    && e.peer.state() == NegotiationState::Failed
            });
            if due {
                peers.remove(&peer_id)
            } else {
                None
            }
        };
        if let Some(old) = old {
            let (role, attempt) = (old.peer.role(), old.attempt + 1);
            old.close();
            self.create_peer(peer_id, role, attempt);
        }
    }

    /// Creates a connection with the provided `Peer`, offering right away if
    /// the local side is the [`Role::Initiator`].
    ///
    /// Failure is surfaced and leaves no entry.
    fn create_peer(&self, peer_id: PeerId, role: Role, attempt: u32) {
        let epoch = Epoch(self.next_epoch.get());
        self.next_epoch.set(epoch.0 + 1);

        let local_stream = self.media_manager.stream();
        let peer = match PeerConnection::new(
            peer_id.clone(),
            epoch,
            role,
            &self.ice_servers,
            local_stream.as_deref(),
            &*self.peer_factory,
            self.peer_events_sender.clone(),
        ) {
            Ok(peer) => peer,
            Err(e) => {
                log::error!("Failed to create PeerConnection: {}", e);
                self.surface(RoomError::Negotiation {
                    peer_id,
                    error: e.into_inner(),
                });
                return;
            }
        };

        let tasks = TaskQueue::spawn(
            Rc::clone(&peer),
            Rc::clone(&self.channel),
            self.peer_events_sender.clone(),
        );
        if role == Role::Initiator {
            tasks.push(PeerTask::MakeOffer);
        }
        let entry = PeerEntry {
            peer,
            tasks,
            attempt,
            disconnect_timer: None,
            retry_timer: None,
        };
        let replaced = self.peers.borrow_mut().insert(peer_id, entry);
        if let Some(old) = replaced {
            old.close();
        }
    }

    /// Enqueues the provided [`PeerTask`] to the live connection with the
    /// provided `Peer`, dropping it if there is none.
    fn push_task(&self, peer_id: &PeerId, task: PeerTask) {
        match self.peers.borrow().get(peer_id) {
            Some(entry) if entry.is_alive() => entry.tasks.push(task),
            _ => log::debug!(
                "No live connection with `{}`, dropping {:?}",
                peer_id,
                task,
            ),
        }
    }

    /// Posts the provided [`RoomEvent`] into the event loop after the
    /// provided delay.
    fn schedule(
        &self,
        delay: std::time::Duration,
        event: RoomEvent,
    ) -> TaskHandle {
        let tx = self.events_sender.clone();
        spawn_abortable(async move {
            platform::delay_for(delay).await;
            let _ = tx.unbounded_send(event);
        })
    }

    /// Records the provided error as the last one and emits it to every
    /// [`Room::on_error()`] subscriber.
    fn surface(&self, err: RoomError) {
        self.error_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(err.clone()).is_ok());
        self.error.set(Some(err));
    }

    fn notify_remote_stream(&self, peer_id: &PeerId) {
        let stream = match self.peers.borrow().get(peer_id) {
            Some(entry) => entry.peer.remote_stream(),
            None => return,
        };
        self.remote_stream_subs.borrow_mut().retain(|tx| {
            tx.unbounded_send((peer_id.clone(), Rc::clone(&stream)))
                .is_ok()
        });
    }

    async fn replace_local_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<()> {
        let state = self.state.get();
        if state != SessionState::Joined {
            return Err(tracerr::new!(RoomError::InvalidState(state)));
        }

        let reacquired = self
            .media_manager
            .reacquire(constraints.clone())
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RoomError));
        let stream = match reacquired {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to replace local media: {}", e);
                self.surface(e.as_ref().clone());
                return Err(e);
            }
        };
        if self.state.get() != SessionState::Joined {
            self.media_manager.release();
            return Err(tracerr::new!(RoomError::Aborted));
        }
        drop(self.constraints.replace(constraints));

        for entry in self.peers.borrow().values().filter(|e| e.is_alive()) {
            entry.tasks.push(PeerTask::UpdateLocalTracks(Rc::clone(&stream)));
        }
        Ok(())
    }

    fn remote_streams(&self) -> HashMap<PeerId, Rc<RemoteMediaStream>> {
        self.peers
            .borrow()
            .iter()
            .map(|(id, e)| (id.clone(), e.peer.remote_stream()))
            .filter(|(_, s)| !s.is_empty())
            .collect()
    }

    fn peer_states(&self) -> HashMap<PeerId, NegotiationState> {
        self.peers
            .borrow()
            .iter()
            .map(|(id, e)| (id.clone(), e.peer.state()))
            .collect()
    }
}
