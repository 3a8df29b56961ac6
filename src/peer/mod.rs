//! Single connection with a remote `Peer`.

mod queue;

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use derive_more::Display;
use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};
use medea_reactive::ObservableCell;
use playroom_signalling_proto::{
    IceCandidate, IceServer, PeerConnectionState, PeerId,
};
use tracerr::Traced;

use crate::{
    media::{LocalMediaStream, RemoteMediaStream},
    platform::{
        RtcPeerConnection, RtcPeerConnectionError, RtcPeerConnectionFactory,
        RtcPeerEvent, SdpType,
    },
    utils::{spawn_abortable, TaskHandle},
};

#[doc(inline)]
pub use self::queue::{PeerTask, PeerTaskError, TaskQueue};

/// Identifier of a single connection attempt with a `Peer`.
///
/// Every event and completion of a [`PeerConnection`] carries it, so the ones
/// of a replaced connection can be told apart and dropped.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Epoch(pub u64);

/// Negotiation progress of a [`PeerConnection`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum NegotiationState {
    /// Connection is created, nothing is negotiated yet.
    New,

    /// Local offer was created and sent.
    Offering,

    /// Remote offer was applied, the answer is being produced.
    Answering,

    /// Media flows.
    Connected,

    /// Connectivity is lost, but may recover.
    Disconnected,

    /// Negotiation or connectivity failed. Terminal.
    Failed,

    /// Connection was closed locally. Terminal.
    Closed,
}

impl NegotiationState {
    /// Indicates whether no transition is possible from this state.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// Indicates whether this state may be followed by the provided one.
    #[must_use]
    pub fn can_transit_to(self, to: Self) -> bool {
        use NegotiationState as S;

        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, S::Failed) | (_, S::Closed) => true,
            (S::New, S::Offering)
            | (S::New, S::Answering)
            | (S::Offering, S::Connected)
            | (S::Answering, S::Connected)
            | (S::Connected, S::Disconnected)
            | (S::Disconnected, S::Connected) => true,
            _ => false,
        }
    }
}

/// Which side sends the first offer of a [`PeerConnection`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Role {
    /// Local side offers.
    Initiator,

    /// Remote side offers.
    Responder,
}

/// Offer/answer exchange state of a [`PeerConnection`].
///
/// Mirrors [RTCSignalingState][1] reduced to the states the offer/answer
/// exchange can observe.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsignalingstate
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SignallingState {
    /// No exchange is in progress.
    #[display(fmt = "stable")]
    Stable,

    /// Local offer is applied and awaits the answer.
    #[display(fmt = "have-local-offer")]
    HaveLocalOffer,

    /// Remote offer is applied and awaits the local answer.
    #[display(fmt = "have-remote-offer")]
    HaveRemoteOffer,
}

/// Errors of a [`PeerConnection`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum NegotiationError {
    /// Remote description of this kind is not expected in the current
    /// [`SignallingState`].
    #[display(fmt = "unexpected remote {} in `{}` state", kind, state)]
    UnexpectedDescription {
        /// Kind of the rejected description.
        kind: &'static str,

        /// [`SignallingState`] the description was rejected in.
        state: SignallingState,
    },

    /// Local offer cannot be created in the current [`SignallingState`].
    #[display(fmt = "cannot create offer in `{}` state", _0)]
    OfferNotAllowed(SignallingState),

    /// [`PeerConnection`] is closed or failed already.
    #[display(fmt = "PeerConnection is closed")]
    PeerClosed,

    /// Backend connection failed.
    #[display(fmt = "{}", _0)]
    Platform(RtcPeerConnectionError),
}

type Result<T> = std::result::Result<T, Traced<NegotiationError>>;

/// Events of a [`PeerConnection`] delivered to its owner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerEvent {
    /// Local ICE candidate discovered, to be relayed to the `Peer`.
    IceCandidateDiscovered {
        peer_id: PeerId,
        epoch: Epoch,
        candidate: IceCandidate,
    },

    /// New track arrived into the [`RemoteMediaStream`].
    RemoteTrackAdded { peer_id: PeerId, epoch: Epoch },

    /// Backend connection state changed.
    ConnectionStateChanged {
        peer_id: PeerId,
        epoch: Epoch,
        state: PeerConnectionState,
    },

    /// [`PeerTask`] failed, no further tasks are executed.
    TaskFailed {
        peer_id: PeerId,
        epoch: Epoch,
        error: PeerTaskError,
    },
}

impl PeerEvent {
    /// Returns the `Peer` and the [`Epoch`] this [`PeerEvent`] belongs to.
    #[must_use]
    pub fn origin(&self) -> (&PeerId, Epoch) {
        match self {
            Self::IceCandidateDiscovered { peer_id, epoch, .. }
            | Self::RemoteTrackAdded { peer_id, epoch }
            | Self::ConnectionStateChanged { peer_id, epoch, .. }
            | Self::TaskFailed { peer_id, epoch, .. } => (peer_id, *epoch),
        }
    }
}

/// Connection with a single remote `Peer`.
///
/// Tracks the offer/answer exchange on top of the backend
/// [`RtcPeerConnection`] and buffers remote ICE candidates until a remote
/// description is applied.
pub struct PeerConnection {
    /// ID of the remote `Peer`.
    id: PeerId,

    /// Connection attempt this [`PeerConnection`] represents.
    epoch: Epoch,

    /// Side sending the first offer.
    role: Role,

    /// Backend connection.
    peer: Rc<dyn RtcPeerConnection>,

    /// Negotiation progress.
    state: ObservableCell<NegotiationState>,

    /// Offer/answer exchange state.
    signalling_state: Cell<SignallingState>,

    /// Whether a remote description was applied and candidates may be
    /// applied directly.
    has_remote_description: Cell<bool>,

    /// Remote ICE candidates received before the remote description.
    ice_candidates_buffer: RefCell<VecDeque<IceCandidate>>,

    /// Tracks received from the remote `Peer`.
    remote_stream: Rc<RemoteMediaStream>,

    /// Whether the backend connection is released.
    closed: Cell<bool>,

    /// Task forwarding backend events as [`PeerEvent`]s.
    events_forwarder: RefCell<Option<TaskHandle>>,
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("role", &self.role)
            .field("state", &self.state.get())
            .field("signalling_state", &self.signalling_state.get())
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl PeerConnection {
    /// Creates a new backend connection with the provided ICE servers and
    /// attaches the tracks of the `local_stream` to it.
    ///
    /// Backend events are forwarded into the `peer_events_sender`.
    ///
    /// Must be called inside a [`tokio::task::LocalSet`].
    ///
    /// # Errors
    ///
    /// With [`NegotiationError::Platform`] if the backend connection cannot be
    /// created or refuses a local track.
    pub fn new(
        id: PeerId,
        epoch: Epoch,
        role: Role,
        ice_servers: &[IceServer],
        local_stream: Option<&LocalMediaStream>,
        factory: &dyn RtcPeerConnectionFactory,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Rc<Self>> {
        let peer = factory
            .create(ice_servers)
            .map_err(NegotiationError::Platform)
            .map_err(tracerr::wrap!())?;
        if let Some(stream) = local_stream {
            for track in stream.tracks() {
                if let Err(e) = peer.add_track(Rc::clone(track)) {
                    peer.close();
                    return Err(tracerr::new!(NegotiationError::Platform(e)));
                }
            }
        }

        let remote_stream = Rc::new(RemoteMediaStream::new(id.clone()));
        let forwarder = Self::spawn_events_forwarder(
            id.clone(),
            epoch,
            peer.on_event(),
            Rc::clone(&remote_stream),
            peer_events_sender,
        );

        log::debug!("PeerConnection `{}` #{} created as {}", id, epoch, role);

        Ok(Rc::new(Self {
            id,
            epoch,
            role,
            peer,
            state: ObservableCell::new(NegotiationState::New),
            signalling_state: Cell::new(SignallingState::Stable),
            has_remote_description: Cell::new(false),
            ice_candidates_buffer: RefCell::default(),
            remote_stream,
            closed: Cell::new(false),
            events_forwarder: RefCell::new(Some(forwarder)),
        }))
    }

    /// Maps backend events into [`PeerEvent`]s until the backend stream ends
    /// or the receiver is gone.
    fn spawn_events_forwarder(
        peer_id: PeerId,
        epoch: Epoch,
        mut events: LocalBoxStream<'static, RtcPeerEvent>,
        remote_stream: Rc<RemoteMediaStream>,
        sender: mpsc::UnboundedSender<PeerEvent>,
    ) -> TaskHandle {
        spawn_abortable(async move {
            while let Some(event) = events.next().await {
                let event = match event {
                    RtcPeerEvent::IceCandidateDiscovered(candidate) => {
                        PeerEvent::IceCandidateDiscovered {
                            peer_id: peer_id.clone(),
                            epoch,
                            candidate,
                        }
                    }
                    RtcPeerEvent::TrackAdded(track) => {
                        if !remote_stream.add_track(track) {
                            continue;
                        }
                        PeerEvent::RemoteTrackAdded {
                            peer_id: peer_id.clone(),
                            epoch,
                        }
                    }
                    RtcPeerEvent::ConnectionStateChanged(state) => {
                        PeerEvent::ConnectionStateChanged {
                            peer_id: peer_id.clone(),
                            epoch,
                            state,
                        }
                    }
                };
                if sender.unbounded_send(event).is_err() {
                    break;
                }
            }
        })
    }

    /// Creates an SDP offer and applies it locally.
    ///
    /// The caller relays the returned SDP to the remote `Peer`.
    ///
    /// # Errors
    ///
    /// With [`NegotiationError::OfferNotAllowed`] if an exchange is already in
    /// progress.
    ///
    /// With [`NegotiationError::PeerClosed`] if closed meanwhile.
    ///
    /// With [`NegotiationError::Platform`] if the backend fails.
    pub async fn create_offer(&self) -> Result<String> {
        self.ensure_open()?;
        let signalling = self.signalling_state.get();
        if signalling != SignallingState::Stable {
            return Err(tracerr::new!(NegotiationError::OfferNotAllowed(
                signalling
            )));
        }

        let sdp = self
            .peer
            .create_and_set_offer()
            .await
            .map_err(NegotiationError::Platform)
            .map_err(tracerr::wrap!())?;
        self.ensure_open()?;

        self.signalling_state.set(SignallingState::HaveLocalOffer);
        if self.state.get() == NegotiationState::New {
            self.transit(NegotiationState::Offering);
        }
        Ok(sdp)
    }

    /// Applies the remote offer and produces the answer to it.
    ///
    /// The caller relays the returned SDP to the remote `Peer`.
    ///
    /// # Errors
    ///
    /// Same as [`PeerConnection::apply_remote_description()`], plus
    /// [`NegotiationError::Platform`] if the answer cannot be created.
    pub async fn create_answer(&self, offer: String) -> Result<String> {
        self.apply_remote_description(SdpType::Offer(offer))
            .await
            .map_err(tracerr::wrap!())?;

        let sdp = self
            .peer
            .create_and_set_answer()
            .await
            .map_err(NegotiationError::Platform)
            .map_err(tracerr::wrap!())?;
        self.ensure_open()?;

        self.signalling_state.set(SignallingState::Stable);
        Ok(sdp)
    }

    /// Applies the description of the remote side and flushes the buffered
    /// ICE candidates in arrival order.
    ///
    /// # Errors
    ///
    /// With [`NegotiationError::UnexpectedDescription`] for an answer without
    /// a pending local offer, or an offer while a local offer is pending.
    ///
    /// With [`NegotiationError::PeerClosed`] if closed meanwhile.
    ///
    /// With [`NegotiationError::Platform`] if the backend rejects the
    /// description or a buffered candidate.
    pub async fn apply_remote_description(
        &self,
        description: SdpType,
    ) -> Result<()> {
        self.ensure_open()?;
        let signalling = self.signalling_state.get();
        let is_offer = matches!(description, SdpType::Offer(_));
        let expected = if is_offer {
            SignallingState::Stable
        } else {
            SignallingState::HaveLocalOffer
        };
        if signalling != expected {
            return Err(tracerr::new!(NegotiationError::UnexpectedDescription {
                kind: description.kind(),
                state: signalling,
            }));
        }

        log::debug!(
            "PeerConnection `{}` #{} applies remote {}: {}",
            self.id,
            self.epoch,
            description.kind(),
            description.sdp(),
        );
        self.peer
            .set_remote_description(description)
            .await
            .map_err(NegotiationError::Platform)
            .map_err(tracerr::wrap!())?;
        self.ensure_open()?;

        if is_offer {
            self.signalling_state.set(SignallingState::HaveRemoteOffer);
            if self.state.get() == NegotiationState::New {
                self.transit(NegotiationState::Answering);
            }
        } else {
            self.signalling_state.set(SignallingState::Stable);
        }

        self.flush_ice_candidates().await
    }

    /// Applies the provided remote ICE candidate, or buffers it if no remote
    /// description is applied yet.
    ///
    /// # Errors
    ///
    /// With [`NegotiationError::PeerClosed`] if closed.
    ///
    /// With [`NegotiationError::Platform`] if the backend rejects it.
    pub async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<()> {
        self.ensure_open()?;
        if !self.has_remote_description.get() {
            self.ice_candidates_buffer.borrow_mut().push_back(candidate);
            return Ok(());
        }
        self.peer
            .add_ice_candidate(candidate)
            .await
            .map_err(NegotiationError::Platform)
            .map_err(tracerr::wrap!())
    }

    /// Applies the buffered candidates one by one.
    ///
    /// Candidates arriving while flushing are buffered behind the flushed
    /// ones, so the arrival order holds.
    async fn flush_ice_candidates(&self) -> Result<()> {
        loop {
            let next = self.ice_candidates_buffer.borrow_mut().pop_front();
            match next {
                Some(candidate) => {
                    self.peer
                        .add_ice_candidate(candidate)
                        .await
                        .map_err(NegotiationError::Platform)
                        .map_err(tracerr::wrap!())?;
                    self.ensure_open()?;
                }
                None => {
                    self.has_remote_description.set(true);
                    return Ok(());
                }
            }
        }
    }

    /// Swaps the outgoing tracks for the ones of the provided stream.
    ///
    /// Resolves to `true` if some track had to be added, so a renegotiation
    /// is needed.
    ///
    /// # Errors
    ///
    /// With [`NegotiationError::PeerClosed`] if closed meanwhile.
    ///
    /// With [`NegotiationError::Platform`] if the backend fails.
    pub async fn update_local_tracks(
        &self,
        stream: &LocalMediaStream,
    ) -> Result<bool> {
        self.ensure_open()?;
        let mut renegotiate = false;
        for track in stream.tracks() {
            let replaced = self
                .peer
                .replace_track(Rc::clone(track))
                .await
                .map_err(NegotiationError::Platform)
                .map_err(tracerr::wrap!())?;
            self.ensure_open()?;
            if !replaced {
                self.peer
                    .add_track(Rc::clone(track))
                    .map_err(NegotiationError::Platform)
                    .map_err(tracerr::wrap!())?;
                renegotiate = true;
            }
        }
        Ok(renegotiate)
    }

    /// Applies a backend connection state change.
    ///
    /// Returns the new [`NegotiationState`] if it changed. Backend reporting
    /// `closed` on its own is treated as a failure.
    pub fn handle_connection_state(
        &self,
        state: PeerConnectionState,
    ) -> Option<NegotiationState> {
        let to = match state {
            PeerConnectionState::Connected => NegotiationState::Connected,
            PeerConnectionState::Disconnected => NegotiationState::Disconnected,
            PeerConnectionState::Failed | PeerConnectionState::Closed => {
                return if self.fail() {
                    Some(NegotiationState::Failed)
                } else {
                    None
                };
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {
                return None;
            }
        };
        if self.closed.get() || !self.transit(to) {
            return None;
        }
        Some(to)
    }

    /// Moves this [`PeerConnection`] into [`NegotiationState::Failed`] and
    /// releases the backend connection.
    ///
    /// Returns `false` if it is already in a terminal state.
    pub fn fail(&self) -> bool {
        if self.closed.get() || !self.transit(NegotiationState::Failed) {
            return false;
        }
        self.release();
        true
    }

    /// Closes this [`PeerConnection`] releasing the backend connection.
    ///
    /// Idempotent. A failed [`PeerConnection`] stays
    /// [`NegotiationState::Failed`].
    pub fn close(&self) {
        if self.closed.get() {
            return;
        }
        self.release();
        self.state.set(NegotiationState::Closed);
        log::debug!("PeerConnection `{}` #{} closed", self.id, self.epoch);
    }

    fn release(&self) {
        self.closed.set(true);
        drop(self.events_forwarder.borrow_mut().take());
        self.ice_candidates_buffer.borrow_mut().clear();
        self.peer.close();
    }

    fn transit(&self, to: NegotiationState) -> bool {
        let from = self.state.get();
        if !from.can_transit_to(to) {
            log::debug!(
                "PeerConnection `{}` #{} ignores {} -> {} transition",
                self.id,
                self.epoch,
                from,
                to,
            );
            return false;
        }
        self.state.set(to);
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.get() {
            return Err(tracerr::new!(NegotiationError::PeerClosed));
        }
        Ok(())
    }

    /// ID of the remote `Peer`.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// [`Epoch`] of this connection attempt.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// [`Role`] of the local side.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current [`NegotiationState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state.get()
    }

    /// Returns a stream of the [`NegotiationState`] changes.
    #[inline]
    pub fn on_state_change(
        &self,
    ) -> LocalBoxStream<'static, NegotiationState> {
        self.state.subscribe()
    }

    /// Current [`SignallingState`].
    #[inline]
    #[must_use]
    pub fn signalling_state(&self) -> SignallingState {
        self.signalling_state.get()
    }

    /// Number of remote ICE candidates awaiting the remote description.
    #[inline]
    #[must_use]
    pub fn buffered_candidates_count(&self) -> usize {
        self.ice_candidates_buffer.borrow().len()
    }

    /// Tracks received from the remote `Peer`.
    #[inline]
    #[must_use]
    pub fn remote_stream(&self) -> Rc<RemoteMediaStream> {
        Rc::clone(&self.remote_stream)
    }

    /// Indicates whether the backend connection is released.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}
