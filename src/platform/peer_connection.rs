//! WebRTC stack of the platform.

use std::{fmt, rc::Rc};

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::LocalBoxStream;
use playroom_signalling_proto::{
    IceCandidate, IceServer, PeerConnectionState,
};

use super::MediaTrack;

/// Representation of an SDP description of the remote side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// [SDP offer][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    Offer(String),

    /// [SDP answer][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    Answer(String),
}

impl SdpType {
    /// Returns the SDP string of this description.
    #[inline]
    #[must_use]
    pub fn sdp(&self) -> &str {
        match self {
            Self::Offer(sdp) | Self::Answer(sdp) => sdp,
        }
    }

    /// Returns a human-readable kind of this description.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
        }
    }
}

/// Errors reported by an [`RtcPeerConnection`] backend.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum RtcPeerConnectionError {
    /// Backend connection cannot be created.
    #[display(fmt = "failed to create PeerConnection: {}", _0)]
    CreatePeer(String),

    /// [SDP offer][`SdpType::Offer`] cannot be obtained.
    #[display(fmt = "failed to create SDP offer: {}", _0)]
    CreateOffer(String),

    /// [SDP answer][`SdpType::Answer`] cannot be obtained.
    #[display(fmt = "failed to create SDP answer: {}", _0)]
    CreateAnswer(String),

    /// Local description cannot be changed.
    #[display(fmt = "failed to set local SDP description: {}", _0)]
    SetLocalDescription(String),

    /// Remote description cannot be changed.
    #[display(fmt = "failed to set remote SDP description: {}", _0)]
    SetRemoteDescription(String),

    /// Remote ICE candidate was rejected.
    #[display(fmt = "failed to add ICE candidate: {}", _0)]
    AddIceCandidate(String),

    /// Local track cannot be attached.
    #[display(fmt = "failed to add track: {}", _0)]
    AddTrack(String),

    /// Outgoing track cannot be replaced.
    #[display(fmt = "failed to replace track: {}", _0)]
    ReplaceTrack(String),
}

/// Events emitted by an [`RtcPeerConnection`] backend.
pub enum RtcPeerEvent {
    /// Local ICE agent discovered a new candidate.
    IceCandidateDiscovered(IceCandidate),

    /// Remote side started sending a track.
    TrackAdded(Rc<dyn MediaTrack>),

    /// Aggregated connection state changed.
    ConnectionStateChanged(PeerConnectionState),
}

impl fmt::Debug for RtcPeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IceCandidateDiscovered(c) => {
                f.debug_tuple("IceCandidateDiscovered").field(c).finish()
            }
            Self::TrackAdded(track) => {
                f.debug_tuple("TrackAdded").field(&track.id()).finish()
            }
            Self::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
        }
    }
}

/// Single backend peer connection (an `RTCPeerConnection`).
#[async_trait(?Send)]
pub trait RtcPeerConnection {
    /// Attaches a new outgoing `track`.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::AddTrack`] if the backend refuses it.
    fn add_track(
        &self,
        track: Rc<dyn MediaTrack>,
    ) -> Result<(), RtcPeerConnectionError>;

    /// Swaps the outgoing track of the same kind for the provided one
    /// without renegotiation.
    ///
    /// Resolves to `false` if there is no sender able to carry this `track`,
    /// so it has to be added and renegotiated.
    async fn replace_track(
        &self,
        track: Rc<dyn MediaTrack>,
    ) -> Result<bool, RtcPeerConnectionError>;

    /// Creates an SDP offer and applies it as the local description.
    async fn create_and_set_offer(
        &self,
    ) -> Result<String, RtcPeerConnectionError>;

    /// Creates an SDP answer and applies it as the local description.
    async fn create_and_set_answer(
        &self,
    ) -> Result<String, RtcPeerConnectionError>;

    /// Applies the provided description of the remote side.
    async fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), RtcPeerConnectionError>;

    /// Applies a remote ICE candidate.
    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), RtcPeerConnectionError>;

    /// Returns a stream of the [`RtcPeerEvent`]s of this connection.
    fn on_event(&self) -> LocalBoxStream<'static, RtcPeerEvent>;

    /// Closes this connection, releasing its transports.
    fn close(&self);
}

/// Constructor of [`RtcPeerConnection`]s.
pub trait RtcPeerConnectionFactory {
    /// Creates a new [`RtcPeerConnection`] using the provided ICE servers.
    ///
    /// # Errors
    ///
    /// With [`RtcPeerConnectionError::CreatePeer`] if the backend cannot
    /// create a connection.
    fn create(
        &self,
        ice_servers: &[IceServer],
    ) -> Result<Rc<dyn RtcPeerConnection>, RtcPeerConnectionError>;
}
