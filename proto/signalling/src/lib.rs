//! Signalling protocol of Playroom video rooms.
//!
//! Client and relay server exchange named events carrying JSON payloads (the
//! shape of a [Socket.IO] emit). This crate defines the typed payloads and the
//! mapping between them and `(event name, payload)` pairs:
//!
//! | Direction | Event name    | Payload                                  |
//! |-----------|---------------|------------------------------------------|
//! | C → S     | `join-room`   | [`JoinRoom`], acknowledged with [`JoinAck`] |
//! | C → S     | `leave-room`  | [`LeaveRoom`]                            |
//! | C → S     | `signal`      | [`OutgoingSignal`]                       |
//! | S → C     | `peer-joined` | [`PeerJoined`]                           |
//! | S → C     | `peer-left`   | [`PeerLeft`]                             |
//! | S → C     | `signal`      | [`IncomingSignal`]                       |
//!
//! [Socket.IO]: https://socket.io/docs/v4/emitting-events

#![deny(
    broken_intra_doc_links,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts
)]
#![forbid(unsafe_code)]
#![warn(
    deprecated_in_future,
    missing_copy_implementations,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

use std::fmt;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// ID of a `Room`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct RoomId(pub String);

/// ID of a room participant.
///
/// The same ID identifies the local user when joining and the remote `Peer`
/// once other participants see it.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[from(forward)]
pub struct PeerId(pub String);

/// [ICE] server the `PeerConnection` is allowed to use.
///
/// [ICE]: https://webrtcglossary.com/ice
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceServer {
    /// URLs of this [STUN]/[TURN] server.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    pub urls: Vec<String>,

    /// Username to use during the authentication process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential to use when logging into the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Representation of [RTCIceCandidate][1].
///
/// [1]: https://w3.org/TR/webrtc/#rtcicecandidate-interface
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// [`candidate` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-candidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    pub candidate: String,

    /// [`sdpMLineIndex` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmlineindex
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,

    /// [`sdpMid` field][1] of the discovered [RTCIceCandidate][2].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmid
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    #[serde(default)]
    pub sdp_mid: Option<String>,
}

/// Negotiation message relayed between two `Peer`s.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Signal {
    /// SDP offer.
    Offer(String),

    /// SDP answer.
    Answer(String),

    /// ICE candidate discovered by the sending `Peer`.
    Candidate(IceCandidate),
}

/// Request of a client to join a `Room`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    /// ID of the `Room` to join.
    pub room_id: RoomId,

    /// ID the joining client is known by in the `Room`.
    pub user_id: PeerId,
}

/// Acknowledgement of a [`JoinRoom`] request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct JoinAck {
    /// Participants present in the `Room` before the client joined.
    #[serde(default)]
    pub participants: Vec<PeerId>,
}

/// Notification of a client leaving a `Room`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    /// ID of the `Room` being left.
    pub room_id: RoomId,

    /// ID of the leaving client.
    pub user_id: PeerId,
}

/// [`Signal`] sent by a client to another `Peer`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingSignal {
    /// Recipient of the [`Signal`].
    pub to_peer_id: PeerId,

    /// Relayed [`Signal`].
    #[serde(flatten)]
    pub signal: Signal,
}

/// [`Signal`] relayed by the server from another `Peer`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingSignal {
    /// Sender of the [`Signal`].
    pub from_peer_id: PeerId,

    /// Relayed [`Signal`].
    #[serde(flatten)]
    pub signal: Signal,
}

/// Server notification about a new participant in the `Room`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoined {
    /// ID of the joined participant.
    pub peer_id: PeerId,
}

/// Server notification about a participant leaving the `Room`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    /// ID of the left participant.
    pub peer_id: PeerId,
}

/// Message sent by a client to the server.
#[derive(Clone, Debug, Eq, From, PartialEq)]
pub enum Command {
    /// `join-room` request.
    JoinRoom(JoinRoom),

    /// `leave-room` notification.
    LeaveRoom(LeaveRoom),

    /// `signal` relay request.
    Signal(OutgoingSignal),
}

impl Command {
    /// Returns the event name this [`Command`] is emitted with.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom(_) => "leave-room",
            Self::Signal(_) => "signal",
        }
    }

    /// Encodes this [`Command`] into an `(event name, payload)` pair.
    ///
    /// # Errors
    ///
    /// If the payload cannot be represented as JSON.
    pub fn encode(&self) -> Result<(&'static str, Value), serde_json::Error> {
        let payload = match self {
            Self::JoinRoom(msg) => serde_json::to_value(msg)?,
            Self::LeaveRoom(msg) => serde_json::to_value(msg)?,
            Self::Signal(msg) => serde_json::to_value(msg)?,
        };
        Ok((self.event_name(), payload))
    }
}

/// Kind of an [`Event`], used to subscribe to a subset of inbound messages.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventKind {
    /// [`PeerJoined`] notification.
    PeerJoined,

    /// [`PeerLeft`] notification.
    PeerLeft,

    /// [`IncomingSignal`] relay.
    Signal,
}

impl EventKind {
    /// Every known [`EventKind`].
    pub const ALL: [Self; 3] = [Self::PeerJoined, Self::PeerLeft, Self::Signal];

    /// Returns the event name of this [`EventKind`] on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerJoined => "peer-joined",
            Self::PeerLeft => "peer-left",
            Self::Signal => "signal",
        }
    }

    /// Looks up the [`EventKind`] by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent by the server to a client.
#[derive(Clone, Debug, Eq, From, PartialEq)]
pub enum Event {
    /// `peer-joined` notification.
    PeerJoined(PeerJoined),

    /// `peer-left` notification.
    PeerLeft(PeerLeft),

    /// `signal` relay.
    Signal(IncomingSignal),
}

/// Errors of decoding an inbound `(event name, payload)` pair.
#[derive(Debug, Display)]
pub enum DecodeError {
    /// Event name is not part of the protocol.
    #[display(fmt = "unknown event `{}`", _0)]
    UnknownEvent(String),

    /// Payload doesn't match the event's schema.
    #[display(fmt = "malformed `{}` payload: {}", _0, _1)]
    MalformedPayload(EventKind, serde_json::Error),
}

impl std::error::Error for DecodeError {}

impl Event {
    /// Returns the [`EventKind`] of this [`Event`].
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PeerJoined(_) => EventKind::PeerJoined,
            Self::PeerLeft(_) => EventKind::PeerLeft,
            Self::Signal(_) => EventKind::Signal,
        }
    }

    /// Returns ID of the `Peer` this [`Event`] is about.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::PeerJoined(e) => &e.peer_id,
            Self::PeerLeft(e) => &e.peer_id,
            Self::Signal(e) => &e.from_peer_id,
        }
    }

    /// Decodes an inbound `(event name, payload)` pair.
    ///
    /// # Errors
    ///
    /// With [`DecodeError::UnknownEvent`] if the `name` is not a known event.
    ///
    /// With [`DecodeError::MalformedPayload`] if the `payload` doesn't match
    /// the event's schema.
    pub fn decode(name: &str, payload: Value) -> Result<Self, DecodeError> {
        let kind = EventKind::from_name(name)
            .ok_or_else(|| DecodeError::UnknownEvent(name.to_owned()))?;
        let event = match kind {
            EventKind::PeerJoined => {
                serde_json::from_value(payload).map(Self::PeerJoined)
            }
            EventKind::PeerLeft => {
                serde_json::from_value(payload).map(Self::PeerLeft)
            }
            EventKind::Signal => {
                serde_json::from_value(payload).map(Self::Signal)
            }
        };
        event.map_err(|e| DecodeError::MalformedPayload(kind, e))
    }
}

/// Connection state reported by the WebRTC stack for a `PeerConnection`.
///
/// Mirrors [RTCPeerConnectionState][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcpeerconnectionstate
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    /// None of the ICE transports started connecting yet.
    New,

    /// One or more of the ICE transports are establishing a connection.
    Connecting,

    /// Every ICE transport in use is connected or completed.
    Connected,

    /// At least one of the ICE transports lost connectivity, none failed.
    Disconnected,

    /// One or more of the ICE transports failed.
    Failed,

    /// The `PeerConnection` is closed.
    Closed,
}
