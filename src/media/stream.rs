//! Collections of media tracks.

use std::{cell::RefCell, fmt, rc::Rc};

use playroom_signalling_proto::PeerId;

use crate::platform::{MediaKind, MediaTrack};

/// Tracks captured from the local devices.
///
/// Shared by reference between the [`MediaManager`] and every
/// [`PeerConnection`] sending it.
///
/// [`MediaManager`]: super::MediaManager
/// [`PeerConnection`]: crate::peer::PeerConnection
pub struct LocalMediaStream {
    tracks: Vec<Rc<dyn MediaTrack>>,
}

impl LocalMediaStream {
    /// Wraps the provided tracks.
    #[inline]
    #[must_use]
    pub fn new(tracks: Vec<Rc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    /// Returns all the tracks of this stream.
    #[inline]
    #[must_use]
    pub fn tracks(&self) -> &[Rc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Returns the tracks of the provided [`MediaKind`].
    pub fn tracks_of(
        &self,
        kind: MediaKind,
    ) -> impl Iterator<Item = &Rc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// Indicates whether this stream has a track of the provided
    /// [`MediaKind`].
    #[must_use]
    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    /// Stops every track of this stream.
    pub(super) fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaStream")
            .field("tracks", &track_ids(&self.tracks))
            .finish()
    }
}

/// Tracks received from a remote `Peer`.
///
/// Filled by the [`PeerConnection`] as the remote side adds tracks, read by
/// the presentation layer.
///
/// [`PeerConnection`]: crate::peer::PeerConnection
pub struct RemoteMediaStream {
    peer_id: PeerId,
    tracks: RefCell<Vec<Rc<dyn MediaTrack>>>,
}

impl RemoteMediaStream {
    /// Creates an empty [`RemoteMediaStream`] of the provided `Peer`.
    #[must_use]
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            tracks: RefCell::default(),
        }
    }

    /// ID of the `Peer` sending this stream.
    #[inline]
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Returns the received tracks.
    #[must_use]
    pub fn tracks(&self) -> Vec<Rc<dyn MediaTrack>> {
        self.tracks.borrow().clone()
    }

    /// Indicates whether no track was received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.borrow().is_empty()
    }

    /// Adds a received track, ignoring a track with an already known ID.
    ///
    /// Returns `false` if the track was ignored.
    pub(crate) fn add_track(&self, track: Rc<dyn MediaTrack>) -> bool {
        let mut tracks = self.tracks.borrow_mut();
        let id = track.id();
        if tracks.iter().any(|t| t.id() == id) {
            return false;
        }
        tracks.push(track);
        true
    }
}

impl fmt::Debug for RemoteMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMediaStream")
            .field("peer_id", &self.peer_id)
            .field("tracks", &track_ids(&self.tracks.borrow()))
            .finish()
    }
}

fn track_ids(tracks: &[Rc<dyn MediaTrack>]) -> Vec<String> {
    tracks.iter().map(|t| t.id()).collect()
}
