//! Captured or received media track.

use derive_more::Display;

/// Media exchange direction kind of a [`MediaTrack`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum MediaKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Platform media track (a `MediaStreamTrack` in the browser's terms).
///
/// Tracks are shared by reference: disabling a track disables it everywhere
/// it is sent.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
pub trait MediaTrack {
    /// Unique ID of this track.
    fn id(&self) -> String;

    /// [`MediaKind`] of this track.
    fn kind(&self) -> MediaKind;

    /// Indicates whether this track currently produces media.
    fn enabled(&self) -> bool;

    /// Enables or disables this track in place.
    fn set_enabled(&self, enabled: bool);

    /// Stops this track, releasing the underlying device.
    fn stop(&self);
}
