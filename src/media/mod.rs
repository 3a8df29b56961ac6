//! Local and remote media.

mod constraints;
mod manager;
mod stream;

#[doc(inline)]
pub use self::{
    constraints::{
        AudioTrackConstraints, MediaStreamConstraints, VideoTrackConstraints,
    },
    manager::{LocalMediaState, MediaAccessError, MediaManager},
    stream::{LocalMediaStream, RemoteMediaStream},
};
