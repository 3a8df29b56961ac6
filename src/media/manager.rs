//! Acquiring and holding the local [`LocalMediaStream`].

use std::{cell::RefCell, fmt, rc::Rc};

use derive_more::Display;
use tracerr::Traced;

use crate::platform::{GetUserMediaError, MediaDevices, MediaKind};

use super::{LocalMediaStream, MediaStreamConstraints};

/// Errors of acquiring local media.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum MediaAccessError {
    /// User or platform policy denied access to the devices.
    #[display(fmt = "permission to use media devices was denied")]
    PermissionDenied,

    /// Requested device doesn't exist or cannot be used.
    #[display(fmt = "media device is unavailable: {}", _0)]
    DeviceUnavailable(String),

    /// Requested device is held by another application.
    #[display(fmt = "media device is already in use: {}", _0)]
    DeviceInUse(String),

    /// Neither audio nor video was requested.
    #[display(fmt = "constraints request neither audio nor video")]
    EmptyConstraints,
}

impl From<GetUserMediaError> for MediaAccessError {
    fn from(err: GetUserMediaError) -> Self {
        match err {
            GetUserMediaError::PermissionDenied => Self::PermissionDenied,
            GetUserMediaError::NotReadable(msg) => Self::DeviceInUse(msg),
            GetUserMediaError::NotFound(msg)
            | GetUserMediaError::Other(msg) => Self::DeviceUnavailable(msg),
        }
    }
}

type Result<T> = std::result::Result<T, Traced<MediaAccessError>>;

/// Snapshot of the local media.
#[derive(Clone, Debug)]
pub struct LocalMediaState {
    /// Currently held stream, if any.
    pub stream: Option<Rc<LocalMediaStream>>,

    /// Whether the video tracks are enabled.
    pub camera_enabled: bool,

    /// Whether the audio tracks are enabled.
    pub microphone_enabled: bool,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            stream: None,
            camera_enabled: true,
            microphone_enabled: true,
        }
    }
}

/// Sole owner of the local camera and microphone.
///
/// Enabled flags outlive the stream, so muting before joining is honoured
/// by the stream acquired later.
pub struct MediaManager {
    devices: Rc<dyn MediaDevices>,
    state: RefCell<LocalMediaState>,
}

impl fmt::Debug for MediaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaManager")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl MediaManager {
    /// Creates a new [`MediaManager`] holding no media.
    #[must_use]
    pub fn new(devices: Rc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            state: RefCell::default(),
        }
    }

    /// Returns the held stream, acquiring a new one with the provided
    /// [`MediaStreamConstraints`] if none is held.
    ///
    /// # Errors
    ///
    /// With [`MediaAccessError::EmptyConstraints`] if nothing is requested.
    ///
    /// With [`MediaAccessError::PermissionDenied`],
    /// [`MediaAccessError::DeviceUnavailable`] or
    /// [`MediaAccessError::DeviceInUse`] if the devices cannot be opened.
    pub async fn acquire(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<Rc<LocalMediaStream>> {
        if let Some(stream) = self.stream() {
            return Ok(stream);
        }

        let acquired = self.get_user_media(constraints).await?;

        // Concurrent `acquire()` may have won the race.
        if let Some(stream) = self.stream() {
            acquired.stop();
            return Ok(stream);
        }

        let acquired = Rc::new(acquired);
        self.state.borrow_mut().stream = Some(Rc::clone(&acquired));
        log::debug!("Acquired local media: {:?}", acquired);
        Ok(acquired)
    }

    /// Replaces the held stream with a newly acquired one, carrying the
    /// enabled flags over.
    ///
    /// Old tracks are stopped only once the new ones are obtained, so on
    /// error the held stream stays untouched.
    ///
    /// # Errors
    ///
    /// Same as [`MediaManager::acquire()`].
    pub async fn reacquire(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<Rc<LocalMediaStream>> {
        let acquired = Rc::new(self.get_user_media(constraints).await?);
        let old =
            self.state.borrow_mut().stream.replace(Rc::clone(&acquired));
        if let Some(old) = old {
            old.stop();
        }
        log::debug!("Reacquired local media: {:?}", acquired);
        Ok(acquired)
    }

    /// Flips the enabled flag of the video tracks in place.
    ///
    /// Returns the new state.
    pub fn toggle_camera(&self) -> bool {
        let mut state = self.state.borrow_mut();
        state.camera_enabled = !state.camera_enabled;
        let enabled = state.camera_enabled;
        if let Some(stream) = &state.stream {
            for track in stream.tracks_of(MediaKind::Video) {
                track.set_enabled(enabled);
            }
        }
        enabled
    }

    /// Flips the enabled flag of the audio tracks in place.
    ///
    /// Returns the new state.
    pub fn toggle_microphone(&self) -> bool {
        let mut state = self.state.borrow_mut();
        state.microphone_enabled = !state.microphone_enabled;
        let enabled = state.microphone_enabled;
        if let Some(stream) = &state.stream {
            for track in stream.tracks_of(MediaKind::Audio) {
                track.set_enabled(enabled);
            }
        }
        enabled
    }

    /// Stops every held track and forgets the stream.
    ///
    /// No-op if nothing is held.
    pub fn release(&self) {
        let stream = self.state.borrow_mut().stream.take();
        if let Some(stream) = stream {
            stream.stop();
            log::debug!("Released local media");
        }
    }

    /// Returns the held stream, if any.
    #[inline]
    #[must_use]
    pub fn stream(&self) -> Option<Rc<LocalMediaStream>> {
        self.state.borrow().stream.clone()
    }

    /// Returns a snapshot of the [`LocalMediaState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> LocalMediaState {
        self.state.borrow().clone()
    }

    /// Asks the platform for new tracks and applies the current enabled
    /// flags to them.
    async fn get_user_media(
        &self,
        constraints: MediaStreamConstraints,
    ) -> Result<LocalMediaStream> {
        if constraints.is_empty() {
            return Err(tracerr::new!(MediaAccessError::EmptyConstraints));
        }
        let tracks = self
            .devices
            .get_user_media(constraints)
            .await
            .map_err(MediaAccessError::from)
            .map_err(tracerr::wrap!())?;

        let state = self.state.borrow();
        for track in &tracks {
            let enabled = match track.kind() {
                MediaKind::Audio => state.microphone_enabled,
                MediaKind::Video => state.camera_enabled,
            };
            track.set_enabled(enabled);
        }
        Ok(LocalMediaStream::new(tracks))
    }
}
