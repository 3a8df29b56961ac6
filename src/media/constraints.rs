//! Constraints of a local media acquisition.

/// Constraints of an audio track to capture.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AudioTrackConstraints {
    /// ID of the microphone to capture. Any microphone if `None`.
    pub device_id: Option<String>,
}

impl AudioTrackConstraints {
    /// Creates new [`AudioTrackConstraints`] accepting any microphone.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts capturing to the device with the provided ID.
    #[inline]
    #[must_use]
    pub fn device_id(mut self, device_id: String) -> Self {
        self.device_id = Some(device_id);
        self
    }
}

/// Constraints of a video track to capture.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VideoTrackConstraints {
    /// ID of the camera to capture. Any camera if `None`.
    pub device_id: Option<String>,

    /// Ideal width of the video, in pixels.
    pub width: Option<u32>,

    /// Ideal height of the video, in pixels.
    pub height: Option<u32>,
}

impl VideoTrackConstraints {
    /// Creates new [`VideoTrackConstraints`] accepting any camera.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts capturing to the device with the provided ID.
    #[inline]
    #[must_use]
    pub fn device_id(mut self, device_id: String) -> Self {
        self.device_id = Some(device_id);
        self
    }

    /// Sets the ideal resolution of the video.
    #[inline]
    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// Constraints of a [`LocalMediaStream`] acquisition.
///
/// [`LocalMediaStream`]: super::LocalMediaStream
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MediaStreamConstraints {
    /// Audio track to capture, if any.
    pub audio: Option<AudioTrackConstraints>,

    /// Video track to capture, if any.
    pub video: Option<VideoTrackConstraints>,
}

impl MediaStreamConstraints {
    /// Creates new [`MediaStreamConstraints`] requesting nothing.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an audio track.
    #[inline]
    #[must_use]
    pub fn audio(mut self, audio: AudioTrackConstraints) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Requests a video track.
    #[inline]
    #[must_use]
    pub fn video(mut self, video: VideoTrackConstraints) -> Self {
        self.video = Some(video);
        self
    }

    /// Indicates whether these [`MediaStreamConstraints`] request nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}
