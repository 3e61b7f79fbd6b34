/// Local capabilities the host environment offers the broker.
///
/// Both calls are fire-and-forget: implementations report their own failures
/// through logging and never block the caller on completion.
pub trait Host: Send + Sync {
    /// Bring up the extension's settings surface.
    fn open_options_page(&self);

    /// Start playing the audio resource at `url`.
    fn play_audio(&self, url: &str);
}

/// A host that only records what it was asked to do.
///
/// Useful for embedding the broker where no desktop is available, and in
/// tests.
#[derive(Debug, Default)]
pub struct RecordingHost {
    events: parking_lot::Mutex<Vec<HostEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    OpenOptionsPage,
    PlayAudio(String),
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }
}

impl Host for RecordingHost {
    fn open_options_page(&self) {
        tracing::debug!("options page requested");
        self.events.lock().push(HostEvent::OpenOptionsPage);
    }

    fn play_audio(&self, url: &str) {
        tracing::debug!(url, "audio playback requested");
        self.events.lock().push(HostEvent::PlayAudio(url.to_string()));
    }
}
