use tracing::{debug, warn};
use wordway_runtime::host::Host;

/// Host backed by the desktop's default URL handlers.
///
/// The options page is opened in the default browser; audio URLs are handed
/// to whatever the system associates with them.
pub struct DesktopHost {
    options_url: String,
}

impl DesktopHost {
    pub fn new(options_url: impl Into<String>) -> Self {
        Self {
            options_url: options_url.into(),
        }
    }

    pub fn options_url(&self) -> &str {
        &self.options_url
    }

    fn launch(&self, what: &str, target: &str) {
        match open::that_detached(target) {
            Ok(()) => debug!(what, target, "handed to system handler"),
            Err(e) => warn!(what, target, error = %e, "system handler failed"),
        }
    }
}

impl Host for DesktopHost {
    fn open_options_page(&self) {
        self.launch("options page", &self.options_url);
    }

    fn play_audio(&self, url: &str) {
        self.launch("audio", url);
    }
}
