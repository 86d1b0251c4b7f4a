use tracing::{debug, info};

use crate::session::SessionKind;

pub const NOTIFICATION_TITLE: &str = "Pomodoro Timer";

/// Fire-and-forget delivery of session notifications. Implementations must
/// swallow their own failures.
pub trait Notifier: Send {
    fn notify(&self, title: &str, body: &str);
}

/// Body text announcing that a session of `finished` kind is over
pub fn completion_body(finished: SessionKind) -> &'static str {
    match finished {
        SessionKind::Focus => "Focus session complete! Time for a break.",
        SessionKind::Break => "Break time is over! Ready to focus?",
    }
}

/// Desktop notifications via the platform notification service
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "Session notification");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime for desktop notification");
            return;
        };
        let (app_name, title, body) = (self.app_name.clone(), title.to_string(), body.to_string());
        runtime.spawn_blocking(move || {
            let shown = notify_rust::Notification::new()
                .appname(&app_name)
                .summary(&title)
                .body(&body)
                .show();
            if let Err(e) = shown {
                debug!(error = %e, "Desktop notification failed");
            }
        });
    }
}
