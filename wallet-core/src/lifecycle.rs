use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const LIFECYCLE_CAPACITY: usize = 32;

/// Foreground/background transitions of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

impl AppLifecycle {
    /// Map a host app-state name; `inactive` counts as background.
    pub fn from_host_state(state: &str) -> Option<Self> {
        match state.trim().to_ascii_lowercase().as_str() {
            "active" | "foreground" => Some(AppLifecycle::Foreground),
            "inactive" | "background" => Some(AppLifecycle::Background),
            _ => None,
        }
    }
}

/// Source of lifecycle transitions injected into the controllers.
pub trait LifecycleSignal: Send + Sync {
    fn subscribe(&self) -> LifecycleSubscription;
}

/// A live subscription; dropping it unsubscribes.
#[derive(Debug)]
pub struct LifecycleSubscription {
    receiver: broadcast::Receiver<AppLifecycle>,
}

impl LifecycleSubscription {
    pub fn new(receiver: broadcast::Receiver<AppLifecycle>) -> Self {
        Self { receiver }
    }

    /// Next transition in delivery order, or `None` once the source is gone.
    pub async fn next(&mut self) -> Option<AppLifecycle> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Lifecycle listener lagged, {} transitions dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// In-process lifecycle broadcaster fed by the host shell.
#[derive(Debug)]
pub struct LifecycleHub {
    sender: broadcast::Sender<AppLifecycle>,
    current: Mutex<AppLifecycle>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            sender,
            current: Mutex::new(AppLifecycle::Foreground),
        }
    }

    /// Publish a transition. Repeats of the current state are dropped.
    pub fn emit(&self, event: AppLifecycle) -> bool {
        {
            let mut current = self.current.lock();
            if *current == event {
                return false;
            }
            *current = event;
        }
        log::debug!("App lifecycle -> {:?}", event);
        let _ = self.sender.send(event);
        true
    }

    pub fn current(&self) -> AppLifecycle {
        *self.current.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LifecycleHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleSignal for LifecycleHub {
    fn subscribe(&self) -> LifecycleSubscription {
        LifecycleSubscription::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_state_mapping() {
        assert_eq!(
            AppLifecycle::from_host_state("active"),
            Some(AppLifecycle::Foreground)
        );
        assert_eq!(
            AppLifecycle::from_host_state("inactive"),
            Some(AppLifecycle::Background)
        );
        assert_eq!(
            AppLifecycle::from_host_state("Background"),
            Some(AppLifecycle::Background)
        );
        assert_eq!(AppLifecycle::from_host_state("unknown"), None);
    }

    #[tokio::test]
    async fn subscription_sees_transitions_in_order() {
        let hub = LifecycleHub::new();
        let mut subscription = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        assert!(hub.emit(AppLifecycle::Background));
        assert!(!hub.emit(AppLifecycle::Background));
        assert!(hub.emit(AppLifecycle::Foreground));

        assert_eq!(subscription.next().await, Some(AppLifecycle::Background));
        assert_eq!(subscription.next().await, Some(AppLifecycle::Foreground));

        subscription.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);
    }
}
