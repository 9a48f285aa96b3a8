use tokio::sync::broadcast;

const AUTH_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// The backend rejected the stored credentials; the session was cleared.
    Unauthorized,
}

/// Process-wide fan-out of authentication events to every observer.
#[derive(Debug, Clone)]
pub struct AuthEvents {
    sender: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event; returns how many observers received it.
    pub fn emit(&self, event: AuthEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                log::debug!("No observers for auth event {:?}", event);
                0
            }
        }
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}
