use futures::Stream;
use tokio::sync::watch;

use crate::models::{Session, SessionEvent};

/// Stream of session transitions.
///
/// The first call to [`SessionObserver::next`] yields the current state
/// at once. Later calls wait for the next sign-in or sign-out. If several
/// transitions happen between two calls only the latest state is seen.
#[derive(Debug)]
pub struct SessionObserver {
    sessions: watch::Receiver<Option<Session>>,
    primed: bool,
}

impl SessionObserver {
    pub fn new(sessions: watch::Receiver<Option<Session>>) -> Self {
        Self {
            sessions,
            primed: false,
        }
    }

    /// Waits for the next state. Returns `None` once the provider is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if self.primed && self.sessions.changed().await.is_err() {
            return None;
        }
        self.primed = true;

        let current = self.sessions.borrow_and_update().clone();
        Some(SessionEvent::from_session(current))
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> + Send {
        futures::stream::unfold(self, |mut observer| async move {
            let event = observer.next().await?;
            Some((event, observer))
        })
    }
}
