use std::{sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    error::SyncResult,
    event_bus::{BusEvent, EventBus},
    reconciler::{spawn_poller, PollHandle},
    session::{BoardSession, ClientEvent},
    timer::TICK,
};

/// An open board: the push listener, the countdown ticker and the poll loop for one board.
/// Closing or dropping the view cancels all of them.
pub struct BoardView {
    session: Arc<BoardSession>,
    listener: JoinHandle<()>,
    poller: PollHandle,
}

impl BoardView {
    /// Loads the board, joins it as a participant and starts the push and poll paths.
    pub async fn open(
        session: Arc<BoardSession>,
        bus: &EventBus,
        poll_interval: Duration,
    ) -> SyncResult<Self> {
        session.refresh().await?;
        if let Err(err) = session.join().await {
            warn!(board_id = %session.board_id(), error = %err, "view: join failed");
        }

        let listener = tokio::spawn(listen(Arc::clone(&session), bus.subscribe()));
        let tally_session = Arc::clone(&session);
        let poller = spawn_poller(
            Arc::clone(&session),
            poll_interval,
            Arc::new(move |tally| tally_session.emit(ClientEvent::VoteTallyChanged(tally))),
        );
        info!(board_id = %session.board_id(), "view: opened");
        Ok(Self {
            session,
            listener,
            poller,
        })
    }

    pub fn session(&self) -> &Arc<BoardSession> {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        !self.listener.is_finished() && !self.poller.is_finished()
    }

    /// Stops listening and polling, then leaves the board.
    pub async fn close(self) {
        self.listener.abort();
        self.poller.stop();
        if let Err(err) = self.session.leave().await {
            warn!(board_id = %self.session.board_id(), error = %err, "view: leave failed");
        }
        info!(board_id = %self.session.board_id(), "view: closed");
    }
}

impl Drop for BoardView {
    fn drop(&mut self) {
        self.listener.abort();
        self.poller.stop();
    }
}

async fn listen(session: Arc<BoardSession>, mut events: broadcast::Receiver<BusEvent>) {
    let mut next_tick: Option<Instant> = None;
    loop {
        next_tick = match (session.timer().running, next_tick) {
            (false, _) => None,
            (true, None) => Some(Instant::now() + TICK),
            (true, pending) => pending,
        };
        let deadline = next_tick;

        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match event.decode() {
                    Ok(message) => session.handle_push(&message).await,
                    Err(_) => debug!(name = %event.name, "view: ignoring event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(board_id = %session.board_id(), skipped, "view: listener lagged, refreshing");
                    if let Err(err) = session.refresh().await {
                        warn!(board_id = %session.board_id(), error = %err, "view: refresh failed");
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                session.tick_timer();
                next_tick = deadline.map(|at| at + TICK);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
