//! Client-side state synchronization for shared retrospective boards.
//!
//! A [`BoardView`] keeps one board's [`BoardSession`] snapshot converged with the server over
//! two redundant paths: push frames arriving through the [`EventBus`] and a poll loop that
//! re-fetches the board and reports only cards whose vote counts changed.

pub mod aggregation;
pub mod api;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod layout;
pub mod reconciler;
pub mod session;
pub mod timer;
pub mod transport;
pub mod view;

pub use api::{BoardApi, HttpBoardApi, MissingBoardApi};
pub use config::{load_settings, ClientSettings};
pub use error::{Rejection, SyncError, SyncResult};
pub use event_bus::{BusEvent, EventBus};
pub use reconciler::{CardTally, PollDiff, PollHandle};
pub use session::{BoardSession, ClientEvent, SessionContext};
pub use timer::TimerState;
pub use transport::{MissingPushSink, PushSink, PushTransport};
pub use view::BoardView;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
