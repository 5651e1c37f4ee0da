use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use shared::{
    domain::{
        Board, BoardId, BoardStatus, CardId, ColumnId, Participant, Phase, TeamId, VoteType,
    },
    protocol::{CardUpdate, NewCard, PushMessage},
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::{
    aggregation::{can_control, find_vote},
    api::BoardApi,
    error::{Rejection, SyncError, SyncResult},
    layout::plan_move,
    reconciler::CardTally,
    timer::TimerState,
    transport::PushSink,
};

const EVENT_CAPACITY: usize = 256;

/// Who is acting in this session. Passed explicitly instead of living in globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub identity: String,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

impl SessionContext {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            display_name: None,
            avatar: None,
        }
    }

    pub fn participant(&self) -> Participant {
        Participant {
            username: self.identity.clone(),
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SnapshotUpdated(Box<Board>),
    VoteTallyChanged(CardTally),
    ParticipantsUpdated(Vec<Participant>),
    TimerChanged(TimerState),
    TimerExpired,
    /// A user-initiated action failed; the message is shown verbatim.
    Error(String),
}

#[derive(Debug, Clone, Copy)]
struct Gate {
    action: &'static str,
    control: bool,
    allow_finished: bool,
}

impl Gate {
    fn open(action: &'static str) -> Self {
        Self {
            action,
            control: false,
            allow_finished: false,
        }
    }

    fn control(action: &'static str) -> Self {
        Self {
            action,
            control: true,
            allow_finished: false,
        }
    }
}

/// Owns the canonical snapshot for one board and gates every mutation against it.
pub struct BoardSession {
    board_id: BoardId,
    context: SessionContext,
    api: Arc<dyn BoardApi>,
    push: Arc<dyn PushSink>,
    snapshot: RwLock<Option<Board>>,
    /// Last pushed participant list. Snapshots never overwrite it.
    roster: StdMutex<Option<Vec<Participant>>>,
    timer: StdMutex<TimerState>,
    events: broadcast::Sender<ClientEvent>,
}

impl BoardSession {
    pub fn new(
        board_id: BoardId,
        context: SessionContext,
        api: Arc<dyn BoardApi>,
        push: Arc<dyn PushSink>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            board_id,
            context,
            api,
            push,
            snapshot: RwLock::new(None),
            roster: StdMutex::new(None),
            timer: StdMutex::new(TimerState::default()),
            events,
        })
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn api(&self) -> &Arc<dyn BoardApi> {
        &self.api
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> Option<Board> {
        self.snapshot.read().await.clone()
    }

    /// The pushed participant list, or the snapshot's until the first push arrives.
    pub async fn participants(&self) -> Vec<Participant> {
        if let Some(roster) = self.roster.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return roster;
        }
        self.snapshot
            .read()
            .await
            .as_ref()
            .map(|board| board.participants.clone())
            .unwrap_or_default()
    }

    pub fn timer(&self) -> TimerState {
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn can_control(&self) -> bool {
        self.snapshot
            .read()
            .await
            .as_ref()
            .is_some_and(|board| can_control(board, &self.context.identity))
    }

    /// Fetches the board and makes it the canonical snapshot.
    pub async fn refresh(&self) -> SyncResult<Board> {
        let board = self.api.fetch_board(self.board_id).await?;
        self.apply_snapshot(board.clone()).await;
        Ok(board)
    }

    /// Replaces the snapshot if it differs from the current one. Returns whether it changed.
    pub async fn apply_snapshot(&self, mut board: Board) -> bool {
        board.normalize();
        let mut current = self.snapshot.write().await;
        if current.as_ref() == Some(&board) {
            debug!(board_id = %self.board_id, "session: snapshot unchanged");
            return false;
        }
        *current = Some(board.clone());
        drop(current);
        self.emit(ClientEvent::SnapshotUpdated(Box::new(board)));
        true
    }

    pub async fn join(&self) -> SyncResult<()> {
        self.api
            .join_board(self.board_id, &self.context.participant())
            .await
    }

    pub async fn leave(&self) -> SyncResult<()> {
        self.api
            .leave_board(self.board_id, &self.context.identity)
            .await
    }

    /// Applies a push message addressed to this board. Messages for other boards are ignored.
    pub async fn handle_push(&self, message: &PushMessage) {
        if let Some(board_id) = message.board_id() {
            if board_id != self.board_id {
                return;
            }
        }
        match message {
            PushMessage::BoardUpdate { .. }
            | PushMessage::VoteUpdate { .. }
            | PushMessage::CardMove { .. }
            | PushMessage::PhaseChange { .. } => {
                if let Err(err) = self.refresh().await {
                    warn!(
                        board_id = %self.board_id,
                        kind = message.kind(),
                        error = %err,
                        "session: refresh after push failed"
                    );
                }
            }
            PushMessage::ParticipantsUpdate { participants, .. } => {
                if self.participants().await == *participants {
                    return;
                }
                *self.roster.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(participants.clone());
                self.emit(ClientEvent::ParticipantsUpdated(participants.clone()));
            }
            PushMessage::TimerStart { .. }
            | PushMessage::TimerUpdate { .. }
            | PushMessage::TimerStop {} => {
                let state = {
                    let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
                    timer.apply(message).then_some(*timer)
                };
                if let Some(state) = state {
                    self.emit(ClientEvent::TimerChanged(state));
                }
            }
        }
    }

    /// Advances the local countdown by one second.
    pub fn tick_timer(&self) -> TimerState {
        let (state, expired) = {
            let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
            let expired = timer.tick();
            (*timer, expired)
        };
        if expired {
            self.emit(ClientEvent::TimerExpired);
        } else if state.running {
            self.emit(ClientEvent::TimerChanged(state));
        }
        state
    }

    pub async fn switch_phase(&self) -> SyncResult<Phase> {
        let gate = Gate::control("switch phase");
        let outcome = async {
            let board = self.gate(gate).await?;
            let next = board.phase.next();
            self.api.update_phase(self.board_id, next).await?;
            Ok::<_, SyncError>(next)
        }
        .await;
        let next = self.settle(gate.action, outcome).await?;
        self.push.send(&PushMessage::PhaseChange {
            phase: next,
            board_id: Some(self.board_id),
        });
        Ok(next)
    }

    pub async fn finish(&self) -> SyncResult<()> {
        let gate = Gate::control("finish");
        let outcome = async {
            self.gate(gate).await?;
            self.api
                .update_status(self.board_id, BoardStatus::Finished)
                .await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Returns the board to active. The phase is left as it was when the board finished.
    pub async fn reopen(&self) -> SyncResult<()> {
        let gate = Gate {
            action: "reopen",
            control: true,
            allow_finished: true,
        };
        let outcome = async {
            let board = self.gate(gate).await?;
            if !board.is_finished() {
                return Err(Rejection::BoardNotFinished.into());
            }
            self.api
                .update_status(self.board_id, BoardStatus::Active)
                .await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn claim_manager(&self) -> SyncResult<()> {
        let gate = Gate::open("claim");
        let outcome = async {
            self.gate(gate).await?;
            self.api
                .claim_manager(self.board_id, &self.context.identity)
                .await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn unclaim_manager(&self) -> SyncResult<()> {
        let gate = Gate::open("unclaim");
        let outcome = async {
            self.gate(gate).await?;
            self.api
                .unclaim_manager(self.board_id, &self.context.identity)
                .await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Casts a vote, or withdraws it if this identity already cast the same type on the card.
    pub async fn vote(&self, card_id: CardId, vote_type: VoteType) -> SyncResult<()> {
        let gate = Gate::open("vote");
        let outcome = async {
            let board = self.gate(gate).await?;
            if board.phase != Phase::Voting {
                return Err(Rejection::WrongPhase {
                    current: board.phase,
                }
                .into());
            }
            let card = board
                .find_card(card_id)
                .ok_or(Rejection::UnknownCard(card_id))?;
            match find_vote(card, &self.context.identity, vote_type).and_then(|vote| vote.id) {
                Some(vote_id) => self.api.delete_vote(vote_id).await?,
                None => {
                    self.api
                        .cast_vote(card_id, &self.context.identity, vote_type)
                        .await?
                }
            }
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Moves a card to `position` among the visible cards of `to_column`; a move that
    /// leaves the visible order unchanged sends nothing.
    pub async fn move_card(
        &self,
        card_id: CardId,
        to_column: ColumnId,
        position: usize,
    ) -> SyncResult<()> {
        let gate = Gate::open("move");
        let outcome = async {
            let board = self.gate(gate).await?;
            let plan = plan_move(&board, card_id, to_column, position)?;
            if plan.is_noop(&board) {
                debug!(board_id = %self.board_id, card_id = %card_id, "session: move is a no-op");
                return Ok(false);
            }
            self.api
                .move_card(card_id, plan.to_column, plan.position)
                .await?;
            Ok::<_, SyncError>(true)
        }
        .await;
        match outcome {
            Ok(false) => Ok(()),
            other => self.settle(gate.action, other).await.map(drop),
        }
    }

    /// Folds `source` under `target`. The merge tree stays one level deep.
    pub async fn merge(&self, source: CardId, target: CardId) -> SyncResult<()> {
        let gate = Gate::open("merge");
        let outcome = async {
            let board = self.gate(gate).await?;
            if source == target {
                return Err(Rejection::SelfMerge(source).into());
            }
            let source_card = board
                .find_card(source)
                .ok_or(Rejection::UnknownCard(source))?;
            let target_card = board
                .find_card(target)
                .ok_or(Rejection::UnknownCard(target))?;
            if source_card.is_folded() {
                return Err(Rejection::AlreadyMerged(source).into());
            }
            if !source_card.merged_cards.is_empty() {
                return Err(Rejection::SourceHasChildren(source).into());
            }
            if target_card.is_folded() {
                return Err(Rejection::AlreadyMerged(target).into());
            }
            self.api.merge_card(source, target).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn unmerge(&self, child: CardId) -> SyncResult<()> {
        let gate = Gate::open("unmerge");
        let outcome = async {
            let board = self.gate(gate).await?;
            let card = board
                .find_card(child)
                .ok_or(Rejection::UnknownCard(child))?;
            if !card.is_folded() {
                return Err(Rejection::NotMerged(child).into());
            }
            self.api.unmerge_card(child).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Unmerges the child folded most recently into `parent`.
    pub async fn unmerge_last(&self, parent: CardId) -> SyncResult<()> {
        let last = {
            let snapshot = self.snapshot.read().await;
            snapshot
                .as_ref()
                .and_then(|board| board.find_card(parent))
                .map(|card| card.merged_cards.last().map(|child| child.id))
        };
        match last {
            Some(Some(child)) => self.unmerge(child).await,
            Some(None) => Err(self.surface("unmerge", Rejection::NoChildren(parent).into())),
            None => {
                let rejection = if self.snapshot.read().await.is_none() {
                    Rejection::NoBoard
                } else {
                    Rejection::UnknownCard(parent)
                };
                Err(self.surface("unmerge", rejection.into()))
            }
        }
    }

    pub async fn create_column(&self, name: &str) -> SyncResult<()> {
        let gate = Gate::control("create column");
        let outcome = async {
            self.gate(gate).await?;
            let name = non_empty(name)?;
            self.api.create_column(self.board_id, name).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn update_column(&self, column_id: ColumnId, name: &str) -> SyncResult<()> {
        let gate = Gate::control("update column");
        let outcome = async {
            let board = self.gate(gate).await?;
            board
                .column(column_id)
                .ok_or(Rejection::UnknownColumn(column_id))?;
            let name = non_empty(name)?;
            self.api.update_column(column_id, name).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Deletes a column and, server-side, every card in it.
    pub async fn delete_column(&self, column_id: ColumnId) -> SyncResult<()> {
        let gate = Gate::control("delete column");
        let outcome = async {
            let board = self.gate(gate).await?;
            board
                .column(column_id)
                .ok_or(Rejection::UnknownColumn(column_id))?;
            self.api.delete_column(column_id).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn create_card(&self, column_id: ColumnId, content: &str) -> SyncResult<()> {
        let gate = Gate::open("create card");
        let outcome = async {
            let board = self.gate(gate).await?;
            board
                .column(column_id)
                .ok_or(Rejection::UnknownColumn(column_id))?;
            let card = NewCard {
                content: non_empty(content)?.to_string(),
                owner: self.context.identity.clone(),
            };
            self.api.create_card(column_id, card).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn update_card(&self, card_id: CardId, mut update: CardUpdate) -> SyncResult<()> {
        let gate = Gate::open("update card");
        let outcome = async {
            let board = self.gate(gate).await?;
            board
                .find_card(card_id)
                .ok_or(Rejection::UnknownCard(card_id))?;
            if let Some(content) = update.content.take() {
                update.content = Some(non_empty(&content)?.to_string());
            }
            self.api.update_card(card_id, update).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn delete_card(&self, card_id: CardId) -> SyncResult<()> {
        let gate = Gate::open("delete card");
        let outcome = async {
            let board = self.gate(gate).await?;
            board
                .find_card(card_id)
                .ok_or(Rejection::UnknownCard(card_id))?;
            self.api.delete_card(card_id).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    pub async fn set_linked_teams(&self, team_ids: &[TeamId]) -> SyncResult<()> {
        let gate = Gate::control("link teams");
        let outcome = async {
            self.gate(gate).await?;
            self.api.set_linked_teams(self.board_id, team_ids).await?;
            Ok::<_, SyncError>(())
        }
        .await;
        self.settle(gate.action, outcome).await
    }

    /// Broadcasts a countdown start to every client, this one included.
    pub async fn start_timer(&self, seconds: u32) -> SyncResult<()> {
        let message = PushMessage::TimerStart { seconds };
        self.broadcast_timer(Gate::control("start timer"), message)
            .await
    }

    pub async fn stop_timer(&self) -> SyncResult<()> {
        self.broadcast_timer(Gate::control("stop timer"), PushMessage::TimerStop {})
            .await
    }

    async fn broadcast_timer(&self, gate: Gate, message: PushMessage) -> SyncResult<()> {
        if let Err(err) = self.gate(gate).await {
            return Err(self.surface(gate.action, err.into()));
        }
        if !self.push.send(&message) {
            debug!(board_id = %self.board_id, "session: timer message not delivered");
        }
        self.handle_push(&message).await;
        Ok(())
    }

    async fn gate(&self, gate: Gate) -> Result<Board, Rejection> {
        let snapshot = self.snapshot.read().await;
        let board = snapshot.as_ref().ok_or(Rejection::NoBoard)?;
        if board.is_finished() && !gate.allow_finished {
            return Err(Rejection::BoardFinished);
        }
        if gate.control && !can_control(board, &self.context.identity) {
            return Err(Rejection::NotPermitted {
                identity: self.context.identity.clone(),
                action: gate.action,
            });
        }
        Ok(board.clone())
    }

    /// On success re-fetches the snapshot and tells peers to refresh. On failure surfaces the
    /// error and leaves the snapshot untouched.
    async fn settle<T>(&self, action: &'static str, outcome: SyncResult<T>) -> SyncResult<T> {
        match outcome {
            Ok(value) => {
                info!(board_id = %self.board_id, action, "session: mutation accepted");
                if let Err(err) = self.refresh().await {
                    warn!(
                        board_id = %self.board_id,
                        action,
                        error = %err,
                        "session: refresh after mutation failed"
                    );
                }
                self.push.send(&PushMessage::BoardUpdate {
                    board_id: self.board_id,
                });
                Ok(value)
            }
            Err(err) => Err(self.surface(action, err)),
        }
    }

    fn surface(&self, action: &'static str, err: SyncError) -> SyncError {
        warn!(board_id = %self.board_id, action, error = %err, "session: mutation failed");
        self.emit(ClientEvent::Error(err.to_string()));
        err
    }
}

fn non_empty(text: &str) -> Result<&str, Rejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(Rejection::EmptyContent)
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
