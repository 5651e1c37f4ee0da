//! In-memory server stand-ins shared by the state-machine, poller and view tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{
        Board, BoardId, BoardStatus, BoardSummary, Card, CardId, Column, ColumnId, Participant,
        Phase, TeamId, TeamSummary, Vote, VoteId, VoteType,
    },
    error::{ApiError, ErrorCode},
    protocol::{CardUpdate, NewCard, PushMessage},
};
use tokio::time::Instant;

use crate::{
    api::BoardApi,
    error::{SyncError, SyncResult},
    transport::PushSink,
};

/// Applies mutations the way the server does and serves normalized snapshots.
#[derive(Default)]
pub(crate) struct InMemoryBoardApi {
    boards: Mutex<HashMap<BoardId, Board>>,
    failing_fetches: AtomicU32,
    next_mutation_error: Mutex<Option<ApiError>>,
    fetches: Mutex<Vec<Instant>>,
    calls: Mutex<Vec<String>>,
}

impl InMemoryBoardApi {
    pub(crate) fn with_board(board: Board) -> Arc<Self> {
        let api = Self::default();
        api.insert(board);
        Arc::new(api)
    }

    pub(crate) fn insert(&self, board: Board) {
        self.boards.lock().expect("boards").insert(board.id, board);
    }

    pub(crate) fn board(&self, board_id: BoardId) -> Board {
        let mut board = self.boards.lock().expect("boards")[&board_id].clone();
        board.normalize();
        board
    }

    /// The next `count` fetches fail with a server error.
    pub(crate) fn fail_fetches(&self, count: u32) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_mutation(&self, status: u16, message: &str) {
        *self.next_mutation_error.lock().expect("error slot") =
            Some(ApiError::new(ErrorCode::from_status(status), message));
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.lock().expect("fetches").len()
    }

    pub(crate) fn fetch_times(&self) -> Vec<Instant> {
        self.fetches.lock().expect("fetches").clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    /// Server-side edit that bypasses the client, as another participant would.
    pub(crate) fn edit(&self, board_id: BoardId, edit: impl FnOnce(&mut Board)) {
        let mut boards = self.boards.lock().expect("boards");
        if let Some(board) = boards.get_mut(&board_id) {
            edit(board);
        }
    }

    fn mutate<T>(
        &self,
        call: &str,
        apply: impl FnOnce(&mut HashMap<BoardId, Board>) -> Result<T, ApiError>,
    ) -> SyncResult<T> {
        self.calls.lock().expect("calls").push(call.to_string());
        if let Some(err) = self.next_mutation_error.lock().expect("error slot").take() {
            return Err(SyncError::Api(err));
        }
        let mut boards = self.boards.lock().expect("boards");
        apply(&mut boards).map_err(SyncError::Api)
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("{what} not found"))
}

fn board_mut(
    boards: &mut HashMap<BoardId, Board>,
    board_id: BoardId,
) -> Result<&mut Board, ApiError> {
    boards.get_mut(&board_id).ok_or_else(|| not_found("Board"))
}

fn column_mut(
    boards: &mut HashMap<BoardId, Board>,
    column_id: ColumnId,
) -> Result<&mut Column, ApiError> {
    boards
        .values_mut()
        .flat_map(|board| board.columns.iter_mut())
        .find(|column| column.id == column_id)
        .ok_or_else(|| not_found("Column"))
}

fn card_mut(boards: &mut HashMap<BoardId, Board>, card_id: CardId) -> Result<&mut Card, ApiError> {
    boards
        .values_mut()
        .flat_map(|board| board.columns.iter_mut())
        .flat_map(|column| column.cards.iter_mut())
        .find(|card| card.id == card_id)
        .ok_or_else(|| not_found("Card"))
}

/// The server keeps positions dense in every column it touches.
fn renumber(cards: &mut [Card]) {
    for (index, card) in cards.iter_mut().enumerate() {
        card.position = index as i32;
    }
}

fn take_card(boards: &mut HashMap<BoardId, Board>, card_id: CardId) -> Result<Card, ApiError> {
    for column in boards
        .values_mut()
        .flat_map(|board| board.columns.iter_mut())
    {
        if let Some(index) = column.cards.iter().position(|card| card.id == card_id) {
            let card = column.cards.remove(index);
            renumber(&mut column.cards);
            return Ok(card);
        }
    }
    Err(not_found("Card"))
}

#[async_trait]
impl BoardApi for InMemoryBoardApi {
    async fn fetch_board(&self, board_id: BoardId) -> SyncResult<Board> {
        self.fetches.lock().expect("fetches").push(Instant::now());
        let remaining = self.failing_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Api(ApiError::new(
                ErrorCode::Internal,
                "database is unavailable",
            )));
        }
        let boards = self.boards.lock().expect("boards");
        let mut board = boards
            .get(&board_id)
            .cloned()
            .ok_or_else(|| SyncError::Api(not_found("Board")))?;
        board.normalize();
        Ok(board)
    }

    async fn list_boards(&self) -> SyncResult<Vec<BoardSummary>> {
        let boards = self.boards.lock().expect("boards");
        Ok(boards
            .values()
            .map(|board| BoardSummary {
                id: board.id,
                name: board.name.clone(),
                status: board.status,
                phase: board.phase,
            })
            .collect())
    }

    async fn create_column(&self, board_id: BoardId, name: &str) -> SyncResult<()> {
        self.mutate("create_column", |boards| {
            let board = board_mut(boards, board_id)?;
            board.columns.push(Column {
                id: ColumnId::new(),
                name: name.to_string(),
                position: board.columns.len() as i32,
                cards: Vec::new(),
            });
            Ok(())
        })
    }

    async fn update_column(&self, column_id: ColumnId, name: &str) -> SyncResult<()> {
        self.mutate("update_column", |boards| {
            column_mut(boards, column_id)?.name = name.to_string();
            Ok(())
        })
    }

    async fn delete_column(&self, column_id: ColumnId) -> SyncResult<()> {
        self.mutate("delete_column", |boards| {
            for board in boards.values_mut() {
                if let Some(index) = board.columns.iter().position(|c| c.id == column_id) {
                    board.columns.remove(index);
                    for (position, column) in board.columns.iter_mut().enumerate() {
                        column.position = position as i32;
                    }
                    return Ok(());
                }
            }
            Err(not_found("Column"))
        })
    }

    async fn create_card(&self, column_id: ColumnId, card: NewCard) -> SyncResult<()> {
        self.mutate("create_card", |boards| {
            let column = column_mut(boards, column_id)?;
            column.cards.push(Card {
                id: CardId::new(),
                column_id,
                content: card.content,
                position: column.cards.len() as i32,
                owner: card.owner,
                ..Card::default()
            });
            Ok(())
        })
    }

    async fn update_card(&self, card_id: CardId, update: CardUpdate) -> SyncResult<()> {
        self.mutate("update_card", |boards| {
            let card = card_mut(boards, card_id)?;
            if let Some(content) = update.content {
                card.content = content;
            }
            if let Some(is_action_item) = update.is_action_item {
                card.is_action_item = is_action_item;
            }
            if update.assignee.is_some() {
                card.assignee = update.assignee;
            }
            if update.due_date.is_some() {
                card.due_date = update.due_date;
            }
            if let Some(completed) = update.completed {
                card.completed = completed;
            }
            if update.completion_date.is_some() {
                card.completion_date = update.completion_date;
            }
            if update.completion_link.is_some() {
                card.completion_link = update.completion_link;
            }
            if update.completion_desc.is_some() {
                card.completion_desc = update.completion_desc;
            }
            Ok(())
        })
    }

    async fn delete_card(&self, card_id: CardId) -> SyncResult<()> {
        self.mutate("delete_card", |boards| {
            take_card(boards, card_id)?;
            for card in boards
                .values_mut()
                .flat_map(|board| board.columns.iter_mut())
                .flat_map(|column| column.cards.iter_mut())
            {
                if card.merged_with_id == Some(card_id) {
                    card.merged_with_id = None;
                }
                card.merged_cards.retain(|child| child.id != card_id);
            }
            Ok(())
        })
    }

    async fn move_card(
        &self,
        card_id: CardId,
        column_id: ColumnId,
        position: usize,
    ) -> SyncResult<()> {
        self.mutate("move_card", |boards| {
            column_mut(boards, column_id)?;
            let mut card = take_card(boards, card_id)?;
            let column = column_mut(boards, column_id)?;
            card.column_id = column_id;
            let index = position.min(column.cards.len());
            column.cards.insert(index, card);
            renumber(&mut column.cards);
            Ok(())
        })
    }

    async fn merge_card(&self, source: CardId, target: CardId) -> SyncResult<()> {
        self.mutate("merge_card", |boards| {
            let source_card = card_mut(boards, source)?;
            if !source_card.merged_cards.is_empty() {
                return Err(ApiError::new(
                    ErrorCode::Conflict,
                    "Cannot merge a card that has merged children",
                ));
            }
            source_card.merged_with_id = Some(target);
            let child = source_card.clone();
            card_mut(boards, target)?.merged_cards.push(child);
            Ok(())
        })
    }

    async fn unmerge_card(&self, card_id: CardId) -> SyncResult<()> {
        self.mutate("unmerge_card", |boards| {
            let parent_id = card_mut(boards, card_id)?
                .merged_with_id
                .ok_or_else(|| ApiError::new(ErrorCode::Validation, "Card is not merged"))?;
            if let Ok(parent) = card_mut(boards, parent_id) {
                parent.merged_cards.retain(|child| child.id != card_id);
            }
            let mut card = take_card(boards, card_id)?;
            card.merged_with_id = None;
            let column = column_mut(boards, card.column_id)?;
            column.cards.push(card);
            renumber(&mut column.cards);
            Ok(())
        })
    }

    async fn cast_vote(
        &self,
        card_id: CardId,
        user_name: &str,
        vote_type: VoteType,
    ) -> SyncResult<()> {
        self.mutate("cast_vote", |boards| {
            let card = card_mut(boards, card_id)?;
            if card
                .votes
                .iter()
                .any(|vote| vote.user_name == user_name && vote.vote_type == vote_type)
            {
                return Err(ApiError::new(
                    ErrorCode::Conflict,
                    "User already voted on this card",
                ));
            }
            card.votes.push(Vote {
                id: Some(VoteId::new()),
                user_name: user_name.to_string(),
                vote_type,
            });
            Ok(())
        })
    }

    async fn delete_vote(&self, vote_id: VoteId) -> SyncResult<()> {
        self.mutate("delete_vote", |boards| {
            for card in boards
                .values_mut()
                .flat_map(|board| board.columns.iter_mut())
                .flat_map(|column| column.cards.iter_mut())
            {
                if let Some(index) = card.votes.iter().position(|v| v.id == Some(vote_id)) {
                    card.votes.remove(index);
                    return Ok(());
                }
            }
            Err(not_found("Vote"))
        })
    }

    async fn update_status(&self, board_id: BoardId, status: BoardStatus) -> SyncResult<()> {
        self.mutate("update_status", |boards| {
            board_mut(boards, board_id)?.status = status;
            Ok(())
        })
    }

    async fn update_phase(&self, board_id: BoardId, phase: Phase) -> SyncResult<()> {
        self.mutate("update_phase", |boards| {
            board_mut(boards, board_id)?.phase = phase;
            Ok(())
        })
    }

    async fn claim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.mutate("claim_manager", |boards| {
            let board = board_mut(boards, board_id)?;
            if !board.managers.iter().any(|manager| manager == identity) {
                board.managers.push(identity.to_string());
            }
            Ok(())
        })
    }

    async fn unclaim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.mutate("unclaim_manager", |boards| {
            board_mut(boards, board_id)?
                .managers
                .retain(|manager| manager != identity);
            Ok(())
        })
    }

    async fn set_linked_teams(&self, board_id: BoardId, team_ids: &[TeamId]) -> SyncResult<()> {
        self.mutate("set_linked_teams", |boards| {
            board_mut(boards, board_id)?.teams = team_ids
                .iter()
                .map(|id| TeamSummary {
                    id: *id,
                    name: format!("team-{id}"),
                })
                .collect();
            Ok(())
        })
    }

    async fn join_board(&self, board_id: BoardId, participant: &Participant) -> SyncResult<()> {
        self.mutate("join_board", |boards| {
            let board = board_mut(boards, board_id)?;
            if !board
                .participants
                .iter()
                .any(|p| p.username == participant.username)
            {
                board.participants.push(participant.clone());
            }
            Ok(())
        })
    }

    async fn leave_board(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.mutate("leave_board", |boards| {
            board_mut(boards, board_id)?
                .participants
                .retain(|p| p.username != identity);
            Ok(())
        })
    }
}

/// Records what the state machine pushes to peers.
pub(crate) struct RecordingPushSink {
    open: AtomicBool,
    sent: Mutex<Vec<PushMessage>>,
}

impl RecordingPushSink {
    pub(crate) fn open() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().expect("sent").clone()
    }
}

impl PushSink for RecordingPushSink {
    fn send(&self, message: &PushMessage) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().expect("sent").push(message.clone());
        true
    }
}

/// A board owned by `owner` with the given columns, in the input phase.
pub(crate) fn retro_board(owner: &str, columns: &[&str]) -> Board {
    let mut board = Board::new("Sprint retro", owner);
    board.columns = columns
        .iter()
        .enumerate()
        .map(|(position, name)| Column {
            id: ColumnId::new(),
            name: name.to_string(),
            position: position as i32,
            cards: Vec::new(),
        })
        .collect();
    board
}

pub(crate) fn column_id(board: &Board, name: &str) -> ColumnId {
    board
        .columns
        .iter()
        .find(|column| column.name == name)
        .map(|column| column.id)
        .expect("column")
}

pub(crate) fn card_id(board: &Board, content: &str) -> CardId {
    board
        .cards()
        .find(|card| card.content == content)
        .map(|card| card.id)
        .expect("card")
}
