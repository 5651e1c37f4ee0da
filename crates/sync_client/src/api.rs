use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use shared::{
    domain::{
        Board, BoardId, BoardStatus, BoardSummary, CardId, ColumnId, Participant, Phase, TeamId,
        VoteId, VoteType,
    },
    error::{ApiError, ErrorCode},
    protocol::{CardUpdate, NewCard},
};
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// The server's request/response surface. Every call either succeeds or returns the
/// server's error message unchanged.
#[async_trait]
pub trait BoardApi: Send + Sync {
    async fn fetch_board(&self, board_id: BoardId) -> SyncResult<Board>;
    async fn list_boards(&self) -> SyncResult<Vec<BoardSummary>>;
    async fn create_column(&self, board_id: BoardId, name: &str) -> SyncResult<()>;
    async fn update_column(&self, column_id: ColumnId, name: &str) -> SyncResult<()>;
    async fn delete_column(&self, column_id: ColumnId) -> SyncResult<()>;
    async fn create_card(&self, column_id: ColumnId, card: NewCard) -> SyncResult<()>;
    async fn update_card(&self, card_id: CardId, update: CardUpdate) -> SyncResult<()>;
    async fn delete_card(&self, card_id: CardId) -> SyncResult<()>;
    async fn move_card(&self, card_id: CardId, column_id: ColumnId, position: usize)
        -> SyncResult<()>;
    async fn merge_card(&self, source: CardId, target: CardId) -> SyncResult<()>;
    async fn unmerge_card(&self, card_id: CardId) -> SyncResult<()>;
    async fn cast_vote(&self, card_id: CardId, user_name: &str, vote_type: VoteType)
        -> SyncResult<()>;
    async fn delete_vote(&self, vote_id: VoteId) -> SyncResult<()>;
    async fn update_status(&self, board_id: BoardId, status: BoardStatus) -> SyncResult<()>;
    async fn update_phase(&self, board_id: BoardId, phase: Phase) -> SyncResult<()>;
    async fn claim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()>;
    async fn unclaim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()>;
    async fn set_linked_teams(&self, board_id: BoardId, team_ids: &[TeamId]) -> SyncResult<()>;
    async fn join_board(&self, board_id: BoardId, participant: &Participant) -> SyncResult<()>;
    async fn leave_board(&self, board_id: BoardId, identity: &str) -> SyncResult<()>;
}

pub struct MissingBoardApi;

fn unavailable<T>() -> SyncResult<T> {
    Err(SyncError::Api(ApiError::new(
        ErrorCode::Internal,
        "board api unavailable",
    )))
}

#[async_trait]
impl BoardApi for MissingBoardApi {
    async fn fetch_board(&self, _board_id: BoardId) -> SyncResult<Board> {
        unavailable()
    }

    async fn list_boards(&self) -> SyncResult<Vec<BoardSummary>> {
        unavailable()
    }

    async fn create_column(&self, _board_id: BoardId, _name: &str) -> SyncResult<()> {
        unavailable()
    }

    async fn update_column(&self, _column_id: ColumnId, _name: &str) -> SyncResult<()> {
        unavailable()
    }

    async fn delete_column(&self, _column_id: ColumnId) -> SyncResult<()> {
        unavailable()
    }

    async fn create_card(&self, _column_id: ColumnId, _card: NewCard) -> SyncResult<()> {
        unavailable()
    }

    async fn update_card(&self, _card_id: CardId, _update: CardUpdate) -> SyncResult<()> {
        unavailable()
    }

    async fn delete_card(&self, _card_id: CardId) -> SyncResult<()> {
        unavailable()
    }

    async fn move_card(
        &self,
        _card_id: CardId,
        _column_id: ColumnId,
        _position: usize,
    ) -> SyncResult<()> {
        unavailable()
    }

    async fn merge_card(&self, _source: CardId, _target: CardId) -> SyncResult<()> {
        unavailable()
    }

    async fn unmerge_card(&self, _card_id: CardId) -> SyncResult<()> {
        unavailable()
    }

    async fn cast_vote(
        &self,
        _card_id: CardId,
        _user_name: &str,
        _vote_type: VoteType,
    ) -> SyncResult<()> {
        unavailable()
    }

    async fn delete_vote(&self, _vote_id: VoteId) -> SyncResult<()> {
        unavailable()
    }

    async fn update_status(&self, _board_id: BoardId, _status: BoardStatus) -> SyncResult<()> {
        unavailable()
    }

    async fn update_phase(&self, _board_id: BoardId, _phase: Phase) -> SyncResult<()> {
        unavailable()
    }

    async fn claim_manager(&self, _board_id: BoardId, _identity: &str) -> SyncResult<()> {
        unavailable()
    }

    async fn unclaim_manager(&self, _board_id: BoardId, _identity: &str) -> SyncResult<()> {
        unavailable()
    }

    async fn set_linked_teams(&self, _board_id: BoardId, _team_ids: &[TeamId]) -> SyncResult<()> {
        unavailable()
    }

    async fn join_board(&self, _board_id: BoardId, _participant: &Participant) -> SyncResult<()> {
        unavailable()
    }

    async fn leave_board(&self, _board_id: BoardId, _identity: &str) -> SyncResult<()> {
        unavailable()
    }
}

#[derive(Clone)]
pub struct HttpBoardApi {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBoardApi {
    /// `origin` is the server origin; requests go to `{origin}/api/...`.
    pub fn new(origin: &str, auth_token: Option<String>, timeout: Duration) -> SyncResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/api", origin.trim_end_matches('/')),
            auth_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder) -> SyncResult<String> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = ApiError::from_response(status.as_u16(), &body);
            debug!(status = status.as_u16(), message = %err.message, "api: request rejected");
            return Err(SyncError::Api(err));
        }
        Ok(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SyncResult<T> {
        let body = self.execute(self.request(Method::GET, path)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &B,
    ) -> SyncResult<()> {
        self.execute(self.request(method, path).json(payload))
            .await
            .map(|_| ())
    }

    async fn send_empty(&self, method: Method, path: &str) -> SyncResult<()> {
        self.execute(self.request(method, path)).await.map(|_| ())
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn fetch_board(&self, board_id: BoardId) -> SyncResult<Board> {
        let mut board: Board = self.get_json(&format!("/boards/{board_id}")).await?;
        board.normalize();
        Ok(board)
    }

    async fn list_boards(&self) -> SyncResult<Vec<BoardSummary>> {
        self.get_json("/boards").await
    }

    async fn create_column(&self, board_id: BoardId, name: &str) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/columns"),
            &json!({ "name": name }),
        )
        .await
    }

    async fn update_column(&self, column_id: ColumnId, name: &str) -> SyncResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/columns/{column_id}"),
            &json!({ "name": name }),
        )
        .await
    }

    async fn delete_column(&self, column_id: ColumnId) -> SyncResult<()> {
        self.send_empty(Method::DELETE, &format!("/columns/{column_id}"))
            .await
    }

    async fn create_card(&self, column_id: ColumnId, card: NewCard) -> SyncResult<()> {
        self.send_json(Method::POST, &format!("/columns/{column_id}/cards"), &card)
            .await
    }

    async fn update_card(&self, card_id: CardId, update: CardUpdate) -> SyncResult<()> {
        self.send_json(Method::PUT, &format!("/cards/{card_id}"), &update)
            .await
    }

    async fn delete_card(&self, card_id: CardId) -> SyncResult<()> {
        self.send_empty(Method::DELETE, &format!("/cards/{card_id}"))
            .await
    }

    async fn move_card(
        &self,
        card_id: CardId,
        column_id: ColumnId,
        position: usize,
    ) -> SyncResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/cards/{card_id}/move"),
            &json!({ "column_id": column_id, "position": position }),
        )
        .await
    }

    async fn merge_card(&self, source: CardId, target: CardId) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/cards/{source}/merge"),
            &json!({ "target_card_id": target }),
        )
        .await
    }

    async fn unmerge_card(&self, card_id: CardId) -> SyncResult<()> {
        self.send_empty(Method::POST, &format!("/cards/{card_id}/unmerge"))
            .await
    }

    async fn cast_vote(
        &self,
        card_id: CardId,
        user_name: &str,
        vote_type: VoteType,
    ) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/cards/{card_id}/votes"),
            &json!({ "user_name": user_name, "vote_type": vote_type }),
        )
        .await
    }

    async fn delete_vote(&self, vote_id: VoteId) -> SyncResult<()> {
        self.send_empty(Method::DELETE, &format!("/votes/{vote_id}"))
            .await
    }

    async fn update_status(&self, board_id: BoardId, status: BoardStatus) -> SyncResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/boards/{board_id}/status"),
            &json!({ "status": status }),
        )
        .await
    }

    async fn update_phase(&self, board_id: BoardId, phase: Phase) -> SyncResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/boards/{board_id}"),
            &json!({ "phase": phase }),
        )
        .await
    }

    async fn claim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/claim"),
            &json!({ "owner": identity }),
        )
        .await
    }

    async fn unclaim_manager(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/unclaim"),
            &json!({ "user": identity }),
        )
        .await
    }

    async fn set_linked_teams(&self, board_id: BoardId, team_ids: &[TeamId]) -> SyncResult<()> {
        self.send_json(
            Method::PUT,
            &format!("/boards/{board_id}/teams"),
            &json!({ "team_ids": team_ids }),
        )
        .await
    }

    async fn join_board(&self, board_id: BoardId, participant: &Participant) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/join"),
            participant,
        )
        .await
    }

    async fn leave_board(&self, board_id: BoardId, identity: &str) -> SyncResult<()> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/leave"),
            &json!({ "username": identity }),
        )
        .await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
