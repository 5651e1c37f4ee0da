use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{BoardId, CardId, ColumnId, Participant, Phase};

/// Raw push frame as it travels over the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushMessage {
    TimerUpdate {
        seconds: u32,
    },
    TimerStart {
        seconds: u32,
    },
    TimerStop {},
    PhaseChange {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        board_id: Option<BoardId>,
    },
    BoardUpdate {
        board_id: BoardId,
    },
    ParticipantsUpdate {
        board_id: BoardId,
        participants: Vec<Participant>,
    },
    VoteUpdate {
        board_id: BoardId,
        card_id: CardId,
    },
    CardMove {
        board_id: BoardId,
        card_id: CardId,
        column_id: ColumnId,
        position: i32,
    },
}

impl PushMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::TimerUpdate { .. } => "timer_update",
            PushMessage::TimerStart { .. } => "timer_start",
            PushMessage::TimerStop {} => "timer_stop",
            PushMessage::PhaseChange { .. } => "phase_change",
            PushMessage::BoardUpdate { .. } => "board_update",
            PushMessage::ParticipantsUpdate { .. } => "participants_update",
            PushMessage::VoteUpdate { .. } => "vote_update",
            PushMessage::CardMove { .. } => "card_move",
        }
    }

    /// Board the message is scoped to, if it names one.
    pub fn board_id(&self) -> Option<BoardId> {
        match self {
            PushMessage::PhaseChange { board_id, .. } => *board_id,
            PushMessage::BoardUpdate { board_id }
            | PushMessage::ParticipantsUpdate { board_id, .. }
            | PushMessage::VoteUpdate { board_id, .. }
            | PushMessage::CardMove { board_id, .. } => Some(*board_id),
            PushMessage::TimerUpdate { .. }
            | PushMessage::TimerStart { .. }
            | PushMessage::TimerStop {} => None,
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> serde_json::Result<Self> {
        let data = match &envelope.data {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(serde_json::json!({ "type": envelope.kind, "data": data }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCard {
    pub content: String,
    pub owner: String,
}

/// Partial card edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_action_item: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_desc: Option<String>,
}
