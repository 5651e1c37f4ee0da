use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(BoardId);
id_newtype!(ColumnId);
id_newtype!(CardId);
id_newtype!(VoteId);
id_newtype!(TeamId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardStatus {
    #[default]
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Input,
    Voting,
    Discussion,
}

impl Phase {
    /// Next phase in the `input -> voting -> discussion -> input` cycle.
    pub fn next(self) -> Self {
        match self {
            Phase::Input => Phase::Voting,
            Phase::Voting => Phase::Discussion,
            Phase::Discussion => Phase::Input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    Like,
    Dislike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<VoteId>,
    pub user_name: String,
    pub vote_type: VoteType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: TeamId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSummary {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub status: BoardStatus,
    #[serde(default)]
    pub phase: Phase,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub column_id: ColumnId,
    pub content: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub votes: Vec<Vote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_with_id: Option<CardId>,
    #[serde(default)]
    pub merged_cards: Vec<Card>,
    #[serde(default)]
    pub is_action_item: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_desc: Option<String>,
}

impl Card {
    pub fn is_folded(&self) -> bool {
        self.merged_with_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Column {
    /// Cards rendered directly in the column; folded cards only show under their parent.
    pub fn visible_cards(&self) -> impl Iterator<Item = &Card> {
        self.cards.iter().filter(|card| !card.is_folded())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: BoardStatus,
    #[serde(default)]
    pub phase: Phase,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co_owner: Option<String>,
    #[serde(default)]
    pub managers: Vec<String>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub teams: Vec<TeamSummary>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub blind_voting: bool,
}

impl Board {
    /// A fresh board: active, in the input phase, owned by and joined only by `owner`.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            id: BoardId::new(),
            name: name.into(),
            status: BoardStatus::Active,
            phase: Phase::Input,
            participants: vec![Participant {
                username: owner.clone(),
                display_name: None,
                avatar: None,
            }],
            owner,
            co_owner: None,
            managers: Vec::new(),
            teams: Vec::new(),
            columns: Vec::new(),
            blind_voting: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == BoardStatus::Finished
    }

    pub fn column(&self, column_id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == column_id)
    }

    /// Every card listed directly in a column, folded ones included.
    pub fn cards(&self) -> impl Iterator<Item = &Card> {
        self.columns.iter().flat_map(|column| column.cards.iter())
    }

    /// Looks a card up in the column lists first, then among folded children.
    pub fn find_card(&self, card_id: CardId) -> Option<&Card> {
        self.cards().find(|card| card.id == card_id).or_else(|| {
            self.cards()
                .flat_map(|card| card.merged_cards.iter())
                .find(|child| child.id == card_id)
        })
    }

    pub fn column_of(&self, card_id: CardId) -> Option<&Column> {
        self.columns
            .iter()
            .find(|column| column.cards.iter().any(|card| card.id == card_id))
    }

    /// Orders columns and cards by position and rebuilds each parent's `merged_cards` from
    /// the folded cards listed in the columns. Children keep the order the server sent them
    /// in (oldest merge first); folded cards never keep children of their own.
    pub fn normalize(&mut self) {
        self.columns.sort_by_key(|column| column.position);

        let mut placement: HashMap<CardId, Option<CardId>> = HashMap::new();
        let mut folded: HashMap<CardId, Vec<Card>> = HashMap::new();
        for column in &mut self.columns {
            column.cards.sort_by_key(|card| card.position);
            for card in column.cards.iter_mut() {
                placement.insert(card.id, card.merged_with_id);
                if let Some(parent_id) = card.merged_with_id {
                    card.merged_cards.clear();
                    folded.entry(parent_id).or_default().push(card.clone());
                }
            }
        }

        for card in self
            .columns
            .iter_mut()
            .flat_map(|column| column.cards.iter_mut())
            .filter(|card| !card.is_folded())
        {
            let mut listed = folded.remove(&card.id).unwrap_or_default();
            let mut rebuilt = Vec::with_capacity(card.merged_cards.len() + listed.len());
            for existing in card.merged_cards.drain(..) {
                match placement.get(&existing.id) {
                    Some(Some(parent_id)) if *parent_id == card.id => {
                        if let Some(index) = listed.iter().position(|c| c.id == existing.id) {
                            rebuilt.push(listed.remove(index));
                        }
                    }
                    Some(_) => {}
                    None => rebuilt.push(existing),
                }
            }
            rebuilt.extend(listed);
            for child in &mut rebuilt {
                child.merged_cards.clear();
            }
            card.merged_cards = rebuilt;
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
