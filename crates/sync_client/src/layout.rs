use shared::domain::{Board, Card, CardId, ColumnId};

use crate::error::Rejection;

/// Resolved card move. `position` indexes the destination's full card list, folded cards
/// included, which is what the move endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub card_id: CardId,
    pub from_column: ColumnId,
    pub to_column: ColumnId,
    pub position: usize,
    pub destination_order: Vec<CardId>,
}

impl MovePlan {
    /// True when the destination's visible order would not change.
    pub fn is_noop(&self, board: &Board) -> bool {
        if self.from_column != self.to_column {
            return false;
        }
        let Some(column) = board.column(self.to_column) else {
            return false;
        };
        let current: Vec<CardId> = column.visible_cards().map(|card| card.id).collect();
        let planned: Vec<CardId> = self
            .destination_order
            .iter()
            .copied()
            .filter(|id| current.contains(id))
            .collect();
        planned == current
    }
}

/// Plans moving `card_id` into `to_column` at `visible_position`, an index among the
/// column's visible cards as rendered, clamped to the end. Folded cards move with their
/// parent only.
pub fn plan_move(
    board: &Board,
    card_id: CardId,
    to_column: ColumnId,
    visible_position: usize,
) -> Result<MovePlan, Rejection> {
    let source = board
        .column_of(card_id)
        .ok_or(Rejection::UnknownCard(card_id))?;
    let card = source
        .cards
        .iter()
        .find(|card| card.id == card_id)
        .ok_or(Rejection::UnknownCard(card_id))?;
    if card.is_folded() {
        return Err(Rejection::AlreadyMerged(card_id));
    }
    let destination = board
        .column(to_column)
        .ok_or(Rejection::UnknownColumn(to_column))?;

    let remaining: Vec<&Card> = destination
        .cards
        .iter()
        .filter(|card| card.id != card_id)
        .collect();
    // Land right before the visible card that should follow, or at the very end.
    let position = remaining
        .iter()
        .enumerate()
        .filter(|(_, card)| !card.is_folded())
        .nth(visible_position)
        .map_or(remaining.len(), |(index, _)| index);

    let mut destination_order: Vec<CardId> = remaining.iter().map(|card| card.id).collect();
    destination_order.insert(position, card_id);

    Ok(MovePlan {
        card_id,
        from_column: source.id,
        to_column,
        position,
        destination_order,
    })
}

#[cfg(test)]
#[path = "tests/layout_tests.rs"]
mod tests;
