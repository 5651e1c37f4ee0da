use super::*;
use shared::domain::{BoardId, Card, ColumnId, Vote, VoteId, VoteType};
use tokio::time::Instant;

use crate::{
    session::SessionContext,
    test_support::{retro_board, InMemoryBoardApi},
    transport::MissingPushSink,
};

fn vote(user: &str, vote_type: VoteType) -> Vote {
    Vote {
        id: Some(VoteId::new()),
        user_name: user.to_string(),
        vote_type,
    }
}

fn card_with_votes(column_id: ColumnId, votes: Vec<Vote>) -> Card {
    Card {
        id: CardId::new(),
        column_id,
        content: "card".into(),
        votes,
        ..Card::default()
    }
}

fn board_with_cards(cards: Vec<Card>) -> Board {
    let mut board = retro_board("alice", &["Mad"]);
    let column_id = board.columns[0].id;
    board.columns[0].cards = cards
        .into_iter()
        .enumerate()
        .map(|(position, mut card)| {
            card.column_id = column_id;
            card.position = position as i32;
            card
        })
        .collect();
    board
}

#[test]
fn unchanged_votes_report_each_card_once() {
    let column_id = ColumnId::new();
    let board = board_with_cards(vec![
        card_with_votes(column_id, vec![vote("alice", VoteType::Like)]),
        card_with_votes(column_id, Vec::new()),
    ]);
    let mut diff = PollDiff::new();

    let first = diff.observe(&board);
    assert_eq!(first.len(), 2);
    for _ in 0..5 {
        assert!(diff.observe(&board).is_empty());
    }
}

#[test]
fn changed_counts_report_once_with_new_values() {
    let column_id = ColumnId::new();
    let mut board = board_with_cards(vec![card_with_votes(column_id, Vec::new())]);
    let card_id = board.columns[0].cards[0].id;
    let mut diff = PollDiff::new();
    diff.observe(&board);

    board.columns[0].cards[0]
        .votes
        .push(vote("bob", VoteType::Dislike));
    assert_eq!(
        diff.observe(&board),
        vec![CardTally {
            card_id,
            likes: 0,
            dislikes: 1
        }]
    );
    assert!(diff.observe(&board).is_empty());
}

#[test]
fn merged_child_votes_count_toward_the_parent() {
    let column_id = ColumnId::new();
    let mut board = board_with_cards(vec![
        card_with_votes(
            column_id,
            vec![vote("alice", VoteType::Like), vote("bob", VoteType::Like)],
        ),
        card_with_votes(column_id, vec![vote("carol", VoteType::Like)]),
    ]);
    let parent = board.columns[0].cards[0].id;
    let child = board.columns[0].cards[1].id;
    board.columns[0].cards[1].merged_with_id = Some(parent);
    board.normalize();

    let mut diff = PollDiff::new();
    diff.observe(&board);

    assert_eq!(diff.retained(parent).map(|tally| tally.likes), Some(3));
    assert_eq!(diff.retained(child).map(|tally| tally.likes), Some(1));
}

#[test]
fn vanished_cards_are_forgotten_without_an_update() {
    let column_id = ColumnId::new();
    let mut board = board_with_cards(vec![
        card_with_votes(column_id, Vec::new()),
        card_with_votes(column_id, vec![vote("bob", VoteType::Like)]),
    ]);
    let mut diff = PollDiff::new();
    diff.observe(&board);

    let removed = board.columns[0].cards.remove(1).id;
    assert!(diff.observe(&board).is_empty());
    assert_eq!(diff.retained(removed), None);
}

#[test]
fn failures_grow_the_delay_geometrically_and_success_resets() {
    let base = Duration::from_millis(3000);
    let mut diff = PollDiff::new();
    assert_eq!(diff.next_delay(base), base);

    let expected = [4500, 6750, 10125];
    for millis in expected {
        diff.record_failure();
        assert_eq!(diff.next_delay(base), Duration::from_millis(millis));
    }
    assert_eq!(diff.failures(), 3);

    diff.observe(&board_with_cards(Vec::new()));
    assert_eq!(diff.failures(), 0);
    assert_eq!(diff.next_delay(base), base);
}

#[test]
fn failure_keeps_the_retained_map() {
    let column_id = ColumnId::new();
    let board = board_with_cards(vec![card_with_votes(
        column_id,
        vec![vote("alice", VoteType::Like)],
    )]);
    let card_id = board.columns[0].cards[0].id;
    let mut diff = PollDiff::new();
    diff.observe(&board);

    diff.record_failure();
    diff.record_failure();

    assert_eq!(diff.retained(card_id).map(|tally| tally.likes), Some(1));
    assert!(diff.observe(&board).is_empty());
}

#[test]
fn delay_saturates_instead_of_overflowing() {
    let mut diff = PollDiff::new();
    for _ in 0..2000 {
        diff.record_failure();
    }
    assert_eq!(diff.next_delay(DEFAULT_POLL_INTERVAL), Duration::MAX);
}

fn recorder() -> (TallyCallback, Arc<Mutex<Vec<CardTally>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: TallyCallback = Arc::new(move |tally| {
        sink.lock().expect("tallies").push(tally);
    });
    (callback, seen)
}

fn session_for(api: &Arc<InMemoryBoardApi>, board_id: BoardId) -> Arc<BoardSession> {
    BoardSession::new(
        board_id,
        SessionContext::new("alice"),
        api.clone(),
        Arc::new(MissingPushSink),
    )
}

fn assert_gap(earlier: Instant, later: Instant, expected_ms: u64) {
    let gap = later.duration_since(earlier);
    let expected = Duration::from_millis(expected_ms);
    assert!(
        gap >= expected && gap < expected + Duration::from_millis(5),
        "expected ~{expected:?}, got {gap:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn poll_loop_backs_off_on_failures_and_recovers() {
    let board = board_with_cards(vec![card_with_votes(ColumnId::new(), Vec::new())]);
    let api = InMemoryBoardApi::with_board(board.clone());
    api.fail_fetches(2);
    let (callback, seen) = recorder();

    let handle = spawn_poller(session_for(&api, board.id), DEFAULT_POLL_INTERVAL, callback);
    tokio::time::sleep(Duration::from_millis(3000 + 4500 + 6750 + 3000 + 100)).await;

    let times = api.fetch_times();
    assert_eq!(times.len(), 4);
    assert_gap(times[0], times[1], 4500);
    assert_gap(times[1], times[2], 6750);
    assert_gap(times[2], times[3], 3000);
    assert_eq!(handle.failures(), 0);
    assert_eq!(seen.lock().expect("tallies").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_loop_reports_vote_changes_exactly_once() {
    let board = board_with_cards(vec![card_with_votes(ColumnId::new(), Vec::new())]);
    let card_id = board.columns[0].cards[0].id;
    let api = InMemoryBoardApi::with_board(board.clone());
    let (callback, seen) = recorder();

    let _handle = spawn_poller(session_for(&api, board.id), DEFAULT_POLL_INTERVAL, callback);
    tokio::time::sleep(Duration::from_millis(3000 * 3 + 100)).await;
    assert_eq!(seen.lock().expect("tallies").len(), 1);

    api.edit(board.id, |board| {
        board.columns[0].cards[0]
            .votes
            .push(vote("bob", VoteType::Like));
    });
    tokio::time::sleep(Duration::from_millis(3000 * 3)).await;

    let seen = seen.lock().expect("tallies").clone();
    assert_eq!(
        seen,
        vec![
            CardTally {
                card_id,
                likes: 0,
                dislikes: 0
            },
            CardTally {
                card_id,
                likes: 1,
                dislikes: 0
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stopping_the_poller_cancels_pending_cycles() {
    let board = board_with_cards(Vec::new());
    let api = InMemoryBoardApi::with_board(board.clone());
    let (callback, _seen) = recorder();

    let handle = spawn_poller(session_for(&api, board.id), DEFAULT_POLL_INTERVAL, callback);
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(api.fetch_count(), 1);

    handle.stop();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_count(), 1);
    assert!(handle.is_finished());

    let dropped = spawn_poller(
        session_for(&api, board.id),
        DEFAULT_POLL_INTERVAL,
        recorder().0,
    );
    drop(dropped);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetch_count(), 1);
}
