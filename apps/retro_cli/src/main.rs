use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shared::domain::{Board, BoardId, CardId, ColumnId, VoteType};
use sync_client::{
    aggregation::{effective_phase_label, visible_tally, TallyView},
    config::{load_settings_from, ClientSettings, DEFAULT_CONFIG_FILE},
    BoardApi, BoardSession, BoardView, ClientEvent, EventBus, HttpBoardApi, PushTransport,
    SessionContext,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const PUSH_OPEN_WAIT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(about = "Retrospective board client")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    identity: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every board.
    Boards,
    /// Print one board with its vote totals.
    Show {
        #[arg(long)]
        board: Uuid,
    },
    /// Follow a board over push and poll until interrupted.
    Watch {
        #[arg(long)]
        board: Uuid,
    },
    Vote {
        #[arg(long)]
        board: Uuid,
        #[arg(long)]
        card: Uuid,
        #[arg(long, value_enum, default_value_t = VoteArg::Like)]
        kind: VoteArg,
    },
    AddCard {
        #[arg(long)]
        board: Uuid,
        #[arg(long)]
        column: Uuid,
        #[arg(long)]
        content: String,
    },
    MoveCard {
        #[arg(long)]
        board: Uuid,
        #[arg(long)]
        card: Uuid,
        #[arg(long)]
        column: Uuid,
        #[arg(long, default_value_t = 0)]
        position: usize,
    },
    Merge {
        #[arg(long)]
        board: Uuid,
        #[arg(long)]
        source: Uuid,
        #[arg(long)]
        target: Uuid,
    },
    Unmerge {
        #[arg(long)]
        board: Uuid,
        #[arg(long)]
        card: Uuid,
    },
    SwitchPhase {
        #[arg(long)]
        board: Uuid,
    },
    Finish {
        #[arg(long)]
        board: Uuid,
    },
    Reopen {
        #[arg(long)]
        board: Uuid,
    },
    Claim {
        #[arg(long)]
        board: Uuid,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VoteArg {
    Like,
    Dislike,
}

impl From<VoteArg> for VoteType {
    fn from(value: VoteArg) -> Self {
        match value {
            VoteArg::Like => VoteType::Like,
            VoteArg::Dislike => VoteType::Dislike,
        }
    }
}

struct Client {
    settings: ClientSettings,
    api: Arc<HttpBoardApi>,
    bus: EventBus,
}

impl Client {
    fn new(settings: ClientSettings) -> Result<Self> {
        let api = HttpBoardApi::new(
            &settings.server_url,
            settings.auth_token.clone(),
            settings.request_timeout(),
        )
        .context("failed to build http client")?;
        Ok(Self {
            settings,
            api: Arc::new(api),
            bus: EventBus::new(),
        })
    }

    fn identity(&self) -> Result<String> {
        self.settings
            .identity
            .clone()
            .ok_or_else(|| anyhow!("an identity is required (--identity or RETRO_IDENTITY)"))
    }

    fn push(&self) -> Result<Arc<PushTransport>> {
        let transport = PushTransport::for_origin(
            &self.settings.server_url,
            self.settings.reconnect_delay(),
            self.bus.clone(),
        )?;
        transport.connect();
        Ok(transport)
    }

    fn session(&self, board: Uuid, push: Arc<PushTransport>) -> Result<Arc<BoardSession>> {
        let mut context = SessionContext::new(self.identity()?);
        context.display_name = self.settings.display_name.clone();
        Ok(BoardSession::new(
            BoardId(board),
            context,
            self.api.clone(),
            push,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config, |key| std::env::var(key).ok())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(identity) = args.identity {
        settings.identity = Some(identity);
    }
    if let Some(token) = args.token {
        settings.auth_token = Some(token);
    }
    info!(server_url = %settings.server_url, "retro: starting");
    let client = Client::new(settings)?;

    match args.command {
        Command::Boards => {
            for board in client.api.list_boards().await? {
                println!(
                    "{}  {:<32} {:?}/{:?}",
                    board.id, board.name, board.status, board.phase
                );
            }
            Ok(())
        }
        Command::Show { board } => {
            let board = client.api.fetch_board(BoardId(board)).await?;
            print_board(&board);
            Ok(())
        }
        Command::Watch { board } => watch(&client, board).await,
        Command::Vote { board, card, kind } => {
            mutate(&client, board, |session| async move {
                session.vote(CardId(card), kind.into()).await
            })
            .await
        }
        Command::AddCard {
            board,
            column,
            content,
        } => {
            mutate(&client, board, |session| async move {
                session.create_card(ColumnId(column), &content).await
            })
            .await
        }
        Command::MoveCard {
            board,
            card,
            column,
            position,
        } => {
            mutate(&client, board, |session| async move {
                session
                    .move_card(CardId(card), ColumnId(column), position)
                    .await
            })
            .await
        }
        Command::Merge {
            board,
            source,
            target,
        } => {
            mutate(&client, board, |session| async move {
                session.merge(CardId(source), CardId(target)).await
            })
            .await
        }
        Command::Unmerge { board, card } => {
            mutate(&client, board, |session| async move {
                session.unmerge(CardId(card)).await
            })
            .await
        }
        Command::SwitchPhase { board } => {
            mutate(&client, board, |session| async move {
                session.switch_phase().await.map(drop)
            })
            .await
        }
        Command::Finish { board } => {
            mutate(&client, board, |session| async move { session.finish().await }).await
        }
        Command::Reopen { board } => {
            mutate(&client, board, |session| async move { session.reopen().await }).await
        }
        Command::Claim { board } => {
            mutate(&client, board, |session| async move {
                session.claim_manager().await
            })
            .await
        }
    }
}

/// Loads the board, runs one mutation, prints the refreshed board.
async fn mutate<F, Fut>(client: &Client, board: Uuid, action: F) -> Result<()>
where
    F: FnOnce(Arc<BoardSession>) -> Fut,
    Fut: std::future::Future<Output = sync_client::SyncResult<()>>,
{
    let push = client.push()?;
    let session = client.session(board, Arc::clone(&push))?;
    session.refresh().await.context("failed to load board")?;

    let waited = tokio::time::timeout(PUSH_OPEN_WAIT, async {
        while !push.is_open() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if waited.is_err() {
        warn!("retro: push channel not open, peers will catch up by polling");
    }

    let result = action(Arc::clone(&session)).await;
    push.shutdown();
    result?;
    if let Some(board) = session.snapshot().await {
        print_board(&board);
    }
    Ok(())
}

async fn watch(client: &Client, board: Uuid) -> Result<()> {
    let push = client.push()?;
    let session = client.session(board, Arc::clone(&push))?;
    let mut events = session.subscribe_events();
    let view = BoardView::open(session, &client.bus, client.settings.poll_interval())
        .await
        .context("failed to open board")?;
    if let Some(board) = view.session().snapshot().await {
        print_board(&board);
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::SnapshotUpdated(board)) => print_board(&board),
                Ok(ClientEvent::VoteTallyChanged(tally)) => println!(
                    "votes {}  +{} -{}",
                    tally.card_id, tally.likes, tally.dislikes
                ),
                Ok(ClientEvent::ParticipantsUpdated(participants)) => {
                    let names: Vec<_> = participants.iter().map(|p| p.username.as_str()).collect();
                    println!("participants: {}", names.join(", "));
                }
                Ok(ClientEvent::TimerChanged(timer)) => println!("timer {}", timer.display()),
                Ok(ClientEvent::TimerExpired) => println!("timer expired"),
                Ok(ClientEvent::Error(message)) => eprintln!("error: {message}"),
                Err(err) => warn!(error = %err, "retro: event stream interrupted"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    view.close().await;
    push.shutdown();
    Ok(())
}

fn print_board(board: &Board) {
    println!(
        "== {} [{}] owner={}",
        board.name,
        effective_phase_label(board),
        board.owner
    );
    for column in &board.columns {
        println!("-- {} ({})", column.name, column.id);
        for card in column.visible_cards() {
            let votes = match visible_tally(board, card) {
                TallyView::Counts(tally) => format!("+{} -{}", tally.likes, tally.dislikes),
                TallyView::Hidden => "votes hidden".to_string(),
            };
            println!("   {} {}  [{}]", card.id, card.content, votes);
            for child in &card.merged_cards {
                println!("     └ {} {}", child.id, child.content);
            }
        }
    }
}
