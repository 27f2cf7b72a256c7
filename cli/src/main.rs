mod local_demo;
mod render;

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use client::{Attachment, ClientError, Session};
use rand::Rng;
use serde_json::Value;
use store::notes::{Author, NoteBoard, Position};
use store::service::ServiceError;
use store::{ContainerId, Identity, SharedMap, SharedMapExt, StateAdapter, StoreError};
use tracing_subscriber::EnvFilter;

/// Shared key holding the last roll.
const DICE_KEY: &str = "dice_value";
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("note not found: {0}")]
    NoteNotFound(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "collab-cli", about = "Shared-state demos over the relay")]
struct Cli {
    #[arg(long, env = "COLLAB_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "COLLAB_USER_ID", default_value = "cli")]
    user_id: String,

    #[arg(long, env = "COLLAB_USER_NAME")]
    user_name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone)]
struct CliContext {
    base_url: String,
    identity: Identity,
}

impl CliContext {
    fn author(&self) -> Author {
        Author::new(self.identity.user_id.clone()).named(self.identity.name.clone())
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    /// List containers, or show one container's snapshot.
    Containers {
        #[arg(value_parser = parse_container)]
        id: Option<ContainerId>,
    },
    /// Create a container and print its `#id` fragment.
    New,
    Notes(NotesCommand),
    Dice(DiceCommand),
    Watch(WatchArgs),
    /// Run the brainstorm scenario in-process, without a relay.
    LocalDemo,
}

#[derive(Args, Debug, Clone)]
struct Target {
    #[arg(long, short = 'c', value_parser = parse_container, help = "Container id, with or without the leading #")]
    container: ContainerId,
}

#[derive(Args, Debug)]
struct NotesCommand {
    #[command(subcommand)]
    command: NotesSubcommand,
}

#[derive(Subcommand, Debug)]
enum NotesSubcommand {
    Add {
        #[command(flatten)]
        target: Target,
        text: String,
        #[arg(long, default_value_t = 0.0)]
        x: f64,
        #[arg(long, default_value_t = 0.0)]
        y: f64,
    },
    List {
        #[command(flatten)]
        target: Target,
    },
    Vote {
        #[command(flatten)]
        target: Target,
        note_id: String,
    },
    Move {
        #[command(flatten)]
        target: Target,
        note_id: String,
        #[arg(long)]
        x: f64,
        #[arg(long)]
        y: f64,
    },
    Edit {
        #[command(flatten)]
        target: Target,
        note_id: String,
        text: String,
    },
    Delete {
        #[command(flatten)]
        target: Target,
        note_id: String,
    },
}

#[derive(Args, Debug)]
struct DiceCommand {
    #[command(subcommand)]
    command: DiceSubcommand,
}

#[derive(Subcommand, Debug)]
enum DiceSubcommand {
    Roll {
        #[command(flatten)]
        target: Target,
    },
    Show {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[command(flatten)]
    target: Target,

    #[arg(long, help = "Stop after this many seconds; runs until the relay closes otherwise")]
    seconds: Option<u64>,
}

fn parse_container(raw: &str) -> Result<ContainerId, String> {
    ContainerId::from_fragment(raw)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "container id is required".to_owned())
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let name = cli.user_name.unwrap_or_else(|| cli.user_id.clone());
    let ctx = CliContext { base_url: cli.base_url, identity: Identity::new(cli.user_id, name) };

    match cli.command {
        Command::Ping => run_ping(&ctx).await,
        Command::Containers { id } => run_containers(&ctx, id.as_ref()).await,
        Command::New => run_new(&ctx).await,
        Command::Notes(notes) => run_notes(&ctx, notes).await,
        Command::Dice(dice) => run_dice(&ctx, dice).await,
        Command::Watch(args) => run_watch(&ctx, args).await,
        Command::LocalDemo => {
            for line in local_demo::run()? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn run_ping(ctx: &CliContext) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", ctx.base_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HttpStatus { status: status.as_u16(), body: "health check failed".to_owned() });
    }
    println!("ok");
    Ok(())
}

async fn run_containers(ctx: &CliContext, id: Option<&ContainerId>) -> Result<(), CliError> {
    let path = match id {
        Some(id) => format!("/api/containers/{id}"),
        None => "/api/containers".to_owned(),
    };
    let json = api_get(ctx, &path).await?;
    print_json(&json)
}

async fn run_new(ctx: &CliContext) -> Result<(), CliError> {
    let mut session = Session::connect(&ctx.base_url, ctx.identity.clone()).await?;
    let id = session.create_container().await?;
    session.close().await;
    println!("{}", id.to_fragment());
    Ok(())
}

async fn run_notes(ctx: &CliContext, notes: NotesCommand) -> Result<(), CliError> {
    let target = match &notes.command {
        NotesSubcommand::Add { target, .. }
        | NotesSubcommand::List { target }
        | NotesSubcommand::Vote { target, .. }
        | NotesSubcommand::Move { target, .. }
        | NotesSubcommand::Edit { target, .. }
        | NotesSubcommand::Delete { target, .. } => target.clone(),
    };
    let (mut session, attachment) = open(ctx, &target.container).await?;
    let board = NoteBoard::new(Arc::clone(attachment.map()), ctx.author());

    match notes.command {
        NotesSubcommand::List { .. } => {
            for note in board.notes() {
                println!("{}", render::note_line(&note));
            }
            session.close().await;
            return Ok(());
        }
        NotesSubcommand::Add { text, x, y, .. } => {
            let id = board.create_note(Position { x, y }, &text)?;
            println!("{id}");
        }
        NotesSubcommand::Vote { note_id, .. } => {
            require_note(&board, &note_id)?;
            let voted = board.toggle_vote(&note_id)?;
            println!("{}", if voted { "voted" } else { "vote removed" });
        }
        NotesSubcommand::Move { note_id, x, y, .. } => {
            require_note(&board, &note_id)?;
            board.move_note(&note_id, Position { x, y })?;
        }
        NotesSubcommand::Edit { note_id, text, .. } => {
            require_note(&board, &note_id)?;
            board.set_text(&note_id, &text)?;
        }
        NotesSubcommand::Delete { note_id, .. } => {
            require_note(&board, &note_id)?;
            board.delete_note(&note_id)?;
        }
    }

    session.sync(SYNC_TIMEOUT).await?;
    session.close().await;
    Ok(())
}

fn require_note<M: SharedMap + ?Sized>(board: &NoteBoard<M>, note_id: &str) -> Result<(), CliError> {
    match board.note(note_id) {
        Some(_) => Ok(()),
        None => Err(CliError::NoteNotFound(note_id.to_owned())),
    }
}

async fn run_dice(ctx: &CliContext, dice: DiceCommand) -> Result<(), CliError> {
    match dice.command {
        DiceSubcommand::Roll { target } => {
            let (mut session, attachment) = open(ctx, &target.container).await?;
            let adapter = StateAdapter::new(Arc::clone(attachment.map()));
            let value: u8 = rand::rng().random_range(1..=6);
            adapter.set_as(DICE_KEY, &value)?;
            session.sync(SYNC_TIMEOUT).await?;
            session.close().await;
            println!("{value}");
        }
        DiceSubcommand::Show { target } => {
            let (session, attachment) = open(ctx, &target.container).await?;
            let adapter = StateAdapter::new(Arc::clone(attachment.map()));
            match adapter.get_as::<u8>(DICE_KEY)? {
                Some(value) => println!("{value}"),
                None => println!("not rolled yet"),
            }
            session.close().await;
        }
    }
    Ok(())
}

async fn run_watch(ctx: &CliContext, args: WatchArgs) -> Result<(), CliError> {
    let (mut session, attachment) = open(ctx, &args.target.container).await?;
    let presence = Arc::clone(attachment.presence());

    for member in presence.members() {
        println!("{}", render::member_line(&member));
    }
    for (key, value) in attachment.map().entries() {
        println!("{key} = {value}");
    }

    let names = Arc::clone(&presence);
    let _changes = attachment.map().on_change(move |event| println!("{}", render::change_line(event, &names)));
    let _members = presence.subscribe(|event| {
        if let Some(line) = render::presence_line(event) {
            println!("{line}");
        }
    });

    match args.seconds {
        Some(seconds) => {
            session.run_for(Duration::from_secs(seconds)).await?;
        }
        None => loop {
            match session.next_event().await {
                Ok(_) => {}
                Err(ClientError::WsClosed) => break,
                Err(e) => return Err(e.into()),
            }
        },
    }
    session.close().await;
    Ok(())
}

async fn open(ctx: &CliContext, container: &ContainerId) -> Result<(Session, Attachment), CliError> {
    let mut session = Session::connect(&ctx.base_url, ctx.identity.clone()).await?;
    let attachment = session.attach(container).await?;
    tracing::debug!(container_id = %container, client_id = %session.client_id(), "attached");
    Ok((session, attachment))
}

async fn api_get(ctx: &CliContext, path: &str) -> Result<Value, CliError> {
    let url = format!("{}{}", ctx.base_url.trim_end_matches('/'), path);
    let response = reqwest::Client::new().get(&url).send().await?;
    let status = response.status();
    let value = response.json::<Value>().await.unwrap_or(Value::Null);

    if !status.is_success() {
        return Err(CliError::HttpStatus { status: status.as_u16(), body: value.to_string() });
    }
    Ok(value)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
