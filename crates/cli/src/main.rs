use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use murmur_chat::{
    ChatEvent, ChatOrchestrator, FAILURE_MESSAGE, HistoryFetcher, HttpHistoryFetcher, NoRemoteHistory, Reconciler,
    SendOutcome, current_session_id, hand_off, rejection,
};
use murmur_core::logging::{LoggingConfig, PrivacyConfig, init_logging, sanitize_path};
use murmur_core::{Config, Role, SessionId, TransportKind};
use murmur_store::{KeyValueStore, MemoryKv, SqliteKv, TranscriptStore};
use murmur_stream::{
    CancelToken, FrameMode, HttpTransport, ReconnectPolicy, ReconnectingStream, ScriptedTransport, StreamEvent,
    StreamSession, TranslationRequest, Transport,
};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// murmur - streaming chat and translation client
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Streaming chat client with local transcripts and server reconciliation", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the config file (default: ./murmur.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Conversation to resume (default: the last one)
        #[arg(short, long, value_name = "ID")]
        session: Option<String>,
    },
    /// Send one message and print the reply
    Send {
        #[arg(required = true, value_name = "MESSAGE")]
        message: String,

        /// Conversation to send to (default: the last one)
        #[arg(short, long, value_name = "ID")]
        session: Option<String>,
    },
    /// Stream a translation
    Translate {
        #[arg(required = true, value_name = "TEXT")]
        text: String,

        #[arg(long, default_value = "ko", value_name = "LANG")]
        from: String,

        #[arg(long, default_value = "en", value_name = "LANG")]
        to: String,
    },
    /// List stored conversations, or print one
    History {
        #[arg(short, long, value_name = "ID")]
        session: Option<String>,
    },
    /// Show current status
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("murmur.toml"));
    let config = load_or_create_config(&config_path)?;

    let mut logging = LoggingConfig::from(config.logging.clone());
    if cli.verbose {
        logging = logging.with_level("debug");
        println!("{} Using config: {}", "Info:".blue().bold(), config_path.display());
    }
    let privacy = logging.privacy.clone();
    let _guard = init_logging(Some(logging)).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Chat { session } => cmd_chat(&config, session, privacy).await?,
        Commands::Send { message, session } => cmd_send(&config, &message, session, privacy).await?,
        Commands::Translate { text, from, to } => cmd_translate(&config, &text, &from, &to).await?,
        Commands::History { session } => cmd_history(&config, session)?,
        Commands::Status => cmd_status(&config, cli.verbose)?,
    }

    Ok(())
}

/// Load config from file or create from example
fn load_or_create_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    } else {
        println!("{} Config not found at {}", "Warning:".yellow().bold(), path.display());
        println!("{} Creating config from example...", "Info:".blue().bold());

        std::fs::write(path, Config::example()).context("Failed to create config")?;

        println!(
            "{} Created config at {}. Please edit it with your settings.",
            "Success:".green().bold(),
            path.display()
        );

        anyhow::bail!("Please edit {} with your settings and run again", path.display())
    }
}

/// Durable store from config, falling back to memory when the database cannot be opened
fn open_store(config: &Config) -> TranscriptStore {
    let durable: Arc<dyn KeyValueStore> = match config.storage.resolved_durable_path() {
        Some(path) => match SqliteKv::open(&path) {
            Ok(kv) => Arc::new(kv),
            Err(e) => {
                tracing::warn!(path = %sanitize_path(&path), error = %e, "durable store unavailable; using memory");
                Arc::new(MemoryKv::new())
            }
        },
        None => Arc::new(MemoryKv::new()),
    };
    TranscriptStore::new(durable, Arc::new(MemoryKv::new()))
}

fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    match config.transport.kind {
        TransportKind::Http => Ok(Arc::new(HttpTransport::new())),
        TransportKind::Mock => {
            let path = config
                .transport
                .responses_file
                .as_ref()
                .context("transport.responses_file is required for the mock transport")?;
            let transport = ScriptedTransport::from_file(path)
                .with_context(|| format!("Failed to load response script {}", path.display()))?;
            Ok(Arc::new(transport))
        }
    }
}

fn build_reconciler(config: &Config) -> Reconciler {
    let fetcher: Arc<dyn HistoryFetcher> = match config.transport.kind {
        TransportKind::Http => Arc::new(HttpHistoryFetcher::new(config.endpoint.clone())),
        TransportKind::Mock => Arc::new(NoRemoteHistory),
    };
    Reconciler::new(fetcher)
}

fn stream_session(config: &Config, transport: Arc<dyn Transport>) -> StreamSession {
    StreamSession::new(transport, FrameMode::from(config.endpoint.framing))
}

fn build_chat(
    config: &Config, store: &TranscriptStore, transport: Arc<dyn Transport>, session_id: SessionId,
    privacy: PrivacyConfig, events: mpsc::UnboundedSender<ChatEvent>,
) -> ChatOrchestrator {
    let chat_url = config.endpoint.chat_url(&session_id);
    let chat = ChatOrchestrator::new(
        session_id,
        chat_url,
        stream_session(config, transport),
        store.clone(),
        build_reconciler(config),
    )
    .with_privacy(privacy)
    .with_events(events);

    if config.reconnect.enabled { chat.with_reconnect(ReconnectPolicy::from_config(&config.reconnect)) } else { chat }
}

fn resolve_session(store: &TranscriptStore, session: Option<String>) -> Result<SessionId> {
    match session {
        Some(id) => SessionId::parse(id).context("Invalid session id"),
        None => Ok(current_session_id(store)),
    }
}

/// Prints streamed replies incrementally
#[derive(Debug, Default)]
struct Renderer {
    shown: String,
}

impl Renderer {
    fn render(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::AssistantDelta { text, .. } => self.show(text),
            ChatEvent::AssistantDone { text, .. } => {
                self.show(text);
                self.end_line();
            }
            ChatEvent::Stopped { .. } => {
                print!(" {}", "[stopped]".dimmed());
                self.end_line();
            }
            ChatEvent::AssistantFailed { .. } => {
                if !self.shown.is_empty() {
                    println!();
                }
                println!("{}", FAILURE_MESSAGE.red());
                self.shown.clear();
            }
            ChatEvent::Reconnecting { attempt, delay } => {
                if !self.shown.is_empty() {
                    println!();
                }
                println!(
                    "{} connection lost, retry {} in {}ms",
                    "Warning:".yellow().bold(),
                    attempt,
                    delay.as_millis()
                );
                self.shown.clear();
            }
            ChatEvent::UserMessage { .. } | ChatEvent::Cleared => {}
        }
    }

    fn show(&mut self, text: &str) {
        if self.shown.is_empty() && !text.is_empty() {
            print!("{} ", "murmur:".cyan().bold());
        }
        print!("{}", unseen_suffix(&self.shown, text));
        let _ = std::io::stdout().flush();
        self.shown = text.to_string();
    }

    fn end_line(&mut self) {
        println!();
        self.shown.clear();
    }
}

/// Part of the accumulated `text` not printed yet; all of it when the reply restarted
fn unseen_suffix<'a>(shown: &str, text: &'a str) -> &'a str {
    text.strip_prefix(shown).unwrap_or(text)
}

/// Await `fut` while rendering chat events; Ctrl-C stops the streaming reply
async fn drive<F, T>(
    chat: &ChatOrchestrator, events: &mut mpsc::UnboundedReceiver<ChatEvent>, renderer: &mut Renderer, fut: F,
) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => renderer.render(&event),
            output = &mut fut => {
                while let Ok(event) = events.try_recv() {
                    renderer.render(&event);
                }
                return output;
            }
            _ = tokio::signal::ctrl_c() => {
                chat.stop();
            }
        }
    }
}

fn print_transcript(chat: &ChatOrchestrator) {
    let transcript = chat.transcript();
    if transcript.is_empty() {
        println!("{} No messages yet", "Info:".blue().bold());
        return;
    }
    for entry in transcript.entries() {
        match entry.role {
            Role::User => println!("{} {}", "you:".green().bold(), entry.content),
            Role::Assistant => println!("{} {}", "murmur:".cyan().bold(), entry.content),
        }
    }
}

fn report_send(result: murmur_core::Result<SendOutcome>) {
    if let Err(e) = result {
        match rejection(&e) {
            Some(reason) => println!("{} {}", "Warning:".yellow().bold(), reason),
            None => println!("{} {}", "Error:".red().bold(), e),
        }
    }
}

/// Interactive conversation
async fn cmd_chat(config: &Config, session: Option<String>, privacy: PrivacyConfig) -> Result<()> {
    let store = open_store(config);
    let transport = build_transport(config)?;
    let mut session_id = resolve_session(&store, session)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut renderer = Renderer::default();
    let mut chat = build_chat(config, &store, transport.clone(), session_id.clone(), privacy.clone(), tx.clone());

    println!("{} Conversation {}", "Info:".blue().bold(), session_id.cyan());
    println!("{} /history, /reset, /quit; Ctrl-C stops a reply", "Info:".blue().bold());

    let init = drive(&chat, &mut rx, &mut renderer, chat.initialize()).await;
    init.context("Failed to initialize conversation")?;
    print_transcript(&chat);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        let _ = std::io::stdout().flush();

        // Ctrl-C at the prompt leaves the conversation
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => print_transcript(&chat),
            "/reset" => {
                session_id = start_new_session(&chat, &store);
                chat = build_chat(config, &store, transport.clone(), session_id.clone(), privacy.clone(), tx.clone());
                let init = drive(&chat, &mut rx, &mut renderer, chat.initialize()).await;
                init.context("Failed to initialize conversation")?;
                println!("{} New conversation {}", "Info:".blue().bold(), session_id.cyan());
            }
            text => {
                let result = drive(&chat, &mut rx, &mut renderer, chat.send(text)).await;
                report_send(result);
            }
        }
    }

    Ok(())
}

/// Drop the in-memory conversation and remember a fresh session id.
///
/// The old session's stored transcript is kept so `murmur history` can still show it.
fn start_new_session(chat: &ChatOrchestrator, store: &TranscriptStore) -> SessionId {
    chat.clear();
    let session_id = SessionId::generate();
    store.write_session_id(&session_id);
    tracing::info!(previous = %chat.session_id(), session = %session_id, "started new session");
    session_id
}

/// One message through the hand-off path: park it as the draft, then let initialization send it
async fn cmd_send(config: &Config, message: &str, session: Option<String>, privacy: PrivacyConfig) -> Result<()> {
    let store = open_store(config);
    let transport = build_transport(config)?;
    let session_id = resolve_session(&store, session)?;

    hand_off(&store, &build_reconciler(config), &session_id, message)
        .await
        .context("Failed to hand off message")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut renderer = Renderer::default();
    let chat = build_chat(config, &store, transport, session_id, privacy, tx);

    let outcome = drive(&chat, &mut rx, &mut renderer, chat.initialize())
        .await
        .context("Failed to initialize conversation")?;

    match outcome {
        Some(SendOutcome::Failed(error)) => anyhow::bail!("Reply failed: {}", error),
        Some(_) => Ok(()),
        None => anyhow::bail!("Message was not sent"),
    }
}

/// Stream a translation to stdout
async fn cmd_translate(config: &Config, text: &str, from: &str, to: &str) -> Result<()> {
    let transport = build_transport(config)?;
    let request = TranslationRequest::new(text, from, to);
    let cancel = CancelToken::new();
    let mut stream = ReconnectingStream::new(
        stream_session(config, transport),
        config.endpoint.translate_url(),
        &request,
        ReconnectPolicy::from_config(&config.reconnect),
        cancel.clone(),
    )?;

    let print_event = |event: &StreamEvent| match event {
        StreamEvent::Delta { frame, .. } => {
            print!("{}", frame);
            let _ = std::io::stdout().flush();
        }
        StreamEvent::Reconnecting { attempt, delay, .. } => {
            println!();
            println!(
                "{} connection lost, retry {} in {}ms",
                "Warning:".yellow().bold(),
                attempt,
                delay.as_millis()
            );
        }
        StreamEvent::Done(_) => {}
    };

    let run = stream.run(print_event);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            run.await
        }
    };
    println!();

    let outcome = outcome.context("Translation failed")?;
    if outcome.is_cancelled() {
        println!("{} Translation stopped", "Info:".yellow().bold());
    }
    Ok(())
}

/// List stored conversations, or print one
fn cmd_history(config: &Config, session: Option<String>) -> Result<()> {
    let store = open_store(config);

    if let Some(id) = session {
        let session_id = SessionId::parse(id).context("Invalid session id")?;
        let transcript = store.read_durable(&session_id);
        if transcript.is_empty() {
            println!("{} No stored messages for {}", "Info:".blue().bold(), session_id.cyan());
        }
        for entry in transcript.entries() {
            match entry.role {
                Role::User => println!("{} {}", "you:".green().bold(), entry.content),
                Role::Assistant => println!("{} {}", "murmur:".cyan().bold(), entry.content),
            }
        }
        return Ok(());
    }

    let current = store.read_session_id();
    let sessions = store.stored_sessions();
    if sessions.is_empty() {
        println!("{} No stored conversations", "Info:".blue().bold());
    }
    for session_id in sessions {
        let count = store.read_durable(&session_id).len();
        let marker = if current.as_ref() == Some(&session_id) { "*" } else { " " };
        println!("{} {} ({} messages)", marker, session_id.cyan(), count);
    }
    Ok(())
}

/// Show current status
fn cmd_status(config: &Config, verbose: bool) -> Result<()> {
    println!("{}", "murmur status".green().bold().underline());
    println!();

    println!("{} Endpoint", "Info:".blue().bold());
    println!("  Base URL: {}", config.endpoint.base_url.cyan());
    println!("  Framing: {}", config.endpoint.framing);
    println!("  Transport: {:?}", config.transport.kind);

    println!("{} Reconnect", "Info:".blue().bold());
    println!("  Enabled: {}", config.reconnect.enabled);
    println!("  Attempts: {}", config.reconnect.budget);

    let store = open_store(config);
    println!("{} Storage", "Info:".blue().bold());
    match config.storage.resolved_durable_path() {
        Some(path) => println!("  Durable: {}", path.display().cyan()),
        None => println!("  Durable: {}", "memory".yellow()),
    }
    println!("  Conversations: {}", store.stored_sessions().len());
    match store.read_session_id() {
        Some(session_id) => println!("  Current: {}", session_id.cyan()),
        None => println!("  Current: none"),
    }

    if verbose {
        println!();
        println!("{} Paths", "Info:".blue().bold());
        println!("  Chat: {}", config.endpoint.chat_path);
        println!("  History: {}", config.endpoint.history_path);
        println!("  Translate: {}", config.endpoint.translate_url());
    }

    Ok(())
}
