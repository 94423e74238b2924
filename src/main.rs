use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

mod answering;
mod console;
mod documents;
mod error;
mod export;
mod notice;
mod orchestrator;
mod repository;
mod reveal;
mod session;
mod settings;
mod storage;
mod timeline;

use crate::answering::HttpAnsweringService;
use crate::console::{print_history, print_sessions, run_repl, ConsoleNotifier, TerminalSink};
use crate::documents::{DocumentLibrary, HttpDocumentService};
use crate::export::ExportFormat;
use crate::notice::{Notice, Notifier};
use crate::orchestrator::{ChatMode, RequestOrchestrator};
use crate::repository::{SessionRepository, CHAT_NAMESPACE, DOCUMENT_CHAT_NAMESPACE};
use crate::reveal::{AnswerRevealer, Granularity, NoReveal};
use crate::session::decode_session;
use crate::settings::{
    resolve_effective_settings, EffectiveSettings, EmptyAnswerPolicy, Endpoints, EnvOverrides,
    GlobalConfigDefaults, RequestOverrides, RevealParams,
};
use crate::storage::{MemoryStore, PersistentStore, SqliteStore};

#[derive(Debug, Parser)]
#[command(name = "docchat")]
#[command(about = "Chat with a remote answering service, optionally grounded in your PDFs", long_about = None)]
struct Cli {
    /// JSON config file (default: $XDG_CONFIG_HOME/docchat/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Keep everything in memory for this run
    #[arg(long, global = true)]
    ephemeral: bool,
    #[arg(long, global = true)]
    user_id: Option<String>,
    #[arg(long, global = true)]
    chat_url: Option<String>,
    #[arg(long, global = true)]
    document_chat_url: Option<String>,
    #[arg(long, global = true)]
    upload_url: Option<String>,
    #[arg(long, global = true)]
    delete_url: Option<String>,
    #[arg(long, global = true, value_enum)]
    granularity: Option<Granularity>,
    #[arg(long, global = true)]
    step_delay_ms: Option<u64>,
    #[arg(long, global = true, value_enum)]
    empty_answer: Option<EmptyAnswerPolicy>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive free chat
    Chat {
        #[arg(long)]
        session: Option<Uuid>,
    },
    /// Send one message and print the answer
    Ask {
        prompt: String,
        #[arg(long)]
        session: Option<Uuid>,
        /// Print the answer at once instead of revealing it
        #[arg(long)]
        quiet: bool,
    },
    /// Interactive chat grounded in uploaded documents
    DocChat {
        #[arg(long)]
        session: Option<Uuid>,
    },
    Sessions {
        /// Operate on document-chat sessions
        #[arg(long, global = true)]
        documents: bool,
        #[command(subcommand)]
        action: SessionAction,
    },
    Docs {
        #[command(subcommand)]
        action: DocAction,
    },
    /// Print one message as text, JSON or Markdown
    Export {
        session: Uuid,
        message: Uuid,
        #[arg(long, value_enum, default_value = "text")]
        format: ExportFormat,
        #[arg(long)]
        documents: bool,
    },
}

#[derive(Debug, Subcommand)]
enum SessionAction {
    List,
    Show {
        id: Uuid,
        /// Print the stored session record
        #[arg(long)]
        json: bool,
    },
    Delete { id: Uuid },
    Rename { id: Uuid, title: String },
    /// Restore a session from a record printed by `show --json`
    Import { path: PathBuf },
}

#[derive(Debug, Subcommand)]
enum DocAction {
    List,
    Upload { path: PathBuf },
    Delete { id: Uuid },
}

impl Cli {
    fn overrides(&self) -> RequestOverrides {
        RequestOverrides {
            endpoints: Endpoints {
                chat_url: self.chat_url.clone(),
                document_chat_url: self.document_chat_url.clone(),
                upload_url: self.upload_url.clone(),
                delete_url: self.delete_url.clone(),
            },
            reveal: RevealParams {
                granularity: self.granularity,
                step_delay_ms: self.step_delay_ms,
            },
            user_id: self.user_id.clone(),
            database_url: self.database_url.clone(),
            empty_answer: self.empty_answer,
        }
    }
}

struct App {
    settings: EffectiveSettings,
    store: Arc<dyn PersistentStore>,
    notifier: Arc<dyn Notifier>,
}

impl App {
    async fn repository(&self, documents: bool) -> anyhow::Result<Arc<SessionRepository>> {
        let namespace = if documents { DOCUMENT_CHAT_NAMESPACE } else { CHAT_NAMESPACE };
        Ok(Arc::new(SessionRepository::open(self.store.clone(), namespace).await?))
    }

    async fn library(&self) -> anyhow::Result<Arc<DocumentLibrary>> {
        let service = Arc::new(HttpDocumentService::from_settings(&self.settings)?);
        Ok(Arc::new(DocumentLibrary::open(self.store.clone(), service, &self.settings.user_id).await?))
    }

    async fn orchestrator(&self, mode: ChatMode, session: Option<Uuid>) -> anyhow::Result<RequestOrchestrator> {
        let repo = self.repository(matches!(mode, ChatMode::Document(_))).await?;
        if let Some(id) = session {
            repo.load(id).await?;
        }
        let service = Arc::new(HttpAnsweringService::from_settings(&self.settings)?);
        Ok(RequestOrchestrator::new(repo, service, mode, self.notifier.clone())
            .with_revealer(AnswerRevealer::new(self.settings.granularity, self.settings.step_delay))
            .with_empty_answer(self.settings.empty_answer))
    }

    async fn interactive(&self, orch: RequestOrchestrator) -> anyhow::Result<()> {
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let interrupted = tokio::select! {
            res = run_repl(&orch, self.notifier.as_ref(), input, std::io::stdout()) => {
                res?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            println!();
            // A turn cut off by ctrl-c must not leave its user message behind.
            if let Some(id) = orch.repository().current_id().await {
                orch.discard_unanswered(id).await?;
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let global = GlobalConfigDefaults::load(cli.config.as_deref())?;
    let settings = resolve_effective_settings(&global, &EnvOverrides::from_env(), &cli.overrides());
    let store: Arc<dyn PersistentStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::initialize(settings.database_url.clone()).await?)
    };
    let app = App { settings, store, notifier: Arc::new(ConsoleNotifier) };

    match cli.command {
        Commands::Chat { session } => {
            let orch = app.orchestrator(ChatMode::Free, session).await?;
            app.interactive(orch).await?;
        }
        Commands::Ask { prompt, session, quiet } => {
            let orch = app.orchestrator(ChatMode::Free, session).await?;
            let outcome = if quiet {
                let outcome = orch.submit(&prompt, &mut NoReveal).await?;
                println!("{}", outcome.assistant.content);
                outcome
            } else {
                orch.submit(&prompt, &mut TerminalSink::new(std::io::stdout())).await?
            };
            tracing::debug!(
                session_id = %outcome.session_id,
                user = %outcome.user.id,
                assistant = %outcome.assistant.id,
                degraded = outcome.degraded,
                "ask finished"
            );
        }
        Commands::DocChat { session } => {
            let library = app.library().await?;
            if library.list().await.is_empty() {
                tracing::warn!("no documents uploaded; answers will not be grounded");
            }
            let orch = app.orchestrator(ChatMode::Document(library), session).await?;
            app.interactive(orch).await?;
        }
        Commands::Sessions { documents, action } => {
            let repo = app.repository(documents).await?;
            let mut out = std::io::stdout();
            match action {
                SessionAction::List => print_sessions(&mut out, &repo.list().await, None)?,
                SessionAction::Show { id, json } => {
                    let session = repo.get(id).await.ok_or_else(|| anyhow::anyhow!("session not found: {}", id))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&session)?);
                    } else {
                        print_history(&mut out, &session)?;
                    }
                }
                SessionAction::Delete { id } => {
                    if !repo.delete(id).await? {
                        anyhow::bail!("session not found: {}", id);
                    }
                    app.notifier.notify(Notice::Success("Chat deleted".into()));
                }
                SessionAction::Rename { id, title } => {
                    let session = repo.rename(id, &title).await?;
                    println!("{}  {}", session.id, session.title);
                }
                SessionAction::Import { path } => {
                    let raw = tokio::fs::read_to_string(&path).await?;
                    let session = decode_session(&raw)
                        .ok_or_else(|| anyhow::anyhow!("not a session record: {}", path.display()))?;
                    let (id, title) = (session.id, session.title.clone());
                    repo.save(session).await?;
                    println!("{}  {}", id, title);
                }
            }
        }
        Commands::Docs { action } => {
            let library = app.library().await?;
            match action {
                DocAction::List => {
                    let docs = library.list().await;
                    if docs.is_empty() {
                        println!("no documents");
                    }
                    for d in docs {
                        let short: String = d.backend_file_id.chars().take(8).collect();
                        println!("{}  {}  {}...  {}", d.id, d.uploaded_at.format("%Y-%m-%d %H:%M"), short, d.display_name);
                    }
                }
                DocAction::Upload { path } => match library.upload_file(&path).await {
                    Ok(doc) => {
                        app.notifier.notify(Notice::Success("PDF uploaded successfully!".into()));
                        println!("{}  {}", doc.id, doc.display_name);
                    }
                    Err(e) => {
                        app.notifier.notify(Notice::Failure(format!("Failed to upload PDF: {}", e)));
                        return Err(e.into());
                    }
                },
                DocAction::Delete { id } => match library.delete(id).await {
                    Ok(_) => app.notifier.notify(Notice::Success("PDF deleted successfully!".into())),
                    Err(e) => {
                        app.notifier.notify(Notice::Failure("Failed to delete PDF".into()));
                        return Err(e.into());
                    }
                },
            }
        }
        Commands::Export { session, message, format, documents } => {
            let repo = app.repository(documents).await?;
            let session = repo.get(session).await.ok_or_else(|| anyhow::anyhow!("session not found: {}", session))?;
            let msg = session
                .messages
                .find(message)
                .ok_or_else(|| anyhow::anyhow!("message not found: {}", message))?;
            println!("{}", export::render(msg, format));
        }
    }
    Ok(())
}
