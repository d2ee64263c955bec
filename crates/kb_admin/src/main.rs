use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{AppConfig, ConfigStore};
use core_orchestrator::{
    AdapterRegistry, BackendResolver, CreateDataset, DatasetOrchestrator, DocumentOrchestrator,
    RetrievalTest, UpdateDataset,
};
use core_types::{
    ChunkQuery, ConfigRef, DocumentFilter, KbError, KnowledgeBaseStatus, KnowledgeBaseStore,
    Pagination, Principal, RetrievalParams, UploadOptions, UploadSource,
};
use provider_ragflow::RagflowAdapter;
use serde::Serialize;
use storage_sqlite::SqliteStorage;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kb_admin")]
#[command(about = "Manage knowledge bases backed by a remote RAG engine")]
#[command(version)]
struct Cli {
    /// Numeric id of the acting user
    #[arg(long, global = true, default_value_t = 1)]
    user_id: i64,

    /// Username of the acting user, used to prefix remote dataset names
    #[arg(long, global = true, default_value = "admin")]
    username: String,

    /// Directory holding config.json (default: platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// SQLite database file (default: from config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List enabled backend profiles
    Profiles,

    /// Show registered adapters and their configuration fields
    Adapters,

    /// Check connectivity of a backend profile
    Status {
        /// Profile id (default profile when omitted)
        #[arg(long)]
        profile: Option<String>,
    },

    /// Manage knowledge bases
    #[command(subcommand)]
    Datasets(DatasetCommand),

    /// Manage documents inside a knowledge base
    #[command(subcommand)]
    Documents(DocumentCommand),

    /// List chunks of a parsed document
    Chunks {
        dataset_id: String,
        document_id: String,
        #[arg(long)]
        keywords: Option<String>,
        #[arg(long)]
        chunk_id: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Run a retrieval test against a knowledge base
    Retrieve {
        dataset_id: String,
        question: String,
        /// Additional datasets to search
        #[arg(long = "dataset")]
        dataset_ids: Vec<String>,
        /// Restrict the search to these documents
        #[arg(long = "document")]
        document_ids: Vec<String>,
        #[arg(long)]
        top_k: Option<u32>,
        #[arg(long)]
        similarity_threshold: Option<f64>,
        #[arg(long)]
        vector_similarity_weight: Option<f64>,
        #[arg(long)]
        highlight: bool,
        #[command(flatten)]
        page: PageArgs,
    },
}

#[derive(Subcommand)]
enum DatasetCommand {
    List {
        /// Substring match on the dataset name
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    Get {
        dataset_id: String,
    },
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Backend profile id
        #[arg(long)]
        profile: Option<String>,
    },
    Update {
        dataset_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    Delete {
        #[arg(required = true)]
        dataset_ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DocumentCommand {
    List {
        dataset_id: String,
        #[arg(long)]
        keywords: Option<String>,
        /// Run status code: 0 unstart, 1 running, 2 cancel, 3 done, 4 fail
        #[arg(long)]
        status: Option<i32>,
        /// File suffix filter, repeatable
        #[arg(long = "suffix")]
        suffixes: Vec<String>,
        #[command(flatten)]
        page: PageArgs,
    },
    Get {
        dataset_id: String,
        document_id: String,
    },
    Upload {
        dataset_id: String,
        path: PathBuf,
        /// Name reported to the backend (default: file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        chunk_method: Option<String>,
        /// Parse right after the upload is accepted
        #[arg(long)]
        parse: bool,
    },
    Parse {
        dataset_id: String,
        #[arg(required = true)]
        document_ids: Vec<String>,
    },
    Delete {
        dataset_id: String,
        document_id: String,
    },
}

#[derive(Args, Clone, Copy)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = core_types::DEFAULT_PAGE_SIZE)]
    page_size: u32,
}

impl PageArgs {
    fn pagination(self) -> Pagination {
        Pagination::new(self.page, self.page_size)
    }
}

struct App {
    principal: Principal,
    backends: BackendResolver,
    datasets: DatasetOrchestrator,
    documents: DocumentOrchestrator,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let store = match &cli.config_dir {
        Some(dir) => ConfigStore::from_dir(dir),
        None => match ConfigStore::from_default_location() {
            Ok(store) => store,
            Err(err) => {
                eprintln!("{err:#}");
                std::process::exit(2);
            }
        },
    };
    let config = match store.load_or_init() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config from {}: {err:#}", store.path().display());
            std::process::exit(2);
        }
    };
    let _log_guard = init_local_logger(&store.log_dir(&config), config.logging.filter.as_deref());

    if let Err(err) = run(cli, &store, config).await {
        error!("command failed: {err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

/// 2 for configuration problems, 3 when the RAG backend failed, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<KbError>() {
        Some(kb) if kb.is_config_error() => 2,
        Some(kb) if kb.is_upstream_error() => 3,
        _ => 1,
    }
}

async fn run(cli: Cli, store: &ConfigStore, config: AppConfig) -> Result<()> {
    let db_path = cli.db.clone().unwrap_or_else(|| store.database_path(&config));
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let storage: Arc<dyn KnowledgeBaseStore> = Arc::new(SqliteStorage::connect(&db_path).await?);
    debug!(db = %db_path.display(), config = %store.path().display(), "storage ready");

    let registry = AdapterRegistry::builder()
        .register(provider_ragflow::ADAPTER_TYPE, RagflowAdapter::boxed)
        .build();
    let backends = BackendResolver::new(Arc::new(registry), Arc::new(config));
    let app = App {
        principal: Principal::new(cli.user_id, cli.username),
        datasets: DatasetOrchestrator::new(storage.clone(), backends.clone()),
        documents: DocumentOrchestrator::new(storage, backends.clone()),
        backends,
    };

    match cli.command {
        Command::Profiles => print_json(&app.backends.profiles()),
        Command::Adapters => {
            let mut adapters = serde_json::Map::new();
            for adapter_type in app.backends.registry().registered_types() {
                adapters.insert(
                    adapter_type.clone(),
                    serde_json::json!({
                        "fields": app.backends.supported_config(&adapter_type)?,
                        "defaults": app.backends.default_config(&adapter_type)?,
                    }),
                );
            }
            print_json(&adapters)
        }
        Command::Status { profile } => {
            let status = app
                .backends
                .adapter_status(ConfigRef::from_option(profile.as_deref()))
                .await?;
            print_json(&serde_json::json!({
                "adapter": status,
                "registry": app.backends.registry_status(),
            }))
        }
        Command::Datasets(command) => run_datasets(&app, command).await,
        Command::Documents(command) => run_documents(&app, command).await,
        Command::Chunks {
            dataset_id,
            document_id,
            keywords,
            chunk_id,
            page,
        } => {
            let query = ChunkQuery { keywords, chunk_id };
            let chunks = app
                .documents
                .chunks(&app.principal, &dataset_id, &document_id, &query, page.pagination())
                .await?;
            print_json(&chunks)
        }
        Command::Retrieve {
            dataset_id,
            question,
            dataset_ids,
            document_ids,
            top_k,
            similarity_threshold,
            vector_similarity_weight,
            highlight,
            page,
        } => {
            let test = RetrievalTest {
                question,
                dataset_ids,
                document_ids,
                params: RetrievalParams {
                    page: Some(page.page),
                    page_size: Some(page.page_size),
                    top_k,
                    similarity_threshold,
                    vector_similarity_weight,
                    highlight: highlight.then_some(true),
                    ..RetrievalParams::default()
                },
            };
            let result = app
                .documents
                .retrieval_test(&app.principal, &dataset_id, test)
                .await?;
            print_json(&result)
        }
    }
}

async fn run_datasets(app: &App, command: DatasetCommand) -> Result<()> {
    let principal = &app.principal;
    match command {
        DatasetCommand::List { name, page } => {
            let page = app
                .datasets
                .list(principal, name.as_deref(), page.pagination())
                .await?;
            print_json(&page)
        }
        DatasetCommand::Get { dataset_id } => {
            print_json(&app.datasets.get(principal, &dataset_id).await?)
        }
        DatasetCommand::Create {
            name,
            description,
            profile,
        } => {
            let request = CreateDataset {
                name,
                description,
                rag_config_ref: profile,
            };
            print_json(&app.datasets.create(principal, request).await?)
        }
        DatasetCommand::Update {
            dataset_id,
            name,
            description,
            enable,
            disable,
        } => {
            let status = match (enable, disable) {
                (true, _) => Some(KnowledgeBaseStatus::Enabled),
                (_, true) => Some(KnowledgeBaseStatus::Disabled),
                _ => None,
            };
            let request = UpdateDataset {
                name,
                description,
                status,
            };
            print_json(&app.datasets.update(principal, &dataset_id, request).await?)
        }
        DatasetCommand::Delete { dataset_ids } => {
            let deleted = app.datasets.delete_batch(principal, &dataset_ids).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))
        }
    }
}

async fn run_documents(app: &App, command: DocumentCommand) -> Result<()> {
    let principal = &app.principal;
    match command {
        DocumentCommand::List {
            dataset_id,
            keywords,
            status,
            suffixes,
            page,
        } => {
            let mut filter = match status {
                Some(code) => DocumentFilter::by_status(code),
                None => DocumentFilter::default(),
            };
            filter.keywords = keywords;
            filter.suffixes = suffixes;
            let documents = app
                .documents
                .list(principal, &dataset_id, &filter, page.pagination())
                .await?;
            print_json(&documents)
        }
        DocumentCommand::Get {
            dataset_id,
            document_id,
        } => print_json(&app.documents.get(principal, &dataset_id, &document_id).await?),
        DocumentCommand::Upload {
            dataset_id,
            path,
            name,
            chunk_method,
            parse,
        } => {
            let source = UploadSource::from_path(&path).await?;
            let options = UploadOptions {
                name,
                chunk_method,
                ..UploadOptions::default()
            };
            let document = app
                .documents
                .upload(principal, &dataset_id, source, &options)
                .await?;
            if parse {
                app.documents
                    .parse(principal, &dataset_id, &[document.document_id.clone()])
                    .await?;
            }
            print_json(&document)
        }
        DocumentCommand::Parse {
            dataset_id,
            document_ids,
        } => {
            app.documents
                .parse(principal, &dataset_id, &document_ids)
                .await?;
            print_json(&serde_json::json!({ "accepted": document_ids.len() }))
        }
        DocumentCommand::Delete {
            dataset_id,
            document_id,
        } => {
            app.documents
                .delete(principal, &dataset_id, &document_id)
                .await?;
            print_json(&serde_json::json!({ "deleted": document_id }))
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{text}");
    Ok(())
}

fn init_local_logger(
    log_dir: &Path,
    default_filter: Option<&str>,
) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "kb_admin.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_filter.unwrap_or("info,kb_admin=debug"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
