use apphub::auth::{permissions_for, AuthStatus};
use apphub::chat::{ChatEvent, ChatEventBus, ChatOrchestrator, ChatRequest, SessionRegistry};
use apphub::config::types::{App, Model, SourceConfig, ToolConfig, User};
use apphub::config::{ConfigCache, ContentStore};
use apphub::sources::SourceManager;
use apphub::storage::UsageTracker;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "apphub")]
#[command(author, version, about = "LLM application gateway engine", long_about = None)]
struct Cli {
    /// Content directory (overrides CONTENTS_DIR)
    #[arg(long, global = true)]
    contents: Option<PathBuf>,

    /// Defaults directory shipped with the distribution
    #[arg(long, global = true, default_value = "defaults")]
    defaults: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate every configured resource
    Validate,
    /// List the apps visible to a user's groups
    Apps {
        /// Comma-separated internal group ids (default: anonymous)
        #[arg(long, default_value = "anonymous")]
        groups: String,
    },
    /// List the models visible to a user's groups
    Models {
        #[arg(long, default_value = "anonymous")]
        groups: String,
    },
    /// Run a one-shot chat against an app, streaming to stdout
    Chat {
        #[arg(long)]
        app: String,
        #[arg(long)]
        model: Option<String>,
        /// The user message
        message: String,
        /// `name=value` variable bindings
        #[arg(long)]
        var: Vec<String>,
    },
}

fn contents_dir(cli: &Cli) -> PathBuf {
    cli.contents
        .clone()
        .or_else(|| std::env::var("CONTENTS_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("contents"))
}

fn user_with_groups(groups: &str) -> User {
    let mut user = User::anonymous();
    user.groups = groups.split(',').map(|g| g.trim().to_string()).collect();
    user
}

#[tokio::main]
async fn main() {
    apphub::init_file_logger(log::LevelFilter::Info);
    let cli = Cli::parse();

    let store = Arc::new(ContentStore::new(contents_dir(&cli), cli.defaults.clone()));

    match &cli.command {
        Commands::Validate => validate(&store),
        Commands::Apps { groups } => {
            let cache = ConfigCache::load(store);
            let user = user_with_groups(groups);
            let perms = permissions_for(&cache.snapshot().groups, &user);
            let view = cache.apps_view(&perms);
            println!("etag: {}", view.etag);
            for app in view.data {
                println!("  {}", app.id);
            }
        }
        Commands::Models { groups } => {
            let cache = ConfigCache::load(store);
            let user = user_with_groups(groups);
            let perms = permissions_for(&cache.snapshot().groups, &user);
            let view = cache.models_view(&perms);
            println!("etag: {}", view.etag);
            for model in view.data {
                println!("  {} ({} via {})", model.id, model.model_id, model.provider);
            }
        }
        Commands::Chat {
            app,
            model,
            message,
            var,
        } => {
            if let Err(err) = chat(store, app, model.as_deref(), message, var).await {
                eprintln!("error: {}", err);
                std::process::exit(1);
            }
        }
    }
}

fn validate(store: &Arc<ContentStore>) {
    let mut problems = 0usize;

    let apps = store.load_collection::<App>("apps");
    let models = store.load_collection::<Model>("models");
    let tools = store.load_collection::<ToolConfig>("tools");
    let sources = store.load_collection::<SourceConfig>("sources");

    println!(
        "apps: {}  models: {}  tools: {}  sources: {}",
        apps.items.len(),
        models.items.len(),
        tools.items.len(),
        sources.items.len()
    );

    for load_skipped in [&apps.skipped, &models.skipped, &tools.skipped, &sources.skipped] {
        for (path, reason) in load_skipped {
            println!("  skipped {}: {}", path.display(), reason);
            problems += 1;
        }
    }

    // Group resolution surfaces inheritance cycles into the log.
    let cache = ConfigCache::load(store.clone());
    let snapshot = cache.snapshot();
    println!("groups: {}", snapshot.groups.len());
    let mut resolver = apphub::auth::GroupResolver::new(&snapshot.groups);
    for group in &snapshot.groups {
        let _ = resolver.effective(&[group.id.clone()]);
    }

    let status = AuthStatus {
        authenticated: false,
        auto_redirect: snapshot.platform.auth_mode != "anonymous",
    };
    println!(
        "auth mode: {} (autoRedirect: {})",
        snapshot.platform.auth_mode, status.auto_redirect
    );

    if problems == 0 {
        println!("configuration OK");
    } else {
        println!("{} problem(s) found", problems);
        std::process::exit(1);
    }
}

async fn chat(
    store: Arc<ContentStore>,
    app: &str,
    model: Option<&str>,
    message: &str,
    vars: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let cache = Arc::new(ConfigCache::load(store.clone()));
    let sources = Arc::new(SourceManager::new(
        store.clone(),
        store.contents_dir().join("sources"),
    ));
    let bus = Arc::new(ChatEventBus::new());
    let usage = Arc::new(UsageTracker::open(
        store.contents_dir().join("data/usage.json"),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        cache,
        sources,
        Arc::new(SessionRegistry::new()),
        bus.clone(),
        Some(usage),
    ));

    let chat_id = uuid::Uuid::new_v4().to_string();
    let mut variables = std::collections::HashMap::new();
    for binding in vars {
        if let Some((name, value)) = binding.split_once('=') {
            variables.insert(name.to_string(), value.to_string());
        }
    }

    let request = ChatRequest {
        chat_id: chat_id.clone(),
        app_id: app.to_string(),
        model_id: model.map(str::to_string),
        language: "en".to_string(),
        messages: vec![apphub::llm::Message::user(message.to_string())],
        variables,
        options: Default::default(),
    };

    let mut events = bus.subscribe(&chat_id);
    let runner = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.handle(request, User::anonymous()).await })
    };

    while let Some(event) = events.next().await {
        match event {
            ChatEvent::Content { text } => {
                print!("{}", text);
                std::io::stdout().flush().ok();
            }
            ChatEvent::ToolCall { name, .. } => eprintln!("\n[tool: {}]", name),
            ChatEvent::Clarification { request, .. } => {
                eprintln!("\n[clarification] {}", request.question)
            }
            ChatEvent::Image { mime_type, .. } => eprintln!("\n[image: {}]", mime_type),
            ChatEvent::Warning { message } => eprintln!("\n[warning] {}", message),
            ChatEvent::Error { message, .. } => eprintln!("\n[error] {}", message),
            ChatEvent::Done { finish_reason, .. } => {
                println!();
                eprintln!("[done: {:?}]", finish_reason);
                break;
            }
            ChatEvent::Cancelled => {
                eprintln!("[cancelled]");
                break;
            }
            ChatEvent::Action { tool, step, .. } => eprintln!("[{}] {}", tool, step),
        }
    }

    runner.await??;
    Ok(())
}
