use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use forge_core::models::ModelCategory;
use forge_core::providers::{AnthropicBackend, OpenAiBackend, SerpApiSearch};
use forge_core::{
    AgentRegistry, BackendPool, DoneReason, EventKind, EventStream, ForgeError, ModelCatalog,
    ModelSelector, Orchestrator, RoutingQuery, SearchBackend, SpecialistAgent, StreamEvent,
};

mod config;

use config::ForgeConfig;

#[derive(Parser)]
#[command(name = "forge")]
#[command(version)]
#[command(about = "forge - route questions to specialist LLM agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Ask {
        /// The question to ask
        query: String,

        /// Send the question straight to this agent (id or display name)
        #[arg(short, long)]
        agent: Option<String>,

        /// Preferred model name or alias
        #[arg(short, long)]
        model: Option<String>,

        /// Sampling temperature, clamped to the model's range
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Restrict model selection to a category
        #[arg(long, value_parser = parse_category)]
        category: Option<ModelCategory>,

        /// Print every event as one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// List the configured agents
    Agents,

    /// List the model catalog and which models are usable
    Models,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with streamed answers
    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Agents => cmd_agents(&cli.config),
        Commands::Models => cmd_models(&cli.config),
        Commands::Ask {
            query,
            agent,
            model,
            temperature,
            category,
            json,
        } => {
            let mut query = RoutingQuery::new(query).with_hints(None, category);
            if let Some(agent) = agent {
                query = query.with_agent(agent);
            }
            if let Some(model) = model {
                query = query.with_model(model);
            }
            if let Some(t) = temperature {
                query = query.with_temperature(t);
            }
            cmd_ask(&cli.config, query, json).await
        }
    }
}

fn parse_category(s: &str) -> Result<ModelCategory, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(|_| {
        format!(
            "unknown category '{}' (expected flagship, cost-optimized, legacy or reasoning)",
            s
        )
    })
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict {}", config_path.display()))?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("forge initialized at {}", config_dir.display());
    println!(
        "Set OPENAI_API_KEY and/or ANTHROPIC_API_KEY (and SERP_API_KEY for web search), or edit {}.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ForgeConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

fn cmd_agents(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ForgeConfig::load(config_path)?;
    let fallback = cfg.fallback_agent.as_deref();
    for agent in &cfg.agents {
        let marker = if Some(agent.id.as_str()) == fallback { " (fallback)" } else { "" };
        println!("{} - {}{}", agent.id, agent.display_name, marker);
        if !agent.description.is_empty() {
            println!("    {}", agent.description);
        }
        let terms = agent.routing_terms();
        if !terms.is_empty() {
            println!("    routes on: {}", terms.join(", "));
        }
        if !agent.domain_terms.is_empty() {
            println!("    requires one of: {}", agent.domain_terms.join(", "));
        }
    }
    Ok(())
}

fn cmd_models(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ForgeConfig::load(config_path)?;
    let backends = build_backends(&cfg)?;
    let catalog = build_catalog(&cfg);
    let selector = ModelSelector::new(Arc::new(catalog), backends.providers());

    let mut models: Vec<_> = selector.catalog().iter().collect();
    models.sort_by_key(|m| m.priority);
    for model in models {
        let status = if selector.is_available(model.provider) { "ready" } else { "no key" };
        let aliases = selector.catalog().aliases().aliases_for(&model.name);
        let aliases = if aliases.is_empty() {
            String::new()
        } else {
            format!(" (alias: {})", aliases.join(", "))
        };
        println!(
            "{:>3}  {:<28} {:<9} {:<14} {:<6}{}",
            model.priority,
            model.name,
            model.provider.to_string(),
            model.category.to_string(),
            status,
            aliases
        );
    }
    Ok(())
}

fn build_catalog(cfg: &ForgeConfig) -> ModelCatalog {
    let mut catalog = ModelCatalog::builtin().with_models(cfg.models.iter().cloned());
    for (alias, canonical) in &cfg.aliases {
        catalog = catalog.with_alias(alias.clone(), canonical.clone());
    }
    catalog
}

/// One backend per provider that has a usable key
fn build_backends(cfg: &ForgeConfig) -> Result<BackendPool> {
    let mut pool = BackendPool::new();
    if let Some(openai) = &cfg.providers.openai {
        if let Some(key) = openai.key() {
            pool = pool.with_backend(Arc::new(OpenAiBackend::new(key, openai.base_url.clone())?));
        }
    }
    if let Some(anthropic) = &cfg.providers.anthropic {
        if let Some(key) = anthropic.key() {
            pool = pool.with_backend(Arc::new(AnthropicBackend::new(
                key,
                anthropic.base_url.clone(),
            )?));
        }
    }
    Ok(pool)
}

fn build_orchestrator(cfg: &ForgeConfig) -> Result<Orchestrator> {
    let backends = Arc::new(build_backends(cfg)?);
    if backends.providers().is_empty() {
        return Err(anyhow!(
            "No model provider has an API key. Set OPENAI_API_KEY or ANTHROPIC_API_KEY."
        ));
    }
    let selector = Arc::new(ModelSelector::new(
        Arc::new(build_catalog(cfg)),
        backends.providers(),
    ));

    let mut registry = AgentRegistry::new();
    for descriptor in &cfg.agents {
        let agent = SpecialistAgent::new(descriptor.clone(), selector.clone(), backends.clone());
        registry
            .register(Arc::new(agent))
            .with_context(|| format!("Invalid agent '{}' in config", descriptor.id))?;
    }
    if let Some(fallback) = &cfg.fallback_agent {
        registry
            .set_fallback(fallback)
            .context("Invalid fallback_agent in config")?;
    }

    let search: Option<Arc<dyn SearchBackend>> =
        match cfg.providers.serpapi.as_ref().and_then(|s| s.key()) {
            Some(key) => Some(Arc::new(SerpApiSearch::new(key)?)),
            None => None,
        };

    Ok(Orchestrator::new(
        Arc::new(registry),
        selector,
        backends,
        search,
        cfg.orchestrator_config(),
    ))
}

async fn cmd_ask(config_path: &Option<PathBuf>, query: RoutingQuery, json: bool) -> Result<()> {
    let cfg = ForgeConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&cfg)?;
    info!("Asking: {}", query.text);

    let mut stream = orchestrator.route_and_process(query)?;
    let reason = render_stream(&mut stream, json).await?;
    ask_outcome(reason)
}

fn ask_outcome(reason: Option<DoneReason>) -> Result<()> {
    match reason {
        Some(DoneReason::Completed) => Ok(()),
        Some(DoneReason::Cancelled) => Err(ForgeError::Cancelled.into()),
        Some(DoneReason::Failed) => Err(anyhow!("Request failed")),
        None => Err(anyhow!("Stream ended without completing")),
    }
}

/// Print events until `done`. Ctrl-C cancels the request; the stream still
/// finishes with its own `done` event.
async fn render_stream(stream: &mut EventStream, json: bool) -> Result<Option<DoneReason>> {
    let mut stdout = std::io::stdout();
    let mut interrupted = false;
    let mut in_content = false;

    loop {
        let event = tokio::select! {
            event = stream.recv() => event,
            _ = signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!("\nCancelling...");
                stream.cancel();
                continue;
            }
        };
        let Some(event) = event else {
            return Ok(None);
        };

        if json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        } else {
            in_content = render_human(&event, in_content)?;
        }
        stdout.flush()?;

        if event.kind == EventKind::Done {
            return Ok(event.done_reason());
        }
    }
}

/// Content goes to stdout; progress goes to stderr
fn render_human(event: &StreamEvent, in_content: bool) -> Result<bool> {
    let agent = event.agent.as_deref().unwrap_or("forge");
    match event.kind {
        EventKind::Content => {
            print!("{}", event.content_text().unwrap_or_default());
            return Ok(true);
        }
        EventKind::Done => {
            if in_content {
                println!();
            }
        }
        EventKind::Error => eprintln!("! [{}] {}", agent, describe(event)),
        EventKind::Workflow => {}
        _ => eprintln!("· [{}] {}", agent, describe(event)),
    }
    Ok(in_content)
}

fn describe(event: &StreamEvent) -> String {
    match (&event.content_text(), &event.content) {
        (Some(text), _) => text.to_string(),
        (None, Some(content)) => serde_json::to_string(content).unwrap_or_default(),
        (None, None) => event.kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::models::Provider;

    #[test]
    fn test_ask_outcome() {
        assert!(ask_outcome(Some(DoneReason::Completed)).is_ok());
        let cancelled = ask_outcome(Some(DoneReason::Cancelled)).unwrap_err();
        assert!(matches!(
            cancelled.downcast_ref::<ForgeError>(),
            Some(ForgeError::Cancelled)
        ));
        assert!(ask_outcome(Some(DoneReason::Failed)).is_err());
        assert!(ask_outcome(None).is_err());
    }

    fn config(extra: &str) -> ForgeConfig {
        ForgeConfig::parse(&format!("{}\n{}", extra, config::DEFAULT_CONFIG)).unwrap()
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from([
            "forge", "ask", "is a harness needed?", "--agent", "safety_auditor", "--model", "o3",
            "-t", "0.2", "--category", "cost-optimized", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                query,
                agent,
                model,
                temperature,
                category,
                json,
            } => {
                assert_eq!(query, "is a harness needed?");
                assert_eq!(agent.as_deref(), Some("safety_auditor"));
                assert_eq!(model.as_deref(), Some("o3"));
                assert_eq!(temperature, Some(0.2));
                assert_eq!(category, Some(ModelCategory::CostOptimized));
                assert!(json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_category_rejects_unknown() {
        assert!(parse_category("flagship").is_ok());
        assert!(parse_category("cheap").is_err());
    }

    #[test]
    fn test_backends_only_for_usable_keys() {
        let mut cfg = config("");
        cfg.providers.openai.as_mut().unwrap().api_key = "sk-test".to_string();
        cfg.providers.anthropic.as_mut().unwrap().api_key = String::new();
        let pool = build_backends(&cfg).unwrap();
        assert_eq!(pool.providers(), vec![Provider::OpenAi]);
    }

    #[test]
    fn test_orchestrator_requires_a_provider() {
        let mut cfg = config("");
        cfg.providers.openai = None;
        cfg.providers.anthropic = None;
        assert!(build_orchestrator(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_from_default_config() {
        let mut cfg = config("");
        cfg.providers.openai.as_mut().unwrap().api_key = "sk-test".to_string();
        let orch = build_orchestrator(&cfg).unwrap();
        assert_eq!(orch.list_agents().len(), cfg.agents.len());
        assert_eq!(orch.registry().fallback_id(), Some("general_assistant"));
        assert_eq!(
            orch.selector().catalog().resolve("fast").map(|m| m.name.as_str()),
            Some("gpt-4o-mini")
        );
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut cfg = config("");
        cfg.providers.openai.as_mut().unwrap().api_key = "sk-test".to_string();
        let dup = cfg.agents[0].clone();
        cfg.agents.push(dup);
        let err = build_orchestrator(&cfg).err().unwrap();
        assert!(format!("{:#}", err).contains("Invalid agent"));
    }
}
