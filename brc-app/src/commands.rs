//! Subcommand implementations. Results go to stdout; diagnostics go through
//! `tracing` to stderr.

use crate::config::BrClientConfig;
use anyhow::Context;
use brc_llm::{
    Backend, ChatMessage, ChatOptions, ClientContext, LlmApi, LlmError, ModelConfig, Provider,
    ServiceProvider, ToolDefinition, ToolSet, Usage, select_backend,
};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Per-invocation overrides from the `chat` subcommand.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub system: Option<String>,
    pub no_stream: bool,
    pub tools: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub usage: Option<Usage>,
}

struct App {
    cfg: BrClientConfig,
    ctx: Arc<ClientContext>,
}

impl App {
    async fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg = BrClientConfig::load(config_path).await?;
        let ctx = ClientContext::new(
            cfg.access.clone(),
            cfg.endpoints.clone(),
            cfg.session_id(),
        )
        .packaged_app(cfg.general.is_app);
        Ok(Self {
            cfg,
            ctx: Arc::new(ctx),
        })
    }

    fn backend(&self, provider: Provider) -> anyhow::Result<Backend> {
        select_backend(provider, self.ctx.clone())
            .with_context(|| format!("select backend for provider {provider}"))
    }
}

pub async fn chat(config_path: Option<PathBuf>, request: ChatRequest) -> anyhow::Result<()> {
    let app = App::load(config_path).await?;

    let provider = match request.provider.as_deref() {
        Some(p) => p
            .parse::<Provider>()
            .with_context(|| format!("--provider {p:?}"))?,
        None => app.cfg.provider()?,
    };
    let mut config = app.cfg.model_config();
    if let Some(model) = request.model.clone() {
        config.model = model;
    }
    if request.no_stream {
        config.stream = false;
    }
    let tools = match request.tools.as_deref() {
        Some(path) => Some(load_tools(path).await?),
        None => None,
    };

    let mut messages = Vec::new();
    if let Some(system) = request
        .system
        .clone()
        .or_else(|| app.cfg.general.system_prompt.clone())
    {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(request.prompt.clone()));

    let backend = app.backend(provider)?;
    tracing::info!(
        %provider,
        backend = ?backend.kind(),
        model = %config.model,
        stream = config.stream,
        "sending prompt"
    );

    let streaming = config.stream;
    let reply = run_prompt(
        &backend,
        messages,
        config,
        tools,
        app.cfg.request_timeout(),
        |delta| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(delta.as_bytes());
            let _ = stdout.flush();
        },
    )
    .await?;

    if streaming {
        println!();
    } else {
        println!("{}", reply.text);
    }
    if let Some(usage) = reply.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total(),
            "usage"
        );
    }
    Ok(())
}

/// Run one chat through the callback API and wait for its terminal callback.
/// The request is aborted after `timeout` or on Ctrl-C.
pub async fn run_prompt<A>(
    api: &A,
    messages: Vec<ChatMessage>,
    config: ModelConfig,
    tools: Option<ToolSet>,
    timeout: Duration,
    mut on_delta: impl FnMut(&str) + Send + 'static,
) -> anyhow::Result<Reply>
where
    A: LlmApi + ?Sized,
{
    let (tx, rx) = oneshot::channel::<Result<Reply, LlmError>>();
    let error_slot = Arc::new(Mutex::new(Some(tx)));
    let finish_slot = error_slot.clone();
    let guards: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();
    let guard_slot = guards.clone();

    let mut options = ChatOptions::new(messages, config, move |text, usage| {
        settle(&finish_slot, Ok(Reply { text, usage }));
    })
    .on_update(move |_, delta| on_delta(delta))
    .on_error(move |e| settle(&error_slot, Err(e)))
    .on_controller(move |handle| {
        let deadline = handle.abort_after(timeout);
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; aborting request");
                handle.abort();
            }
        });
        if let Ok(mut g) = guard_slot.lock() {
            g.push(deadline);
            g.push(interrupt);
        }
    });
    if let Some(tools) = tools {
        options = options.with_tools(tools);
    }

    let result = api.chat(options).await;
    if let Ok(mut g) = guards.lock() {
        for task in g.drain(..) {
            task.abort();
        }
    }
    result.context("chat request rejected")?;

    match rx.await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(LlmError::Aborted)) => Err(anyhow::anyhow!(
            "request aborted (timeout {}s or interrupt)",
            timeout.as_secs()
        )),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("chat failed")),
        Err(_) => Err(anyhow::anyhow!("chat ended without a result")),
    }
}

fn settle(
    slot: &Mutex<Option<oneshot::Sender<Result<Reply, LlmError>>>>,
    value: Result<Reply, LlmError>,
) {
    let sender = slot.lock().ok().and_then(|mut s| s.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(value);
        }
        None => tracing::warn!("chat reported more than one terminal result"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolsFile {
    List(Vec<ToolDefinition>),
    Set(ToolSet),
}

async fn load_tools(path: &Path) -> anyhow::Result<ToolSet> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read tools file {}", path.display()))?;
    parse_tools(&raw).with_context(|| format!("parse tools file {}", path.display()))
}

fn parse_tools(raw: &str) -> anyhow::Result<ToolSet> {
    let tools = match serde_json::from_str::<ToolsFile>(raw)? {
        ToolsFile::List(definitions) => ToolSet {
            definitions,
            ..ToolSet::default()
        },
        ToolsFile::Set(set) => set,
    };
    if tools.definitions.is_empty() {
        return Err(anyhow::anyhow!("tools file defines no tools"));
    }
    Ok(tools)
}

pub async fn models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::load(config_path).await?;
    let backend = app.backend(app.cfg.provider()?)?;
    let models = backend.models().await.context("list models")?;
    if models.is_empty() {
        println!("no models reported by {:?} backend", backend.kind());
        return Ok(());
    }
    for m in models {
        println!(
            "{:<24} {:<24} {}",
            m.name,
            m.display_name,
            m.model_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn usage(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::load(config_path).await?;
    let backend = app.backend(app.cfg.provider()?)?;
    let usage = backend.usage().await.context("fetch usage")?;
    println!("used {} of {}", usage.used, usage.total);
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Transcript {
    Messages(Vec<ChatMessage>),
    Session { messages: Vec<ChatMessage> },
}

fn parse_transcript(raw: &str) -> anyhow::Result<Vec<ChatMessage>> {
    Ok(match serde_json::from_str::<Transcript>(raw)? {
        Transcript::Messages(m) | Transcript::Session { messages: m } => m,
    })
}

pub async fn share(
    config_path: Option<PathBuf>,
    transcript: &Path,
    avatar_url: Option<&str>,
) -> anyhow::Result<()> {
    let app = App::load(config_path).await?;
    let raw = tokio::fs::read_to_string(transcript)
        .await
        .with_context(|| format!("read transcript {}", transcript.display()))?;
    let messages = parse_transcript(&raw)
        .with_context(|| format!("parse transcript {}", transcript.display()))?;

    match brc_llm::share(&app.ctx.http, &app.cfg.share, &messages, avatar_url).await {
        Some(link) => {
            println!("{link}");
            Ok(())
        }
        None => Err(anyhow::anyhow!("share failed; see log for details")),
    }
}

pub async fn doctor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = App::load(config_path).await?;
    let provider = app.cfg.provider()?;
    let backend = app.backend(provider)?;
    let access = &app.cfg.access;
    let has = |p: ServiceProvider| access.api_key(p).is_some();
    tracing::info!(
        %provider,
        backend = ?backend.kind(),
        model = %app.cfg.general.model,
        use_proxy = access.use_proxy,
        service_provider = ?access.service_provider,
        anthropic_key = has(ServiceProvider::Anthropic),
        openai_key = has(ServiceProvider::OpenAi),
        azure_key = has(ServiceProvider::Azure),
        proxy_key = has(ServiceProvider::Proxy),
        access_control = access.access_control_enabled,
        "config ok"
    );
    println!(
        "ok: provider={provider} backend={:?} model={}",
        backend.kind(),
        app.cfg.general.model
    );
    Ok(())
}
