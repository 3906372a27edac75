use anyhow::{Context, Result};
use chatpipe::{
    Augmenter, ChatClient, ChatRequest, ChatService, ContinueRequest, GenerationParams, Message,
    PipelineConfig, ReplyStream, SettingsStore, DEFAULT_MODEL, DEFAULT_SYSTEM_TEXT,
    MISSING_CREDENTIALS,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "chatpipe")]
#[command(about = "Chat with context pulled from videos, papers, webpages and web search", long_about = None)]
struct Cli {
    /// Settings file holding the API key and base URL.
    #[arg(long, global = true, env = "CHATPIPE_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the augmentation pipeline over one message and print the result (no model call).
    Augment(AugmentArgs),
    /// Send one message (augmented when it starts with `@s`) and stream the reply.
    Chat(ChatArgs),
    /// Continue the last assistant turn of a saved conversation.
    Continue(ContinueArgs),
    /// List model ids offered by the configured endpoint.
    Models(OutputArgs),
    /// Show or change the stored API key and base URL.
    Settings {
        #[command(subcommand)]
        action: SettingsCmd,
    },
    /// Generate a short title for a message/response pair.
    Title(TitleArgs),
    /// Print version information.
    Version(OutputArgs),
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
    /// Print the stored settings with the API key masked.
    Show(OutputArgs),
    /// Store new values; flags left out keep their current value.
    Set(SettingsSetArgs),
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct AugmentArgs {
    /// Raw chat message, e.g. `@s https://arxiv.org/abs/1706.03762 key ideas?`
    message: String,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct GenerationArgs {
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// System text; pass an empty string to send no system message.
    #[arg(long = "system", default_value = DEFAULT_SYSTEM_TEXT)]
    system_text: String,
    /// JSON file with earlier turns: `[{"role":"user","content":"..."}, ...]`
    #[arg(long)]
    history: Option<PathBuf>,
    /// Generation parameter `key=value` (repeatable). Numeric strings are sent as numbers.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ChatArgs {
    message: String,
    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(clap::Args, Debug)]
struct ContinueArgs {
    #[command(flatten)]
    generation: GenerationArgs,
}

#[derive(clap::Args, Debug)]
struct SettingsSetArgs {
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(clap::Args, Debug)]
struct TitleArgs {
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    /// The user's message.
    #[arg(long)]
    message: String,
    /// The assistant's response.
    #[arg(long)]
    response: String,
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatpipe")
        .join("settings.json")
}

/// Opt-in `KEY=VALUE` file named by `CHATPIPE_ENV_FILE`. Never overrides the process env.
fn load_env_file() {
    let Ok(p) = std::env::var("CHATPIPE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_params(raw: &[String]) -> Result<GenerationParams> {
    let mut map = serde_json::Map::new();
    for kv in raw {
        let (k, v) = kv
            .split_once('=')
            .with_context(|| format!("--param expects KEY=VALUE, got `{kv}`"))?;
        let v = v.trim();
        let value = serde_json::from_str::<serde_json::Value>(v)
            .unwrap_or_else(|_| serde_json::Value::String(v.to_string()));
        map.insert(k.trim().to_string(), value);
    }
    Ok(GenerationParams::normalized(map))
}

fn load_history(path: Option<&Path>) -> Result<Vec<Message>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse history {}", path.display()))
}

fn print_json(v: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

async fn print_stream(mut reply: ReplyStream) -> Result<()> {
    let mut out = std::io::stdout().lock();
    while let Some(delta) = reply.next().await {
        out.write_all(delta.as_bytes())?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

fn chat_service(store: &SettingsStore) -> Result<ChatService> {
    let augmenter = Augmenter::local(PipelineConfig::from_env())?;
    Ok(ChatService::from_settings(augmenter, store.settings()))
}

fn chat_client(store: &SettingsStore) -> Result<ChatClient> {
    ChatClient::from_settings(store.settings()).map_err(|_| anyhow::anyhow!(MISSING_CREDENTIALS))
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    tracing::debug!(settings = %settings_path.display(), "settings path");

    match cli.command {
        Commands::Augment(args) => {
            let augmenter = Augmenter::local(PipelineConfig::from_env())?;
            let aug = augmenter.augment(&args.message).await;
            if args.output.trim().eq_ignore_ascii_case("text") {
                match &aug.user_visible_error {
                    Some(err) => println!("{err}"),
                    None => println!("{}", aug.augmented_text()),
                }
            } else {
                print_json(&aug)?;
            }
        }
        Commands::Chat(args) => {
            let store = SettingsStore::load(&settings_path);
            let svc = chat_service(&store)?;
            let req = ChatRequest {
                message: args.message.into(),
                conversation: load_history(args.generation.history.as_deref())?,
                model: args.generation.model,
                system_text: args.generation.system_text,
                parameters: parse_params(&args.generation.params)?,
            };
            print_stream(svc.chat(req).await).await?;
        }
        Commands::Continue(args) => {
            let store = SettingsStore::load(&settings_path);
            let svc = chat_service(&store)?;
            let req = ContinueRequest {
                conversation: load_history(args.generation.history.as_deref())?,
                model: args.generation.model,
                system_text: args.generation.system_text,
                parameters: parse_params(&args.generation.params)?,
            };
            print_stream(svc.continue_generation(req).await).await?;
        }
        Commands::Models(args) => {
            let store = SettingsStore::load(&settings_path);
            let models = chat_client(&store)?.list_models().await;
            if args.output.trim().eq_ignore_ascii_case("text") {
                for m in &models {
                    println!("{m}");
                }
            } else {
                print_json(&serde_json::json!({
                    "schema_version": 1,
                    "kind": "models",
                    "ok": true,
                    "models": models,
                }))?;
            }
        }
        Commands::Settings { action } => {
            let mut store = SettingsStore::load(&settings_path);
            match action {
                SettingsCmd::Show(args) => {
                    let shown = store.settings().redacted();
                    if args.output.trim().eq_ignore_ascii_case("text") {
                        println!("path: {}", store.path().display());
                        println!("api_key: {}", shown.api_key.as_deref().unwrap_or("(unset)"));
                        println!("base_url: {}", shown.base_url.as_deref().unwrap_or("(unset)"));
                        println!("configured: {}", store.settings().is_configured());
                    } else {
                        print_json(&serde_json::json!({
                            "schema_version": 1,
                            "kind": "settings",
                            "ok": true,
                            "path": store.path().display().to_string(),
                            "configured": store.settings().is_configured(),
                            "settings": shown,
                        }))?;
                    }
                }
                SettingsCmd::Set(args) => {
                    let current = store.settings().clone();
                    store.replace(
                        args.api_key.or(current.api_key),
                        args.base_url.or(current.base_url),
                    )?;
                    println!("saved {}", store.path().display());
                }
            }
        }
        Commands::Title(args) => {
            let store = SettingsStore::load(&settings_path);
            let title = chat_client(&store)?
                .generate_title(&args.model, &args.message, &args.response)
                .await
                .context("title generation failed")?;
            println!("{title}");
        }
        Commands::Version(args) => {
            if args.output.trim().eq_ignore_ascii_case("text") {
                println!("chatpipe {}", env!("CARGO_PKG_VERSION"));
            } else {
                print_json(&serde_json::json!({
                    "schema_version": 1,
                    "kind": "version",
                    "ok": true,
                    "name": "chatpipe",
                    "version": env!("CARGO_PKG_VERSION"),
                }))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_json_values_and_fall_back_to_strings() {
        let p = parse_params(&[
            "temperature=0.2".to_string(),
            "stop=[\"\\n\"]".to_string(),
            "user=alice".to_string(),
        ])
        .unwrap();
        assert_eq!(p.get("temperature"), Some(&serde_json::json!(0.2)));
        assert_eq!(p.get("stop"), Some(&serde_json::json!(["\n"])));
        assert_eq!(p.get("user"), Some(&serde_json::json!("alice")));
        assert!(parse_params(&["no-equals".to_string()]).is_err());
    }

    #[test]
    fn history_file_is_optional() {
        assert!(load_history(None).unwrap().is_empty());
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("h.json");
        std::fs::write(&p, r#"[{"role":"user","content":"hi"},{"role":"assistant","content":"yo"}]"#)
            .unwrap();
        let h = load_history(Some(&p)).unwrap();
        assert_eq!(h, vec![Message::user("hi"), Message::assistant("yo")]);
    }

    #[test]
    fn cli_parses_nested_settings_command() {
        let cli = Cli::try_parse_from([
            "chatpipe",
            "--settings",
            "/tmp/s.json",
            "settings",
            "set",
            "--api-key",
            "k",
        ])
        .unwrap();
        assert_eq!(cli.settings.as_deref(), Some(Path::new("/tmp/s.json")));
        assert!(matches!(
            cli.command,
            Commands::Settings {
                action: SettingsCmd::Set(SettingsSetArgs { api_key: Some(_), base_url: None })
            }
        ));
    }
}
