use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use orchestra_core::{CompletionRequest, OrchestraConfig};
use orchestra_engine::{init_tracing, Orchestra};
use std::path::PathBuf;
use std::time::Duration;

fn cli() -> Command {
    Command::new("orchestra")
        .version(orchestra_engine::VERSION)
        .about("Local model lifecycle and multi-provider completion orchestration")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("model-dir")
                .long("model-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Override the model directory"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("models")
                .about("Scan the model directory and list registered models")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("complete")
                .about("Run one prompt through the orchestrator")
                .arg(Arg::new("prompt").required(true).help("Prompt text"))
                .arg(Arg::new("model").long("model").help("Model name or id"))
                .arg(
                    Arg::new("provider")
                        .long("provider")
                        .help("Use only this provider"),
                )
                .arg(
                    Arg::new("max-tokens")
                        .long("max-tokens")
                        .default_value("256")
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("temperature")
                        .long("temperature")
                        .default_value("0.7")
                        .value_parser(value_parser!(f32)),
                )
                .arg(
                    Arg::new("deadline-ms")
                        .long("deadline-ms")
                        .value_parser(value_parser!(u64))
                        .help("Overall time budget across all providers"),
                ),
        )
        .subcommand(
            Command::new("maintain")
                .about("Run one maintenance pass and print a memory report"),
        )
        .subcommand(Command::new("config").about("Print the effective configuration as TOML"))
}

fn load_config(matches: &ArgMatches) -> Result<OrchestraConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => OrchestraConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => OrchestraConfig::default(),
    }
    .apply_env_overrides();
    if let Some(dir) = matches.get_one::<PathBuf>("model-dir") {
        config = config.with_model_dir(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
        }
        Some(("models", args)) => {
            let orchestra = Orchestra::build(config)?;
            let models = orchestra.registry().list_available();
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else if models.is_empty() {
                println!(
                    "No models in {}",
                    orchestra.config().registry.model_dir.display()
                );
            } else {
                println!("{:<24} {:<10} {:>14}  CAPABILITIES", "ID", "STATUS", "SIZE");
                for m in &models {
                    let caps: Vec<String> = m.capabilities.iter().map(ToString::to_string).collect();
                    println!(
                        "{:<24} {:<10} {:>14}  {}",
                        m.id.as_str(),
                        m.status.to_string(),
                        m.size_bytes,
                        caps.join(",")
                    );
                }
            }
        }
        Some(("complete", args)) => {
            let orchestra = Orchestra::build(config)?;
            let prompt = args
                .get_one::<String>("prompt")
                .context("prompt is required")?;
            let mut request = CompletionRequest::new(prompt.as_str())
                .with_max_tokens(*args.get_one::<u32>("max-tokens").unwrap_or(&256))
                .with_temperature(*args.get_one::<f32>("temperature").unwrap_or(&0.7));
            if let Some(model) = args.get_one::<String>("model") {
                request = request.with_model(model.as_str());
            }

            let orchestrator = orchestra.orchestrator();
            let outcome = match (
                args.get_one::<String>("provider"),
                args.get_one::<u64>("deadline-ms"),
            ) {
                (Some(provider), _) => orchestrator.execute_with_provider(&request, provider).await,
                (None, Some(ms)) => {
                    orchestrator
                        .execute_with_deadline(&request, Duration::from_millis(*ms))
                        .await
                }
                (None, None) => orchestrator.execute_chat_completion(&request).await,
            };
            let response = outcome?;

            println!("{}", response.text);
            eprintln!(
                "[{} / {}] {} tokens, {} ms, ${:.6}{}",
                response.provider,
                response.model,
                response.tokens_used,
                response.latency_ms,
                response.cost_estimate,
                if response.cached { ", cached" } else { "" }
            );
            orchestra.shutdown().await;
        }
        Some(("maintain", _)) => {
            let orchestra = Orchestra::build(config)?;
            let report = orchestra.maintain().await;
            println!("Cache entries purged: {}", report.purged);
            println!("Models evicted:       {}", report.evicted);
            println!(
                "Memory:               {} / {} bytes ({:.1}%), {} loaded",
                report.memory.used_bytes,
                report.memory.max_bytes,
                report.memory.usage_percent(),
                report.memory.loaded_count
            );
        }
        _ => {
            cli().print_help()?;
        }
    }

    Ok(())
}
