//! Navigator - 学生画像驱动的多阶段推荐流水线
//!
//! 入口：初始化日志、加载配置，按子命令运行流水线、问答或管理凭据与模型。

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use navigator::admin::ModelSettings;
use navigator::config::{load_config_or_default, AppConfig};
use navigator::core::{
    spawn_pipeline, Collaborators, Command, PipelineHandle, PipelinePhase, PipelineSnapshot,
    Session,
};
use navigator::credentials::{CredentialStore, Credentials, FileCredentialStore};
use navigator::llm::LlmAgentBackend;
use navigator::observability;
use navigator::pipeline::RerunTarget;
use navigator::profile::{extract_info_from_text, missing_fields, NormalizedProfile};

#[derive(Parser, Debug)]
#[command(
    name = "navigator",
    about = "Student profile → university matches, rankings, scholarships and reviews",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, value_name = "FILE", help = "Extra config file (overrides config/default.toml)")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the five-stage pipeline on a free-text profile
    Run(RunArgs),
    /// Run the pipeline, then answer one question about the results
    Ask {
        #[command(flatten)]
        run: RunArgs,
        #[arg(value_name = "QUESTION")]
        question: String,
    },
    /// Manage the saved API keys
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Read or override the generation model name
    #[command(subcommand)]
    Model(ModelCommand),
}

#[derive(Parser, Debug, Clone)]
struct RunArgs {
    #[arg(short = 't', long, value_name = "TEXT", help = "Profile text (read from stdin when omitted)")]
    text: Option<String>,

    #[arg(long, help = "Use the built-in mock model instead of the remote endpoint")]
    offline: bool,

    // 交互命令从 stdin 读取，画像必须经 --text 给出
    #[arg(
        short = 'i',
        long,
        requires = "text",
        help = "Stay in an interactive loop for retry / rerun / ask (needs --text)"
    )]
    interactive: bool,
}

#[derive(Subcommand, Debug)]
enum KeysCommand {
    Set {
        #[arg(long, value_name = "KEY")]
        generation: String,
        #[arg(long, value_name = "KEY")]
        search: String,
        #[arg(long, value_name = "KEY")]
        backup: Option<String>,
    },
    Reset,
    Show,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    Get,
    Set {
        #[arg(value_name = "MODEL")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let cli = Cli::parse();
    let cfg = load_config_or_default(cli.config.clone());

    match cli.command {
        Commands::Run(args) => run(&cfg, &args, None).await,
        Commands::Ask { run: args, question } => run(&cfg, &args, Some(question)).await,
        Commands::Keys(cmd) => keys(&cfg, cmd),
        Commands::Model(cmd) => model(&cfg, cmd),
    }
}

fn keys(cfg: &AppConfig, cmd: KeysCommand) -> anyhow::Result<()> {
    let store = FileCredentialStore::in_dir(&cfg.app.data_dir);
    match cmd {
        KeysCommand::Set {
            generation,
            search,
            backup,
        } => {
            let mut creds = Credentials::new(generation, search);
            if let Some(b) = backup {
                creds = creds.with_backup(b);
            }
            save_keys(&store, &creds)?;
            println!("Saved keys to {}", store.path().display());
        }
        KeysCommand::Reset => {
            store.clear().context("Failed to clear credentials")?;
            println!("Keys cleared");
        }
        KeysCommand::Show => match store.load().context("Failed to read credentials")? {
            Some(creds) => println!("{:?}", creds),
            None => println!("No keys saved"),
        },
    }
    Ok(())
}

/// 校验并持久化凭据；CLI 与交互循环共用
fn save_keys(store: &dyn CredentialStore, creds: &Credentials) -> anyhow::Result<()> {
    anyhow::ensure!(creds.is_ready(), "both keys must be non-empty");
    store.save(creds).context("Failed to save credentials")
}

fn model(cfg: &AppConfig, cmd: ModelCommand) -> anyhow::Result<()> {
    let settings = ModelSettings::in_dir(&cfg.app.data_dir);
    match cmd {
        ModelCommand::Get => println!("{}", settings.get()),
        ModelCommand::Set { name } => {
            settings.set(&name).context("Failed to save model name")?;
            println!("Model set to {}", name);
        }
    }
    Ok(())
}

async fn run(cfg: &AppConfig, args: &RunArgs, question: Option<String>) -> anyhow::Result<()> {
    let (credentials, backend) = if args.offline {
        (Credentials::new("offline", "offline"), LlmAgentBackend::offline())
    } else {
        let creds = FileCredentialStore::in_dir(&cfg.app.data_dir)
            .load()
            .context("Failed to read credentials")?
            .context("No API keys saved; run `navigator keys set --generation .. --search ..` first")?;
        (creds, LlmAgentBackend::from_config(cfg))
    };

    let text = match &args.text {
        Some(t) => t.clone(),
        None => read_stdin().await?,
    };
    print_hints(&text);

    let collaborators = Collaborators::from_backend(Arc::new(backend));
    let mut handle = spawn_pipeline(Session::new(credentials), collaborators, &cfg.pipeline);

    let snapshot = handle.execute(Command::Start(text)).await?;
    print_status(&snapshot);
    if snapshot.phase == PipelinePhase::Completed {
        print_report(&mut handle).await?;
    }

    if let Some(q) = question {
        println!("{}", ask(&mut handle, q).await?);
    }

    if args.interactive {
        interactive(cfg, &mut handle).await?;
    }

    handle.shutdown().await
}

/// 交互循环：retry / rerun <target> [feedback] / ask <question> / report / keys <gen> <search> / profile <text> / quit
async fn interactive(cfg: &AppConfig, handle: &mut PipelineHandle) -> anyhow::Result<()> {
    let store = FileCredentialStore::in_dir(&cfg.app.data_dir);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Commands: retry | rerun <programs|scholarships|reviews> [feedback] | ask <question> | report | profile <text> | keys <generation> <search> | quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let snapshot = match verb {
            "" => continue,
            "quit" | "exit" => break,
            "retry" => handle.execute(Command::Retry).await?,
            "rerun" => {
                let (target, feedback) = rest.split_once(' ').unwrap_or((rest, ""));
                let target: RerunTarget = match target.parse() {
                    Ok(t) => t,
                    Err(e) => {
                        println!("{}", e);
                        continue;
                    }
                };
                let feedback = Some(feedback.trim().to_string()).filter(|f| !f.is_empty());
                handle.execute(Command::Rerun { target, feedback }).await?
            }
            "ask" => {
                println!("{}", ask(handle, rest.to_string()).await?);
                continue;
            }
            "report" => {
                print_report(handle).await?;
                continue;
            }
            "profile" => {
                // 新画像：从头运行
                print_hints(rest);
                handle.execute(Command::Start(rest.to_string())).await?
            }
            "keys" => {
                let mut parts = rest.split_whitespace();
                let (Some(generation), Some(search)) = (parts.next(), parts.next()) else {
                    println!("usage: keys <generation> <search>");
                    continue;
                };
                let creds = Credentials::new(generation, search);
                if let Err(e) = save_keys(&store, &creds) {
                    println!("{:#}", e);
                    continue;
                }
                let snapshot = handle
                    .execute(Command::ResetCredentials(Some(creds)))
                    .await?;
                println!(
                    "Keys saved to {}; enter a new profile with `profile <text>`",
                    store.path().display()
                );
                snapshot
            }
            other => {
                println!("Unknown command: {}", other);
                continue;
            }
        };

        print_status(&snapshot);
        if snapshot.phase == PipelinePhase::Completed && snapshot.last_failure.is_none() {
            print_report(handle).await?;
        }
    }
    Ok(())
}

async fn ask(handle: &mut PipelineHandle, question: String) -> anyhow::Result<String> {
    Ok(handle
        .ask(question)
        .await?
        .unwrap_or_else(|e| format!("Question failed: {}", e)))
}

async fn print_report(handle: &mut PipelineHandle) -> anyhow::Result<()> {
    let report = handle.report().await?;
    println!("{}", report.render());
    Ok(())
}

fn print_status(snapshot: &PipelineSnapshot) {
    for (stage, status) in &snapshot.stages {
        println!("  {:<28} {:?}", stage.label(), status);
    }
    println!("Phase: {:?}", snapshot.phase);
    if let Some(notice) = &snapshot.notice {
        println!("! {}", notice);
    }
}

/// 启发式预检：提示用户画像里还缺哪些信息
fn print_hints(text: &str) {
    let Ok(profile) = NormalizedProfile::from_fields(&extract_info_from_text(text)) else {
        return;
    };
    let missing = missing_fields(&profile);
    if missing.is_empty() {
        return;
    }
    println!("Tip: adding these details may improve the results:");
    for m in missing {
        println!("  - {}", m.question);
    }
}

async fn read_stdin() -> anyhow::Result<String> {
    if std::io::stdin().is_terminal() {
        println!("Describe your profile, then press Ctrl-D:");
    }
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read profile from stdin")?;
    anyhow::ensure!(!text.trim().is_empty(), "profile text is empty");
    Ok(text)
}
