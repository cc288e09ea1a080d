//! pocketbot - Entry Point
//!
//! Commands:
//! - gateway: run channels, agent loop, cron and heartbeat until Ctrl-C
//! - agent: one message through the agent, reply on stdout
//! - cron: manage scheduled jobs
//! - heartbeat: trigger one heartbeat now
//! - status: configuration and service summary

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pocketbot::bus::{MessageBus, OutboundMessage};
use pocketbot::channels::{AllowList, ChannelManager, CliChannel};
use pocketbot::cron::{parse_at_time, AddJob, CronJob, CronSchedule, CronService};
use pocketbot::heartbeat::HeartbeatService;
use pocketbot::utils::parse_session_key;
use pocketbot::{providers, AgentLoop, Config, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Grace period for running subagents at shutdown
const SUBAGENT_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "pocketbot", version, about = "Personal AI assistant")]
struct Cli {
    /// Config file (default: ~/.pocketbot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (channels, agent, cron, heartbeat)
    Gateway,
    /// Send one message to the agent
    Agent {
        #[arg(short, long)]
        message: String,
        /// Session key (channel:chat_id)
        #[arg(short, long, default_value = "cli:default")]
        session: String,
    },
    /// Manage scheduled jobs
    Cron {
        #[command(subcommand)]
        action: CronCommand,
    },
    /// Trigger a heartbeat now
    Heartbeat,
    /// Show configuration and service status
    Status,
}

#[derive(Subcommand)]
enum CronCommand {
    /// List jobs
    List {
        /// Include disabled jobs
        #[arg(long)]
        all: bool,
    },
    /// Add a job
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        message: String,
        /// Run every N seconds
        #[arg(long, conflicts_with_all = ["cron", "at"])]
        every: Option<i64>,
        /// Cron expression, e.g. '0 9 * * *'
        #[arg(long, conflicts_with = "at")]
        cron: Option<String>,
        /// IANA timezone for --cron
        #[arg(long, requires = "cron")]
        tz: Option<String>,
        /// Run once at an ISO time
        #[arg(long)]
        at: Option<String>,
        /// Deliver the response to a channel
        #[arg(long)]
        deliver: bool,
        /// Recipient chat id
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Remove a job
    Remove { id: String },
    /// Enable or disable a job
    Enable {
        id: String,
        #[arg(long)]
        disable: bool,
    },
    /// Run a job now
    Run {
        id: String,
        /// Run even if disabled
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        std::env::var("RUST_LOG")
            .map(|s| match s.to_lowercase().as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => Level::INFO,
            })
            .unwrap_or(Level::INFO)
    };
    let interactive = matches!(cli.command, Command::Gateway);
    init_logging(log_level, interactive, cli.json_logs)?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Gateway => run_gateway(config).await,
        Command::Agent { message, session } => run_agent(config, &message, &session).await,
        Command::Cron { action } => run_cron_command(config, action).await,
        Command::Heartbeat => run_heartbeat(config).await,
        Command::Status => show_status(&config, cli.config.as_deref()).await,
    }
}

fn init_logging(level: Level, interactive: bool, json: bool) -> Result<()> {
    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else if interactive {
        // Gateway - log to stdout with colors
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // One-shot commands - keep stdout for output
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Agent wired to the bus, session store and cron tool
fn build_agent(config: &Config, bus: Arc<MessageBus>, cron: Arc<CronService>) -> Result<Arc<AgentLoop>> {
    std::fs::create_dir_all(config.workspace_path())?;
    let provider = providers::from_config(config)?;
    let sessions = SessionStore::open(&config.sessions_db_path())?;
    Ok(Arc::new(AgentLoop::new(config, bus, provider, sessions, Some(cron))))
}

/// Run each fired job as an agent turn; deliver the reply when asked
fn wire_cron(cron: &CronService, agent: Arc<AgentLoop>, bus: Arc<MessageBus>) {
    cron.set_on_job(move |job: CronJob| {
        let agent = agent.clone();
        let bus = bus.clone();
        async move {
            let channel = job.payload.channel.clone().unwrap_or_else(|| "cli".to_string());
            let to = job.payload.to.clone();
            let response = agent
                .process_direct(
                    &job.payload.message,
                    &format!("cron:{}", job.id),
                    &channel,
                    to.as_deref().unwrap_or("direct"),
                )
                .await?;

            if job.payload.deliver {
                if let Some(to) = &to {
                    bus.publish_outbound(OutboundMessage::new(&channel, to, response.clone()));
                }
            }
            Ok(Some(response))
        }
    });
}

fn wire_heartbeat(heartbeat: &HeartbeatService, agent: Arc<AgentLoop>) {
    heartbeat.set_on_heartbeat(move |prompt: String| {
        let agent = agent.clone();
        async move { agent.process_direct(&prompt, "heartbeat", "cli", "direct").await }
    });
}

async fn run_gateway(config: Config) -> Result<()> {
    info!("pocketbot gateway v{}", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(MessageBus::new());
    let cron = Arc::new(CronService::new(config.cron_store_path()));
    let agent = build_agent(&config, bus.clone(), cron.clone())?;
    wire_cron(&cron, agent.clone(), bus.clone());

    let heartbeat = Arc::new(HeartbeatService::new(
        config.workspace_path(),
        config.heartbeat_interval(),
        config.heartbeat.enabled,
    ));
    wire_heartbeat(&heartbeat, agent.clone());

    let mut channels = ChannelManager::new(bus.clone());
    if config.channels.cli.enabled {
        let allow = AllowList::new(config.channels.cli.allow_from.clone());
        channels.register(Arc::new(CliChannel::new(bus.clone(), allow)));
    }

    cron.start().await?;
    heartbeat.start();
    let agent_task = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };
    channels.start_all();

    info!("Channels enabled: {}", channels.enabled_channels().join(", "));
    info!("Cron: {} scheduled jobs", cron.status().await.jobs);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    heartbeat.stop().await;
    cron.stop().await;
    agent.stop();
    if let Err(e) = agent_task.await {
        warn!("Agent loop ended abnormally: {}", e);
    }
    let aborted = agent.subagents().shutdown(SUBAGENT_GRACE).await;
    if aborted > 0 {
        warn!("Aborted {} running subagents", aborted);
    }
    channels.stop_all().await;

    info!("Goodbye");
    Ok(())
}

async fn run_agent(config: Config, message: &str, session: &str) -> Result<()> {
    let bus = Arc::new(MessageBus::new());
    let cron = Arc::new(CronService::new(config.cron_store_path()));
    let agent = build_agent(&config, bus, cron)?;

    let (channel, chat_id) = parse_session_key(session).unwrap_or(("cli", session));
    let reply = agent.process_direct(message, session, channel, chat_id).await?;
    println!("{}", reply);

    let running = agent.subagents().get_running_count();
    if running > 0 {
        eprintln!("Waiting for {} background task(s)...", running);
        agent.subagents().shutdown(SUBAGENT_GRACE).await;
    }
    Ok(())
}

async fn run_cron_command(config: Config, action: CronCommand) -> Result<()> {
    let cron = Arc::new(CronService::new(config.cron_store_path()));

    match action {
        CronCommand::List { all } => {
            let jobs = cron.list_jobs(all).await;
            if jobs.is_empty() {
                println!("No scheduled jobs.");
                return Ok(());
            }
            println!("{:<10} {:<24} {:<28} {:<8} {}", "ID", "NAME", "SCHEDULE", "STATUS", "NEXT RUN");
            for job in jobs {
                let status = if job.enabled { "enabled" } else { "disabled" };
                println!(
                    "{:<10} {:<24} {:<28} {:<8} {}",
                    job.id,
                    job.name,
                    job.schedule.describe(),
                    status,
                    format_time(job.state.next_run_at_ms)
                );
            }
        }
        CronCommand::Add {
            name,
            message,
            every,
            cron: expr,
            tz,
            at,
            deliver,
            to,
            channel,
        } => {
            let schedule = match (every, expr, at) {
                (Some(secs), _, _) => CronSchedule::every_secs(secs),
                (_, Some(expr), _) => CronSchedule::cron(&expr, tz.as_deref()),
                (_, _, Some(at)) => match parse_at_time(&at) {
                    Some(at_ms) => CronSchedule::At { at_ms },
                    None => bail!("Invalid --at time: {}", at),
                },
                _ => bail!("Must specify --every, --cron, or --at"),
            };
            let mut request = AddJob::new(name, schedule, message);
            request.deliver = deliver;
            request.to = to;
            request.channel = channel;

            let job = cron.add_job(request).await?;
            println!("Added job '{}' ({})", job.name, job.id);
        }
        CronCommand::Remove { id } => {
            if cron.remove_job(&id).await? {
                println!("Removed job {}", id);
            } else {
                bail!("Job {} not found", id);
            }
        }
        CronCommand::Enable { id, disable } => match cron.enable_job(&id, !disable).await? {
            Some(job) => {
                let state = if disable { "disabled" } else { "enabled" };
                println!("Job '{}' {}", job.name, state);
            }
            None => bail!("Job {} not found", id),
        },
        CronCommand::Run { id, force } => {
            let bus = Arc::new(MessageBus::new());
            let agent = build_agent(&config, bus.clone(), cron.clone())?;
            wire_cron(&cron, agent, bus);

            if !cron.run_job(&id, force).await? {
                bail!("Failed to run job {} (unknown, or disabled without --force)", id);
            }
            if let Some(job) = cron.get_job(&id).await {
                let status = job.state.last_status.map(|s| s.as_str()).unwrap_or("unknown");
                println!("Job executed: {}", status);
                if let Some(error) = job.state.last_error {
                    println!("Error: {}", error);
                }
            } else {
                println!("Job executed");
            }
        }
    }
    Ok(())
}

async fn run_heartbeat(config: Config) -> Result<()> {
    let bus = Arc::new(MessageBus::new());
    let cron = Arc::new(CronService::new(config.cron_store_path()));
    let agent = build_agent(&config, bus, cron)?;

    let heartbeat = HeartbeatService::new(config.workspace_path(), config.heartbeat_interval(), true);
    wire_heartbeat(&heartbeat, agent);

    match heartbeat.trigger_now().await? {
        Some(response) => println!("{}", response),
        None => println!("No heartbeat handler"),
    }
    Ok(())
}

async fn show_status(config: &Config, config_path: Option<&std::path::Path>) -> Result<()> {
    let config_path = config_path.map(PathBuf::from).unwrap_or_else(Config::default_path);
    let workspace = config.workspace_path();
    let mark = |ok: bool| if ok { "ok" } else { "missing" };
    let set = |v: &Option<String>| if v.is_some() { "set" } else { "not set" };

    println!("pocketbot v{}\n", env!("CARGO_PKG_VERSION"));
    println!("Config:    {} ({})", config_path.display(), mark(config_path.exists()));
    println!("Workspace: {} ({})", workspace.display(), mark(workspace.exists()));
    println!("Model:     {}", config.agent.model);
    println!("Anthropic API: {}", set(&config.providers.anthropic_api_key));
    println!("OpenAI API:    {}", set(&config.providers.openai_api_key));
    if let Some(base) = &config.providers.api_base {
        println!("API base:      {}", base);
    }
    println!("Brave Search:  {}", set(&config.tools.brave_api_key));

    let cron = CronService::new(config.cron_store_path());
    let status = cron.status().await;
    println!("\nCron jobs: {} (next: {})", status.jobs, format_time(status.next_wake_at_ms));
    println!(
        "Heartbeat: {} (every {}s)",
        if config.heartbeat.enabled { "enabled" } else { "disabled" },
        config.heartbeat.interval_secs
    );

    let db_path = config.sessions_db_path();
    if db_path.exists() {
        let stats = SessionStore::open(&db_path)?.stats()?;
        println!("Sessions:  {} ({} messages)", stats.total_sessions, stats.total_messages);
    }
    Ok(())
}

fn format_time(ms: Option<i64>) -> String {
    ms.and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
