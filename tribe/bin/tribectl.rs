//! Command-line utility for managing a running Tribe daemon
//!
//! - Queue metrics and dead-letter inspection
//! - Retrying or purging dead-lettered jobs
//! - Submitting a one-off email
//! - Circuit breaker state and manual reset

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tribe_control::{
    CircuitCommand, ControlClient, DEFAULT_CONTROL_SOCKET, EmailRequest, QueueCommand,
    RequestCommand, Response, ResponseData, ResponsePayload, SystemCommand,
};

#[derive(Parser, Debug)]
#[command(name = "tribectl")]
#[command(about = "Manage the Tribe mail daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the control socket
    #[arg(short = 'c', long, default_value = DEFAULT_CONTROL_SOCKET)]
    control_socket: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    System {
        #[command(subcommand)]
        action: SystemAction,
    },
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    Circuit {
        #[command(subcommand)]
        action: CircuitAction,
    },
}

#[derive(Subcommand, Debug)]
enum SystemAction {
    /// Check the daemon is responding
    Ping,
    /// Version, uptime and dispatch mode
    Status,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Show job counts and circuit state
    Metrics {
        /// Keep refreshing
        #[arg(long)]
        watch: bool,

        /// Refresh interval in seconds (with --watch)
        #[arg(long, default_value = "2")]
        interval: u64,
    },
    /// List dead-lettered jobs
    DeadLetters,
    /// Re-enqueue a dead-lettered job
    Retry { job_id: String },
    /// Delete a dead-lettered job
    Purge {
        job_id: String,

        /// Required; purging cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Submit an email
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        html: String,
        #[arg(long, default_value = "")]
        text: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        reply_to: Option<String>,
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Idempotency key
        #[arg(long)]
        job_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CircuitAction {
    State,
    /// Force the breaker closed
    Reset,
}

fn data(response: Response) -> anyhow::Result<ResponseData> {
    match response.payload {
        ResponsePayload::Data(data) => Ok(*data),
        ResponsePayload::Ok => anyhow::bail!("Daemon returned no data"),
        ResponsePayload::Error(e) => anyhow::bail!("Daemon error: {e}"),
    }
}

fn print(data: &ResponseData) {
    match data {
        ResponseData::SystemStatus(status) => println!("{status}"),
        ResponseData::QueueMetrics(summary) => println!("{summary}"),
        ResponseData::DeadLetters(entries) if entries.is_empty() => {
            println!("No dead-lettered jobs");
        }
        ResponseData::DeadLetters(entries) => {
            for entry in entries {
                println!("{entry}\n");
            }
            println!("{} dead-lettered job(s)", entries.len());
        }
        ResponseData::Enqueued(job) => println!("Queued {job}"),
        ResponseData::Retried(Some(job)) => println!("Re-enqueued as {job}"),
        ResponseData::Retried(None) => println!("No dead-lettered job with that id"),
        ResponseData::Purged(true) => println!("Purged"),
        ResponseData::Purged(false) => println!("No dead-lettered job with that id"),
        ResponseData::Circuit(summary) => println!("{summary}"),
        ResponseData::Message(message) => println!("{message}"),
    }
}

async fn request(client: &ControlClient, command: RequestCommand) -> anyhow::Result<()> {
    let response = client.send(command).await?;
    print(&data(response)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tribe_common::logging::init();

    let cli = Cli::parse();
    let client =
        ControlClient::new(&cli.control_socket).with_timeout(Duration::from_secs(cli.timeout));
    client
        .check_socket_exists()
        .context("Is the tribe daemon running?")?;

    match cli.command {
        Commands::System { action } => match action {
            SystemAction::Ping => {
                client.send(RequestCommand::System(SystemCommand::Ping)).await?;
                println!("pong");
            }
            SystemAction::Status => {
                request(&client, RequestCommand::System(SystemCommand::Status)).await?;
            }
        },
        Commands::Queue { action } => match action {
            QueueAction::Metrics { watch: false, .. } => {
                request(&client, RequestCommand::Queue(QueueCommand::Metrics)).await?;
            }
            QueueAction::Metrics { watch: true, interval } => {
                let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            // Clear screen and home the cursor
                            print!("\x1B[2J\x1B[H");
                            request(&client, RequestCommand::Queue(QueueCommand::Metrics)).await?;
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
            QueueAction::DeadLetters => {
                request(&client, RequestCommand::Queue(QueueCommand::DeadLetters)).await?;
            }
            QueueAction::Retry { job_id } => {
                request(&client, RequestCommand::Queue(QueueCommand::Retry { job_id })).await?;
            }
            QueueAction::Purge { job_id, yes } => {
                if !yes {
                    anyhow::bail!("Refusing to purge {job_id} without --yes");
                }
                request(&client, RequestCommand::Queue(QueueCommand::Purge { job_id })).await?;
            }
            QueueAction::Send {
                to,
                subject,
                html,
                text,
                from,
                reply_to,
                categories,
                job_id,
            } => {
                let email = EmailRequest {
                    to,
                    subject,
                    html,
                    text,
                    from,
                    reply_to,
                    categories,
                    job_id,
                };
                request(&client, RequestCommand::Queue(QueueCommand::Enqueue(email))).await?;
            }
        },
        Commands::Circuit { action } => {
            let command = match action {
                CircuitAction::State => CircuitCommand::State,
                CircuitAction::Reset => CircuitCommand::Reset,
            };
            request(&client, RequestCommand::Circuit(command)).await?;
        }
    }

    Ok(())
}
