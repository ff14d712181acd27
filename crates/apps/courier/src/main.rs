//! Courier - thread, watch and send mail from the command line
//!
//! Results are written to stdout as JSON; logs go to stderr.

mod context;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use mail::{
    CancelFlag, DeliveryResult, EmailAddress, JsonLinesSink, MailboxClient, MailboxWatcher, MessageId,
    OutgoingMessage, ThreadReport, build_threads,
};

use context::Context;

#[derive(Parser)]
#[command(name = "courier", version, about = "Threading, push-watch and delivery for mail accounts")]
struct Cli {
    /// Configuration file (defaults to ~/.config/courier/courier.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a folder once and print its conversation threads
    Threads {
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value = "INBOX")]
        folder: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Watch a folder and print one JSON line per event
    Watch {
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        /// Stop after this many new-mail events (0 = unlimited)
        #[arg(long)]
        max_events: Option<u64>,
    },
    /// Send a message
    Send {
        #[arg(long)]
        account: Option<String>,
        /// Recipient, may be repeated
        #[arg(long, required = true)]
        to: Vec<String>,
        #[arg(long)]
        cc: Vec<String>,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        /// Message-ID of the message being answered
        #[arg(long)]
        in_reply_to: Option<String>,
        #[arg(long, value_enum, default_value_t = SendMode::Outbox)]
        mode: SendMode,
        /// Transport id for direct mode
        #[arg(long)]
        transport: Option<String>,
    },
    /// Retry staged messages that have not been delivered
    Retry {
        /// Only this account (default: all accounts)
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SendMode {
    /// Stage, then send with fallback
    Outbox,
    /// Send with fallback, no staging
    Fallback,
    /// Send through one named transport
    Direct,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = Context::load(cli.config.as_deref())?;

    match cli.command {
        Command::Threads {
            account,
            folder,
            limit,
        } => blocking(ctx, move |ctx| threads(ctx, account.as_deref(), &folder, limit)).await,
        Command::Watch {
            account,
            folder,
            max_events,
        } => watch(ctx, account, folder, max_events).await,
        Command::Send {
            account,
            to,
            cc,
            subject,
            body,
            in_reply_to,
            mode,
            transport,
        } => {
            let mut message = OutgoingMessage::new(parse_addresses(&to), subject, body)
                .with_cc(parse_addresses(&cc));
            if let Some(parent) = in_reply_to {
                message = message.replying_to(&MessageId::new(parent), &[]);
            }
            blocking(ctx, move |ctx| {
                send(ctx, account.as_deref(), message, mode, transport.as_deref())
            })
            .await
        }
        Command::Retry { account } => blocking(ctx, move |ctx| retry(ctx, account.as_deref())).await,
    }
}

/// Run a synchronous command off the async runtime
async fn blocking<F>(mut ctx: Context, command: F) -> Result<ExitCode>
where
    F: FnOnce(&mut Context) -> Result<ExitCode> + Send + 'static,
{
    tokio::task::spawn_blocking(move || command(&mut ctx))
        .await
        .context("Command task panicked")?
}

fn parse_addresses(values: &[String]) -> Vec<EmailAddress> {
    values
        .iter()
        .flat_map(|v| EmailAddress::parse_list(v))
        .collect()
}

fn print_result(result: &DeliveryResult) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, result)?;
    writeln!(stdout)?;
    Ok(())
}

fn threads(ctx: &mut Context, account: Option<&str>, folder: &str, limit: usize) -> Result<ExitCode> {
    let account = ctx.account(account)?;
    let mut mailbox = ctx.mailbox(&account)?;

    mailbox.connect()?;
    let fetched = mailbox.fetch_all(folder, limit);
    if let Err(e) = mailbox.disconnect() {
        log::debug!("Disconnect failed: {}", e);
    }
    let messages = fetched?;

    let threads = build_threads(&messages);
    info!(
        "Built {} threads from {} messages in {}",
        threads.len(),
        messages.len(),
        folder
    );
    println!("{}", ThreadReport::from_threads(messages.len(), &threads).to_json()?);
    Ok(ExitCode::SUCCESS)
}

async fn watch(
    mut ctx: Context,
    account: Option<String>,
    folder: Option<String>,
    max_events: Option<u64>,
) -> Result<ExitCode> {
    let account = ctx.account(account.as_deref())?;
    let mailbox = ctx.mailbox(&account)?;

    let mut watch_config = ctx.config.watch.clone();
    if let Some(folder) = folder {
        watch_config.folder = folder;
    }
    if let Some(max) = max_events {
        watch_config.max_events = max;
    }

    let cancel = CancelFlag::new();
    let mut watcher =
        MailboxWatcher::new(mailbox, account.id.clone(), watch_config).with_cancel_flag(cancel.clone());

    let worker = tokio::task::spawn_blocking(move || {
        let mut sink = JsonLinesSink::new(std::io::stdout().lock());
        watcher.run(&mut sink)
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping watcher");
            cancel.cancel();
        }
    });

    let summary = worker.await.context("Watcher task panicked")?;
    info!(
        "Watcher stopped: {} events, {} reconnects, {} restarts, {} errors",
        summary.events, summary.reconnects, summary.restarts, summary.errors
    );
    Ok(ExitCode::SUCCESS)
}

fn send(
    ctx: &mut Context,
    account: Option<&str>,
    message: OutgoingMessage,
    mode: SendMode,
    transport: Option<&str>,
) -> Result<ExitCode> {
    let coordinator = ctx.coordinator()?;

    let result = match mode {
        SendMode::Direct => {
            let Some(transport_id) = transport else {
                bail!("--transport is required in direct mode");
            };
            let transport = coordinator
                .accounts()
                .transport(transport_id)
                .with_context(|| format!("Unknown transport {}", transport_id))?;
            let sender = account
                .map(|id| ctx.account(Some(id)))
                .transpose()?
                .and_then(|a| a.sender());
            let message = match sender {
                Some(sender) => message.with_from(sender),
                None => message,
            };
            coordinator.send_direct(message, transport.as_ref())
        }
        SendMode::Outbox | SendMode::Fallback => {
            let account = ctx.account(account)?;
            if matches!(mode, SendMode::Outbox) {
                coordinator.send_via_outbox(message, &account.id)
            } else {
                coordinator.send_with_fallback(message, &account.id)
            }
        }
    };

    print_result(&result)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn retry(ctx: &mut Context, account: Option<&str>) -> Result<ExitCode> {
    let coordinator = ctx.coordinator()?;
    let account_ids: Vec<String> = match account {
        Some(id) => vec![ctx.account(Some(id))?.id],
        None => ctx.config.accounts.iter().map(|a| a.id.clone()).collect(),
    };

    let mut all_delivered = true;
    for id in account_ids {
        for result in coordinator.retry_staged(&id) {
            all_delivered &= result.success;
            print_result(&result)?;
        }
    }

    Ok(if all_delivered {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
