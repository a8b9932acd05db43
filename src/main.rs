mod handlers;

use clap::{Parser, Subcommand};
use courier_core::{config, traits::Transport};
use courier_telegram::{Bot, HttpTransport, PollerOptions, Updater, Webhook};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "Courier — Telegram Bot API update acquisition"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire updates by polling, or by webhook when `[webhook] enabled = true`.
    Start {
        /// Skip updates that were pending at startup.
        #[arg(long)]
        clean: bool,
    },
    /// Show the bot identity and webhook registration.
    Status,
    /// Manage the webhook registration.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Register the configured webhook URL.
    Set,
    /// Remove any registered webhook.
    Remove,
    /// Print the current registration.
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.courier.log_level)),
        )
        .init();

    match cli.command {
        Commands::Start { clean } => {
            let transport = build_transport(&cfg)?;

            // Always clears any webhook, whichever mode follows.
            let mut updater = Updater::new(transport).await?;
            updater.add_handler(Arc::new(handlers::LogHandler))?;

            if cfg.webhook.enabled {
                let webhook = Webhook::from(&cfg.webhook);
                let addr = updater.start_webhook(&webhook).await?;
                println!("Courier — webhook mode, listening on {addr}");
            } else {
                let mut options = PollerOptions::from(&cfg.polling);
                options.clean |= clean;
                updater.start_polling(options)?;
                println!("Courier — polling mode");
            }

            let token = updater.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, shutting down");
                    token.cancel();
                }
            });

            updater.idle().await;
            updater.shutdown().await;
        }
        Commands::Status => {
            println!("Courier — Status Check\n");
            println!("Config: {}", cli.config);

            let bot = Bot::connect(build_transport(&cfg)?).await?;
            let me = bot.me();
            println!("Bot: {} (id {})", me.display_name(), me.id);

            let info = bot.get_webhook_info().await?;
            if info.is_active() {
                println!("  mode: webhook ({})", info.url);
                println!("  pending updates: {}", info.pending_update_count);
                if let (Some(at), Some(msg)) = (info.last_error_at(), &info.last_error_message) {
                    println!("  last error: {msg} at {at}");
                }
            } else {
                println!("  mode: polling (no webhook registered)");
                println!("  pending updates: {}", info.pending_update_count);
            }
        }
        Commands::Webhook { action } => {
            let bot = Bot::connect(build_transport(&cfg)?).await?;
            match action {
                WebhookAction::Set => {
                    let webhook = Webhook::from(&cfg.webhook);
                    if webhook.url.is_empty() {
                        anyhow::bail!("webhook url is empty. Set [webhook] url in config.toml.");
                    }
                    let ok = bot.set_webhook(&webhook).await?;
                    println!("setWebhook {}: {ok}", webhook.public_url());
                }
                WebhookAction::Remove => {
                    let ok = bot.delete_webhook().await?;
                    println!("deleteWebhook: {ok}");
                }
                WebhookAction::Info => {
                    let info = bot.get_webhook_info().await?;
                    println!("{}", serde_json::to_string_pretty(&info)?);
                }
            }
        }
    }

    Ok(())
}

/// Build the HTTP transport, sized for the configured long-poll timeout.
fn build_transport(cfg: &config::Config) -> anyhow::Result<Arc<dyn Transport>> {
    if cfg.bot.token.is_empty() {
        anyhow::bail!(
            "bot token is empty. Set it in config.toml or {} env var.",
            config::TOKEN_ENV
        );
    }
    let transport = HttpTransport::new(&cfg.bot).for_long_poll(cfg.polling.timeout_secs);
    Ok(Arc::new(transport))
}
