use clap::{Parser, Subcommand};
use gapbot::api::{
    AlpacaQuoteClient, BrokerGateway, NasdaqHaltFeed, PaperBroker, PolygonClient, QuoteProvider,
    QuoteSource, WebullClient, WebullConfig,
};
use gapbot::config::Settings;
use gapbot::execution::{
    force_close_all, place_entries, EntryParams, LiveLoop, LiveLoopConfig,
};
use gapbot::journal::TradeJournal;
use gapbot::models::Candidate;
use gapbot::screening::{screen, ScreeningThresholds};
use gapbot::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "gapbot", about = "Premarket gap trading bot", version)]
struct Cli {
    /// Settings file (defaults to config/gapbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor open positions: entry cutoff, halts, breakeven slide, partial exits
    Live {
        #[arg(long, value_enum)]
        provider: Option<QuoteProvider>,
        /// Take-profit fraction (0.07 = +7%)
        #[arg(long)]
        tp: Option<f64>,
        /// Poll interval in seconds (overrides session.poll_interval_secs)
        #[arg(long = "loop", value_name = "SECS")]
        poll_secs: Option<u64>,
        /// Simulate every order write
        #[arg(long)]
        paper: bool,
    },
    /// Filter premarket candidates
    Screen {
        #[arg(long)]
        input: PathBuf,
        /// Defaults to screened_YYYYMMDD.json
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        gap: Option<f64>,
        #[arg(long)]
        vol: Option<u64>,
        #[arg(long)]
        rot: Option<f64>,
        #[arg(long)]
        sent: Option<f64>,
    },
    /// Place bracketed limit entries for screened tickers
    Entry {
        #[arg(long)]
        screened: PathBuf,
        /// Account equity in USD
        #[arg(long)]
        equity: f64,
        #[arg(long)]
        kelly: Option<f64>,
        #[arg(long)]
        max_loss_pct: Option<f64>,
        #[arg(long)]
        tp: Option<f64>,
        #[arg(long)]
        sl: Option<f64>,
        #[arg(long, value_enum)]
        provider: Option<QuoteProvider>,
        #[arg(long)]
        paper: bool,
    },
    /// Market-close every position and cancel resting orders
    Close {
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Live {
            provider,
            tp,
            poll_secs,
            paper,
        } => run_live(settings, provider, tp, poll_secs, paper).await,
        Command::Screen {
            input,
            output,
            gap,
            vol,
            rot,
            sent,
        } => {
            let defaults = settings.screening.clone();
            let thresholds = ScreeningThresholds {
                gap_pct: gap.unwrap_or(defaults.gap_pct),
                min_volume: vol.unwrap_or(defaults.min_volume),
                min_rotation_pct: rot.unwrap_or(defaults.min_rotation_pct),
                min_sentiment: sent.unwrap_or(defaults.min_sentiment),
            };
            run_screen(&settings, &input, output, &thresholds)
        }
        Command::Entry {
            screened,
            equity,
            kelly,
            max_loss_pct,
            tp,
            sl,
            provider,
            paper,
        } => {
            let mut params = EntryParams::from_settings(
                equity,
                tp.unwrap_or(settings.exits.take_profit_pct),
                &settings.entry,
            );
            params.kelly = kelly.unwrap_or(params.kelly);
            params.max_loss_pct = max_loss_pct.unwrap_or(params.max_loss_pct);
            params.stop_loss_pct = sl.unwrap_or(params.stop_loss_pct);
            run_entry(&settings, &screened, &params, provider, paper).await
        }
        Command::Close { dry_run } => run_close(&settings, dry_run).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gapbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_webull_client(settings: &Settings) -> anyhow::Result<Arc<WebullClient>> {
    let mut config = WebullConfig::from_env(&settings.broker.base_url, settings.http_timeout())?;
    config.orders_per_second = settings.broker.orders_per_second;
    Ok(Arc::new(WebullClient::new(config)?))
}

fn create_broker(webull: Arc<WebullClient>, paper: bool) -> Arc<dyn BrokerGateway> {
    if paper {
        tracing::info!("📝 Paper mode: order writes are simulated");
        Arc::new(PaperBroker::new(webull))
    } else {
        webull
    }
}

fn create_quote_source(
    provider: QuoteProvider,
    settings: &Settings,
    webull: &Arc<WebullClient>,
) -> anyhow::Result<Arc<dyn QuoteSource>> {
    let timeout = settings.http_timeout();
    let source: Arc<dyn QuoteSource> = match provider {
        QuoteProvider::Webull => webull.clone(),
        QuoteProvider::Alpaca => Arc::new(AlpacaQuoteClient::from_env(&settings.quotes.alpaca_url, timeout)?),
        QuoteProvider::Polygon => Arc::new(PolygonClient::from_env(&settings.quotes.polygon_url, timeout)?),
    };
    tracing::info!("Quotes from {}", source.name());
    Ok(source)
}

async fn run_live(
    settings: Settings,
    provider: Option<QuoteProvider>,
    tp: Option<f64>,
    poll_secs: Option<u64>,
    paper: bool,
) -> Result<()> {
    let mut settings = settings;
    if let Some(tp) = tp {
        settings.exits.take_profit_pct = tp;
    }
    if let Some(secs) = poll_secs {
        settings.session.poll_interval_secs = secs;
    }
    settings.validate()?;

    let webull = create_webull_client(&settings)?;
    let quotes = create_quote_source(
        provider.unwrap_or(settings.quotes.provider),
        &settings,
        &webull,
    )?;
    let broker = create_broker(webull, paper);
    let halt_feed = Arc::new(NasdaqHaltFeed::new(&settings.halts.feed_url, settings.http_timeout())?);
    let calendar = settings.calendar()?;

    let mut live = LiveLoop::new(
        broker,
        quotes,
        halt_feed,
        gapbot::notify::from_env(),
        TradeJournal::new(&settings.journal.dir),
        calendar,
        LiveLoopConfig::from_settings(&settings)?,
    );

    live.run().await
}

fn run_screen(
    settings: &Settings,
    input: &Path,
    output: Option<PathBuf>,
    thresholds: &ScreeningThresholds,
) -> Result<()> {
    let raw = std::fs::read_to_string(input)?;
    let candidates: Vec<Candidate> = serde_json::from_str(&raw)?;

    let screened = screen(&candidates, thresholds);
    let output = output.unwrap_or_else(|| {
        let date = settings
            .calendar()
            .map(|c| c.current_session_date())
            .unwrap_or_else(|_| chrono::Utc::now().date_naive());
        PathBuf::from(format!("screened_{}.json", date.format("%Y%m%d")))
    });
    std::fs::write(&output, serde_json::to_string_pretty(&screened)?)?;

    tracing::info!(
        "Screened {} of {} candidates -> {}",
        screened.len(),
        candidates.len(),
        output.display()
    );
    Ok(())
}

async fn run_entry(
    settings: &Settings,
    screened: &Path,
    params: &EntryParams,
    provider: Option<QuoteProvider>,
    paper: bool,
) -> Result<()> {
    let candidates: Vec<Candidate> = serde_json::from_str(&std::fs::read_to_string(screened)?)?;

    let webull = create_webull_client(settings)?;
    let quotes = create_quote_source(provider.unwrap_or(settings.quotes.provider), settings, &webull)?;
    let broker = create_broker(webull, paper);
    let calendar = settings.calendar()?;
    let now = calendar.now();

    let report = place_entries(
        broker.as_ref(),
        quotes.as_ref(),
        &TradeJournal::new(&settings.journal.dir),
        &candidates,
        params,
        now,
        calendar.session_date(now),
    )
    .await;

    tracing::info!(
        "✅ Entry batch done: {} placed, {} skipped",
        report.placed.len(),
        report.skipped.len()
    );
    Ok(())
}

async fn run_close(settings: &Settings, dry_run: bool) -> Result<()> {
    let webull = create_webull_client(settings)?;
    let broker = create_broker(webull, false);
    let calendar = settings.calendar()?;
    let notifier = gapbot::notify::from_env();

    force_close_all(
        broker.as_ref(),
        notifier.as_ref(),
        &TradeJournal::new(&settings.journal.dir),
        &calendar,
        calendar.now(),
        dry_run,
    )
    .await?;
    Ok(())
}
