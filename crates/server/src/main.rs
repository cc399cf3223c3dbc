//! perf-monitor: performance tracking and adaptive parameter tuning
//!
//! Usage:
//!   perf-monitor serve --port 3002   # Accept trade events over HTTP
//!   perf-monitor replay --events trades.jsonl   # Replay a recorded event stream
//!   perf-monitor history --limit 20   # Show stored parameter changes

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Args, Parser, Subcommand};
use engine::{
    JsonFileSink, LedgerError, MetricsExportRecord, MonitorConfig, OptimizationRecord,
    ParameterSet, PerformanceMonitor, SqliteSnapshotSink, TradeEntry, TradeEvent, TradeExit,
    TradeRecord,
};
use persistence::repository::SnapshotRepository;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "perf-monitor")]
#[command(about = "Trade performance monitor with adaptive parameter tuning", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor as an HTTP service fed by the broker bridge
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Replay a newline-delimited JSON event file through the monitor
    Replay {
        /// Event file, one {"type": "entry"|"exit", ...} object per line
        #[arg(long)]
        events: PathBuf,
        /// Optimize after every N closed trades (0 disables)
        #[arg(long, default_value_t = 1)]
        optimize_every: usize,
        /// Optional JSON export path for the final snapshot
        #[arg(long)]
        export: Option<PathBuf>,
        #[command(flatten)]
        monitor: MonitorArgs,
    },
    /// Print the most recent stored parameter changes
    History {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

/// Overrides applied on top of the PERF_MONITOR_* environment
#[derive(Args, Clone)]
struct MonitorArgs {
    /// Starting capital
    #[arg(long)]
    initial_capital: Option<Decimal>,
    /// Closed trades in the evaluation window
    #[arg(long)]
    window: Option<usize>,
    /// Initial confidence threshold
    #[arg(long)]
    confidence_threshold: Option<f64>,
    /// Drawdown ceiling (fraction, e.g. 0.02)
    #[arg(long)]
    max_drawdown: Option<f64>,
    /// Target win rate (fraction)
    #[arg(long)]
    target_win_rate: Option<f64>,
}

impl MonitorArgs {
    fn into_config(self) -> anyhow::Result<MonitorConfig> {
        let mut config = MonitorConfig::from_env()?;
        if let Some(v) = self.initial_capital {
            config.initial_capital = v;
        }
        if let Some(v) = self.window {
            config.evaluation_window = v;
        }
        if let Some(v) = self.confidence_threshold {
            config.confidence_threshold = v;
        }
        if let Some(v) = self.max_drawdown {
            config.max_drawdown_threshold = v;
        }
        if let Some(v) = self.target_win_rate {
            config.target_win_rate = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone)]
struct AppState {
    monitor: Arc<PerformanceMonitor>,
    sink: SqliteSnapshotSink,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,perf_monitor=debug,tower_http=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,perf_monitor=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("PERF_MONITOR_DB_PATH").unwrap_or_else(|_| "data/monitor.db".to_string())
}

async fn open_database(path: &str) -> anyhow::Result<persistence::Database> {
    persistence::Database::new(path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            monitor,
        } => {
            cmd_serve(&host, port, monitor.into_config()?).await?;
        }
        Commands::Replay {
            events,
            optimize_every,
            export,
            monitor,
        } => {
            cmd_replay(events, optimize_every, export, monitor.into_config()?).await?;
        }
        Commands::History { limit } => {
            cmd_history(limit).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command: Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16, config: MonitorConfig) -> anyhow::Result<()> {
    info!("perf-monitor v{} starting...", APP_VERSION);

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    info!("Database initialized: {}", db_path);

    let state = AppState {
        monitor: Arc::new(PerformanceMonitor::new(config)?),
        sink: SqliteSnapshotSink::new(db.pool_clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/trades/entry", post(api_trade_entry))
        .route("/trades/exit", post(api_trade_exit))
        .route("/trades/active", get(api_active_trades))
        .route("/metrics", get(api_metrics))
        .route("/params", get(api_params))
        .route("/params/history", get(api_param_history))
        .route("/optimize", post(api_optimize))
        .route("/export", post(api_export))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== perf-monitor v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  POST /api/trades/entry        - Record an entry fill");
    println!("  POST /api/trades/exit         - Record an exit fill");
    println!("  GET  /api/trades/active       - Open trades");
    println!("  GET  /api/metrics             - Current metrics snapshot");
    println!("  GET  /api/params              - Current parameters");
    println!("  GET  /api/params/history      - In-memory optimization history");
    println!("  POST /api/optimize            - Run an optimization cycle");
    println!("  POST /api/export              - Store snapshot + history in the database");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl+C received, shutting down");
        })
        .await?;

    Ok(())
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl ToString) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

async fn api_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": APP_VERSION }))
}

async fn api_trade_entry(
    State(state): State<AppState>,
    Json(entry): Json<TradeEntry>,
) -> Result<Json<TradeRecord>, ApiError> {
    state
        .monitor
        .record_entry(entry)
        .map(Json)
        .map_err(|e| {
            let status = match e {
                LedgerError::DuplicateTrade { .. } => StatusCode::CONFLICT,
                LedgerError::InvalidEntry { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            };
            api_error(status, e)
        })
}

async fn api_trade_exit(
    State(state): State<AppState>,
    Json(exit): Json<TradeExit>,
) -> Json<serde_json::Value> {
    match state.monitor.record_exit(exit) {
        Some(trade) => Json(json!({ "closed": true, "trade": trade })),
        None => Json(json!({ "closed": false })),
    }
}

async fn api_active_trades(State(state): State<AppState>) -> Json<Vec<TradeRecord>> {
    Json(state.monitor.active_trades())
}

async fn api_metrics(State(state): State<AppState>) -> Json<MetricsExportRecord> {
    Json(state.monitor.export_record())
}

async fn api_params(State(state): State<AppState>) -> Json<ParameterSet> {
    Json(state.monitor.params())
}

async fn api_param_history(State(state): State<AppState>) -> Json<Vec<OptimizationRecord>> {
    Json(state.monitor.history())
}

#[derive(Deserialize)]
struct OptimizeQuery {
    window: Option<usize>,
}

async fn api_optimize(
    State(state): State<AppState>,
    Query(query): Query<OptimizeQuery>,
) -> Json<ParameterSet> {
    let window = query
        .window
        .unwrap_or(state.monitor.config().evaluation_window);
    Json(state.monitor.optimize(window))
}

async fn api_export(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .monitor
        .export(&state.sink)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    let history = state
        .monitor
        .export_history(&state.sink)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok(Json(json!({ "snapshot": record, "history_exported": history })))
}

// ============================================================================
// Replay command: CLI mode (no web server)
// ============================================================================

async fn cmd_replay(
    events: PathBuf,
    optimize_every: usize,
    export: Option<PathBuf>,
    config: MonitorConfig,
) -> anyhow::Result<()> {
    println!("\n=== perf-monitor v{} ===", APP_VERSION);

    let raw = tokio::fs::read_to_string(&events)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", events.display(), e))?;

    println!("Events: {}", events.display());
    println!(
        "Capital: {} | Window: {} | Drawdown ceiling: {} | Target win rate: {}",
        config.initial_capital,
        config.evaluation_window,
        config.max_drawdown_threshold,
        config.target_win_rate
    );
    println!();

    let monitor = PerformanceMonitor::new(config)?;

    let mut closed = 0usize;
    let mut skipped = 0usize;
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: TradeEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed event");
                skipped += 1;
                continue;
            }
        };

        match event {
            TradeEvent::Entry(entry) => {
                if let Err(e) = monitor.record_entry(entry) {
                    warn!(line = line_no + 1, error = %e, "Skipping entry");
                    skipped += 1;
                }
            }
            TradeEvent::Exit(exit) => {
                if monitor.record_exit(exit).is_some() {
                    closed += 1;
                    if optimize_every > 0 && closed % optimize_every == 0 {
                        monitor.optimize_default();
                    }
                } else {
                    skipped += 1;
                }
            }
        }
    }

    let record = monitor.export_record();
    print_summary(&record, closed, skipped);

    if let Some(path) = export {
        let sink = JsonFileSink::new(&path);
        match monitor.export(&sink).await {
            Ok(_) => println!("Exported metrics to {}", path.display()),
            Err(e) => error!("JSON export failed: {}", e),
        }
    }

    let db_path = db_path();
    let db = open_database(&db_path).await?;
    let sink = SqliteSnapshotSink::new(db.pool_clone());
    monitor.export(&sink).await?;
    let history = monitor.export_history(&sink).await?;
    println!(
        "Stored snapshot and {} parameter change(s) in {}",
        history, db_path
    );

    Ok(())
}

fn print_summary(record: &MetricsExportRecord, closed: usize, skipped: usize) {
    println!("{}", "=".repeat(60));
    println!("  Closed trades:     {}", closed);
    println!("  Skipped events:    {}", skipped);
    println!("  Open trades:       {}", record.active_trades);
    println!(
        "  Capital:           {} -> {} ({:.2}%)",
        record.initial_capital,
        record.current_capital,
        record.total_return_pct
    );
    println!("  Win rate:          {:.2}%", record.win_rate * 100.0);
    println!("  Profit factor:     {:.2}", record.profit_factor);
    println!("  Sharpe ratio:      {:.2}", record.sharpe_ratio);
    println!("  Max drawdown:      {:.2}%", record.max_drawdown * 100.0);
    println!("{}", "-".repeat(60));
    println!(
        "  Confidence:        {:.2}",
        record.optimal_params.confidence_threshold()
    );
    println!(
        "  Size factor:       {:.2}",
        record.optimal_params.position_size_factor()
    );
    println!(
        "  Cooldown:          {:.0}s",
        record.optimal_params.signal_cooldown_seconds()
    );
    println!("{}", "=".repeat(60));
}

// ============================================================================
// History command
// ============================================================================

async fn cmd_history(limit: i64) -> anyhow::Result<()> {
    let db_path = db_path();
    let db = open_database(&db_path).await?;
    let repo = SnapshotRepository::new(db.pool());

    let snapshots = repo.count_snapshots().await?;
    let history = repo.parameter_history(limit).await?;

    println!("Database: {} ({} snapshots stored)", db_path, snapshots);
    if history.is_empty() {
        println!("No parameter changes recorded yet");
        return Ok(());
    }

    println!(
        "\n{:<27} {:>10} {:>8} {:>9} {:>9} {:>8} {:>8}",
        "Optimized at", "Threshold", "Size", "Cooldown", "Win rate", "PF", "MaxDD"
    );
    println!("{}", "-".repeat(85));
    for change in &history {
        println!(
            "{:<27} {:>10} {:>8} {:>9} {:>9} {:>8} {:>8}",
            change.optimized_at,
            change.confidence_threshold,
            change.position_size_factor,
            change.signal_cooldown,
            change.win_rate,
            change.profit_factor,
            change.max_drawdown
        );
    }

    Ok(())
}
