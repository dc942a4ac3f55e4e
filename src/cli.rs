//! CLI definition and dispatch.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::adapters::memory_index::InMemoryIndex;
use crate::adapters::memory_store::MemoryStore;
use crate::adapters::model_file_adapter::{load_artifact, save_artifact};
use crate::adapters::timeout_index::TimeoutIndex;
use crate::domain::backtest::{
    build_grid, BacktestHarness, BacktestPlan, BacktestReport, ContextProvider, LatestEventContext,
};
use crate::domain::calibration::ConfidenceCalibrator;
use crate::domain::config::EngineConfig;
use crate::domain::config_validation::validate_backtest_config;
use crate::domain::error::EventcastError;
use crate::domain::event::Event;
use crate::domain::features::{FeatureExtractor, FeatureSchema};
use crate::domain::forecast::{ForecastContext, Forecaster};
use crate::domain::forecaster::chain::FallbackChain;
use crate::domain::forecaster::classifier::{
    build_training_set, train_logistic, ClassifierModel, MlClassifier,
};
use crate::domain::forecaster::event_conditioned::EventConditioned;
use crate::domain::forecaster::naive::NaiveBaseline;
use crate::domain::outcome::{GameOutcomes, OutcomeAdapter, ReturnOutcomes};
use crate::domain::regime::TrendRegimeClassifier;
use crate::domain::snapshot::ForecastSnapshot;
use crate::domain::temporal;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::neighbor_port::NeighborIndex;
use crate::ports::report_port::ReportPort;
use crate::ports::store_port::{BacktestStore, SnapshotStore};

#[derive(Parser, Debug)]
#[command(name = "eventcast", about = "Event-conditioned forecasting and backtesting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Naive,
    Event,
    Ml,
    /// ML, then event-conditioned, then naive.
    Chain,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutcomeKind {
    /// Realized price returns from outcomes.csv
    #[default]
    Returns,
    /// Win/tie/loss results from games.csv
    Games,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a forecaster over the configured grid and score it
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long, value_enum, default_value_t = Method::Chain)]
        method: Method,
        #[arg(long, value_enum, default_value_t = OutcomeKind::Returns)]
        outcomes: OutcomeKind,
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Produce a single forecast and print it as JSON
    Forecast {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(long)]
        symbol: String,
        /// RFC 3339 reference time with explicit offset
        #[arg(long)]
        as_of: String,
        /// Horizon in minutes
        #[arg(long)]
        horizon: u32,
        /// Trigger event id; defaults to the latest qualifying event
        #[arg(long)]
        event: Option<String>,
        #[arg(long, value_enum, default_value_t = Method::Chain)]
        method: Method,
        #[arg(long, value_enum, default_value_t = OutcomeKind::Returns)]
        outcomes: OutcomeKind,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Train a classifier over the backtest window and write its artifact
    Train {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        horizon: u32,
        #[arg(long, default_value = "v1")]
        version: String,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Backtest {
            config,
            data,
            method,
            outcomes,
            model,
            output,
        } => run_backtest(
            &config,
            &data,
            method,
            outcomes,
            model.as_deref(),
            output.as_deref(),
        ),
        Command::Forecast {
            config,
            data,
            symbol,
            as_of,
            horizon,
            event,
            method,
            outcomes,
            model,
        } => run_forecast(
            &config,
            &data,
            &ForecastRequest {
                symbol,
                as_of,
                horizon,
                event,
                method,
                outcomes,
            },
            model.as_deref(),
        ),
        Command::Train {
            config,
            data,
            output,
            horizon,
            version,
        } => run_train(&config, &data, &output, horizon, &version),
        Command::Validate { config } => run_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_fatal() {
                error!(error = %e, "aborted");
            }
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, EventcastError> {
    FileConfigAdapter::from_file(path)
        .map(FileConfigAdapter::with_env_overrides)
        .map_err(|e| EventcastError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Grid definition from `[backtest]`. Symbols fall back to `[engine] symbols`.
pub fn build_backtest_plan(
    config: &dyn ConfigPort,
    model_name: &str,
) -> Result<BacktestPlan, EventcastError> {
    let timestamp = |key: &str| -> Result<DateTime<Utc>, EventcastError> {
        let raw = config
            .get_string("backtest", key)
            .ok_or_else(|| EventcastError::ConfigMissing {
                section: "backtest".into(),
                key: key.into(),
            })?;
        temporal::parse_timestamp(&raw)
    };

    let horizons = config
        .get_list("backtest", "horizons")
        .iter()
        .map(|h| {
            h.parse::<u32>()
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| EventcastError::ConfigInvalid {
                    section: "backtest".into(),
                    key: "horizons".into(),
                    reason: format!("horizon {h:?} must be a positive number of minutes"),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut symbols = config.get_list("backtest", "symbols");
    if symbols.is_empty() {
        symbols = config.get_list("engine", "symbols");
    }

    Ok(BacktestPlan {
        symbols: symbols.into_iter().map(|s| s.to_uppercase()).collect(),
        horizons,
        start: timestamp("start")?,
        end: timestamp("end")?,
        step_days: config.get_int("backtest", "step_days", 1).clamp(0, i64::from(u32::MAX)) as u32,
        model_name: config
            .get_string("backtest", "model_name")
            .unwrap_or_else(|| model_name.to_string()),
    })
}

pub fn build_index(
    events: &[Event],
    config: &EngineConfig,
) -> Result<Arc<dyn NeighborIndex>, EventcastError> {
    let index: Arc<dyn NeighborIndex> =
        Arc::new(InMemoryIndex::from_events(events, config.neighbors.metric)?);
    Ok(Arc::new(TimeoutIndex::new(index, config.neighbors.timeout_ms)))
}

/// Read an artifact and validate it against the configured feature schema.
pub fn load_model(path: &Path, config: &EngineConfig) -> Result<Arc<ClassifierModel>, EventcastError> {
    let artifact = load_artifact(path)?;
    let schema = FeatureSchema::for_symbols(&config.features.symbols);
    Ok(Arc::new(ClassifierModel::load(artifact, &schema)?))
}

pub fn build_forecaster<'a, A>(
    method: Method,
    adapter: A,
    data: &'a dyn DataPort,
    index: &'a dyn NeighborIndex,
    model: Option<Arc<ClassifierModel>>,
    config: &EngineConfig,
) -> Result<Box<dyn Forecaster + 'a>, EventcastError>
where
    A: OutcomeAdapter + Clone + 'a,
{
    let calibrator = || ConfidenceCalibrator::new(config.calibration.clone());
    let naive = || NaiveBaseline::new(data, adapter.clone(), config.baseline.clone(), calibrator());
    let event = || EventConditioned::new(naive(), index, config.neighbors.clone());
    let ml = |model: Arc<ClassifierModel>| {
        MlClassifier::new(
            model,
            FeatureExtractor::new(data, config.features.clone()),
            config.classifier.clone(),
            calibrator(),
        )
    };

    let forecaster: Box<dyn Forecaster + 'a> = match method {
        Method::Naive => Box::new(naive()),
        Method::Event => Box::new(event()),
        Method::Ml => {
            let model = model.ok_or_else(|| EventcastError::ConfigMissing {
                section: "model".into(),
                key: "path (--model)".into(),
            })?;
            Box::new(ml(model))
        }
        Method::Chain => {
            let mut forecasters: Vec<Box<dyn Forecaster + 'a>> = Vec::with_capacity(3);
            if let Some(model) = model {
                forecasters.push(Box::new(ml(model)));
            }
            forecasters.push(Box::new(event()));
            forecasters.push(Box::new(naive()));
            Box::new(FallbackChain::new(forecasters))
        }
    };
    Ok(forecaster)
}

/// Model for `method`. A chain tolerates a missing or rejected artifact.
fn resolve_model(
    method: Method,
    path: Option<&Path>,
    config: &EngineConfig,
) -> Result<Option<Arc<ClassifierModel>>, EventcastError> {
    let Some(path) = path else {
        return Ok(None);
    };
    if matches!(method, Method::Naive | Method::Event) {
        return Ok(None);
    }
    match (method, load_model(path, config)) {
        (_, Ok(model)) => Ok(Some(model)),
        (Method::Chain, Err(e)) if e.is_recoverable() => {
            warn!(path = %path.display(), error = %e, "model unavailable, chain starts at event-conditioned");
            Ok(None)
        }
        (_, Err(e)) => Err(e),
    }
}

fn method_name(method: Method) -> &'static str {
    match method {
        Method::Naive => "naive",
        Method::Event => "event",
        Method::Ml => "ml",
        Method::Chain => "chain",
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(
    config: &dyn ConfigPort,
) -> Result<Option<crate::adapters::sqlite_adapter::SqliteStore>, EventcastError> {
    if config.get_string("sqlite", "path").is_none() {
        return Ok(None);
    }
    let store = crate::adapters::sqlite_adapter::SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(Some(store))
}

fn run_backtest(
    config_path: &Path,
    data_dir: &Path,
    method: Method,
    outcomes: OutcomeKind,
    model_path: Option<&Path>,
    output_path: Option<&Path>,
) -> Result<(), EventcastError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    let config = EngineConfig::from_config(&adapter)?;
    let plan = build_backtest_plan(&adapter, method_name(method))?;

    let data = CsvAdapter::new(data_dir.to_path_buf()).load()?;
    let index = build_index(data.events(), &config)?;
    let model = resolve_model(method, model_path, &config)?;

    #[cfg(feature = "sqlite")]
    let sqlite = open_sqlite(&adapter)?;
    #[cfg(feature = "sqlite")]
    let sink: &dyn BacktestStore = match &sqlite {
        Some(store) => store,
        None => &data,
    };
    #[cfg(not(feature = "sqlite"))]
    let sink: &dyn BacktestStore = &data;

    eprintln!(
        "Backtesting {} symbols x {} horizons from {} to {}",
        plan.symbols.len(),
        plan.horizons.len(),
        plan.start.to_rfc3339(),
        plan.end.to_rfc3339()
    );
    let report = match outcomes {
        OutcomeKind::Returns => {
            let outcomes = ReturnOutcomes {
                flat_band: config.baseline.flat_threshold,
            };
            backtest_with(outcomes, &data, index.as_ref(), model, sink, &config, &plan, method)?
        }
        OutcomeKind::Games => {
            backtest_with(GameOutcomes, &data, index.as_ref(), model, sink, &config, &plan, method)?
        }
    };

    print_summary(&report);
    if let Some(output) = output_path {
        let path = output.display().to_string();
        JsonReportAdapter::new().write(&report, &path)?;
        eprintln!("\nReport written to: {path}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn backtest_with<A: OutcomeAdapter + Clone>(
    adapter: A,
    data: &MemoryStore,
    index: &dyn NeighborIndex,
    model: Option<Arc<ClassifierModel>>,
    sink: &dyn BacktestStore,
    config: &EngineConfig,
    plan: &BacktestPlan,
    method: Method,
) -> Result<BacktestReport, EventcastError> {
    let forecaster = build_forecaster(method, adapter.clone(), data, index, model, config)?;
    let context = LatestEventContext::new(data, config.features.event_window_days);
    let regime = TrendRegimeClassifier::new(data, config.regime.clone());
    BacktestHarness::new(data, adapter, forecaster.as_ref())
        .with_context(&context)
        .with_regime(&regime)
        .with_store(sink)
        .with_settings(config.backtest.clone())
        .with_buckets(config.calibration.buckets)
        .run(plan)
}

fn print_summary(report: &BacktestReport) {
    let m = &report.metrics;
    eprintln!("\n=== Backtest Results ({}) ===", report.plan.model_name);
    eprintln!("Records:          {}", report.records.len());
    eprintln!("Skipped:          {}", report.skipped_total());
    for (reason, n) in &report.skipped {
        eprintln!("  {reason:?}: {n}");
    }
    eprintln!("Inserted:         {}", report.inserted);
    eprintln!(
        "Accuracy:         {:.1}% ({}/{})",
        m.overall.accuracy * 100.0,
        m.overall.correct,
        m.overall.total
    );
    if let Some(brier) = m.brier_score {
        eprintln!("Brier Score:      {brier:.4}");
    }
    if let Some(rate) = m.fallback_rate {
        eprintln!("Fallback Rate:    {:.1}%", rate * 100.0);
    }

    if !m.per_horizon.is_empty() {
        eprintln!("\n=== Per-Horizon ===");
        for (h, stat) in &m.per_horizon {
            eprintln!("  {:>6}m  {:>5.1}%  n={}", h, stat.accuracy * 100.0, stat.total);
        }
    }
    if !m.per_regime.is_empty() {
        eprintln!("\n=== Per-Regime ===");
        for (regime, stat) in &m.per_regime {
            eprintln!("  {:<10} {:>5.1}%  n={}", regime, stat.accuracy * 100.0, stat.total);
        }
    }
    if !m.calibration.is_empty() {
        eprintln!("\n=== Calibration ===");
        for b in &m.calibration {
            eprintln!(
                "  [{:.2}, {:.2})  hit {:>5.1}%  gap {:+.3}  n={}",
                b.lower,
                b.upper,
                b.accuracy * 100.0,
                b.gap(),
                b.count
            );
        }
    }
}

pub struct ForecastRequest {
    pub symbol: String,
    pub as_of: String,
    pub horizon: u32,
    pub event: Option<String>,
    pub method: Method,
    pub outcomes: OutcomeKind,
}

fn run_forecast(
    config_path: &Path,
    data_dir: &Path,
    request: &ForecastRequest,
    model_path: Option<&Path>,
) -> Result<(), EventcastError> {
    let as_of = temporal::parse_timestamp(&request.as_of)?;
    let symbol = request.symbol.to_uppercase();
    let adapter = load_config(config_path)?;
    let config = EngineConfig::from_config(&adapter)?;

    let data = CsvAdapter::new(data_dir.to_path_buf()).load()?;
    let index = build_index(data.events(), &config)?;
    let model = resolve_model(request.method, model_path, &config)?;
    let model_version = model
        .as_ref()
        .map(|m| m.metadata().model_version.clone())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    let context = match &request.event {
        Some(id) => {
            let event = data.get_event(id)?.ok_or_else(|| EventcastError::DataFormat {
                source_name: "events.csv".into(),
                reason: format!("unknown event {id:?}"),
            })?;
            if event.at > as_of {
                return Err(EventcastError::consistency(format!(
                    "trigger event {id} is after as_of {}",
                    as_of.to_rfc3339()
                )));
            }
            ForecastContext::with_trigger(event)
        }
        None => {
            LatestEventContext::new(&data, config.features.event_window_days)
                .context_for(&symbol, as_of)?
        }
    };
    let event_id = context.trigger.as_ref().map(|e| e.id.clone());

    let forecast = match request.outcomes {
        OutcomeKind::Returns => {
            let outcomes = ReturnOutcomes {
                flat_band: config.baseline.flat_threshold,
            };
            build_forecaster(request.method, outcomes, &data, index.as_ref(), model, &config)?
                .forecast(&symbol, as_of, request.horizon, &context)?
        }
        OutcomeKind::Games => {
            build_forecaster(request.method, GameOutcomes, &data, index.as_ref(), model, &config)?
                .forecast(&symbol, as_of, request.horizon, &context)?
        }
    };

    let json = serde_json::to_string_pretty(&forecast).map_err(|e| EventcastError::DataFormat {
        source_name: "forecast".into(),
        reason: e.to_string(),
    })?;
    println!("{json}");

    let model_source = adapter
        .get_string("snapshots", "model_source")
        .unwrap_or_else(|| "eventcast".to_string());
    let snapshot = ForecastSnapshot::from_forecast(&forecast, &model_source, &model_version, event_id);

    #[cfg(feature = "sqlite")]
    let sqlite = open_sqlite(&adapter)?;
    #[cfg(feature = "sqlite")]
    let sink: &dyn SnapshotStore = match &sqlite {
        Some(store) => store,
        None => &data,
    };
    #[cfg(not(feature = "sqlite"))]
    let sink: &dyn SnapshotStore = &data;

    let inserted = sink.upsert_snapshots(&[snapshot])?;
    info!(symbol = %symbol, inserted, "forecast snapshot recorded");
    Ok(())
}

fn run_train(
    config_path: &Path,
    data_dir: &Path,
    output: &Path,
    horizon: u32,
    version: &str,
) -> Result<(), EventcastError> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;
    validate_backtest_config(&adapter)?;
    let config = EngineConfig::from_config(&adapter)?;
    let model_name = adapter
        .get_string("model", "name")
        .unwrap_or_else(|| "logit".to_string());
    let plan = build_backtest_plan(&adapter, &model_name)?;

    let data = CsvAdapter::new(data_dir.to_path_buf()).load()?;
    let extractor = FeatureExtractor::new(&data, config.features.clone());
    let outcomes = ReturnOutcomes {
        flat_band: config.baseline.flat_threshold,
    };
    let grid = build_grid(plan.start, plan.end, plan.step_days)?;
    let samples =
        build_training_set(&extractor, &data, &outcomes, &plan.symbols, horizon, &grid)?;
    eprintln!("Training on {} samples", samples.len());

    let artifact = train_logistic(
        &samples,
        extractor.schema(),
        &config.classifier,
        &model_name,
        version,
        vec![horizon],
    )?;
    save_artifact(&artifact, output)?;

    for (name, value) in &artifact.metadata.metrics {
        eprintln!("  {name}: {value:.4}");
    }
    eprintln!("\nModel written to: {}", output.display());
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), EventcastError> {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = load_config(config_path)?;
    let config = EngineConfig::from_config(&adapter)?;
    if adapter.get_string("backtest", "start").is_some() {
        validate_backtest_config(&adapter)?;
        let plan = build_backtest_plan(&adapter, "validate")?;
        eprintln!(
            "  backtest: {} symbols, horizons {:?}, {} grid points per series",
            plan.symbols.len(),
            plan.horizons,
            plan.grid()?.len()
        );
    }
    eprintln!(
        "  neighbors: k={} min={} metric={:?}",
        config.neighbors.k, config.neighbors.min_neighbors, config.neighbors.metric
    );
    eprintln!("\nConfiguration is valid.");
    Ok(())
}
