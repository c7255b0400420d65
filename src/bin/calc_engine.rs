//! Calculation engine binary
//!
//! Builds the hierarchy once, then runs rollup passes on the refresh timer
//! while two observation monitors watch live data: one for threshold
//! outliers on branch rollups, one for leaf mode transitions. Runs against
//! the in-memory stores with a seeded population; point the settings at a
//! real deployment through the environment.

use assetflow::config::Settings;
use assetflow::hierarchy::HierarchySynchronizer;
use assetflow::monitor::{ModeTransitionRecorder, ObservationMonitor, OutlierDetector};
use assetflow::rollup::{OutlierReporter, RollupEngine, RollupError};
use assetflow::shutdown::StopSignal;
use assetflow::store::{
    find_all_nodes, AttrRef, AttributeValue, MemoryGraphStore, MemoryTimeSeriesStore,
    SeriesBinding, StoreError, TemplateDef, TimeSeriesStore, LEAF_MODE, LEAF_VALUE, ROLLUP_SUM,
    THRESHOLD,
};
use chrono::Utc;
use std::sync::Arc;

fn usage() {
    eprintln!("calc_engine: rollups, fluctuation reports and live monitoring");
    eprintln!();
    eprintln!("Required environment variables:");
    eprintln!("  ASSETFLOW_DB_PATH  target asset database location");
    eprintln!("  ASSETFLOW_LEVELS   pipe-separated level names, leaf first");
    eprintln!("                     (e.g. Leaf|Branch|SubTree)");
    eprintln!();
    eprintln!("Optional: ASSETFLOW_TARGET_MODE, ASSETFLOW_ROLLUP_HOURS,");
    eprintln!("  ASSETFLOW_FLUCTUATION_DAYS, ASSETFLOW_CHUNK_SIZE,");
    eprintln!("  ASSETFLOW_PAGE_SIZE, ASSETFLOW_MAX_PARALLEL,");
    eprintln!("  ASSETFLOW_REFRESH_INTERVAL_MS, ASSETFLOW_POLL_BACKOFF_MS,");
    eprintln!("  ASSETFLOW_REPORT_DIR");
}

/// Register the level templates and seed a leaf population with live values
fn demo_world(settings: &Settings) -> (Arc<MemoryGraphStore>, Arc<MemoryTimeSeriesStore>) {
    let graph = Arc::new(MemoryGraphStore::new());
    let series = Arc::new(MemoryTimeSeriesStore::new());

    graph.register_template(TemplateDef {
        name: settings.leaf_template().to_string(),
        base: None,
        attributes: Vec::new(),
    });
    for level in &settings.levels[1..] {
        graph.register_template(TemplateDef {
            name: level.clone(),
            base: None,
            attributes: vec![
                (
                    ROLLUP_SUM.to_string(),
                    AttributeValue::Series(SeriesBinding::template_default("%Node%.Rollup_Sum")),
                ),
                (THRESHOLD.to_string(), AttributeValue::Scalar(1000.0)),
            ],
        });
    }

    let now = Utc::now().timestamp();
    for i in 0..12 {
        let name = format!("Leaf{:04}", i);
        let mut attributes = vec![
            (
                LEAF_VALUE.to_string(),
                AttributeValue::Series(SeriesBinding {
                    config: format!("{}.Value", name),
                    resolved: true,
                }),
            ),
            (
                LEAF_MODE.to_string(),
                AttributeValue::Series(SeriesBinding {
                    config: format!("{}.Mode", name),
                    resolved: true,
                }),
            ),
        ];
        for (j, level) in settings.levels[1..].iter().enumerate() {
            let key = 1 + (i / (j + 1)) % 3;
            attributes.push((level.clone(), AttributeValue::Text(key.to_string())));
        }
        let id = graph.seed_leaf(&name, settings.leaf_template(), attributes);

        // A few hours of values per leaf
        let attr = AttrRef {
            node: id,
            node_name: name,
            attribute: LEAF_VALUE.to_string(),
        };
        for h in 0..6 {
            series.write_value(&attr, now - h * 3600, (i as f64 + 1.0) * 10.0);
        }
    }

    (graph, series)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            eprintln!();
            usage();
            std::process::exit(1);
        }
    };

    log::info!("starting calculation engine");
    log::info!("  database:    {}", settings.db_path);
    log::info!("  levels:      {}", settings.levels.join(" -> "));
    log::info!("  window:      {} hours", settings.rollup_hours);
    log::info!("  target mode: {}", settings.target_mode);

    let (graph, series) = demo_world(&settings);
    let stop = StopSignal::new();

    // The rollup pass walks the built hierarchy, so build it first
    let mut sync =
        HierarchySynchronizer::new(graph.clone(), settings.clone(), stop.clone()).await?;
    sync.build_containers().await?;
    sync.build_hierarchy().await?;

    let engine = RollupEngine::new(graph.clone(), series.clone(), settings.clone(), stop.clone());

    // Outlier monitor over every branch rollup series
    let branches = find_all_nodes(
        graph.as_ref(),
        &settings.levels[1],
        settings.chunk_size,
    )
    .await?;
    let rollup_attrs: Vec<AttrRef> = branches
        .iter()
        .filter_map(|n| n.series_ref(ROLLUP_SUM))
        .collect();
    let reporter = Arc::new(OutlierReporter::new(&settings.report_dir, Utc::now()));
    let outlier_monitor = ObservationMonitor::start(
        series.clone() as Arc<dyn TimeSeriesStore>,
        &rollup_attrs,
        Arc::new(OutlierDetector::new(graph.clone(), reporter)),
        settings.poll_backoff,
        stop.clone(),
    )
    .await?;

    // Mode-transition monitor over every leaf mode series
    let leaves = find_all_nodes(
        graph.as_ref(),
        settings.leaf_template(),
        settings.chunk_size,
    )
    .await?;
    let mode_attrs: Vec<AttrRef> = leaves
        .iter()
        .filter_map(|n| n.series_ref(LEAF_MODE))
        .collect();
    let mode_monitor = ObservationMonitor::start(
        series.clone() as Arc<dyn TimeSeriesStore>,
        &mode_attrs,
        Arc::new(ModeTransitionRecorder::new(
            graph.clone(),
            &settings.target_mode,
        )),
        settings.poll_backoff,
        stop.clone(),
    )
    .await?;

    let mut timer = tokio::time::interval(settings.refresh_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("stop requested, shutting down");
                stop.stop();
                break;
            }
            _ = timer.tick() => {
                match engine.run_rollup_pass(Utc::now()).await {
                    Ok(summary) => log::info!(
                        "pass complete: {} rollups written, {} report rows",
                        summary.nodes_written,
                        summary.report_rows
                    ),
                    Err(RollupError::Store(StoreError::Cancelled)) => break,
                    Err(e) => log::error!("rollup pass failed: {}", e),
                }
            }
        }
    }

    outlier_monitor.shutdown().await?;
    mode_monitor.shutdown().await?;

    for record in graph.interval_records() {
        log::info!("recorded interval: {}", serde_json::to_string(&record)?);
    }
    log::info!("calculation engine stopped");
    Ok(())
}
