//! Hierarchy builder binary
//!
//! Builds the full hierarchy from flat leaf records, then keeps listening
//! for leaf changes until Ctrl-C. Runs against the in-memory stores with a
//! seeded leaf population; point the settings at a real deployment through
//! the environment.

use assetflow::config::Settings;
use assetflow::hierarchy::HierarchySynchronizer;
use assetflow::shutdown::StopSignal;
use assetflow::store::{
    AssetGraphStore, AttributeValue, MemoryGraphStore, SeriesBinding, TemplateDef, LEAF_MODE,
    LEAF_VALUE, ROLLUP_SUM, THRESHOLD,
};
use std::sync::Arc;

fn usage() {
    eprintln!("hierarchy_builder: build and maintain the asset hierarchy");
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

/// Register the level templates and seed a small leaf population
fn demo_graph(settings: &Settings) -> Arc<MemoryGraphStore> {
    let store = Arc::new(MemoryGraphStore::new());

    store.register_template(TemplateDef {
        name: settings.leaf_template().to_string(),
        base: None,
        attributes: Vec::new(),
    });
    for level in &settings.levels[1..] {
        store.register_template(TemplateDef {
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

    for i in 0..12 {
        let mut attributes = vec![
            (
                LEAF_VALUE.to_string(),
                AttributeValue::Series(SeriesBinding {
                    config: format!("Leaf{:04}.Value", i),
                    resolved: true,
                }),
            ),
            (
                LEAF_MODE.to_string(),
                AttributeValue::Series(SeriesBinding {
                    config: format!("Leaf{:04}.Mode", i),
                    resolved: true,
                }),
            ),
        ];
        for (j, level) in settings.levels[1..].iter().enumerate() {
            let key = 1 + (i / (j + 1)) % 3;
            attributes.push((level.clone(), AttributeValue::Text(key.to_string())));
        }
        store.seed_leaf(
            &format!("Leaf{:04}", i),
            settings.leaf_template(),
            attributes,
        );
    }

    store
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

    log::info!("starting hierarchy builder");
    log::info!("  database: {}", settings.db_path);
    log::info!("  levels:   {}", settings.levels.join(" -> "));

    let graph = demo_graph(&settings);
    let stop = StopSignal::new();
    let mut sync =
        HierarchySynchronizer::new(graph.clone(), settings.clone(), stop.clone()).await?;

    // Ctrl-C stops the listen loop; the notifier wakes it up so it does not
    // wait for the next refresh tick
    let notifier = graph.change_notifier();
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("stop requested, shutting down");
            stop_on_signal.stop();
            notifier.notify_one();
        }
    });

    sync.run().await?;
    log::info!("hierarchy builder stopped");
    Ok(())
}
