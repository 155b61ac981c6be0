//! CLI entry point for labscope
//!
//! ```bash
//! labscope list
//! labscope run example_2d_scan --set Nh=21 --set scan_type=serpentine --background
//! labscope run number_gen_readout --duration 10
//! labscope inspect data/240101_120000_example_2d_scan.json
//! labscope settings data/240101_120000_example_2d_scan.json --pattern "hardware/*"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use labscope::config::{LabscopeConfig, DEFAULT_CONFIG_PATH};
use labscope::storage::loaders::{measurement_name_of, read_document, settings_of};
use labscope::storage::{find_settings, DEFAULT_SETTINGS_PATTERN};
use labscope::{tracing_setup, MicroscopeApp};
use mimalloc::MiMalloc;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "labscope")]
#[command(about = "Microscope instrument control and scan measurements", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the hardware and run one measurement
    Run {
        /// Measurement name (see `list`)
        measurement: String,

        /// Override a measurement setting, `name=value` (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        overrides: Vec<String>,

        /// Take a background spectrum before a scan starts
        #[arg(long)]
        background: bool,

        /// Interrupt after this many seconds (continuous readouts)
        #[arg(long, value_parser = parse_duration)]
        duration: Option<Duration>,
    },

    /// Show configured hardware, axes and measurements with their settings
    List,

    /// Summarise the groups and datasets of a measurement file
    Inspect {
        file: PathBuf,
    },

    /// Print the settings stored in a measurement file
    Settings {
        file: PathBuf,

        /// Wildcard over `<group>/<key>` names
        #[arg(long, default_value = DEFAULT_SETTINGS_PATTERN)]
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LabscopeConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            measurement,
            overrides,
            background,
            duration,
        } => run_measurement(&config, &measurement, &overrides, background, duration).await,
        Commands::List => list(&config).await,
        Commands::Inspect { file } => inspect(file).await,
        Commands::Settings { file, pattern } => print_settings(file, &pattern).await,
    }
}

/// Seconds as a [`Duration`]; negative, non-finite and oversized values are rejected.
fn parse_duration(raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("'{raw}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid duration {raw}: {e}"))
}

/// Split `name=value`; the value is read as a TOML literal, else as a string.
fn parse_override(raw: &str) -> Result<(String, serde_json::Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{raw}'"))?;
    let value = match toml::from_str::<toml::Table>(&format!("v = {value}")) {
        Ok(mut table) => table
            .remove("v")
            .ok_or_else(|| anyhow!("empty value for '{name}'"))?,
        Err(_) => toml::Value::String(value.to_string()),
    };
    Ok((name.trim().to_string(), serde_json::to_value(value)?))
}

async fn run_measurement(
    config: &LabscopeConfig,
    name: &str,
    overrides: &[String],
    background: bool,
    duration: Option<Duration>,
) -> Result<()> {
    let app = MicroscopeApp::from_config(config).await?;
    let runner = app
        .measurement(name)
        .ok_or_else(|| anyhow!("no measurement named '{name}' in {:?}", app.measurement_names()))?;

    for raw in overrides {
        let (setting, value) = parse_override(raw)?;
        runner
            .measurement()
            .settings()
            .set_json(&setting, value)
            .await
            .with_context(|| format!("failed to set {setting}"))?;
    }

    app.connect_all().await?;
    let result = run_connected(&app, name, background, duration).await;
    if let Err(e) = app.disconnect_all().await {
        warn!("{e:#}");
    }
    result
}

async fn run_connected(
    app: &MicroscopeApp,
    name: &str,
    background: bool,
    duration: Option<Duration>,
) -> Result<()> {
    if background {
        let spectrum = app.acquire_background(name).await?;
        info!(pixels = spectrum.len(), "Background acquired");
    }

    let runner = app
        .measurement(name)
        .ok_or_else(|| anyhow!("no measurement named '{name}'"))?;
    let mut progress = runner.progress().subscribe();
    let reporter = tokio::spawn(async move {
        let mut last_decile = -1;
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow();
            let decile = (percent / 10.0).floor() as i64;
            if decile != last_decile {
                last_decile = decile;
                info!("Progress {percent:.0}%");
            }
        }
    });

    app.start_measurement(name)?;
    let deadline = async {
        match duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let wait = app.wait_measurement(name);
    tokio::pin!(wait);
    let result = tokio::select! {
        result = &mut wait => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, interrupting");
            app.interrupt_measurement(name)?;
            wait.await
        }
        _ = deadline => {
            info!("Duration elapsed, interrupting");
            app.interrupt_measurement(name)?;
            wait.await
        }
    };
    reporter.abort();
    result
}

async fn list(config: &LabscopeConfig) -> Result<()> {
    let app = MicroscopeApp::from_config(config).await?;

    println!("Hardware:");
    for name in app.hardware_names() {
        let Some(hw) = app.hardware(&name) else {
            continue;
        };
        println!("  {name}");
        for (key, value) in hw.settings().snapshot()? {
            println!("    {key} = {value}");
        }
    }

    println!("Axes: {}", app.axis_names().join(", "));

    println!("Measurements:");
    for name in app.measurement_names() {
        let Some(runner) = app.measurement(&name) else {
            continue;
        };
        println!("  {name} ({})", runner.state());
        for (key, value) in runner.measurement().settings().snapshot()? {
            println!("    {key} = {value}");
        }
    }
    Ok(())
}

async fn inspect(file: PathBuf) -> Result<()> {
    let doc = tokio::task::spawn_blocking(move || read_document(&file))
        .await
        .map_err(|e| anyhow!("read task failed: {e}"))??;

    match measurement_name_of(&doc) {
        Some(name) => println!("Measurement: {name}"),
        None => bail!("file holds no measurement"),
    }
    if let Some(attrs) = doc.root_attrs() {
        for (key, value) in attrs {
            println!("  {key} = {value}");
        }
    }
    println!("Groups:");
    for group in doc.groups() {
        println!("  /{group}");
    }
    println!("Datasets:");
    for (path, array) in &doc.datasets {
        let extendable = if array.extendable { " (extendable)" } else { "" };
        println!("  /{path} {:?}{extendable}", array.shape);
    }
    Ok(())
}

async fn print_settings(file: PathBuf, pattern: &str) -> Result<()> {
    let doc = tokio::task::spawn_blocking(move || read_document(&file))
        .await
        .map_err(|e| anyhow!("read task failed: {e}"))??;
    for (key, value) in find_settings(&settings_of(&doc), pattern) {
        println!("{key} = {value}");
    }
    Ok(())
}
