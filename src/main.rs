use std::process::{Command, ExitCode};
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn};
use pnet::datalink;

mod capture;
mod config;
mod error;
mod extract;
mod model_predictor;
mod monitor;
mod reporter;
mod schema;
mod shutdown;
mod tool;

use capture::TsharkCapture;
use config::{Cli, MonitorConfig};
use error::{DDoSError, Result};
use extract::CicFlowMeter;
use model_predictor::ModelPredictor;
use monitor::Monitor;
use shutdown::Shutdown;
use tool::{find_program, run_bounded, ToolOutcome};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_interfaces {
        list_interfaces();
        return Ok(());
    }

    let mut config = MonitorConfig::try_from(cli)?;
    check_dependencies(&config)?;
    check_interface(&config.interface)?;
    debug!("{} extractor columns mapped", config.name_mapping.len());

    // Handle Ctrl+C gracefully
    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            println!("\nCtrl+C received, stopping...");
            shutdown.trigger();
        })?;
    }

    let predictor = ModelPredictor::load_or_train(
        &config.model_path,
        &config.trainer_module,
        &config.trainer_dir,
    )?;
    info!("Model loaded successfully ({}).", predictor.model_path().display());

    if let Some(names) = predictor.feature_names() {
        if names != config.required_features {
            warn!(
                "model was fitted on {:?}, using those columns instead of {:?}",
                names, config.required_features
            );
            config.required_features = names;
        }
    }

    let capture = TsharkCapture::new(config.tshark.clone(), shutdown.clone());
    let extractor = CicFlowMeter::new(
        config.cicflowmeter.clone(),
        config.extract_timeout,
        shutdown.clone(),
    );
    let mut monitor = Monitor::new(config, capture, extractor, predictor, shutdown);
    monitor.run()?;
    Ok(())
}

fn check_dependencies(config: &MonitorConfig) -> Result<()> {
    info!("Checking dependencies...");

    let mut version = Command::new(&config.tshark);
    version.arg("-v");
    match run_bounded(version, Duration::from_secs(10), &Shutdown::new()) {
        ToolOutcome::Success => info!("tshark found."),
        outcome => {
            return Err(DDoSError::SetupError(format!(
                "{}. Please install tshark (sudo apt install tshark).",
                outcome.describe(&config.tshark)
            )))
        }
    }

    match find_program(&config.cicflowmeter) {
        Some(path) => info!("cicflowmeter found at {}.", path.display()),
        None => {
            return Err(DDoSError::SetupError(format!(
                "{} not found. Please install it (pip install cicflowmeter).",
                config.cicflowmeter
            )))
        }
    }
    Ok(())
}

/// tshark also accepts "any" and the numeric indexes from `tshark -D`.
fn check_interface(name: &str) -> Result<()> {
    if name == "any" || name.parse::<usize>().is_ok() {
        return Ok(());
    }
    let interfaces = datalink::interfaces();
    if interfaces.iter().any(|iface| iface.name == name) {
        return Ok(());
    }
    let known: Vec<String> = interfaces.into_iter().map(|iface| iface.name).collect();
    Err(DDoSError::SetupError(format!(
        "unknown interface '{}' (available: {})",
        name,
        known.join(", ")
    )))
}

fn list_interfaces() {
    let interfaces = datalink::interfaces();
    println!("Available network interfaces:");
    for (i, iface) in interfaces.iter().enumerate() {
        let ips: Vec<String> = iface
            .ips
            .iter()
            .map(|network| network.ip().to_string())
            .collect();
        if ips.is_empty() {
            println!("{}: {} - no address assigned", i + 1, iface.name);
        } else {
            println!("{}: {} - {}", i + 1, iface.name, ips.join(", "));
        }
    }
}
