use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{DDoSError, Result};
use crate::schema::{NameMapping, MODEL_FEATURES};

/// How each cycle's summary is written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human readable block, screen cleared between cycles
    Text,
    /// One JSON object per cycle
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "ddos_flowwatch")]
#[command(version, about = "Real-time DoS/DDoS detection on captured network flows")]
pub struct Cli {
    /// Interface to capture on (as named by tshark, "any" allowed)
    #[arg(short, long, required_unless_present = "list_interfaces")]
    pub interface: Option<String>,

    /// Print the available interfaces and exit
    #[arg(long)]
    pub list_interfaces: bool,

    /// Seconds of traffic captured per cycle
    #[arg(short = 'd', long, default_value_t = 5)]
    pub capture_duration: u64,

    /// Seconds to wait between cycles
    #[arg(short = 's', long, default_value_t = 5)]
    pub sleep_interval: u64,

    /// Seconds the flow extractor may run before it is killed
    #[arg(long, default_value_t = 60)]
    pub extract_timeout: u64,

    /// Capture artifact path (removed after every cycle)
    #[arg(long, default_value = "/tmp/capture.pcap")]
    pub pcap_file: PathBuf,

    /// Flow dataset path (removed after every cycle)
    #[arg(long, default_value = "/tmp/flows.csv")]
    pub flows_csv: PathBuf,

    /// Trained classifier (joblib)
    #[arg(short, long, default_value = "rf_dos_model.joblib")]
    pub model: PathBuf,

    /// Python module providing `train(model_filename)`
    #[arg(long, default_value = "train")]
    pub trainer_module: String,

    /// Directory added to the Python path before importing the trainer
    #[arg(long, default_value = ".")]
    pub trainer_dir: PathBuf,

    /// Label the classifier uses for normal traffic
    #[arg(long, default_value = "Benign")]
    pub benign_label: String,

    /// JSON object mapping extractor column names to model column names
    #[arg(long)]
    pub column_map: Option<PathBuf>,

    #[arg(long, default_value = "tshark")]
    pub tshark: String,

    #[arg(long, default_value = "cicflowmeter")]
    pub cicflowmeter: String,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Keep previous reports on screen
    #[arg(long)]
    pub no_clear: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything the monitor needs, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interface: String,
    pub capture_duration: Duration,
    pub sleep_interval: Duration,
    pub extract_timeout: Duration,
    pub pcap_file: PathBuf,
    pub flows_csv: PathBuf,
    pub model_path: PathBuf,
    pub trainer_module: String,
    pub trainer_dir: PathBuf,
    pub benign_label: String,
    pub tshark: String,
    pub cicflowmeter: String,
    pub format: ReportFormat,
    pub clear_screen: bool,
    pub required_features: Vec<String>,
    pub name_mapping: NameMapping,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: "any".to_string(),
            capture_duration: Duration::from_secs(5),
            sleep_interval: Duration::from_secs(5),
            extract_timeout: Duration::from_secs(60),
            pcap_file: PathBuf::from("/tmp/capture.pcap"),
            flows_csv: PathBuf::from("/tmp/flows.csv"),
            model_path: PathBuf::from("rf_dos_model.joblib"),
            trainer_module: "train".to_string(),
            trainer_dir: PathBuf::from("."),
            benign_label: "Benign".to_string(),
            tshark: "tshark".to_string(),
            cicflowmeter: "cicflowmeter".to_string(),
            format: ReportFormat::Text,
            clear_screen: true,
            required_features: MODEL_FEATURES.iter().map(|s| s.to_string()).collect(),
            name_mapping: NameMapping::cicflowmeter(),
        }
    }
}

impl TryFrom<Cli> for MonitorConfig {
    type Error = DDoSError;

    fn try_from(cli: Cli) -> Result<Self> {
        let interface = cli
            .interface
            .ok_or_else(|| DDoSError::ConfigError("no capture interface given".to_string()))?;
        if cli.capture_duration == 0 {
            return Err("capture duration must be at least one second".into());
        }
        if cli.extract_timeout == 0 {
            return Err("extraction timeout must be at least one second".into());
        }
        if cli.pcap_file == cli.flows_csv {
            return Err("capture file and flows file must be different paths".into());
        }
        if cli.benign_label.trim().is_empty() {
            return Err("benign label must not be empty".into());
        }

        let name_mapping = match &cli.column_map {
            Some(path) => NameMapping::from_json_file(path)?,
            None => NameMapping::cicflowmeter(),
        };

        Ok(MonitorConfig {
            interface,
            capture_duration: Duration::from_secs(cli.capture_duration),
            sleep_interval: Duration::from_secs(cli.sleep_interval),
            extract_timeout: Duration::from_secs(cli.extract_timeout),
            pcap_file: cli.pcap_file,
            flows_csv: cli.flows_csv,
            model_path: cli.model,
            trainer_module: cli.trainer_module,
            trainer_dir: cli.trainer_dir,
            benign_label: cli.benign_label,
            tshark: cli.tshark,
            cicflowmeter: cli.cicflowmeter,
            format: cli.format,
            clear_screen: !cli.no_clear && cli.format == ReportFormat::Text,
            name_mapping,
            ..MonitorConfig::default()
        })
    }
}
