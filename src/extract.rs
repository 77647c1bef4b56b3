use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::{debug, info};

use crate::error::StageFailure;
use crate::schema::FlowTable;
use crate::shutdown::Shutdown;
use crate::tool::{run_bounded, ToolOutcome};

/// Turns a capture file into a per-flow CSV dataset.
pub trait FlowExtractor {
    fn extract(&self, capture: &Path, output: &Path) -> Result<(), StageFailure>;
}

/// Flow extraction through the `cicflowmeter` command line tool.
pub struct CicFlowMeter {
    binary: String,
    timeout: Duration,
    shutdown: Shutdown,
}

impl CicFlowMeter {
    pub fn new(binary: impl Into<String>, timeout: Duration, shutdown: Shutdown) -> Self {
        CicFlowMeter {
            binary: binary.into(),
            timeout,
            shutdown,
        }
    }

    fn command(&self, capture: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command.arg("-f").arg(capture).arg("-c").arg(output);
        command
    }
}

impl FlowExtractor for CicFlowMeter {
    fn extract(&self, capture: &Path, output: &Path) -> Result<(), StageFailure> {
        info!("Extracting features...");
        match run_bounded(self.command(capture, output), self.timeout, &self.shutdown) {
            ToolOutcome::Success => Ok(()),
            failure => Err(StageFailure::ExtractionFailed(failure.describe(&self.binary))),
        }
    }
}

/// Loads the extractor's dataset, rejecting anything that can't feed a cycle.
pub fn load_flow_table(path: &Path) -> Result<FlowTable, StageFailure> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(StageFailure::FlowsFileMissing),
        Err(err) => return Err(StageFailure::CsvUnreadable(err.to_string())),
    };
    if metadata.len() == 0 {
        return Err(StageFailure::FlowsFileEmpty);
    }

    let file = File::open(path).map_err(|e| StageFailure::CsvUnreadable(e.to_string()))?;
    let table = FlowTable::from_csv(BufReader::new(file))
        .map_err(|e| StageFailure::CsvUnreadable(e.to_string()))?;
    if table.is_empty() {
        return Err(StageFailure::NoFlows);
    }

    debug!(
        "{} flows with {} columns read from {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_flow_table(&dir.path().join("flows.csv"));
        assert_eq!(result.unwrap_err(), StageFailure::FlowsFileMissing);
    }

    #[test]
    fn zero_length_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.csv");
        fs::write(&path, b"").unwrap();
        let failure = load_flow_table(&path).unwrap_err();
        assert_eq!(failure, StageFailure::FlowsFileEmpty);
        assert_eq!(failure.to_string(), "Flows file not found.");
    }

    #[test]
    fn header_only_file_has_no_flows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.csv");
        fs::write(&path, "src_ip,fwd_iat_max\n").unwrap();
        assert_eq!(load_flow_table(&path).unwrap_err(), StageFailure::NoFlows);
    }

    #[test]
    fn malformed_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.csv");
        fs::write(&path, "a,b\n1,2\n1,2,3,4\n").unwrap();
        assert!(matches!(load_flow_table(&path), Err(StageFailure::CsvUnreadable(_))));
    }

    #[test]
    fn valid_file_loads_every_flow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flows.csv");
        fs::write(&path, "src_ip,fwd_iat_max\n10.0.0.1,1\n10.0.0.2,2\n").unwrap();
        assert_eq!(load_flow_table(&path).unwrap().len(), 2);
    }

    #[test]
    fn cicflowmeter_arguments() {
        let extractor = CicFlowMeter::new("cicflowmeter", Duration::from_secs(60), Shutdown::new());
        let command = extractor.command(Path::new("/tmp/c.pcap"), Path::new("/tmp/f.csv"));
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-f", "/tmp/c.pcap", "-c", "/tmp/f.csv"]);
    }

    #[test]
    fn missing_extractor_is_a_stage_failure() {
        let extractor = CicFlowMeter::new("/nonexistent/cicflowmeter", Duration::from_secs(5), Shutdown::new());
        let result = extractor.extract(Path::new("/tmp/c.pcap"), Path::new("/tmp/f.csv"));
        assert!(matches!(result, Err(StageFailure::ExtractionFailed(_))));
    }
}
