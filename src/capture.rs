use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::{debug, info};

use crate::error::StageFailure;
use crate::shutdown::Shutdown;
use crate::tool::{run_bounded, ToolOutcome};

/// Extra time tshark gets past its own autostop before it is killed.
const CAPTURE_GRACE: Duration = Duration::from_secs(10);

/// Records live traffic into a capture file.
pub trait CaptureAdapter {
    fn capture(
        &self,
        interface: &str,
        duration: Duration,
        output: &Path,
    ) -> Result<(), StageFailure>;
}

/// Capture through `tshark`, stopping on its own after `duration`.
pub struct TsharkCapture {
    binary: String,
    shutdown: Shutdown,
}

impl TsharkCapture {
    pub fn new(binary: impl Into<String>, shutdown: Shutdown) -> Self {
        TsharkCapture {
            binary: binary.into(),
            shutdown,
        }
    }

    fn command(&self, interface: &str, duration: Duration, output: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg(interface)
            .arg("-a")
            .arg(format!("duration:{}", duration.as_secs().max(1)))
            .arg("-w")
            .arg(output)
            .args(["-F", "pcap"]);
        command
    }
}

impl CaptureAdapter for TsharkCapture {
    fn capture(
        &self,
        interface: &str,
        duration: Duration,
        output: &Path,
    ) -> Result<(), StageFailure> {
        info!("Capturing network traffic for {}s...", duration.as_secs());
        let command = self.command(interface, duration, output);
        match run_bounded(command, duration + CAPTURE_GRACE, &self.shutdown) {
            ToolOutcome::Success => {
                debug!("capture written to {}", output.display());
                Ok(())
            }
            failure => Err(StageFailure::CaptureFailed(failure.describe(&self.binary))),
        }
    }
}
