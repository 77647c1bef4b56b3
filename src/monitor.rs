use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};

use crate::capture::CaptureAdapter;
use crate::config::{MonitorConfig, ReportFormat};
use crate::error::{Result, StageFailure};
use crate::extract::{load_flow_table, FlowExtractor};
use crate::model_predictor::Classifier;
use crate::reporter::{self, CycleReport, CycleResult};
use crate::schema::reconcile;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    Capturing,
    Extracting,
    Reconciling,
    Inferring,
    Reporting,
    Cleanup,
    Sleeping,
    Stopped,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleStage::Idle => "idle",
            CycleStage::Capturing => "capturing",
            CycleStage::Extracting => "extracting",
            CycleStage::Reconciling => "reconciling",
            CycleStage::Inferring => "inferring",
            CycleStage::Reporting => "reporting",
            CycleStage::Cleanup => "cleanup",
            CycleStage::Sleeping => "sleeping",
            CycleStage::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    Failed(StageFailure),
    Reported(CycleReport),
    Cancelled,
}

/// Owns the cycle's artifact paths and removes them when dropped, so every
/// way out of a cycle goes through cleanup exactly once.
struct CycleArtifacts {
    paths: [PathBuf; 2],
}

impl CycleArtifacts {
    /// Claims the paths for a new cycle. Leftovers from an earlier run are
    /// removed first so a tool that writes nothing can't resurface them.
    fn new(capture: &Path, flows: &Path) -> Self {
        let artifacts = CycleArtifacts {
            paths: [capture.to_path_buf(), flows.to_path_buf()],
        };
        artifacts.remove_all();
        artifacts
    }

    fn remove_all(&self) {
        for path in &self.paths {
            match fs::remove_file(path) {
                Ok(()) => debug!("removed {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!("could not remove {}: {}", path.display(), err),
            }
        }
    }
}

impl Drop for CycleArtifacts {
    fn drop(&mut self) {
        debug!("entering {}", CycleStage::Cleanup);
        self.remove_all();
    }
}

/// The capture → extract → reconcile → infer → report loop.
pub struct Monitor<C, E, M> {
    config: MonitorConfig,
    capture: C,
    extractor: E,
    classifier: M,
    shutdown: Shutdown,
    out: Box<dyn Write>,
    cycles: u64,
}

impl<C, E, M> Monitor<C, E, M>
where
    C: CaptureAdapter,
    E: FlowExtractor,
    M: Classifier,
{
    pub fn new(
        config: MonitorConfig,
        capture: C,
        extractor: E,
        classifier: M,
        shutdown: Shutdown,
    ) -> Self {
        Monitor {
            config,
            capture,
            extractor,
            classifier,
            shutdown,
            out: Box::new(io::stdout()),
            cycles: 0,
        }
    }

    /// Runs cycles until the shutdown signal fires. Only a classifier failure
    /// ends the loop with an error; stage failures are logged and skipped.
    pub fn run(&mut self) -> Result<u64> {
        info!(
            "Starting real-time DoS/DDoS detection on interface '{}'...",
            self.config.interface
        );
        info!(
            "Capturing in {}-second intervals. Press Ctrl+C to stop.",
            self.config.capture_duration.as_secs()
        );
        self.clear_screen();

        let mut skipped = 0u64;
        let mut alerts = 0u64;
        while !self.shutdown.is_triggered() {
            debug!("entering {}", CycleStage::Idle);
            match self.run_cycle()? {
                CycleOutcome::Cancelled => break,
                CycleOutcome::Failed(failure) => {
                    skipped += 1;
                    debug!("cycle skipped at {}", failure.stage());
                }
                CycleOutcome::Reported(report) => {
                    if report.is_attack() {
                        alerts += 1;
                    }
                }
            }

            debug!("entering {}", CycleStage::Sleeping);
            if !self.shutdown.sleep(self.config.sleep_interval) {
                break;
            }
            self.clear_screen();
        }

        debug!("entering {}", CycleStage::Stopped);
        info!(
            "Stopping... ({} cycles run, {} skipped, {} with alerts)",
            self.cycles, skipped, alerts
        );
        Ok(self.cycles)
    }

    /// One pass through the pipeline. Artifacts are gone when this returns,
    /// whatever the outcome.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.cycles += 1;
        let cycle = self.cycles;
        let started = Local::now();
        if self.config.format == ReportFormat::Text {
            let header = format!("\n--- Cycle started at {} ---", started.format("%H:%M:%S"));
            self.write_out(&header);
        }

        let _artifacts = CycleArtifacts::new(&self.config.pcap_file, &self.config.flows_csv);

        debug!("entering {}", CycleStage::Capturing);
        if let Err(failure) = self.capture.capture(
            &self.config.interface,
            self.config.capture_duration,
            &self.config.pcap_file,
        ) {
            return Ok(self.stage_ended(cycle, failure));
        }
        if self.shutdown.is_triggered() {
            return Ok(CycleOutcome::Cancelled);
        }

        debug!("entering {}", CycleStage::Extracting);
        if let Err(failure) = self
            .extractor
            .extract(&self.config.pcap_file, &self.config.flows_csv)
        {
            return Ok(self.stage_ended(cycle, failure));
        }
        if self.shutdown.is_triggered() {
            return Ok(CycleOutcome::Cancelled);
        }
        let flows = match load_flow_table(&self.config.flows_csv) {
            Ok(flows) => flows,
            Err(failure) => return Ok(self.stage_ended(cycle, failure)),
        };

        debug!("entering {}", CycleStage::Reconciling);
        let reconciled = reconcile(
            flows,
            &self.config.name_mapping,
            &self.config.required_features,
        );
        if !reconciled.defaulted.is_empty() {
            warn!(
                "cycle {}: extractor did not provide {:?}, using default values",
                cycle, reconciled.defaulted
            );
        }
        if reconciled.dropped_rows > 0 {
            debug!(
                "cycle {}: dropped {} flows with invalid values",
                cycle, reconciled.dropped_rows
            );
        }

        let labels = if reconciled.matrix.is_empty() {
            Vec::new()
        } else {
            debug!("entering {}", CycleStage::Inferring);
            self.classifier.predict(&reconciled.matrix)?
        };

        debug!("entering {}", CycleStage::Reporting);
        let report = CycleReport::summarize(
            cycle,
            started,
            CycleResult::from_labels(labels),
            &self.config.benign_label,
        );
        self.emit(&report);
        Ok(CycleOutcome::Reported(report))
    }

    /// A tool killed by the shutdown signal is a cancellation, not a failure.
    fn stage_ended(&self, cycle: u64, failure: StageFailure) -> CycleOutcome {
        if self.shutdown.is_triggered() {
            info!("cycle {} interrupted while {}", cycle, failure.stage());
            return CycleOutcome::Cancelled;
        }
        warn!("cycle {} ({}): {}", cycle, failure.stage(), failure);
        CycleOutcome::Failed(failure)
    }

    /// Reporting never ends the loop; a closed stdout only costs the output.
    fn emit(&mut self, report: &CycleReport) {
        info!(
            "cycle={} flows={} benign={} malicious={}",
            report.cycle, report.flows_analyzed, report.benign, report.malicious
        );
        if report.is_attack() {
            warn!(
                "cycle {}: potential attack, {} suspicious flows {:?}",
                report.cycle, report.malicious, report.labels
            );
        }

        match reporter::render(report, self.config.format) {
            Ok(rendered) => self.write_out(&rendered),
            Err(err) => warn!("cycle {}: could not render report: {}", report.cycle, err),
        }
    }

    fn write_out(&mut self, text: &str) {
        let written = writeln!(self.out, "{}", text).and_then(|()| self.out.flush());
        if let Err(err) = written {
            warn!("could not write report output: {}", err);
        }
    }

    fn clear_screen(&mut self) {
        if self.config.clear_screen {
            let _ = write!(self.out, "\x1b[2J\x1b[H").and_then(|()| self.out.flush());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DDoSError;
    use crate::schema::FeatureMatrix;
    use std::cell::Cell;
    use std::time::Duration;
    use tempfile::TempDir;

    const HEADER: &str = "src_ip,dst_ip,bwd_pkt_len_mean,fwd_iat_std,fwd_iat_max,pkt_len_var,init_fwd_win_byts";

    enum CaptureMode {
        Succeed,
        /// leaves a half-written file behind, then fails
        Fail,
        StopAfter(u32),
        /// shutdown fires while the tool runs and the tool is killed
        Interrupted,
    }

    struct FakeCapture {
        mode: CaptureMode,
        shutdown: Shutdown,
        calls: Cell<u32>,
    }

    impl CaptureAdapter for FakeCapture {
        fn capture(&self, _: &str, _: Duration, output: &Path) -> std::result::Result<(), StageFailure> {
            self.calls.set(self.calls.get() + 1);
            fs::write(output, b"\xd4\xc3\xb2\xa1").unwrap();
            match self.mode {
                CaptureMode::Succeed => Ok(()),
                CaptureMode::Fail => Err(StageFailure::CaptureFailed("tshark exited with 1".into())),
                CaptureMode::StopAfter(n) => {
                    if self.calls.get() >= n {
                        self.shutdown.trigger();
                    }
                    Err(StageFailure::CaptureFailed("tshark exited with 1".into()))
                }
                CaptureMode::Interrupted => {
                    self.shutdown.trigger();
                    Err(StageFailure::CaptureFailed("tshark interrupted by shutdown".into()))
                }
            }
        }
    }

    enum ExtractMode {
        Csv(String),
        /// writes part of a dataset, then fails
        Fail,
        /// exits cleanly without writing anything
        Silent,
    }

    struct FakeExtractor {
        mode: ExtractMode,
        calls: Cell<u32>,
    }

    impl FlowExtractor for FakeExtractor {
        fn extract(&self, _: &Path, output: &Path) -> std::result::Result<(), StageFailure> {
            self.calls.set(self.calls.get() + 1);
            match &self.mode {
                ExtractMode::Csv(text) => {
                    fs::write(output, text).unwrap();
                    Ok(())
                }
                ExtractMode::Fail => {
                    fs::write(output, HEADER).unwrap();
                    Err(StageFailure::ExtractionFailed("cicflowmeter exited with 1".into()))
                }
                ExtractMode::Silent => Ok(()),
            }
        }
    }

    /// Stdout after the reading end went away.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "Broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "Broken pipe"))
        }
    }

    /// Labels a row as DDoS when its first feature is at least 1000.
    struct FakeClassifier {
        broken: bool,
        calls: Cell<u32>,
        rows_seen: Cell<usize>,
    }

    impl Classifier for FakeClassifier {
        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<String>> {
            self.calls.set(self.calls.get() + 1);
            self.rows_seen.set(features.nrows());
            if self.broken {
                return Err(DDoSError::ModelError("X has 5 features, but model expects 7".into()));
            }
            Ok(features
                .values()
                .rows()
                .into_iter()
                .map(|row| (if row[0] >= 1000.0 { "DDoS" } else { "Benign" }).to_string())
                .collect())
        }
    }

    struct Harness {
        dir: TempDir,
        monitor: Monitor<FakeCapture, FakeExtractor, FakeClassifier>,
        shutdown: Shutdown,
    }

    impl Harness {
        fn new(capture: CaptureMode, extract: ExtractMode, broken_model: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let shutdown = Shutdown::new();
            let config = MonitorConfig {
                pcap_file: dir.path().join("capture.pcap"),
                flows_csv: dir.path().join("flows.csv"),
                sleep_interval: Duration::from_millis(10),
                clear_screen: false,
                ..MonitorConfig::default()
            };
            let monitor = Monitor::new(
                config,
                FakeCapture {
                    mode: capture,
                    shutdown: shutdown.clone(),
                    calls: Cell::new(0),
                },
                FakeExtractor {
                    mode: extract,
                    calls: Cell::new(0),
                },
                FakeClassifier {
                    broken: broken_model,
                    calls: Cell::new(0),
                    rows_seen: Cell::new(0),
                },
                shutdown.clone(),
            );
            Harness { dir, monitor, shutdown }
        }

        fn artifacts_gone(&self) -> bool {
            !self.dir.path().join("capture.pcap").exists() && !self.dir.path().join("flows.csv").exists()
        }

        fn classifier_calls(&self) -> u32 {
            self.monitor.classifier.calls.get()
        }
    }

    /// `attack` rows get a large bwd packet mean, `infinite` rows an
    /// infinite forward IAT.
    fn flows_csv(benign: usize, attack: usize, infinite: usize) -> String {
        let mut csv = String::from(HEADER);
        for i in 0..benign {
            csv.push_str(&format!("\n10.0.0.{},10.0.0.254,{}.5,0.1,0.4,12.0,64240", i, i));
        }
        for i in 0..attack {
            csv.push_str(&format!("\n10.0.1.{},10.0.0.254,1500,0.0,0.001,0.0,1024", i));
        }
        for i in 0..infinite {
            csv.push_str(&format!("\n10.0.2.{},10.0.0.254,40,0.0,inf,0.0,1024", i));
        }
        csv.push('\n');
        csv
    }

    fn reported(outcome: CycleOutcome) -> CycleReport {
        match outcome {
            CycleOutcome::Reported(report) => report,
            other => panic!("expected a report, got {:?}", other),
        }
    }

    #[test]
    fn capture_failure_skips_cycle_and_cleans_up() {
        let mut h = Harness::new(CaptureMode::Fail, ExtractMode::Csv(flows_csv(3, 0, 0)), false);
        let outcome = h.monitor.run_cycle().unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed(StageFailure::CaptureFailed(_))));
        assert_eq!(h.monitor.extractor.calls.get(), 0);
        assert_eq!(h.classifier_calls(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn loop_keeps_going_after_capture_failures() {
        let mut h = Harness::new(CaptureMode::StopAfter(3), ExtractMode::Csv(flows_csv(1, 0, 0)), false);
        let cycles = h.monitor.run().unwrap();

        assert_eq!(cycles, 3);
        assert_eq!(h.monitor.capture.calls.get(), 3);
        assert_eq!(h.classifier_calls(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn zero_byte_dataset_skips_inference() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(String::new()), false);
        let outcome = h.monitor.run_cycle().unwrap();

        match outcome {
            CycleOutcome::Failed(failure) => {
                assert_eq!(failure, StageFailure::FlowsFileEmpty);
                assert_eq!(failure.to_string(), "Flows file not found.");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(h.classifier_calls(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn extraction_failure_cleans_up_partial_dataset() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Fail, false);
        let outcome = h.monitor.run_cycle().unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed(StageFailure::ExtractionFailed(_))));
        assert_eq!(h.classifier_calls(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn header_only_dataset_is_a_stage_failure() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(format!("{}\n", HEADER)), false);
        let outcome = h.monitor.run_cycle().unwrap();
        assert!(matches!(outcome, CycleOutcome::Failed(StageFailure::NoFlows)));
        assert!(h.artifacts_gone());
    }

    #[test]
    fn infinite_row_is_dropped_before_inference() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(9, 0, 1)), false);
        let report = reported(h.monitor.run_cycle().unwrap());

        assert_eq!(h.monitor.classifier.rows_seen.get(), 9);
        assert_eq!(report.flows_analyzed, 9);
        assert!(reporter::render_text(&report).contains("Flows analyzed: 9"));
        assert!(h.artifacts_gone());
    }

    #[test]
    fn all_benign_flows_report_no_attack() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(9, 0, 1)), false);
        let report = reported(h.monitor.run_cycle().unwrap());

        assert_eq!(report.benign, 9);
        assert_eq!(report.malicious, 0);
        assert!(!reporter::render_text(&report).contains("WARNING"));
    }

    #[test]
    fn attack_flows_raise_warning() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(7, 2, 0)), false);
        let report = reported(h.monitor.run_cycle().unwrap());

        assert_eq!(report.flows_analyzed, 9);
        assert_eq!(report.malicious, 2);
        assert_eq!(report.labels.get("DDoS"), Some(&2));
        let text = reporter::render_text(&report);
        assert!(text.contains("WARNING: POTENTIAL ATTACK DETECTED"));
        assert!(text.contains("DDoS"));
    }

    #[test]
    fn only_invalid_flows_reports_without_inference() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(0, 0, 4)), false);
        let report = reported(h.monitor.run_cycle().unwrap());

        assert_eq!(h.classifier_calls(), 0);
        assert_eq!(report.flows_analyzed, 0);
        assert_eq!(reporter::render_text(&report), "No valid flows for inference.");
        assert!(h.artifacts_gone());
    }

    #[test]
    fn missing_model_columns_are_defaulted() {
        let csv = "src_ip,bwd_pkt_len_mean\n10.0.0.1,1200\n10.0.0.2,80\n".to_string();
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(csv), false);
        let report = reported(h.monitor.run_cycle().unwrap());

        assert_eq!(report.flows_analyzed, 2);
        assert_eq!(report.malicious, 1);
    }

    #[test]
    fn classifier_error_is_fatal_but_still_cleans_up() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(3, 0, 0)), true);
        let result = h.monitor.run();

        assert!(matches!(result, Err(DDoSError::ModelError(_))));
        assert_eq!(h.monitor.cycles, 1);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn shutdown_during_capture_cancels_cycle() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(3, 0, 0)), false);
        h.shutdown.trigger();
        let outcome = h.monitor.run_cycle().unwrap();

        assert!(matches!(outcome, CycleOutcome::Cancelled));
        assert_eq!(h.monitor.extractor.calls.get(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn stopped_monitor_does_not_start_a_cycle() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(3, 0, 0)), false);
        h.shutdown.trigger();
        assert_eq!(h.monitor.run().unwrap(), 0);
        assert_eq!(h.monitor.capture.calls.get(), 0);
    }

    #[test]
    fn leftover_artifacts_do_not_survive_a_cycle() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(2, 0, 0)), false);
        fs::write(h.dir.path().join("flows.csv"), "stale").unwrap();
        reported(h.monitor.run_cycle().unwrap());
        assert!(h.artifacts_gone());
    }

    #[test]
    fn stale_dataset_is_not_read_when_extractor_writes_nothing() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Silent, false);
        fs::write(h.dir.path().join("flows.csv"), flows_csv(2, 2, 0)).unwrap();
        let outcome = h.monitor.run_cycle().unwrap();

        assert!(matches!(outcome, CycleOutcome::Failed(StageFailure::FlowsFileMissing)));
        assert_eq!(h.classifier_calls(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn interrupted_capture_is_a_cancellation() {
        let mut h = Harness::new(CaptureMode::Interrupted, ExtractMode::Csv(flows_csv(3, 0, 0)), false);
        let outcome = h.monitor.run_cycle().unwrap();

        assert!(matches!(outcome, CycleOutcome::Cancelled));
        assert_eq!(h.monitor.extractor.calls.get(), 0);
        assert!(h.artifacts_gone());
    }

    #[test]
    fn closed_output_does_not_stop_the_loop() {
        let mut h = Harness::new(CaptureMode::Succeed, ExtractMode::Csv(flows_csv(7, 2, 0)), false);
        h.monitor.out = Box::new(ClosedPipe);

        let report = reported(h.monitor.run_cycle().unwrap());
        assert_eq!(report.malicious, 2);

        h.monitor.config.format = ReportFormat::Json;
        assert!(matches!(h.monitor.run_cycle(), Ok(CycleOutcome::Reported(_))));
        assert!(h.artifacts_gone());
    }
}
