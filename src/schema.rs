use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use lazy_static::lazy_static;
use ndarray::Array2;

use crate::error::{DDoSError, Result};

/// Columns the reference random-forest model was trained on, in order.
pub const MODEL_FEATURES: [&str; 5] = [
    "Bwd Packet Length Mean",
    "Fwd IAT Std",
    "Fwd IAT Max",
    "Packet Length Variance",
    "Init Fwd Win Bytes",
];

/// Value used for a model column the extractor did not produce.
pub const MISSING_FEATURE_DEFAULT: f64 = 0.0;

// cicflowmeter column -> CIC-IDS2017 training column
const CICFLOWMETER_COLUMNS: [(&str, &str); 77] = [
    ("protocol", "Protocol"),
    ("flow_duration", "Flow Duration"),
    ("tot_fwd_pkts", "Total Fwd Packets"),
    ("tot_bwd_pkts", "Total Backward Packets"),
    ("totlen_fwd_pkts", "Fwd Packets Length Total"),
    ("totlen_bwd_pkts", "Bwd Packets Length Total"),
    ("fwd_pkt_len_max", "Fwd Packet Length Max"),
    ("fwd_pkt_len_min", "Fwd Packet Length Min"),
    ("fwd_pkt_len_mean", "Fwd Packet Length Mean"),
    ("fwd_pkt_len_std", "Fwd Packet Length Std"),
    ("bwd_pkt_len_max", "Bwd Packet Length Max"),
    ("bwd_pkt_len_min", "Bwd Packet Length Min"),
    ("bwd_pkt_len_mean", "Bwd Packet Length Mean"),
    ("bwd_pkt_len_std", "Bwd Packet Length Std"),
    ("flow_byts_s", "Flow Bytes/s"),
    ("flow_pkts_s", "Flow Packets/s"),
    ("flow_iat_mean", "Flow IAT Mean"),
    ("flow_iat_std", "Flow IAT Std"),
    ("flow_iat_max", "Flow IAT Max"),
    ("flow_iat_min", "Flow IAT Min"),
    ("fwd_iat_tot", "Fwd IAT Total"),
    ("fwd_iat_mean", "Fwd IAT Mean"),
    ("fwd_iat_std", "Fwd IAT Std"),
    ("fwd_iat_max", "Fwd IAT Max"),
    ("fwd_iat_min", "Fwd IAT Min"),
    ("bwd_iat_tot", "Bwd IAT Total"),
    ("bwd_iat_mean", "Bwd IAT Mean"),
    ("bwd_iat_std", "Bwd IAT Std"),
    ("bwd_iat_max", "Bwd IAT Max"),
    ("bwd_iat_min", "Bwd IAT Min"),
    ("fwd_psh_flags", "Fwd PSH Flags"),
    ("bwd_psh_flags", "Bwd PSH Flags"),
    ("fwd_urg_flags", "Fwd URG Flags"),
    ("bwd_urg_flags", "Bwd URG Flags"),
    ("fwd_header_len", "Fwd Header Length"),
    ("bwd_header_len", "Bwd Header Length"),
    ("fwd_pkts_s", "Fwd Packets/s"),
    ("bwd_pkts_s", "Bwd Packets/s"),
    ("pkt_len_min", "Packet Length Min"),
    ("pkt_len_max", "Packet Length Max"),
    ("pkt_len_mean", "Packet Length Mean"),
    ("pkt_len_std", "Packet Length Std"),
    ("pkt_len_var", "Packet Length Variance"),
    ("fin_flag_cnt", "FIN Flag Count"),
    ("syn_flag_cnt", "SYN Flag Count"),
    ("rst_flag_cnt", "RST Flag Count"),
    ("psh_flag_cnt", "PSH Flag Count"),
    ("ack_flag_cnt", "ACK Flag Count"),
    ("urg_flag_cnt", "URG Flag Count"),
    ("cwe_flag_cnt", "CWE Flag Count"),
    ("ece_flag_cnt", "ECE Flag Count"),
    ("down_up_ratio", "Down/Up Ratio"),
    ("pkt_size_avg", "Avg Packet Size"),
    ("fwd_seg_size_avg", "Avg Fwd Segment Size"),
    ("bwd_seg_size_avg", "Avg Bwd Segment Size"),
    ("fwd_byts_b_avg", "Fwd Avg Bytes/Bulk"),
    ("fwd_pkts_b_avg", "Fwd Avg Packets/Bulk"),
    ("fwd_blk_rate_avg", "Fwd Avg Bulk Rate"),
    ("bwd_byts_b_avg", "Bwd Avg Bytes/Bulk"),
    ("bwd_pkts_b_avg", "Bwd Avg Packets/Bulk"),
    ("bwd_blk_rate_avg", "Bwd Avg Bulk Rate"),
    ("subflow_fwd_pkts", "Subflow Fwd Packets"),
    ("subflow_fwd_byts", "Subflow Fwd Bytes"),
    ("subflow_bwd_pkts", "Subflow Bwd Packets"),
    ("subflow_bwd_byts", "Subflow Bwd Bytes"),
    ("init_fwd_win_byts", "Init Fwd Win Bytes"),
    ("init_bwd_win_byts", "Init Bwd Win Bytes"),
    ("fwd_act_data_pkts", "Fwd Act Data Packets"),
    ("fwd_seg_size_min", "Fwd Seg Size Min"),
    ("active_mean", "Active Mean"),
    ("active_std", "Active Std"),
    ("active_max", "Active Max"),
    ("active_min", "Active Min"),
    ("idle_mean", "Idle Mean"),
    ("idle_std", "Idle Std"),
    ("idle_max", "Idle Max"),
    ("idle_min", "Idle Min"),
];

lazy_static! {
    static ref CICFLOWMETER_MAPPING: NameMapping = NameMapping {
        targets: CICFLOWMETER_COLUMNS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
    };
}

/// Extractor column name -> classifier column name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMapping {
    targets: HashMap<String, String>,
}

impl NameMapping {
    /// Builds a mapping, rejecting repeated source or target names.
    pub fn new<I, S, T>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut targets = HashMap::new();
        let mut seen_targets = HashSet::new();
        for (from, to) in pairs {
            let (from, to) = (from.into(), to.into());
            if !seen_targets.insert(to.clone()) {
                return Err(DDoSError::ConfigError(format!(
                    "column mapping has more than one source for '{}'",
                    to
                )));
            }
            if targets.insert(from.clone(), to).is_some() {
                return Err(DDoSError::ConfigError(format!(
                    "column mapping lists '{}' twice",
                    from
                )));
            }
        }
        Ok(NameMapping { targets })
    }

    /// The cicflowmeter naming used by the reference extractor.
    pub fn cicflowmeter() -> Self {
        CICFLOWMETER_MAPPING.clone()
    }

    /// Reads a JSON object of `"extractor name": "model name"` pairs.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&raw)?;
        let mut pairs = Vec::with_capacity(object.len());
        for (from, to) in object {
            match to {
                serde_json::Value::String(to) => pairs.push((from, to)),
                other => {
                    return Err(DDoSError::ConfigError(format!(
                        "column mapping for '{}' must be a string, got {}",
                        from, other
                    )))
                }
            }
        }
        NameMapping::new(pairs)
    }

    pub fn target(&self, column: &str) -> Option<&str> {
        self.targets.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

/// Raw extractor output: a header plus one row of text cells per flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl FlowTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        FlowTable { columns, rows }
    }

    /// Parses comma-separated text with a header line.
    pub fn from_csv<R: Read>(reader: R) -> std::result::Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(FlowTable { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Renames every column the mapping knows about, unless the target name
    /// is already taken. Returns how many columns were renamed.
    pub fn rename_columns(&mut self, mapping: &NameMapping) -> usize {
        let mut renamed = 0;
        for i in 0..self.columns.len() {
            let Some(target) = mapping.target(&self.columns[i]) else {
                continue;
            };
            if self.column_index(target).is_some() {
                continue;
            }
            self.columns[i] = target.to_string();
            renamed += 1;
        }
        renamed
    }
}

/// Classifier input: the required columns, in order, all values finite.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }
}

impl From<&FeatureMatrix> for FlowTable {
    fn from(matrix: &FeatureMatrix) -> Self {
        let rows = matrix
            .values
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        FlowTable::new(matrix.columns.clone(), rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub matrix: FeatureMatrix,
    /// Required columns that were absent and filled with the default.
    pub defaulted: Vec<String>,
    /// Rows discarded for holding a non-finite or unreadable value.
    pub dropped_rows: usize,
}

/// Turns extractor output into a classifier-ready matrix.
///
/// Columns are renamed through `mapping`, missing required columns are
/// filled with [`MISSING_FEATURE_DEFAULT`], and any row with an infinite,
/// NaN, empty or non-numeric value in a required column is dropped. An
/// empty result is valid.
pub fn reconcile(
    mut table: FlowTable,
    mapping: &NameMapping,
    required: &[String],
) -> Reconciliation {
    table.rename_columns(mapping);

    let sources: Vec<Option<usize>> = required
        .iter()
        .map(|name| table.column_index(name))
        .collect();
    let defaulted = required
        .iter()
        .zip(&sources)
        .filter(|(_, source)| source.is_none())
        .map(|(name, _)| name.clone())
        .collect();

    let mut kept: Vec<Vec<f64>> = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let values: Option<Vec<f64>> = sources
            .iter()
            .map(|source| match source {
                Some(idx) => row.get(*idx).and_then(|cell| parse_cell(cell)),
                None => Some(MISSING_FEATURE_DEFAULT),
            })
            .collect();
        if let Some(values) = values {
            kept.push(values);
        }
    }

    let dropped_rows = table.rows.len() - kept.len();
    let values = Array2::from_shape_fn((kept.len(), required.len()), |(i, j)| kept[i][j]);

    Reconciliation {
        matrix: FeatureMatrix {
            columns: required.to_vec(),
            values,
        },
        defaulted,
        dropped_rows,
    }
}

/// `None` stands for the missing marker: unparseable, NaN or infinite.
fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
