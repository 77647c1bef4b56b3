use std::path::{Path, PathBuf};

use log::{info, warn};
use numpy::IntoPyArray;
use pyo3::prelude::*;
use pyo3::types::IntoPyDict;

use crate::error::{DDoSError, Result};
use crate::schema::FeatureMatrix;

/// A trained model mapping each feature row to a label.
///
/// Implementations must return exactly one label per row, in row order.
/// An `Err` means the model itself is unusable, not that the input was bad.
pub trait Classifier {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<String>>;
}

/// scikit-learn model stored with joblib, run through embedded Python.
pub struct ModelPredictor {
    model: PyObject,
    model_path: PathBuf,
}

impl ModelPredictor {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.is_file() {
            return Err(DDoSError::ModelError(format!(
                "{} does not exist",
                model_path.display()
            )));
        }

        Python::with_gil(|py| -> Result<Self> {
            // sklearn complains about feature names and versions on every call
            py.import("warnings")?
                .call_method1("filterwarnings", ("ignore",))?;

            let joblib = py.import("joblib")?;
            let model = joblib
                .call_method1("load", (model_path.to_string_lossy().into_owned(),))?
                .unbind();

            Ok(ModelPredictor {
                model,
                model_path: model_path.to_path_buf(),
            })
        })
    }

    /// Loads the model, running the training module first if the file is
    /// missing or unreadable.
    pub fn load_or_train(
        model_path: &Path,
        trainer_module: &str,
        trainer_dir: &Path,
    ) -> Result<Self> {
        info!("Loading model: {}...", model_path.display());
        match Self::load(model_path) {
            Ok(predictor) => Ok(predictor),
            Err(err) => {
                warn!("{}; training a new model", err);
                train_model(model_path, trainer_module, trainer_dir)?;
                Self::load(model_path).map_err(|e| {
                    DDoSError::SetupError(format!("model unavailable after training: {}", e))
                })
            }
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Column names the model was fitted with, when it recorded them.
    pub fn feature_names(&self) -> Option<Vec<String>> {
        Python::with_gil(|py| {
            let names = self.model.bind(py).getattr("feature_names_in_").ok()?;
            names.call_method0("tolist").ok()?.extract::<Vec<String>>().ok()
        })
    }
}

impl Classifier for ModelPredictor {
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<String>> {
        if features.is_empty() {
            return Ok(Vec::new());
        }

        let labels = Python::with_gil(|py| -> Result<Vec<String>> {
            let pandas = py.import("pandas")?;

            // keep the training column names so sklearn sees the same schema
            let data = features.values().to_owned().into_pyarray(py);
            let kwargs = [("columns", features.columns().to_vec())].into_py_dict(py)?;
            let frame = pandas.call_method("DataFrame", (data,), Some(&kwargs))?;

            let prediction = self.model.bind(py).call_method1("predict", (frame,))?;

            // labels may come back as str, int or numpy scalars
            let mut labels = Vec::with_capacity(features.nrows());
            for item in prediction.call_method0("tolist")?.try_iter()? {
                labels.push(item?.str()?.to_string());
            }
            Ok(labels)
        })?;

        if labels.len() != features.nrows() {
            return Err(DDoSError::ModelError(format!(
                "model returned {} labels for {} flows",
                labels.len(),
                features.nrows()
            )));
        }
        Ok(labels)
    }
}

fn train_model(model_path: &Path, trainer_module: &str, trainer_dir: &Path) -> Result<()> {
    info!("Running {}.train({})...", trainer_module, model_path.display());
    Python::with_gil(|py| -> Result<()> {
        let sys_path = py.import("sys")?.getattr("path")?;
        sys_path.call_method1("insert", (0, trainer_dir.to_string_lossy().into_owned()))?;

        let trainer = py.import(trainer_module)?;
        trainer.call_method1("train", (model_path.to_string_lossy().into_owned(),))?;
        Ok(())
    })
    .map_err(|e| DDoSError::SetupError(format!("training failed: {}", e)))
}
