//! Fit configurations and the container that runs them.
//!
//! The fitting itself is delegated to a [`FitModel`]; this module only keeps
//! track of named configurations (model, estimator, parameter overrides) and
//! of the most recent result, which can be saved alongside the data through
//! [`FitResult::to_metadata`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{LabstoreError, Result};
use crate::models::Metadata;

/// Reserved configuration name that clears the last fit.
pub const NO_FIT: &str = "No Fit";

#[derive(Debug, Clone, PartialEq)]
pub struct FitParameter {
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
    /// Standard error, filled in by a fit.
    pub stderr: Option<f64>,
}

impl FitParameter {
    /// A free parameter without bounds.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            vary: true,
            stderr: None,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.vary = false;
        self
    }
}

pub type FitParameters = BTreeMap<String, FitParameter>;

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub parameters: FitParameters,
    /// Model evaluated at the input abscissa with the fitted parameters.
    pub best_fit: Vec<f64>,
    pub chi_square: Option<f64>,
}

impl FitResult {
    /// Varied parameters as metadata: `<prefix><name>` for the value and
    /// `<prefix><name>_err` for the standard error when known.
    pub fn to_metadata(&self, prefix: &str) -> Metadata {
        let mut metadata = Metadata::new();
        for (name, param) in self.parameters.iter().filter(|(_, p)| p.vary) {
            metadata.insert(format!("{prefix}{name}"), param.value);
            if let Some(stderr) = param.stderr {
                metadata.insert(format!("{prefix}{name}_err"), stderr);
            }
        }
        if let Some(chi_square) = self.chi_square {
            metadata.insert(format!("{prefix}chi_square"), chi_square);
        }
        metadata
    }

    /// One `name: value ± error unit` line per varied parameter.
    pub fn formatted(&self, units: &BTreeMap<String, String>) -> String {
        let mut lines = vec![];
        for (name, param) in self.parameters.iter().filter(|(_, p)| p.vary) {
            let mut line = format!("{name}: {}", param.value);
            if let Some(stderr) = param.stderr {
                line.push_str(&format!(" ± {stderr}"));
            }
            if let Some(unit) = units.get(name).filter(|u| !u.is_empty()) {
                line.push(' ');
                line.push_str(unit);
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// A fit model provided by the host application.
pub trait FitModel: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Names of the initial-guess strategies this model offers.
    fn estimators(&self) -> Vec<String>;

    fn default_parameters(&self) -> FitParameters;

    fn estimate(&self, estimator: &str, x: &[f64], y: &[f64]) -> Result<FitParameters>;

    fn fit(&self, x: &[f64], y: &[f64], parameters: &FitParameters) -> Result<FitResult>;
}

// ─── Configurations ──────────────────────────────────────────────────────────

/// A named fit setup: model, optional estimator, optional parameter
/// overrides.
#[derive(Debug, Clone)]
pub struct FitConfiguration {
    name: String,
    model: Arc<dyn FitModel>,
    estimator: Option<String>,
    custom_parameters: Option<FitParameters>,
}

impl FitConfiguration {
    pub fn new(name: impl Into<String>, model: Arc<dyn FitModel>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LabstoreError::InvalidConfig(
                "fit configuration name must not be empty".into(),
            ));
        }
        if name == NO_FIT {
            return Err(LabstoreError::InvalidConfig(format!(
                "{NO_FIT:?} is a reserved fit configuration name"
            )));
        }
        Ok(Self {
            name,
            model,
            estimator: None,
            custom_parameters: None,
        })
    }

    pub fn with_estimator(mut self, estimator: &str) -> Result<Self> {
        self.set_estimator(Some(estimator))?;
        Ok(self)
    }

    pub fn with_custom_parameters(mut self, parameters: FitParameters) -> Result<Self> {
        self.set_custom_parameters(Some(parameters))?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Arc<dyn FitModel> {
        &self.model
    }

    pub fn estimator(&self) -> Option<&str> {
        self.estimator.as_deref()
    }

    pub fn custom_parameters(&self) -> Option<&FitParameters> {
        self.custom_parameters.as_ref()
    }

    pub fn available_estimators(&self) -> Vec<String> {
        self.model.estimators()
    }

    pub fn default_parameters(&self) -> FitParameters {
        self.model.default_parameters()
    }

    pub fn set_estimator(&mut self, estimator: Option<&str>) -> Result<()> {
        if let Some(estimator) = estimator {
            if !self.available_estimators().iter().any(|e| e == estimator) {
                return Err(LabstoreError::InvalidConfig(format!(
                    "model {} has no estimator {estimator:?}",
                    self.model.name()
                )));
            }
        }
        self.estimator = estimator.map(str::to_string);
        Ok(())
    }

    /// Overrides must name parameters the model defines.
    pub fn set_custom_parameters(&mut self, parameters: Option<FitParameters>) -> Result<()> {
        if let Some(parameters) = &parameters {
            let defaults = self.default_parameters();
            let unknown: Vec<&str> = parameters
                .keys()
                .filter(|name| !defaults.contains_key(*name))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(LabstoreError::InvalidConfig(format!(
                    "model {} has no parameters {}",
                    self.model.name(),
                    unknown.join(", ")
                )));
            }
        }
        self.custom_parameters = parameters;
        Ok(())
    }

    /// Starting parameters: estimated (or the model defaults), then
    /// overridden by the custom parameters.
    fn initial_parameters(&self, x: &[f64], y: &[f64]) -> Result<FitParameters> {
        let mut parameters = match &self.estimator {
            Some(estimator) => self.model.estimate(estimator, x, y)?,
            None => self.model.default_parameters(),
        };
        if let Some(custom) = &self.custom_parameters {
            parameters.extend(custom.clone());
        }
        Ok(parameters)
    }
}

/// Ordered, name-unique set of fit configurations.
#[derive(Debug, Clone, Default)]
pub struct FitConfigurations {
    configurations: Vec<FitConfiguration>,
}

impl FitConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, configuration: FitConfiguration) -> Result<()> {
        if self.contains(configuration.name()) {
            return Err(LabstoreError::InvalidConfig(format!(
                "fit configuration {:?} already defined",
                configuration.name()
            )));
        }
        self.configurations.push(configuration);
        Ok(())
    }

    /// Unknown names are ignored.
    pub fn remove(&mut self, name: &str) -> Option<FitConfiguration> {
        let index = self.configurations.iter().position(|c| c.name() == name)?;
        Some(self.configurations.remove(index))
    }

    pub fn get(&self, name: &str) -> Result<&FitConfiguration> {
        self.configurations
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| LabstoreError::FitConfigurationNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut FitConfiguration> {
        self.configurations
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| LabstoreError::FitConfigurationNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configurations.iter().any(|c| c.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.configurations.iter().map(|c| c.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FitConfiguration> {
        self.configurations.iter()
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

// ─── Container ───────────────────────────────────────────────────────────────

/// Runs named configurations and remembers the latest result.
#[derive(Debug)]
pub struct FitContainer {
    configurations: RwLock<FitConfigurations>,
    last_fit: Mutex<(String, Option<FitResult>)>,
}

impl FitContainer {
    pub fn new(configurations: FitConfigurations) -> Self {
        Self {
            configurations: RwLock::new(configurations),
            last_fit: Mutex::new((NO_FIT.to_string(), None)),
        }
    }

    pub fn add_configuration(&self, configuration: FitConfiguration) -> Result<()> {
        self.configurations.write().add(configuration)
    }

    pub fn remove_configuration(&self, name: &str) -> Option<FitConfiguration> {
        self.configurations.write().remove(name)
    }

    pub fn configuration_names(&self) -> Vec<String> {
        self.configurations.read().names()
    }

    /// Name of the configuration used last, and its result.
    pub fn last_fit(&self) -> (String, Option<FitResult>) {
        self.last_fit.lock().clone()
    }

    /// Fit `y(x)` with the named configuration. [`NO_FIT`] clears the last
    /// result instead.
    pub fn fit_data(&self, name: &str, x: &[f64], y: &[f64]) -> Result<Option<FitResult>> {
        if name == NO_FIT {
            *self.last_fit.lock() = (NO_FIT.to_string(), None);
            debug!("Cleared last fit");
            return Ok(None);
        }
        if x.len() != y.len() {
            return Err(LabstoreError::ShapeMismatch(format!(
                "x has {} values, y has {}",
                x.len(),
                y.len()
            )));
        }

        let configuration = self.configurations.read().get(name)?.clone();
        let parameters = configuration.initial_parameters(x, y)?;
        let result = configuration.model().fit(x, y, &parameters)?;

        info!(
            configuration = name,
            model = configuration.model().name(),
            points = x.len(),
            "Fit finished"
        );
        *self.last_fit.lock() = (name.to_string(), Some(result.clone()));
        Ok(Some(result))
    }
}

impl Default for FitContainer {
    fn default() -> Self {
        Self::new(FitConfigurations::new())
    }
}
