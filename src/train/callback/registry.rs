//! Callback descriptors and the registries resolving them.
//!
//! The `fit.callbacks` hyperparameter names callbacks by class name with a
//! free-form kwargs mapping. Resolution tries the builtin registry first and
//! a custom registry second, so applications can register their own
//! callbacks without touching this crate. A `start_from` on the descriptor
//! wraps the result in a [`DelayedCallback`].

use super::checkpoint::ModelCheckpoint;
use super::csv_logger::CsvLogger;
use super::delayed::DelayedCallback;
use super::divider::DividerLine;
use super::early_stopping::EarlyStopping;
use super::manager::CallbackManager;
use super::reduce_lr::ReduceLROnPlateau;
use super::traits::{Monitor, TrainerCallback};
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallbackError {
    /// Class name found in neither registry
    #[error("no callback named '{0}'")]
    UnknownCallback(String),

    /// Kwargs that do not deserialize into what the callback accepts
    #[error("invalid arguments for callback '{class_name}': {source}")]
    InvalidKwargs {
        class_name: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `monitor` kwarg naming no known loss
    #[error("invalid monitor for callback '{class_name}': {message}")]
    InvalidMonitor { class_name: String, message: String },
}

/// One callback descriptor from the `fit.callbacks` hyperparameter list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CallbackSpec {
    /// Name looked up in the registries, e.g. `EarlyStopping`
    pub class_name: String,
    /// Keyword arguments handed to the factory
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub kwargs: Mapping,
    /// Epoch from which the callback becomes active; earlier epoch events
    /// are suppressed through a [`DelayedCallback`] wrapper
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_from: Option<usize>,
}

impl CallbackSpec {
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            kwargs: Mapping::new(),
            start_from: None,
        }
    }
}

type Factory = Box<dyn Fn(&Mapping) -> Result<Box<dyn TrainerCallback>, CallbackError> + Send + Sync>;

/// Name-to-factory table for callback construction
#[derive(Default)]
pub struct CallbackRegistry {
    factories: BTreeMap<String, Factory>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The callbacks this crate ships: `EarlyStopping`, `ModelCheckpoint`,
    /// `ReduceLROnPlateau` and `CSVLogger`
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("EarlyStopping", |kwargs| {
            let kw: EarlyStoppingKwargs = parse_kwargs("EarlyStopping", kwargs)?;
            let monitor = parse_monitor("EarlyStopping", kw.monitor.as_deref())?;
            Ok(Box::new(EarlyStopping::new(kw.patience, kw.min_delta, monitor)))
        });
        registry.register("ModelCheckpoint", |kwargs| {
            let kw: CheckpointKwargs = parse_kwargs("ModelCheckpoint", kwargs)?;
            let monitor = parse_monitor("ModelCheckpoint", kw.monitor.as_deref())?;
            Ok(Box::new(
                ModelCheckpoint::new(kw.dir)
                    .save_best_only(kw.save_best_only)
                    .with_monitor(monitor),
            ))
        });
        registry.register("ReduceLROnPlateau", |kwargs| {
            let kw: ReduceLrKwargs = parse_kwargs("ReduceLROnPlateau", kwargs)?;
            let monitor = parse_monitor("ReduceLROnPlateau", kw.monitor.as_deref())?;
            Ok(Box::new(
                ReduceLROnPlateau::new(kw.factor, kw.patience)
                    .with_min_lr(kw.min_lr)
                    .with_monitor(monitor),
            ))
        });
        registry.register("CSVLogger", |kwargs| {
            let kw: CsvLoggerKwargs = parse_kwargs("CSVLogger", kwargs)?;
            Ok(Box::new(CsvLogger::new(kw.filename).append(kw.append)))
        });
        registry
    }

    /// Registry for callbacks outside the builtin set, pre-seeded with
    /// `DividerLine`. Applications add their own through [`register`](Self::register).
    #[must_use]
    pub fn custom() -> Self {
        let mut registry = Self::new();
        registry.register("DividerLine", |kwargs| {
            let _: NoKwargs = parse_kwargs("DividerLine", kwargs)?;
            Ok(Box::new(DividerLine::new()))
        });
        registry
    }

    /// Register a factory under `class_name`, replacing any earlier one
    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&Mapping) -> Result<Box<dyn TrainerCallback>, CallbackError> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Box::new(factory));
    }

    #[must_use]
    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Registered class names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Run the factory for `class_name`, or `None` when it is not registered
    #[must_use]
    pub fn build(
        &self,
        class_name: &str,
        kwargs: &Mapping,
    ) -> Option<Result<Box<dyn TrainerCallback>, CallbackError>> {
        self.factories.get(class_name).map(|factory| factory(kwargs))
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Build one callback from its descriptor: builtin registry first, custom
/// second, unknown names error. `start_from` wraps the result.
pub fn resolve_spec(
    spec: &CallbackSpec,
    builtin: &CallbackRegistry,
    custom: &CallbackRegistry,
) -> Result<Box<dyn TrainerCallback>, CallbackError> {
    let built = builtin
        .build(&spec.class_name, &spec.kwargs)
        .or_else(|| custom.build(&spec.class_name, &spec.kwargs))
        .ok_or_else(|| CallbackError::UnknownCallback(spec.class_name.clone()))??;
    match spec.start_from {
        Some(start_from) => {
            info!("OBS: '{}' activates at epoch {start_from}", spec.class_name);
            Ok(Box::new(DelayedCallback::new(built, start_from)))
        }
        None => Ok(built),
    }
}

/// Resolve a whole descriptor list into a [`CallbackManager`], logging each
/// resolved callback
pub fn resolve_callbacks(
    specs: &[CallbackSpec],
    builtin: &CallbackRegistry,
    custom: &CallbackRegistry,
) -> Result<CallbackManager, CallbackError> {
    let mut manager = CallbackManager::new();
    for (i, spec) in specs.iter().enumerate() {
        let callback = resolve_spec(spec, builtin, custom)?;
        info!(
            "[{}] Using callback: {}({})",
            i + 1,
            spec.class_name,
            render_kwargs(&spec.kwargs)
        );
        manager.add_boxed(callback);
    }
    Ok(manager)
}

fn parse_kwargs<T: DeserializeOwned>(class_name: &str, kwargs: &Mapping) -> Result<T, CallbackError> {
    serde_yaml::from_value(Value::Mapping(kwargs.clone())).map_err(|source| {
        CallbackError::InvalidKwargs {
            class_name: class_name.to_string(),
            source,
        }
    })
}

fn parse_monitor(class_name: &str, monitor: Option<&str>) -> Result<Monitor, CallbackError> {
    match monitor {
        None => Ok(Monitor::default()),
        Some(s) => s.parse().map_err(|message| CallbackError::InvalidMonitor {
            class_name: class_name.to_string(),
            message,
        }),
    }
}

fn render_kwargs(kwargs: &Mapping) -> String {
    let rendered: Vec<String> = kwargs
        .iter()
        .map(|(key, value)| format!("{}={}", render_scalar(key), render_scalar(value)))
        .collect();
    rendered.join(", ")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "Null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn default_patience() -> usize {
    10
}

fn default_factor() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EarlyStoppingKwargs {
    #[serde(default = "default_patience")]
    patience: usize,
    #[serde(default)]
    min_delta: f32,
    monitor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckpointKwargs {
    /// Directory the weight files land in
    dir: PathBuf,
    #[serde(default = "default_true")]
    save_best_only: bool,
    monitor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReduceLrKwargs {
    #[serde(default = "default_factor")]
    factor: f32,
    #[serde(default = "default_patience")]
    patience: usize,
    #[serde(default)]
    min_lr: f32,
    monitor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CsvLoggerKwargs {
    filename: PathBuf,
    #[serde(default)]
    append: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoKwargs {}
