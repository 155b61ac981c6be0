//! Observable values
//!
//! Reactive values built on `tokio::sync::watch` for multi-subscriber
//! notifications. An [`Observable`] is the storage half of a setting: it owns
//! the current value, its metadata (units, limits, choices) and an optional
//! validator. Hardware synchronisation lives one layer up in
//! [`Parameter`](crate::parameter::Parameter).
//!
//! Metadata and validator sit behind a shared `parking_lot::RwLock`, so limits
//! and choices can be changed after construction and every clone sees the
//! change. Drivers rely on this: a stage narrows its target limits once the
//! travel range is known, and the spectrometer relabels its grating choices
//! after reading the turret.
//!
//! ```rust,ignore
//! let center_wl = Observable::new("center_wl", 500.0)
//!     .with_units("nm")
//!     .with_range(-100.0, 2000.0);
//!
//! let mut rx = center_wl.subscribe();
//! center_wl.set(632.8)?;
//! assert!(rx.has_changed()?);
//! ```

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::ScopeError;

/// Validator callback type.
pub type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

struct ObservableSharedState<T> {
    metadata: ObservableMetadata,
    validator: Option<Validator<T>>,
}

/// A thread-safe, observable value with change notifications.
///
/// Clones share the same watch channel and the same metadata.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    sender: watch::Sender<T>,
    shared: Arc<RwLock<ObservableSharedState<T>>>,
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.read();
        f.debug_struct("Observable")
            .field("metadata", &shared.metadata)
            .field("has_validator", &shared.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Metadata for an observable value.
///
/// `min_value`/`max_value` and `enum_values` mirror whatever constraint is
/// currently installed so that a front end can render limits and choices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Setting name, unique within its component or measurement.
    pub name: String,

    pub description: Option<String>,

    /// Physical units (e.g. "nm", "um", "um/s").
    pub units: Option<String>,

    /// Read-only values reject `set()`; drivers still update them through
    /// `Parameter::update_value`.
    pub read_only: bool,

    /// Type hint: "float", "int", "bool", "string", "enum" or "array".
    #[serde(default)]
    pub dtype: String,

    #[serde(default)]
    pub min_value: Option<f64>,

    #[serde(default)]
    pub max_value: Option<f64>,

    /// Labels of the allowed choices, in order.
    #[serde(default)]
    pub enum_values: Vec<String>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new observable with an initial value.
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        let (sender, _) = watch::channel(initial_value);
        Self {
            sender,
            shared: Arc::new(RwLock::new(ObservableSharedState {
                metadata: ObservableMetadata {
                    name: name.into(),
                    ..ObservableMetadata::default()
                },
                validator: None,
            })),
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.shared.write().metadata.description = Some(description.into());
        self
    }

    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.shared.write().metadata.units = Some(units.into());
        self
    }

    pub fn with_dtype(self, dtype: impl Into<String>) -> Self {
        self.shared.write().metadata.dtype = dtype.into();
        self
    }

    /// Mark this observable as read-only.
    pub fn read_only(self) -> Self {
        self.shared.write().metadata.read_only = true;
        self
    }

    /// Install a custom validator, replacing any range or choice constraint.
    pub fn with_validator<F>(self, validator: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.shared.write().validator = Some(Arc::new(validator));
        self
    }

    /// Get the current value (clone).
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    pub fn name(&self) -> String {
        self.shared.read().metadata.name.clone()
    }

    /// Get the metadata (returns a clone).
    pub fn metadata(&self) -> ObservableMetadata {
        self.shared.read().metadata.clone()
    }

    /// Update metadata in place; visible to all clones.
    pub fn with_metadata<F>(&self, f: F)
    where
        F: FnOnce(&mut ObservableMetadata),
    {
        let mut guard = self.shared.write();
        f(&mut guard.metadata);
    }

    /// Validate a value without setting it.
    ///
    /// Fails for read-only observables and when the installed validator
    /// rejects the value.
    pub fn validate(&self, value: &T) -> Result<()> {
        let guard = self.shared.read();
        if guard.metadata.read_only {
            return Err(ScopeError::ParameterReadOnly(guard.metadata.name.clone()).into());
        }
        if let Some(validator) = &guard.validator {
            validator(value)?;
        }
        Ok(())
    }

    /// Check the value against the validator only, ignoring the read-only flag.
    pub fn check(&self, value: &T) -> Result<()> {
        let validator = self.shared.read().validator.clone();
        match validator {
            Some(validator) => validator(value),
            None => Ok(()),
        }
    }

    /// Set a new value, notifying all subscribers.
    pub fn set(&self, value: T) -> Result<()> {
        self.validate(&value)?;
        self.sender.send_replace(value);
        Ok(())
    }

    /// Replace the value without validation.
    pub(crate) fn set_unchecked(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialOrd + Debug + Serialize + 'static,
{
    /// Add an inclusive `[min, max]` range constraint.
    pub fn with_range(self, min: T, max: T) -> Self {
        self.change_min_max(min, max);
        self
    }

    /// Replace the range constraint; visible to all clones.
    pub fn change_min_max(&self, min: T, max: T) {
        let mut guard = self.shared.write();
        guard.metadata.min_value = as_f64(&min);
        guard.metadata.max_value = as_f64(&max);
        let name = guard.metadata.name.clone();
        guard.validator = Some(Arc::new(move |value: &T| {
            // NaN compares false both ways and is rejected here too
            if value >= &min && value <= &max {
                Ok(())
            } else {
                Err(ScopeError::ParameterOutOfRange {
                    name: name.clone(),
                    value: format!("{:?}", value),
                    min: format!("{:?}", min),
                    max: format!("{:?}", max),
                }
                .into())
            }
        }));
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    /// Restrict the value to a list of labelled choices.
    pub fn with_choices(self, choices: Vec<(String, T)>) -> Self {
        self.change_choices(choices);
        self
    }

    /// Replace the allowed choices; visible to all clones.
    pub fn change_choices(&self, choices: Vec<(String, T)>) {
        let mut guard = self.shared.write();
        guard.metadata.enum_values = choices.iter().map(|(label, _)| label.clone()).collect();
        let name = guard.metadata.name.clone();
        let values: Vec<T> = choices.into_iter().map(|(_, value)| value).collect();
        guard.validator = Some(Arc::new(move |value: &T| {
            if values.iter().any(|c| c == value) {
                Ok(())
            } else {
                Err(ScopeError::ParameterInvalidChoice(name.clone()).into())
            }
        }));
    }

    /// Labels of the current choices.
    pub fn choice_labels(&self) -> Vec<String> {
        self.shared.read().metadata.enum_values.clone()
    }
}

impl Observable<String> {
    /// Restrict a string value to the given choices (labels equal values).
    pub fn with_string_choices<I, S>(self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices = choices
            .into_iter()
            .map(|c| {
                let c = c.into();
                (c.clone(), c)
            })
            .collect();
        self.with_dtype("enum").with_choices(choices)
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    /// Get the current value as JSON.
    pub fn get_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self.get())
            .map_err(|e| anyhow!("Failed to serialize parameter '{}': {}", self.name(), e))
    }

    /// Decode a JSON value into `T` without applying it.
    pub fn decode_json(&self, json_value: serde_json::Value) -> Result<T> {
        serde_json::from_value(json_value).map_err(|e| {
            anyhow!(
                "Failed to deserialize parameter '{}': {}. Expected type: {}",
                self.name(),
                e,
                std::any::type_name::<T>()
            )
        })
    }
}

fn as_f64<T: Serialize>(value: &T) -> Option<f64> {
    serde_json::to_value(value).ok().and_then(|v| v.as_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observable_get_set() {
        let obs = Observable::new("amplitude", 1.0);
        assert_eq!(obs.get(), 1.0);
        obs.set(2.5).unwrap();
        assert_eq!(obs.get(), 2.5);
    }

    #[test]
    fn test_observable_read_only() {
        let obs = Observable::new("serial_num", "unknown".to_string()).read_only();
        assert!(obs.set("abc".into()).is_err());
        // check() ignores the read-only flag
        assert!(obs.check(&"abc".to_string()).is_ok());
    }

    #[test]
    fn test_observable_range_and_metadata() {
        let obs = Observable::new("center_wl", 500.0)
            .with_units("nm")
            .with_range(-100.0, 2000.0);

        assert!(obs.set(2500.0).is_err());
        assert!(obs.set(f64::NAN).is_err());
        assert!(obs.set(-100.0).is_ok());

        let meta = obs.metadata();
        assert_eq!(meta.units.as_deref(), Some("nm"));
        assert_eq!(meta.min_value, Some(-100.0));
        assert_eq!(meta.max_value, Some(2000.0));
    }

    #[test]
    fn test_change_min_max_propagates_to_clones() {
        let obs = Observable::new("x_target", 10.0).with_range(-1e9, 1e9);
        let clone = obs.clone();

        obs.change_min_max(0.1, 299.9);

        assert!(clone.set(300.0).is_err());
        assert!(clone.set(150.0).is_ok());
        assert_eq!(obs.get(), 150.0);
        assert_eq!(clone.metadata().max_value, Some(299.9));
    }

    #[test]
    fn test_change_choices() {
        let obs = Observable::new("grating_id", 1i64)
            .with_choices((1..=6).map(|i| (i.to_string(), i)).collect());
        assert!(obs.set(7).is_err());

        obs.change_choices(vec![
            ("1: 150g/mm 500".into(), 1),
            ("2: 1200g/mm 500".into(), 2),
        ]);
        assert!(obs.set(3).is_err());
        assert!(obs.set(2).is_ok());
        assert_eq!(obs.choice_labels()[1], "2: 1200g/mm 500");
    }

    #[test]
    fn test_string_choices() {
        let obs = Observable::new("input_flipper", "direct".to_string())
            .with_string_choices(["direct", "side"]);
        assert!(obs.set("side".into()).is_ok());
        assert!(obs.set("middle".into()).is_err());
        assert_eq!(obs.metadata().dtype, "enum");
    }

    #[tokio::test]
    async fn test_observable_subscription() {
        let obs = Observable::new("progress", 0.0);
        let mut rx = obs.subscribe();

        obs.set(50.0).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 50.0);
    }

    #[test]
    fn test_json_roundtrip_types() {
        let obs = Observable::new("N", 101i64);
        assert_eq!(obs.get_json().unwrap(), serde_json::json!(101));
        assert_eq!(obs.decode_json(serde_json::json!(7)).unwrap(), 7);
        assert!(obs.decode_json(serde_json::json!("seven")).is_err());
    }
}
