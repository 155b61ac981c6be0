//! Parameter<T> - hardware-bound settings (logged quantities)
//!
//! A [`Parameter`] composes an [`Observable`] with a pair of hardware hooks
//! and a list of change listeners:
//!
//! ```text
//! Parameter<T>
//!   ├─ inner: Observable<T>       (value, subscriptions, validation, metadata)
//!   ├─ hooks: writer / reader     (connected on hardware connect, removed on disconnect)
//!   └─ change_listeners           (side effects: dependent settings, logging)
//! ```
//!
//! Hooks are shared between clones, so a component can hand out clones of its
//! settings at construction time and bind them to a device later in
//! `connect()`. `set()` runs: validate → write hardware → (optionally re-read
//! hardware) → update value → notify listeners. A failing hardware write leaves
//! the value untouched.
//!
//! [`ParameterSet`] is the ordered, type-erased registry a component or
//! measurement exposes. It snapshots every setting as JSON for provenance and
//! applies configuration tables by name.
//!
//! ```rust,ignore
//! let amplitude = Parameter::new("amplitude", 1.0).with_range(0.0, 10.0);
//! let dev = device.clone();
//! amplitude.connect_to_hardware_write(move |val| {
//!     let dev = dev.clone();
//!     Box::pin(async move { dev.lock().write_amp(val) })
//! });
//! amplitude.set(2.0).await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ScopeError;
use crate::observable::{Observable, ObservableMetadata};

type HardwareWriter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type HardwareReader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;
type ChangeListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HardwareHooks<T> {
    writer: Option<HardwareWriter<T>>,
    reader: Option<HardwareReader<T>>,
}

/// Bounds every setting value satisfies.
pub trait ParameterValue:
    Clone + Send + Sync + PartialEq + Debug + Serialize + DeserializeOwned + 'static
{
}

impl<T> ParameterValue for T where
    T: Clone + Send + Sync + PartialEq + Debug + Serialize + DeserializeOwned + 'static
{
}

/// Typed setting with hardware synchronization.
pub struct Parameter<T: ParameterValue> {
    inner: Observable<T>,
    hooks: Arc<RwLock<HardwareHooks<T>>>,
    change_listeners: Arc<RwLock<Vec<ChangeListener<T>>>>,
    reread_after_write: bool,
}

impl<T: ParameterValue> Clone for Parameter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            hooks: self.hooks.clone(),
            change_listeners: self.change_listeners.clone(),
            reread_after_write: self.reread_after_write,
        }
    }
}

impl<T: ParameterValue> std::fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read();
        f.debug_struct("Parameter")
            .field("name", &self.inner.name())
            .field("value", &self.get())
            .field("has_writer", &hooks.writer.is_some())
            .field("has_reader", &hooks.reader.is_some())
            .finish()
    }
}

impl<T: ParameterValue> Parameter<T> {
    /// Create new parameter with initial value
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self {
            inner: Observable::new(name, initial),
            hooks: Arc::new(RwLock::new(HardwareHooks {
                writer: None,
                reader: None,
            })),
            change_listeners: Arc::new(RwLock::new(Vec::new())),
            reread_after_write: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.inner = self.inner.with_description(description);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.inner = self.inner.with_units(unit);
        self
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.inner = self.inner.with_dtype(dtype);
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.with_validator(validator);
        self
    }

    /// Set discrete labelled choices.
    pub fn with_choices(mut self, choices: Vec<(String, T)>) -> Self {
        self.inner = self.inner.with_choices(choices);
        self
    }

    /// Make parameter read-only for `set()`; drivers use `update_value`.
    pub fn read_only(mut self) -> Self {
        self.inner = self.inner.read_only();
        self
    }

    /// After every hardware write, read the value back instead of trusting
    /// the requested one.
    pub fn reread_from_hardware_after_write(mut self) -> Self {
        self.reread_after_write = true;
        self
    }

    pub fn change_choices(&self, choices: Vec<(String, T)>) {
        self.inner.change_choices(choices);
    }

    /// Connect hardware write function
    pub fn connect_to_hardware_write(
        &self,
        writer: impl Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    ) {
        self.hooks.write().writer = Some(Arc::new(writer));
    }

    /// Connect hardware read function
    pub fn connect_to_hardware_read(
        &self,
        reader: impl Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
    ) {
        self.hooks.write().reader = Some(Arc::new(reader));
    }

    /// Connect both hardware read and write functions
    pub fn connect_to_hardware(
        &self,
        reader: impl Fn() -> BoxFuture<'static, Result<T>> + Send + Sync + 'static,
        writer: impl Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    ) {
        self.connect_to_hardware_read(reader);
        self.connect_to_hardware_write(writer);
    }

    /// Drop both hardware hooks.
    pub fn disconnect_from_hardware(&self) {
        let mut hooks = self.hooks.write();
        hooks.writer = None;
        hooks.reader = None;
    }

    pub fn has_hardware_reader(&self) -> bool {
        self.hooks.read().reader.is_some()
    }

    pub fn has_hardware_writer(&self) -> bool {
        self.hooks.read().writer.is_some()
    }

    /// Add change listener (called after every value update)
    pub fn add_listener(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.change_listeners.write().push(Arc::new(listener));
    }

    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Set value (validates, writes to hardware if connected, notifies)
    ///
    /// Validation happens before the hardware write so an invalid value
    /// never reaches the device.
    pub async fn set(&self, value: T) -> Result<()> {
        self.inner.validate(&value)?;
        self.apply(value).await
    }

    /// Update from driver or measurement code.
    ///
    /// Skips validation and the read-only check. With `write_hardware` the
    /// connected writer still runs first.
    pub async fn update_value(&self, value: T, write_hardware: bool) -> Result<()> {
        if write_hardware {
            self.apply(value).await
        } else {
            self.store(value);
            Ok(())
        }
    }

    /// Update the cached value without touching hardware.
    pub fn store(&self, value: T) {
        self.inner.set_unchecked(value.clone());
        self.notify(&value);
    }

    async fn apply(&self, value: T) -> Result<()> {
        let writer = self.hooks.read().writer.clone();
        if let Some(writer) = writer {
            writer(value.clone()).await?;
            if self.reread_after_write && self.has_hardware_reader() {
                self.read_from_hardware().await?;
                return Ok(());
            }
        }
        self.store(value);
        Ok(())
    }

    /// Read current value from hardware and update the parameter.
    ///
    /// Hardware is the source of truth, so no validation is applied.
    pub async fn read_from_hardware(&self) -> Result<T> {
        let reader = self
            .hooks
            .read()
            .reader
            .clone()
            .ok_or_else(|| ScopeError::ParameterNoHardwareReader(self.name()))?;

        let value = reader().await?;
        self.store(value.clone());
        Ok(value)
    }

    fn notify(&self, value: &T) {
        let listeners = self.change_listeners.read().clone();
        for listener in listeners.iter() {
            listener(value);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.subscribe()
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    pub fn metadata(&self) -> ObservableMetadata {
        self.inner.metadata()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.metadata().read_only
    }

    /// Direct access to the inner Observable.
    pub fn inner(&self) -> &Observable<T> {
        &self.inner
    }
}

impl<T> Parameter<T>
where
    T: ParameterValue + PartialOrd,
{
    /// Set an inclusive range constraint.
    pub fn with_range(mut self, min: T, max: T) -> Self {
        self.inner = self.inner.with_range(min, max);
        self
    }

    /// Replace the range constraint after construction.
    pub fn change_min_max(&self, min: T, max: T) {
        self.inner.change_min_max(min, max);
    }
}

impl Parameter<String> {
    /// Restrict to string choices whose labels equal their values.
    pub fn with_string_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner = self.inner.with_string_choices(choices);
        self
    }
}

// =============================================================================
// Type-erased access
// =============================================================================

/// Type-erased view of a [`Parameter`] used by [`ParameterSet`].
#[async_trait]
pub trait ParameterAny: Send + Sync {
    fn name(&self) -> String;

    fn metadata(&self) -> ObservableMetadata;

    fn get_json(&self) -> Result<serde_json::Value>;

    /// Decode and `set()` a JSON value.
    async fn set_json(&self, value: serde_json::Value) -> Result<()>;

    /// Re-read from hardware; returns `false` when no reader is connected.
    async fn refresh(&self) -> Result<bool>;

    fn disconnect_from_hardware(&self);

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<T: ParameterValue> ParameterAny for Parameter<T> {
    fn name(&self) -> String {
        Parameter::name(self)
    }

    fn metadata(&self) -> ObservableMetadata {
        Parameter::metadata(self)
    }

    fn get_json(&self) -> Result<serde_json::Value> {
        self.inner.get_json()
    }

    async fn set_json(&self, value: serde_json::Value) -> Result<()> {
        let value = self.inner.decode_json(value)?;
        self.set(value).await
    }

    async fn refresh(&self) -> Result<bool> {
        if !self.has_hardware_reader() {
            return Ok(false);
        }
        self.read_from_hardware().await?;
        Ok(true)
    }

    fn disconnect_from_hardware(&self) {
        Parameter::disconnect_from_hardware(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Ordered collection of settings belonging to one component or measurement.
#[derive(Default)]
pub struct ParameterSet {
    order: Vec<String>,
    parameters: HashMap<String, Arc<dyn ParameterAny>>,
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("names", &self.order)
            .finish()
    }
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter and hand back a clone bound to the same value.
    pub fn add<T: ParameterValue>(&mut self, parameter: Parameter<T>) -> Parameter<T> {
        let name = parameter.name();
        if self.parameters.contains_key(&name) {
            debug!(parameter = %name, "replacing existing parameter");
        } else {
            self.order.push(name.clone());
        }
        self.parameters.insert(name, Arc::new(parameter.clone()));
        parameter
    }

    /// Typed clone of a registered parameter.
    pub fn get_typed<T: ParameterValue>(&self, name: &str) -> Option<Parameter<T>> {
        self.parameters
            .get(name)
            .and_then(|p| p.as_any().downcast_ref::<Parameter<T>>())
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ParameterAny>> {
        self.parameters.get(name).cloned()
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ParameterAny>> {
        self.order.iter().filter_map(|n| self.parameters.get(n))
    }

    /// Current values of every setting, keyed by name.
    pub fn snapshot(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        for parameter in self.iter() {
            map.insert(parameter.name(), parameter.get_json()?);
        }
        Ok(map)
    }

    /// Refresh every setting that has a hardware reader.
    pub async fn read_all_from_hardware(&self) -> Result<()> {
        for parameter in self.iter() {
            parameter.refresh().await?;
        }
        Ok(())
    }

    pub fn disconnect_all_from_hardware(&self) {
        for parameter in self.iter() {
            parameter.disconnect_from_hardware();
        }
    }

    /// Set a single value by name from JSON.
    pub async fn set_json(&self, name: &str, value: serde_json::Value) -> Result<()> {
        let parameter = self
            .get(name)
            .ok_or_else(|| ScopeError::UnknownParameter(name.to_string()))?;
        parameter.set_json(value).await
    }

    /// Apply a configuration table (`name = value` pairs) in table order.
    pub async fn apply_toml(&self, table: &toml::Value) -> Result<()> {
        let Some(table) = table.as_table() else {
            return Err(ScopeError::Configuration(
                "settings must be a TOML table".to_string(),
            )
            .into());
        };
        for (name, value) in table {
            let json = serde_json::to_value(value)?;
            self.set_json(name, json).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_parameter_basic() {
        let param = Parameter::new("sampling_period", 0.1).with_unit("s");
        assert_eq!(param.get(), 0.1);
        param.set(0.2).await.unwrap();
        assert_eq!(param.get(), 0.2);
        assert_eq!(param.metadata().units.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_parameter_range_rejects_before_hardware() {
        let writes = Arc::new(AtomicUsize::new(0));
        let param = Parameter::new("slit_input_side", 100.0).with_range(10.0, 2500.0);
        let counter = writes.clone();
        param.connect_to_hardware_write(move |_| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        assert!(param.set(5000.0).await.is_err());
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        param.set(50.0).await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_value() {
        let param = Parameter::new("center_wl", 500.0);
        param.connect_to_hardware_write(|_| {
            Box::pin(async { Err::<(), _>(anyhow::anyhow!("turret busy")) })
        });
        assert!(param.set(600.0).await.is_err());
        assert_eq!(param.get(), 500.0);
    }

    #[tokio::test]
    async fn test_reread_after_write() {
        let hw = Arc::new(RwLock::new(0.0_f64));
        let param = Parameter::new("center_wl", 0.0).reread_from_hardware_after_write();

        let w = hw.clone();
        let r = hw.clone();
        param.connect_to_hardware(
            move || {
                let r = r.clone();
                Box::pin(async move { Ok(*r.read()) })
            },
            move |v| {
                let w = w.clone();
                // the device rounds to 0.5 nm
                Box::pin(async move {
                    *w.write() = (v * 2.0).round() / 2.0;
                    Ok(())
                })
            },
        );

        param.set(632.8).await.unwrap();
        assert_eq!(param.get(), 633.0);
    }

    #[tokio::test]
    async fn test_hooks_shared_between_clones_and_disconnect() {
        let param = Parameter::new("x_position", 0.0).read_only();
        let clone = param.clone();
        clone.connect_to_hardware_read(|| Box::pin(async { Ok(42.0) }));

        assert_eq!(param.read_from_hardware().await.unwrap(), 42.0);
        assert_eq!(param.get(), 42.0);

        param.disconnect_from_hardware();
        assert!(!clone.has_hardware_reader());
        assert!(clone.read_from_hardware().await.is_err());
    }

    #[tokio::test]
    async fn test_read_only_update_value() {
        let param = Parameter::new("grating_name", String::new()).read_only();
        assert!(param.set("x".into()).await.is_err());
        param
            .update_value("300g/mm 500nm".into(), false)
            .await
            .unwrap();
        assert_eq!(param.get(), "300g/mm 500nm");
    }

    #[tokio::test]
    async fn test_listeners_called() {
        let seen = Arc::new(AtomicUsize::new(0));
        let param = Parameter::new("grating_id", 1i64);
        let s = seen.clone();
        param.add_listener(move |v| {
            s.store(*v as usize, Ordering::SeqCst);
        });
        param.set(3).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parameter_set_order_snapshot_and_apply() {
        let mut settings = ParameterSet::new();
        let port = settings.add(Parameter::new("port", "COM1".to_string()));
        let amp = settings.add(Parameter::new("amplitude", 1.0));
        settings.add(Parameter::new("rand_data", 0.0).read_only());

        assert_eq!(settings.names(), &["port", "amplitude", "rand_data"]);
        let snap = settings.snapshot().unwrap();
        assert_eq!(snap["port"], serde_json::json!("COM1"));

        let table: toml::Value = toml::from_str("amplitude = 2.5\nport = \"COM4\"").unwrap();
        settings.apply_toml(&table).await.unwrap();
        assert_eq!(amp.get(), 2.5);
        assert_eq!(port.get(), "COM4");

        let bad: toml::Value = toml::from_str("nope = 1").unwrap();
        assert!(settings.apply_toml(&bad).await.is_err());

        let typed = settings.get_typed::<f64>("amplitude").unwrap();
        assert_eq!(typed.get(), 2.5);
        assert!(settings.get_typed::<i64>("amplitude").is_none());
    }

    #[tokio::test]
    async fn test_read_all_skips_unbound() {
        let mut settings = ParameterSet::new();
        let bound = settings.add(Parameter::new("sine_data", 0.0));
        settings.add(Parameter::new("amplitude", 1.0));
        bound.connect_to_hardware_read(|| Box::pin(async { Ok(0.5) }));

        settings.read_all_from_hardware().await.unwrap();
        assert_eq!(bound.get(), 0.5);

        settings.disconnect_all_from_hardware();
        assert!(!bound.has_hardware_reader());
    }
}
