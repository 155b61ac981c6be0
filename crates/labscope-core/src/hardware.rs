//! Hardware component lifecycle.
//!
//! A [`HardwareComponent`] owns a [`ParameterSet`] of settings and binds them
//! to a vendor device on `connect()`. Every component carries the two
//! framework settings `connected` and `debug_mode`; [`ComponentBase`] bundles
//! them together with the settings table so drivers do not repeat the
//! boilerplate.
//!
//! Vendor SDK calls are blocking. [`run_blocking`] executes them on the
//! runtime's blocking pool against a device shared behind a
//! `parking_lot::Mutex`, so setting hooks can await them without stalling
//! the async workers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::parameter::{Parameter, ParameterSet};

/// Shared handle to a blocking vendor device.
pub type SharedDevice<D> = Arc<Mutex<D>>;

/// Lifecycle of a piece of hardware behind a settings interface.
#[async_trait]
pub trait HardwareComponent: Send + Sync {
    /// Unique component name (`andor_spec`, `mcl_xy_stage`, ...).
    fn name(&self) -> &str;

    fn settings(&self) -> &ParameterSet;

    /// Open the device and bind settings to it.
    async fn connect(&self) -> Result<()>;

    /// Unbind settings and release the device. No-op when not connected.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Refresh every hardware-bound setting.
    async fn read_from_hardware(&self) -> Result<()> {
        self.settings().read_all_from_hardware().await
    }
}

/// Settings table plus the `connected` / `debug_mode` pair every component has.
#[derive(Debug)]
pub struct ComponentBase {
    name: String,
    pub settings: ParameterSet,
    pub connected: Parameter<bool>,
    pub debug_mode: Parameter<bool>,
}

impl ComponentBase {
    pub fn new(name: impl Into<String>) -> Self {
        let mut settings = ParameterSet::new();
        let connected = settings.add(Parameter::new("connected", false));
        let debug_mode = settings.add(Parameter::new("debug_mode", false));
        Self {
            name: name.into(),
            settings,
            connected,
            debug_mode,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a component-specific setting.
    pub fn add<T: crate::parameter::ParameterValue>(
        &mut self,
        parameter: Parameter<T>,
    ) -> Parameter<T> {
        self.settings.add(parameter)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn mark_connected(&self, connected: bool) {
        self.connected.store(connected);
    }

    /// Drop all hooks and flag the component as disconnected.
    pub fn release(&self) {
        self.settings.disconnect_all_from_hardware();
        self.mark_connected(false);
    }
}

/// Run a blocking device call on the blocking pool.
pub async fn run_blocking<D, R, F>(device: &SharedDevice<D>, f: F) -> Result<R>
where
    D: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut D) -> Result<R> + Send + 'static,
{
    let device = device.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = device.lock();
        f(&mut guard)
    })
    .await
    .map_err(|e| anyhow!("blocking device task failed: {e}"))?
}
