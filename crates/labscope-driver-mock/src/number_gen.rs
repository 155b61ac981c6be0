//! Random-number / sine-wave generator standing in for a real device.
//!
//! [`NumberGenDev`] plays the role of a vendor driver: it is created with a
//! port name (which has no effect) and answers amplitude writes and two
//! readouts. [`NumberGenHw`] is the hardware component wrapping it behind the
//! `number_gen` settings: `port`, `amplitude`, `rand_data`, `sine_data`.

use anyhow::Result;
use async_trait::async_trait;
use labscope_core::hardware::{ComponentBase, HardwareComponent, SharedDevice};
use labscope_core::{Parameter, ParameterSet, Readable};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::common::MockRng;

/// Simulated device: `rand = U[0,1) * amplitude`, `sine = sin(t) * amplitude`.
#[derive(Debug)]
pub struct NumberGenDev {
    port: String,
    debug: bool,
    amplitude: f64,
    rng: MockRng,
}

impl NumberGenDev {
    pub fn new(port: impl Into<String>, debug: bool) -> Self {
        Self::with_seed(port, debug, None)
    }

    /// Seeded variant for reproducible `read_rand_num` sequences.
    pub fn with_seed(port: impl Into<String>, debug: bool, seed: Option<u64>) -> Self {
        let port = port.into();
        info!(port = %port, "number generator connected");
        Self {
            port,
            debug,
            amplitude: 1.0,
            rng: MockRng::new(seed),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn write_amp(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
        if self.debug {
            debug!(amplitude, "number generator amplitude written");
        }
    }

    pub fn read_rand_num(&self) -> f64 {
        let value = self.rng.next_f64() * self.amplitude;
        if self.debug {
            debug!(value, "read_rand_num");
        }
        value
    }

    /// Sine of the current UNIX time in seconds.
    pub fn read_sine_wave(&self) -> f64 {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let value = t.sin() * self.amplitude;
        if self.debug {
            debug!(value, "read_sine_wave");
        }
        value
    }
}

/// `number_gen` hardware component.
pub struct NumberGenHw {
    base: ComponentBase,
    pub port: Parameter<String>,
    pub amplitude: Parameter<f64>,
    pub rand_data: Parameter<f64>,
    pub sine_data: Parameter<f64>,
    seed: Option<u64>,
    device: RwLock<Option<SharedDevice<NumberGenDev>>>,
}

impl NumberGenHw {
    pub const NAME: &'static str = "number_gen";

    pub fn new() -> Self {
        Self::with_seed(None)
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        let mut base = ComponentBase::new(Self::NAME);
        let port = base.add(
            Parameter::new("port", "COM1".to_string())
                .with_description("Serial port (no effect on the simulated device)"),
        );
        let amplitude = base.add(Parameter::new("amplitude", 1.0).with_dtype("float"));
        let rand_data = base.add(Parameter::new("rand_data", 0.0).read_only());
        let sine_data = base.add(Parameter::new("sine_data", 0.0).read_only());
        Self {
            base,
            port,
            amplitude,
            rand_data,
            sine_data,
            seed,
            device: RwLock::new(None),
        }
    }

    /// Device handle while connected.
    pub fn device(&self) -> Option<SharedDevice<NumberGenDev>> {
        self.device.read().clone()
    }
}

impl Default for NumberGenHw {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareComponent for NumberGenHw {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn settings(&self) -> &ParameterSet {
        &self.base.settings
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let dev: SharedDevice<NumberGenDev> = Arc::new(Mutex::new(NumberGenDev::with_seed(
            self.port.get(),
            self.base.debug_mode.get(),
            self.seed,
        )));

        let d = dev.clone();
        self.amplitude.connect_to_hardware_write(move |amp| {
            let d = d.clone();
            Box::pin(async move {
                d.lock().write_amp(amp);
                Ok(())
            })
        });
        let d = dev.clone();
        self.rand_data.connect_to_hardware_read(move || {
            let d = d.clone();
            Box::pin(async move { Ok(d.lock().read_rand_num()) })
        });
        let d = dev.clone();
        self.sine_data.connect_to_hardware_read(move || {
            let d = d.clone();
            Box::pin(async move { Ok(d.lock().read_sine_wave()) })
        });

        *self.device.write() = Some(dev);
        self.base.mark_connected(true);

        // push the configured amplitude, then pull fresh readouts
        self.amplitude
            .update_value(self.amplitude.get(), true)
            .await?;
        self.read_from_hardware().await
    }

    async fn disconnect(&self) -> Result<()> {
        if self.device.write().take().is_none() {
            return Ok(());
        }
        self.base.release();
        info!("number generator disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}

#[async_trait]
impl Readable for NumberGenHw {
    /// Fresh sine sample.
    async fn read(&self) -> Result<f64> {
        self.sine_data.read_from_hardware().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_scales_by_amplitude() {
        let mut dev = NumberGenDev::with_seed("COM1", false, Some(1));
        assert_eq!(dev.amplitude(), 1.0);
        for _ in 0..100 {
            let v = dev.read_rand_num();
            assert!((0.0..1.0).contains(&v));
        }
        dev.write_amp(5.0);
        for _ in 0..100 {
            let v = dev.read_rand_num();
            assert!((0.0..5.0).contains(&v));
            assert!(dev.read_sine_wave().abs() <= 5.0);
        }
    }

    #[tokio::test]
    async fn hw_connect_binds_settings() {
        let hw = NumberGenHw::with_seed(Some(9));
        hw.amplitude.set(3.0).await.unwrap();
        hw.connect().await.unwrap();

        assert!(hw.is_connected());
        let dev = hw.device().unwrap();
        assert_eq!(dev.lock().amplitude(), 3.0);

        hw.amplitude.set(0.5).await.unwrap();
        assert_eq!(dev.lock().amplitude(), 0.5);

        let v = hw.rand_data.read_from_hardware().await.unwrap();
        assert!((0.0..0.5).contains(&v));
        assert_eq!(hw.rand_data.get(), v);
        assert!(hw.read().await.unwrap().abs() <= 0.5);
    }

    #[tokio::test]
    async fn hw_disconnect_is_idempotent() {
        let hw = NumberGenHw::new();
        hw.disconnect().await.unwrap();

        hw.connect().await.unwrap();
        hw.disconnect().await.unwrap();
        assert!(!hw.is_connected());
        assert!(hw.device().is_none());
        assert!(hw.sine_data.read_from_hardware().await.is_err());
        hw.disconnect().await.unwrap();
    }
}
