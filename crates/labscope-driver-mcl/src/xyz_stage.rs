//! `mcl_z_stage`: NanoDrive piezo used for the Z axis.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use labscope_core::hardware::{run_blocking, ComponentBase, HardwareComponent, SharedDevice};
use labscope_core::{Parameter, ParameterSet, ScopeError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::axis::{parse_axis_map, StageAxis};
use crate::nanodrive::MclNanoDrive;
use crate::sdk::{NanoDriveSdk, SLOW_STEP_PERIOD};

pub type NanoDriveFactory = Arc<dyn Fn() -> Result<Box<dyn NanoDriveSdk>> + Send + Sync>;

pub fn default_nanodrive_factory() -> NanoDriveFactory {
    #[cfg(feature = "mcl_sdk")]
    {
        Arc::new(|| {
            let lib = crate::library::MadLibrary::load_nanodrive()?;
            Ok(Box::new(lib) as Box<dyn NanoDriveSdk>)
        })
    }
    #[cfg(all(not(feature = "mcl_sdk"), feature = "mock"))]
    {
        Arc::new(|| Ok(Box::new(crate::mock::MockNanoDrive::new()) as Box<dyn NanoDriveSdk>))
    }
    #[cfg(not(any(feature = "mcl_sdk", feature = "mock")))]
    {
        Arc::new(|| Err(ScopeError::FeatureNotEnabled("mcl_sdk".into()).into()))
    }
}

pub struct MclXyzStageHw {
    base: ComponentBase,
    pub z_position: Parameter<f64>,
    pub z_target: Parameter<f64>,
    pub z_max: Parameter<f64>,
    pub xyz_axis_map: Parameter<String>,
    pub move_speed: Parameter<f64>,
    z_id: Arc<AtomicU32>,
    factory: NanoDriveFactory,
    step_period: Duration,
    device: RwLock<Option<SharedDevice<MclNanoDrive>>>,
}

impl MclXyzStageHw {
    pub const NAME: &'static str = "mcl_z_stage";

    pub fn new() -> Self {
        Self::with_sdk_factory(default_nanodrive_factory())
    }

    pub fn with_sdk_factory(factory: NanoDriveFactory) -> Self {
        let mut base = ComponentBase::new(Self::NAME);
        let z_position = base.add(Parameter::new("z_position", -1.0).with_unit("um").read_only());
        let z_target = base.add(
            Parameter::new("z_target", -1.0)
                .with_unit("um")
                .with_range(-1.0, 300.0),
        );
        let z_max = base.add(Parameter::new("z_max", 300.0).with_unit("um").read_only());
        let xyz_axis_map = base.add(
            Parameter::new("xyz_axis_map", "213".to_string())
                .with_validator(|map: &String| parse_axis_map(map, 3).map(|_| ())),
        );
        let move_speed = base.add(
            Parameter::new("move_speed", 100.0)
                .with_unit("um/s")
                .with_range(1e-4, 1000.0),
        );

        let z_id = Arc::new(AtomicU32::new(3));
        let id = z_id.clone();
        xyz_axis_map.add_listener(move |map| {
            if let Some(z) = parse_axis_map(map, 3).ok().and_then(|ids| ids.get(2).copied()) {
                debug!(z, "xyz_axis_map updated");
                id.store(z, Ordering::SeqCst);
            }
        });

        Self {
            base,
            z_position,
            z_target,
            z_max,
            xyz_axis_map,
            move_speed,
            z_id,
            factory,
            step_period: SLOW_STEP_PERIOD,
            device: RwLock::new(None),
        }
    }

    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = period;
        self
    }

    pub fn device(&self) -> Option<SharedDevice<MclNanoDrive>> {
        self.device.read().clone()
    }

    pub fn z_axis_id(&self) -> u32 {
        self.z_id.load(Ordering::SeqCst)
    }

    /// Movable handle for Z.
    pub fn z_axis(&self) -> StageAxis {
        StageAxis::new("Z", self.z_target.clone(), self.z_position.clone())
    }

    fn require_device(&self) -> Result<SharedDevice<MclNanoDrive>> {
        self.device()
            .ok_or_else(|| ScopeError::NotConnected(Self::NAME.to_string()).into())
    }

    fn z_targets(&self, z: f64) -> [Option<f64>; 3] {
        let mut targets = [None; 3];
        if let Some(slot) = targets.get_mut((self.z_axis_id() as usize).wrapping_sub(1)) {
            *slot = Some(z);
        }
        targets
    }

    pub async fn move_pos_slow(&self, z: Option<f64>) -> Result<()> {
        let dev = self.require_device()?;
        if let Some(z) = z {
            let targets = self.z_targets(z);
            run_blocking(&dev, move |d| d.set_pos_slow(targets)).await?;
            self.z_target.store(z);
        }
        self.read_pos().await
    }

    pub async fn move_pos_fast(&self, z: Option<f64>) -> Result<()> {
        let dev = self.require_device()?;
        if let Some(z) = z {
            let targets = self.z_targets(z);
            run_blocking(&dev, move |d| d.set_pos(targets)).await?;
        }
        self.read_pos().await
    }

    pub async fn read_pos(&self) -> Result<()> {
        if self.is_connected() {
            self.z_position.read_from_hardware().await?;
        }
        Ok(())
    }

    fn bind(&self, dev: &SharedDevice<MclNanoDrive>) {
        let (d, id, z_pos) = (dev.clone(), self.z_id.clone(), self.z_position.clone());
        self.z_target.connect_to_hardware_write(move |z| {
            let (d, ax, z_pos) = (d.clone(), id.load(Ordering::SeqCst), z_pos.clone());
            Box::pin(async move {
                run_blocking(&d, move |s| s.set_pos_ax_slow(z, ax)).await?;
                z_pos.read_from_hardware().await?;
                Ok(())
            })
        });

        let (d, id) = (dev.clone(), self.z_id.clone());
        self.z_position.connect_to_hardware_read(move || {
            let (d, ax) = (d.clone(), id.load(Ordering::SeqCst));
            Box::pin(async move { run_blocking(&d, move |s| s.pos_ax(ax)).await })
        });

        let (d, id) = (dev.clone(), self.z_id.clone());
        self.z_max.connect_to_hardware_read(move || {
            let (d, ax) = (d.clone(), id.load(Ordering::SeqCst));
            Box::pin(async move { run_blocking(&d, move |s| s.cal(ax)).await })
        });

        let (r, w) = (dev.clone(), dev.clone());
        self.move_speed.connect_to_hardware(
            move || {
                let d = r.clone();
                Box::pin(async move { run_blocking(&d, |s| Ok(s.max_speed())).await })
            },
            move |speed| {
                let d = w.clone();
                Box::pin(async move { run_blocking(&d, move |s| s.set_max_speed(speed)).await })
            },
        );
    }
}

impl Default for MclXyzStageHw {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareComponent for MclXyzStageHw {
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
        let factory = self.factory.clone();
        let debug = self.base.debug_mode.get();
        let period = self.step_period;
        let drive = tokio::task::spawn_blocking(move || {
            let sdk = factory()?;
            Ok::<_, anyhow::Error>(MclNanoDrive::open(sdk, debug)?.with_step_period(period))
        })
        .await
        .map_err(|e| anyhow!("NanoDrive open task failed: {e}"))?
        .context("failed to open NanoDrive")?;

        let dev: SharedDevice<MclNanoDrive> = Arc::new(Mutex::new(drive));
        self.bind(&dev);
        *self.device.write() = Some(dev);
        self.base.mark_connected(true);

        self.move_speed
            .update_value(self.move_speed.get(), true)
            .await?;
        self.read_from_hardware().await?;

        self.z_target.change_min_max(0.1, self.z_max.get() - 0.1);
        self.z_target.store(self.z_position.get());
        info!(z_max = self.z_max.get(), "mcl_z_stage connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(dev) = self.device.write().take() else {
            return Ok(());
        };
        self.base.release();
        run_blocking(&dev, |d| d.close()).await?;
        info!("mcl_z_stage disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}
