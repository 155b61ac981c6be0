//! `mcl_xy_stage`: MicroDrive XY stage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use labscope_core::hardware::{run_blocking, ComponentBase, HardwareComponent, SharedDevice};
use labscope_core::{Parameter, ParameterSet, ScopeError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::axis::{StageAxis, XyAxisMap};
use crate::microdrive::MclMicroDrive;
use crate::sdk::{MicroDriveSdk, SLOW_STEP_PERIOD};

pub type MicroDriveFactory = Arc<dyn Fn() -> Result<Box<dyn MicroDriveSdk>> + Send + Sync>;

/// MicroDrive SDK chosen by the enabled features.
pub fn default_microdrive_factory() -> MicroDriveFactory {
    #[cfg(feature = "mcl_sdk")]
    {
        Arc::new(|| {
            let lib = crate::library::MadLibrary::load_microdrive()?;
            Ok(Box::new(lib) as Box<dyn MicroDriveSdk>)
        })
    }
    #[cfg(all(not(feature = "mcl_sdk"), feature = "mock"))]
    {
        Arc::new(|| Ok(Box::new(crate::mock::MockMicroDrive::new()) as Box<dyn MicroDriveSdk>))
    }
    #[cfg(not(any(feature = "mcl_sdk", feature = "mock")))]
    {
        Arc::new(|| Err(ScopeError::FeatureNotEnabled("mcl_sdk".into()).into()))
    }
}

fn position_param(name: &str) -> Parameter<f64> {
    Parameter::new(name, -1.0).with_unit("um").read_only()
}

fn target_param(name: &str) -> Parameter<f64> {
    Parameter::new(name, -1.0).with_unit("um").with_range(-1.0, 300.0)
}

fn axis_choice(name: &str, initial: &str) -> Parameter<String> {
    Parameter::new(name, initial.to_string()).with_string_choices(["X", "Y"])
}

pub struct MclXyStageHw {
    base: ComponentBase,
    pub x_position: Parameter<f64>,
    pub y_position: Parameter<f64>,
    pub x_target: Parameter<f64>,
    pub y_target: Parameter<f64>,
    pub x_max: Parameter<f64>,
    pub y_max: Parameter<f64>,
    pub h_axis: Parameter<String>,
    pub v_axis: Parameter<String>,
    pub xy_axis_map: Parameter<String>,
    pub move_speed: Parameter<f64>,
    axis_ids: Arc<RwLock<XyAxisMap>>,
    factory: MicroDriveFactory,
    step_period: Duration,
    device: RwLock<Option<SharedDevice<MclMicroDrive>>>,
}

impl MclXyStageHw {
    pub const NAME: &'static str = "mcl_xy_stage";

    pub fn new() -> Self {
        Self::with_sdk_factory(default_microdrive_factory())
    }

    pub fn with_sdk_factory(factory: MicroDriveFactory) -> Self {
        let mut base = ComponentBase::new(Self::NAME);
        let x_position = base.add(position_param("x_position"));
        let y_position = base.add(position_param("y_position"));
        let x_target = base.add(target_param("x_target"));
        let y_target = base.add(target_param("y_target"));
        let x_max = base.add(Parameter::new("x_max", 300.0).with_unit("um").read_only());
        let y_max = base.add(Parameter::new("y_max", 300.0).with_unit("um").read_only());
        let h_axis = base.add(axis_choice("h_axis", "X"));
        let v_axis = base.add(axis_choice("v_axis", "Y"));
        let xy_axis_map = base.add(
            Parameter::new("xy_axis_map", "21".to_string())
                .with_validator(|map: &String| XyAxisMap::parse(map).map(|_| ())),
        );
        let move_speed = base.add(
            Parameter::new("move_speed", 100.0)
                .with_unit("um/s")
                .with_range(1e-4, 1000.0),
        );

        let axis_ids = Arc::new(RwLock::new(XyAxisMap::default()));
        let ids = axis_ids.clone();
        xy_axis_map.add_listener(move |map| {
            if let Ok(parsed) = XyAxisMap::parse(map) {
                debug!(x = parsed.x, y = parsed.y, "xy_axis_map updated");
                *ids.write() = parsed;
            }
        });

        Self {
            base,
            x_position,
            y_position,
            x_target,
            y_target,
            x_max,
            y_max,
            h_axis,
            v_axis,
            xy_axis_map,
            move_speed,
            axis_ids,
            factory,
            step_period: SLOW_STEP_PERIOD,
            device: RwLock::new(None),
        }
    }

    /// Shorten the slow-move step period (simulation and tests).
    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = period;
        self
    }

    pub fn device(&self) -> Option<SharedDevice<MclMicroDrive>> {
        self.device.read().clone()
    }

    fn require_device(&self) -> Result<SharedDevice<MclMicroDrive>> {
        self.device()
            .ok_or_else(|| ScopeError::NotConnected(Self::NAME.to_string()).into())
    }

    pub fn x_axis_id(&self) -> u32 {
        self.axis_ids.read().x
    }

    pub fn y_axis_id(&self) -> u32 {
        self.axis_ids.read().y
    }

    /// Controller axis behind the scan's horizontal axis.
    pub fn h_axis_id(&self) -> u32 {
        let ids = *self.axis_ids.read();
        ids.id(&self.h_axis.get()).unwrap_or(ids.x)
    }

    pub fn v_axis_id(&self) -> u32 {
        let ids = *self.axis_ids.read();
        ids.id(&self.v_axis.get()).unwrap_or(ids.y)
    }

    /// Movable handle for logical axis `"X"` or `"Y"`.
    pub fn axis(&self, name: &str) -> Option<StageAxis> {
        match name {
            "X" => Some(StageAxis::new("X", self.x_target.clone(), self.x_position.clone())),
            "Y" => Some(StageAxis::new("Y", self.y_target.clone(), self.y_position.clone())),
            _ => None,
        }
    }

    pub fn h_axis_handle(&self) -> Option<StageAxis> {
        self.axis(&self.h_axis.get())
    }

    pub fn v_axis_handle(&self) -> Option<StageAxis> {
        self.axis(&self.v_axis.get())
    }

    /// Speed-limited straight-line move; targets follow the request.
    pub async fn move_pos_slow(&self, x: Option<f64>, y: Option<f64>) -> Result<()> {
        let dev = self.require_device()?;
        let [ax1, ax2] = self.controller_targets(&dev, x, y);
        run_blocking(&dev, move |d| d.set_pos_slow(ax1, ax2)).await?;
        if let Some(x) = x {
            self.x_target.store(x);
        }
        if let Some(y) = y {
            self.y_target.store(y);
        }
        self.read_pos().await
    }

    /// Direct move without speed limiting.
    pub async fn move_pos_fast(&self, x: Option<f64>, y: Option<f64>) -> Result<()> {
        let dev = self.require_device()?;
        let [ax1, ax2] = self.controller_targets(&dev, x, y);
        run_blocking(&dev, move |d| d.set_pos(ax1, ax2)).await?;
        self.read_pos().await
    }

    fn controller_targets(
        &self,
        dev: &SharedDevice<MclMicroDrive>,
        x: Option<f64>,
        y: Option<f64>,
    ) -> [Option<f64>; 2] {
        let mut targets = self.axis_ids.read().to_controller(x, y);
        if dev.lock().num_axes() < 2 {
            targets[1] = None;
        }
        targets
    }

    /// Refresh both position readbacks.
    pub async fn read_pos(&self) -> Result<()> {
        if self.base.debug_mode.get() {
            debug!("read_pos");
        }
        if self.is_connected() {
            self.x_position.read_from_hardware().await?;
            self.y_position.read_from_hardware().await?;
        }
        Ok(())
    }

    pub async fn go_to_center_xy(&self) -> Result<()> {
        self.x_target.set(self.x_max.get() * 0.5).await?;
        self.y_target.set(self.y_max.get() * 0.5).await
    }

    fn bind(&self, dev: &SharedDevice<MclMicroDrive>) {
        let axes = [
            (&self.x_target, &self.x_position, &self.x_max, true),
            (&self.y_target, &self.y_position, &self.y_max, false),
        ];
        for (target, position, max, is_x) in axes {
            let pick = {
                let ids = self.axis_ids.clone();
                move || {
                    let ids = ids.read();
                    if is_x {
                        ids.x
                    } else {
                        ids.y
                    }
                }
            };

            let (d, axis, x_pos, y_pos) = (
                dev.clone(),
                pick.clone(),
                self.x_position.clone(),
                self.y_position.clone(),
            );
            target.connect_to_hardware_write(move |pos| {
                let (d, ax) = (d.clone(), axis());
                let (x_pos, y_pos) = (x_pos.clone(), y_pos.clone());
                Box::pin(async move {
                    run_blocking(&d, move |s| s.set_pos_ax_slow(pos, ax)).await?;
                    x_pos.read_from_hardware().await?;
                    y_pos.read_from_hardware().await?;
                    Ok(())
                })
            });

            let (d, axis) = (dev.clone(), pick.clone());
            position.connect_to_hardware_read(move || {
                let (d, ax) = (d.clone(), axis());
                Box::pin(async move { run_blocking(&d, move |s| s.pos_ax(ax)).await })
            });

            let (d, axis) = (dev.clone(), pick);
            max.connect_to_hardware_read(move || {
                let (d, ax) = (d.clone(), axis());
                Box::pin(async move { run_blocking(&d, move |s| s.cal(ax)).await })
            });
        }

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

impl Default for MclXyStageHw {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareComponent for MclXyStageHw {
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
            Ok::<_, anyhow::Error>(MclMicroDrive::open(sdk, debug)?.with_step_period(period))
        })
        .await
        .map_err(|e| anyhow!("MicroDrive open task failed: {e}"))?
        .context("failed to open MicroDrive")?;

        let dev: SharedDevice<MclMicroDrive> = Arc::new(Mutex::new(drive));
        self.bind(&dev);
        *self.device.write() = Some(dev);
        self.base.mark_connected(true);

        self.move_speed
            .update_value(self.move_speed.get(), true)
            .await?;
        self.read_from_hardware().await?;

        self.x_target.change_min_max(0.1, self.x_max.get() - 0.1);
        self.y_target.change_min_max(0.1, self.y_max.get() - 0.1);
        self.x_target.store(self.x_position.get());
        self.y_target.store(self.y_position.get());
        info!(
            x_max = self.x_max.get(),
            y_max = self.y_max.get(),
            "mcl_xy_stage connected"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(dev) = self.device.write().take() else {
            return Ok(());
        };
        self.base.release();
        run_blocking(&dev, |d| d.close()).await?;
        info!("mcl_xy_stage disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}
