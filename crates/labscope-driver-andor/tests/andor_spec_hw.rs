#![cfg(feature = "mock")]

use std::sync::Arc;

use labscope_core::{HardwareComponent, WavelengthTunable};
use labscope_driver_andor::{AndorSpecHw, MockShamrock, Port, SdkFactory, ShamrockSdk};

fn mock_factory() -> SdkFactory {
    Arc::new(|| Ok(Box::new(MockShamrock::new()) as Box<dyn ShamrockSdk>))
}

async fn connected() -> AndorSpecHw {
    let hw = AndorSpecHw::with_sdk_factory(mock_factory());
    hw.connect().await.unwrap();
    hw
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_reads_instrument_state() {
    let hw = connected().await;
    assert!(hw.is_connected());
    assert_eq!(hw.serial_num.get(), "SR-3031-MOCK");
    assert_eq!(hw.center_wl.get(), 500.0);
    assert_eq!(hw.grating_id.get(), 1);
    assert_eq!(hw.grating_name.get(), "150g/mm 500nm");
    assert_eq!(hw.input_flipper.get(), "direct");
    assert_eq!(hw.slit_input_side.get(), 100.0);

    let labels = hw.grating_id.inner().choice_labels();
    assert_eq!(
        labels,
        vec!["1: 150g/mm 500nm", "2: 600g/mm 500nm", "3: 1200g/mm 750nm"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn centre_wavelength_is_read_back_after_write() {
    let hw = connected().await;
    hw.center_wl.set(532.123).await.unwrap();
    // turret resolution is 0.01 nm
    assert!((hw.center_wl.get() - 532.12).abs() < 1e-3);
    assert!(hw.set_wavelength(2500.0).await.is_err());
    assert!((hw.get_wavelength().await.unwrap() - 532.12).abs() < 1e-3);
}

#[tokio::test(flavor = "multi_thread")]
async fn grating_change_updates_name_and_focus() {
    let hw = connected().await;
    hw.focus_mirror.set(200).await.unwrap();
    assert_eq!(hw.focus_mirror.get(), 200);

    hw.grating_id.set(3).await.unwrap();
    assert_eq!(hw.grating_name.get(), "1200g/mm 750nm");
    assert_eq!(hw.focus_mirror.get(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn detector_offsets_map_to_their_own_port_pair() {
    let hw = connected().await;
    let side_direct = hw.det_offset(Port::Side, Port::Direct).unwrap().clone();
    side_direct.set(150).await.unwrap();

    let dev = hw.device().unwrap();
    let (sd, ds) = {
        let mut d = dev.lock();
        (
            d.detector_offset(Port::Side, Port::Direct).unwrap(),
            d.detector_offset(Port::Direct, Port::Side).unwrap(),
        )
    };
    assert_eq!(sd, 150);
    assert_eq!(ds, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn wl_calibration_follows_input_port() {
    let hw = connected().await;
    let mut side = hw.grating_calib_side_in.get();
    side[0][3] = 200.0;
    hw.grating_calib_side_in.set(side).await.unwrap();

    let direct = hw.wl_calibration(&[256.0], 1, 1).unwrap();
    assert!((direct[0] - 500.0).abs() < 1e-6);

    hw.input_flipper.set("side".to_string()).await.unwrap();
    let shifted = hw.wl_calibration(&[256.0], 1, 1).unwrap();
    assert!(shifted[0] > direct[0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_releases_hooks() {
    let hw = connected().await;
    hw.disconnect().await.unwrap();
    assert!(!hw.is_connected());
    assert!(hw.device().is_none());
    assert!(!hw.center_wl.has_hardware_writer());
    // offline writes only touch the cached value
    hw.center_wl.set(610.0).await.unwrap();
    assert_eq!(hw.center_wl.get(), 610.0);
    hw.disconnect().await.unwrap();
}
