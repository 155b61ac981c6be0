#![cfg(feature = "mock")]

use std::sync::Arc;
use std::time::Duration;

use labscope_core::{HardwareComponent, Movable};
use labscope_driver_mcl::{
    MclXyStageHw, MclXyzStageHw, MicroDriveSdk, MockMicroDrive, MockNanoDrive, NanoDriveSdk,
};

fn xy_stage(mock: &MockMicroDrive) -> MclXyStageHw {
    let mock = mock.clone();
    MclXyStageHw::with_sdk_factory(Arc::new(move || {
        Ok(Box::new(mock.clone()) as Box<dyn MicroDriveSdk>)
    }))
    .with_step_period(Duration::from_millis(1))
}

fn z_stage(mock: &MockNanoDrive) -> MclXyzStageHw {
    let mock = mock.clone();
    MclXyzStageHw::with_sdk_factory(Arc::new(move || {
        Ok(Box::new(mock.clone()) as Box<dyn NanoDriveSdk>)
    }))
    .with_step_period(Duration::from_millis(1))
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_connect_narrows_target_limits() {
    let stage = xy_stage(&MockMicroDrive::new());
    stage.connect().await.unwrap();

    assert_eq!(stage.x_max.get(), 100.0);
    assert_eq!(stage.x_position.get(), 0.0);
    assert_eq!(stage.x_target.get(), 0.0);
    let meta = stage.x_target.metadata();
    assert_eq!(meta.min_value, Some(0.1));
    assert!((meta.max_value.unwrap() - 99.9).abs() < 1e-9);
    assert!(stage.x_target.set(99.95).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_target_moves_mapped_axis() {
    let mock = MockMicroDrive::new();
    let stage = xy_stage(&mock);
    stage.connect().await.unwrap();
    stage.move_speed.set(1000.0).await.unwrap();

    // default map "21": logical X drives controller axis 2
    stage.x_target.set(5.0).await.unwrap();
    assert!(mock.moves().iter().all(|m| m.axis == 2));
    assert!((stage.x_position.get() - 5.0).abs() < 1e-9);
    assert_eq!(stage.y_position.get(), 0.0);

    stage.xy_axis_map.set("12".to_string()).await.unwrap();
    assert_eq!(stage.x_axis_id(), 1);
    assert_eq!(stage.h_axis_id(), 1);
    assert!(stage.xy_axis_map.set("33".to_string()).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_move_pos_slow_updates_targets() {
    let stage = xy_stage(&MockMicroDrive::new());
    stage.connect().await.unwrap();
    stage.move_speed.set(1000.0).await.unwrap();

    stage.move_pos_slow(Some(3.0), Some(4.0)).await.unwrap();
    assert_eq!(stage.x_target.get(), 3.0);
    assert_eq!(stage.y_target.get(), 4.0);
    assert!((stage.x_position.get() - 3.0).abs() < 1e-9);
    assert!((stage.y_position.get() - 4.0).abs() < 1e-9);

    stage.move_pos_fast(Some(-2.0), None).await.unwrap();
    assert_eq!(stage.x_position.get(), -2.0);
    assert!(stage.move_pos_fast(Some(150.0), None).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_center_and_movable_handles() {
    let stage = xy_stage(&MockMicroDrive::new());
    stage.connect().await.unwrap();
    stage.move_speed.set(1000.0).await.unwrap();

    stage.go_to_center_xy().await.unwrap();
    assert!((stage.x_position.get() - 50.0).abs() < 1e-9);
    assert!((stage.y_position.get() - 50.0).abs() < 1e-9);

    let h = stage.h_axis_handle().unwrap();
    h.move_abs(20.0).await.unwrap();
    assert!((h.position().await.unwrap() - 20.0).abs() < 1e-9);
    assert!(stage.axis("Z").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_disconnect_releases_handle() {
    let mock = MockMicroDrive::new();
    let stage = xy_stage(&mock);
    stage.connect().await.unwrap();
    stage.disconnect().await.unwrap();
    assert!(!stage.is_connected());
    assert_eq!(mock.release_count(), 1);
    assert!(stage.move_pos_fast(Some(1.0), None).await.is_err());
    stage.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn xy_connect_fails_without_controller() {
    let stage = xy_stage(&MockMicroDrive::new().unplugged());
    assert!(stage.connect().await.is_err());
    assert!(!stage.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn z_stage_uses_third_map_digit() {
    let mock = MockNanoDrive::new();
    let stage = z_stage(&mock);
    stage.connect().await.unwrap();
    assert_eq!(stage.z_axis_id(), 3);
    assert_eq!(stage.z_max.get(), 200.0);

    stage.move_speed.set(1000.0).await.unwrap();
    stage.z_target.set(12.0).await.unwrap();
    assert!((stage.z_position.get() - 12.0).abs() < 1e-9);
    assert!(mock.writes().iter().all(|(axis, _)| *axis == 3));

    stage.xyz_axis_map.set("231".to_string()).await.unwrap();
    assert_eq!(stage.z_axis_id(), 1);
    stage.move_pos_fast(Some(7.0)).await.unwrap();
    assert_eq!(mock.writes().last(), Some(&(1, 7.0)));
    assert_eq!(stage.z_position.get(), 7.0);

    stage.move_pos_slow(Some(9.0)).await.unwrap();
    assert_eq!(stage.z_target.get(), 9.0);
    stage.disconnect().await.unwrap();
    assert_eq!(mock.release_count(), 1);
}
