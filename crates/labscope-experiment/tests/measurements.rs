use std::sync::Arc;
use std::time::Duration;

use labscope_core::HardwareComponent;
use labscope_driver_mcl::{MclXyStageHw, MicroDriveSdk, MockMicroDrive};
use labscope_driver_mock::{AxisLimits, MockAxis, MockCcd, NumberGenHw};
use labscope_experiment::{
    Measurement, MeasurementRunner, NumberGenReadout, NumberGenReadoutExtendable,
    NumberGenReadoutSimple, RunState, SlowScan2D, StorageTarget,
};
use labscope_storage::{load, LoadedMeasurement, Provenance, StorageFormat};
use tempfile::TempDir;

fn target(dir: &TempDir) -> StorageTarget {
    StorageTarget {
        dir: dir.path().to_path_buf(),
        format: StorageFormat::Json,
    }
}

fn only_file(dir: &TempDir) -> std::path::PathBuf {
    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    assert_eq!(files.len(), 1, "files: {files:?}");
    files.into_iter().next().unwrap()
}

async fn ccd_following(axis: Arc<MockAxis>, pixels: i64) -> Arc<MockCcd> {
    let ccd = Arc::new(
        MockCcd::builder()
            .pixels(pixels)
            .seed(3)
            .probe(move || 100.0 * (1.0 + axis.actual_position()))
            .build(),
    );
    ccd.connect().await.unwrap();
    ccd
}

fn small_scan(scan: &SlowScan2D) {
    scan.raster.h0.store(0.0);
    scan.raster.h1.store(2.0);
    scan.raster.nh.store(3);
    scan.raster.v0.store(0.0);
    scan.raster.v1.store(1.0);
    scan.raster.nv.store(2);
    scan.settle_time.store(0.0);
    scan.poll_interval.store(0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_scan_records_every_pixel() {
    let dir = TempDir::new().unwrap();
    let x = Arc::new(MockAxis::new("x"));
    let y = Arc::new(MockAxis::new("y"));
    let ccd = ccd_following(x.clone(), 64).await;

    let scan = Arc::new(
        SlowScan2D::new(ccd.clone())
            .with_axis("x", x.clone())
            .with_axis("y", y.clone()),
    );
    small_scan(&scan);

    let runner = MeasurementRunner::new(scan.clone());
    runner.run(target(&dir), Provenance::default()).await.unwrap();
    assert_eq!(runner.progress().get(), 100.0);

    assert_eq!(ccd.acquisition_count(), 6);
    assert_eq!(ccd.interrupt_count(), 6);

    let map = scan.display_image_map.get();
    assert_eq!(map.len(), 6);
    // signal grows with h along each line
    assert!(map[0] < map[1] && map[1] < map[2]);
    assert!(map[3] < map[4] && map[4] < map[5]);

    let LoadedMeasurement::SlowScan2D(data) = load(&only_file(&dir)).unwrap() else {
        panic!("wrong measurement");
    };
    assert_eq!(data.h_array, Some(vec![0.0, 1.0, 2.0]));
    assert_eq!(data.v_array, Some(vec![0.0, 1.0]));
    assert_eq!(data.range_extent, Some(vec![0.0, 2.0, 0.0, 1.0]));
    assert_eq!(
        data.scan_slow_move,
        Some(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    );
    let index = data.scan_index_array.unwrap();
    assert_eq!(index.shape, vec![6, 3]);
    assert_eq!(index.at(&[4]).unwrap(), &[0.0, 1.0, 1.0]);

    let signal = data.signal_map.unwrap();
    assert_eq!(signal.shape, vec![1, 2, 3, 64]);
    let row_sum: f64 = signal.at(&[0, 1, 2]).unwrap().iter().sum();
    assert!((row_sum - map[5]).abs() < 1e-6);
    assert_eq!(
        data.settings["measurement/example_2d_scan/Nh"],
        serde_json::json!(3)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn backlash_correction_undershoots_line_starts() {
    let x = Arc::new(MockAxis::new("x"));
    let y = Arc::new(MockAxis::new("y"));
    let ccd = ccd_following(x.clone(), 16).await;
    let scan = SlowScan2D::new(ccd)
        .with_axis("x", x.clone())
        .with_axis("y", y.clone());
    small_scan(&scan);
    scan.save_h5.store(false);
    scan.backlash_correction.store(true);
    scan.backlash.store(5.0);

    let runner = MeasurementRunner::new(Arc::new(scan));
    runner
        .run(StorageTarget::default(), Provenance::default())
        .await
        .unwrap();

    assert_eq!(
        x.history(),
        vec![
            -5.0, 0.0, // start
            -5.0, 0.0, 1.0, 2.0, // line 0
            -5.0, 0.0, 1.0, 2.0, // line 1
        ]
    );
    assert_eq!(y.history(), vec![-5.0, 0.0, -5.0, 0.0, 0.0, 0.0, -4.0, 1.0, 1.0, 1.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_scan_drives_mcl_stage_from_origin() {
    let mock = MockMicroDrive::new();
    let sdk = mock.clone();
    let stage = MclXyStageHw::with_sdk_factory(Arc::new(move || {
        Ok(Box::new(sdk.clone()) as Box<dyn MicroDriveSdk>)
    }))
    .with_step_period(Duration::from_millis(1));
    stage.connect().await.unwrap();
    stage.move_speed.set(1000.0).await.unwrap();

    let ccd = Arc::new(MockCcd::builder().pixels(8).seed(1).build());
    ccd.connect().await.unwrap();
    let scan = Arc::new(
        SlowScan2D::new(ccd.clone())
            .with_axis("x", Arc::new(stage.axis("X").unwrap()))
            .with_axis("y", Arc::new(stage.axis("Y").unwrap())),
    );
    small_scan(&scan);
    scan.save_h5.store(false);
    // line starts undershoot below the travel and get clamped at 0
    scan.backlash_correction.store(true);
    scan.backlash.store(1.0);

    let runner = MeasurementRunner::new(scan.clone());
    runner
        .run(StorageTarget::default(), Provenance::default())
        .await
        .unwrap();

    assert_eq!(ccd.acquisition_count(), 6);
    assert!(scan.display_image_map.get().iter().all(|sum| *sum != 0.0));
    assert!((stage.x_position.get() - 2.0).abs() < 1e-6);
    assert!((stage.y_position.get() - 1.0).abs() < 1e-6);
    stage.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn background_is_subtracted() {
    let x = Arc::new(MockAxis::new("x"));
    let y = Arc::new(MockAxis::new("y"));
    let ccd = Arc::new(MockCcd::builder().pixels(32).seed(5).probe(|| 0.0).build());
    ccd.connect().await.unwrap();
    let scan = Arc::new(
        SlowScan2D::new(ccd)
            .with_axis("x", x)
            .with_axis("y", y),
    );
    small_scan(&scan);
    scan.save_h5.store(false);
    scan.subtract_background.store(true);

    let runner = MeasurementRunner::new(scan.clone());
    let err = runner
        .run(StorageTarget::default(), Provenance::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no background"));

    let bg = scan.acquire_background().await.unwrap();
    assert_eq!(bg.len(), 32);
    runner
        .run(StorageTarget::default(), Provenance::default())
        .await
        .unwrap();
    // dark level is 100 counts per pixel; only noise is left
    for sum in scan.display_image_map.get() {
        assert!(sum.abs() < 100.0, "sum {sum}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn move_error_stops_scan_and_keeps_file() {
    let dir = TempDir::new().unwrap();
    let x = Arc::new(
        MockAxis::builder("x")
            .limits(AxisLimits::hard_stop(0.0, 1.5))
            .build(),
    );
    let y = Arc::new(MockAxis::new("y"));
    let ccd = ccd_following(x.clone(), 8).await;
    let scan = Arc::new(
        SlowScan2D::new(ccd.clone())
            .with_axis("x", x)
            .with_axis("y", y),
    );
    small_scan(&scan);

    let runner = MeasurementRunner::new(scan);
    assert!(runner
        .run(target(&dir), Provenance::default())
        .await
        .is_err());
    assert_eq!(runner.state(), RunState::Idle);
    assert_eq!(ccd.acquisition_count(), 2);

    let LoadedMeasurement::SlowScan2D(data) = load(&only_file(&dir)).unwrap() else {
        panic!("wrong measurement");
    };
    let signal = data.signal_map.unwrap();
    assert!(signal.at(&[0, 0, 1]).unwrap().iter().sum::<f64>() > 0.0);
    assert!(signal.at(&[0, 0, 2]).unwrap().iter().all(|v| *v == 0.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn same_axis_twice_is_rejected() {
    let x = Arc::new(MockAxis::new("x"));
    let ccd = ccd_following(x.clone(), 8).await;
    let scan = SlowScan2D::new(ccd).with_axis("x", x);
    scan.v_axis.store("x".into());
    scan.save_h5.store(false);
    let runner = MeasurementRunner::new(Arc::new(scan));
    assert!(runner
        .run(StorageTarget::default(), Provenance::default())
        .await
        .is_err());
}

async fn number_gen() -> Arc<NumberGenHw> {
    let hw = Arc::new(NumberGenHw::with_seed(Some(1)));
    hw.amplitude.set(2.0).await.unwrap();
    hw.connect().await.unwrap();
    hw
}

#[tokio::test(flavor = "multi_thread")]
async fn simple_readout_saves_n_samples() {
    let dir = TempDir::new().unwrap();
    let m = Arc::new(NumberGenReadoutSimple::new(number_gen().await));
    m.readout.n.store(5);
    m.readout.sampling_period.store(0.0);

    let runner = MeasurementRunner::new(m.clone());
    runner.run(target(&dir), Provenance::default()).await.unwrap();

    let y = m.y.get();
    assert_eq!(y.len(), 5);
    assert!(y.iter().all(|v| v.abs() <= 2.0));

    let LoadedMeasurement::NumberGenReadoutSimple(data) = load(&only_file(&dir)).unwrap() else {
        panic!("wrong measurement");
    };
    assert_eq!(data.y, Some(y));
    assert_eq!(
        data.settings["measurement/number_gen_readout_simple/N"],
        serde_json::json!(5)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn ring_readout_runs_until_interrupted() {
    let dir = TempDir::new().unwrap();
    let m = Arc::new(NumberGenReadout::new(number_gen().await));
    m.readout.n.store(4);
    m.readout.sampling_period.store(0.001);

    let runner = MeasurementRunner::new(m.clone());
    runner.start(target(&dir), Provenance::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runner.interrupt();
    runner.wait().await.unwrap();
    assert_eq!(runner.state(), RunState::Idle);

    let LoadedMeasurement::NumberGenReadout(data) = load(&only_file(&dir)).unwrap() else {
        panic!("wrong measurement");
    };
    let y = data.y.unwrap();
    assert_eq!(y.len(), 4);
    assert!(y.iter().all(|v| v.abs() <= 2.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn extendable_readout_grows_in_blocks_of_n() {
    let dir = TempDir::new().unwrap();
    let m = Arc::new(NumberGenReadoutExtendable::new(number_gen().await));
    m.readout.n.store(3);
    m.readout.sampling_period.store(0.001);

    let runner = MeasurementRunner::new(m.clone());
    runner.start(target(&dir), Provenance::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    runner.interrupt();
    runner.wait().await.unwrap();

    let LoadedMeasurement::NumberGenReadoutExtendable(data) =
        load(&only_file(&dir)).unwrap()
    else {
        panic!("wrong measurement");
    };
    let y = data.y.unwrap();
    assert_eq!(y.len() % 3, 0);
    assert!(y.len() > 3, "only {} samples", y.len());
    assert_eq!(m.name(), "number_gen_readout_extendable_dataset");
}
