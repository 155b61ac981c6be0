//! Slow-move chunking shared by the MicroDrive and NanoDrive.
//!
//! A move of length `d` at `max_speed` takes `|d| / max_speed` seconds and is
//! split into `ceil(t / period)` equal steps, each padded to one period.

use std::time::{Duration, Instant};

use anyhow::Result;

/// Number of steps for a slow move of `distance` um.
pub fn slow_step_count(distance: f64, max_speed: f64, period: Duration) -> usize {
    let period = period.as_secs_f64();
    if distance == 0.0 || max_speed <= 0.0 || period <= 0.0 {
        return 0;
    }
    let dt = distance.abs() / max_speed;
    (dt / period).ceil() as usize
}

/// Run `step(1..=steps)`, sleeping out the remainder of each period.
pub fn paced<F>(steps: usize, period: Duration, mut step: F) -> Result<()>
where
    F: FnMut(usize) -> Result<()>,
{
    for i in 1..=steps {
        let t0 = Instant::now();
        step(i)?;
        let elapsed = t0.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_count_rounds_up() {
        let p = Duration::from_millis(50);
        // 10 um at 100 um/s = 0.1 s = 2 periods
        assert_eq!(slow_step_count(10.0, 100.0, p), 2);
        assert_eq!(slow_step_count(-10.0, 100.0, p), 2);
        assert_eq!(slow_step_count(10.1, 100.0, p), 3);
        assert_eq!(slow_step_count(0.001, 100.0, p), 1);
        assert_eq!(slow_step_count(0.0, 100.0, p), 0);
    }

    #[test]
    fn paced_calls_every_step_and_waits() {
        let mut seen = Vec::new();
        let t0 = Instant::now();
        paced(3, Duration::from_millis(5), |i| {
            seen.push(i);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(t0.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn paced_stops_on_error() {
        let mut calls = 0;
        let err = paced(5, Duration::ZERO, |i| {
            calls += 1;
            if i == 2 {
                anyhow::bail!("MCL_DEV_NOT_READY");
            }
            Ok(())
        });
        assert!(err.is_err());
        assert_eq!(calls, 2);
    }
}
