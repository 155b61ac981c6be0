//! Pixel to wavelength calibration for a Czerny-Turner spectrograph.
//!
//! Each grating is described by one row of eight numbers:
//! `[f, delta, gamma, n0, offset_adjust, d_grating, x_pixel, curvature]`
//! (focal length and grating pitch in nm, angles in radians, pixel pitch in
//! nm). `curvature` may be omitted.

use anyhow::{ensure, Result};

/// Default row used for every grating until a fit is available.
pub const DEFAULT_CALIBRATION_ROW: [f64; 8] = [
    300e6,
    0.0,
    0.0,
    256.0,
    0.0,
    (1.0 / 150.0) * 1e6,
    16e3,
    0.0,
];

/// Calibration constants of one grating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GratingCalibration {
    /// Focal length (nm).
    pub f: f64,
    /// Detector tilt (rad).
    pub delta: f64,
    /// Inclusion angle (rad).
    pub gamma: f64,
    /// Pixel on the optical axis at zero wavelength.
    pub n0: f64,
    /// Shift of `n0` per nm of centre wavelength.
    pub offset_adjust: f64,
    /// Groove spacing (nm).
    pub d_grating: f64,
    /// Pixel pitch (nm).
    pub x_pixel: f64,
    pub curvature: f64,
}

impl GratingCalibration {
    /// Build from a stored row; the curvature column is optional.
    pub fn from_row(row: &[f64]) -> Result<Self> {
        ensure!(
            row.len() >= 7,
            "calibration row needs at least 7 values, got {}",
            row.len()
        );
        Ok(Self {
            f: row[0],
            delta: row[1],
            gamma: row[2],
            n0: row[3],
            offset_adjust: row[4],
            d_grating: row[5],
            x_pixel: row[6],
            curvature: row.get(7).copied().unwrap_or(0.0),
        })
    }

    /// Wavelength (nm) of each pixel for the given centre wavelength.
    ///
    /// With `binning > 1` the pixel indices refer to binned pixels and are
    /// mapped back to the centre of each bin on the sensor.
    pub fn wavelengths(
        &self,
        px_indices: &[f64],
        wl_center: f64,
        binning: u32,
        m_order: i32,
    ) -> Vec<f64> {
        let binning = binning.max(1) as f64;
        px_indices
            .iter()
            .map(|&px| {
                let binned_px = binning * px + 0.5 * (binning - 1.0);
                wl_p_calib(
                    binned_px,
                    self.n0,
                    self.offset_adjust,
                    wl_center,
                    m_order,
                    self.d_grating,
                    self.x_pixel,
                    self.f,
                    self.delta,
                    self.gamma,
                    self.curvature,
                )
            })
            .collect()
    }
}

/// Wavelength at pixel `px`.
///
/// ```text
/// n   = px - (n0 + offset_adjust * wl_center)
/// psi = asin(m * wl_center / (2 d cos(gamma / 2)))
/// eta = atan(n * x_pixel * cos(delta) / (f + n * x_pixel * sin(delta)))
/// wl  = (d / m) (sin(psi - gamma/2) + sin(psi + gamma/2 + eta)) + curvature * n^2
/// ```
#[allow(clippy::too_many_arguments)]
pub fn wl_p_calib(
    px: f64,
    n0: f64,
    offset_adjust: f64,
    wl_center: f64,
    m_order: i32,
    d_grating: f64,
    x_pixel: f64,
    f: f64,
    delta: f64,
    gamma: f64,
    curvature: f64,
) -> f64 {
    let m = m_order as f64;
    let n = px - (n0 + offset_adjust * wl_center);
    let psi = (m * wl_center / (2.0 * d_grating * (gamma / 2.0).cos())).asin();
    let eta = (n * x_pixel * delta.cos() / (f + n * x_pixel * delta.sin())).atan();
    (d_grating / m) * ((psi - gamma / 2.0).sin() + (psi + gamma / 2.0 + eta).sin())
        + curvature * n * n
}
