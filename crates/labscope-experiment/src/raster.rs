//! 2D raster geometry: grid axes and the ordered list of pixels to visit.

use anyhow::{ensure, Result};
use labscope_core::{Parameter, ParameterSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Every line left to right; slow move back at the start of each line.
    #[default]
    Raster,
    /// Alternate line direction; only the first pixel of a frame moves slowly.
    Serpentine,
}

impl ScanType {
    pub const NAMES: [&'static str; 2] = ["raster", "serpentine"];

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "raster" => Ok(ScanType::Raster),
            "serpentine" => Ok(ScanType::Serpentine),
            other => anyhow::bail!("unknown scan type '{other}'"),
        }
    }
}

/// One grid point in visiting order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPixel {
    /// Frame index.
    pub k: usize,
    /// Line (vertical) index.
    pub j: usize,
    /// Column (horizontal) index.
    pub i: usize,
    pub h: f64,
    pub v: f64,
    /// Large jump: approach slowly (and with backlash correction).
    pub slow_move: bool,
}

/// Evenly spaced points from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterScan {
    pub h0: f64,
    pub h1: f64,
    pub v0: f64,
    pub v1: f64,
    pub nh: usize,
    pub nv: usize,
    pub n_frames: usize,
    pub scan_type: ScanType,
}

impl RasterScan {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.nh >= 1 && self.nv >= 1, "Nh and Nv must be at least 1");
        ensure!(self.n_frames >= 1, "n_frames must be at least 1");
        ensure!(
            [self.h0, self.h1, self.v0, self.v1]
                .iter()
                .all(|x| x.is_finite()),
            "scan range must be finite"
        );
        Ok(())
    }

    pub fn h_array(&self) -> Vec<f64> {
        linspace(self.h0, self.h1, self.nh)
    }

    pub fn v_array(&self) -> Vec<f64> {
        linspace(self.v0, self.v1, self.nv)
    }

    pub fn dh(&self) -> f64 {
        step(self.h0, self.h1, self.nh)
    }

    pub fn dv(&self) -> f64 {
        step(self.v0, self.v1, self.nv)
    }

    /// `[h0, h1, v0, v1]`
    pub fn range_extent(&self) -> [f64; 4] {
        [self.h0, self.h1, self.v0, self.v1]
    }

    /// `(n_frames, Nv, Nh)`
    pub fn scan_shape(&self) -> [usize; 3] {
        [self.n_frames, self.nv, self.nh]
    }

    pub fn pixel_count(&self) -> usize {
        self.n_frames * self.nv * self.nh
    }

    /// Pixels in visiting order.
    pub fn pixels(&self) -> Vec<ScanPixel> {
        let h = self.h_array();
        let v = self.v_array();
        let mut pixels = Vec::with_capacity(self.pixel_count());
        for k in 0..self.n_frames {
            for j in 0..self.nv {
                let reversed = self.scan_type == ScanType::Serpentine && j % 2 == 1;
                for n in 0..self.nh {
                    let i = if reversed { self.nh - 1 - n } else { n };
                    let slow_move = match self.scan_type {
                        ScanType::Raster => n == 0,
                        ScanType::Serpentine => n == 0 && j == 0,
                    };
                    pixels.push(ScanPixel {
                        k,
                        j,
                        i,
                        h: h[i],
                        v: v[j],
                        slow_move,
                    });
                }
            }
        }
        pixels
    }
}

fn step(start: f64, stop: f64, n: usize) -> f64 {
    if n > 1 {
        (stop - start) / (n - 1) as f64
    } else {
        0.0
    }
}

/// Raster settings registered on a measurement.
///
/// `dh`/`dv` are read-only and refreshed whenever the geometry is taken.
#[derive(Debug, Clone)]
pub struct RasterSettings {
    pub h0: Parameter<f64>,
    pub h1: Parameter<f64>,
    pub v0: Parameter<f64>,
    pub v1: Parameter<f64>,
    pub nh: Parameter<i64>,
    pub nv: Parameter<i64>,
    pub dh: Parameter<f64>,
    pub dv: Parameter<f64>,
    pub scan_type: Parameter<String>,
    pub n_frames: Parameter<i64>,
}

impl RasterSettings {
    pub fn register(settings: &mut ParameterSet) -> Self {
        let h0 = settings.add(Parameter::new("h0", 0.0).with_unit("um"));
        let h1 = settings.add(Parameter::new("h1", 10.0).with_unit("um"));
        let v0 = settings.add(Parameter::new("v0", 0.0).with_unit("um"));
        let v1 = settings.add(Parameter::new("v1", 10.0).with_unit("um"));
        let nh = settings.add(Parameter::new("Nh", 11_i64).with_range(1, 10_000));
        let nv = settings.add(Parameter::new("Nv", 11_i64).with_range(1, 10_000));
        let dh = settings.add(Parameter::new("dh", 1.0).with_unit("um").read_only());
        let dv = settings.add(Parameter::new("dv", 1.0).with_unit("um").read_only());
        let scan_type = settings.add(
            Parameter::new("scan_type", "raster".to_string())
                .with_string_choices(ScanType::NAMES),
        );
        let n_frames = settings.add(Parameter::new("n_frames", 1_i64).with_range(1, 100_000));
        Self {
            h0,
            h1,
            v0,
            v1,
            nh,
            nv,
            dh,
            dv,
            scan_type,
            n_frames,
        }
    }

    pub fn geometry(&self) -> Result<RasterScan> {
        let scan = RasterScan {
            h0: self.h0.get(),
            h1: self.h1.get(),
            v0: self.v0.get(),
            v1: self.v1.get(),
            nh: self.nh.get().max(0) as usize,
            nv: self.nv.get().max(0) as usize,
            n_frames: self.n_frames.get().max(0) as usize,
            scan_type: ScanType::parse(&self.scan_type.get())?,
        };
        scan.validate()?;
        self.dh.store(scan.dh());
        self.dv.store(scan.dv());
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(scan_type: ScanType) -> RasterScan {
        RasterScan {
            h0: 0.0,
            h1: 2.0,
            v0: 10.0,
            v1: 11.0,
            nh: 3,
            nv: 2,
            n_frames: 2,
            scan_type,
        }
    }

    #[test]
    fn axes_and_steps() {
        let s = scan(ScanType::Raster);
        assert_eq!(s.h_array(), vec![0.0, 1.0, 2.0]);
        assert_eq!(s.v_array(), vec![10.0, 11.0]);
        assert_eq!(s.dh(), 1.0);
        assert_eq!(s.dv(), 1.0);
        assert_eq!(s.range_extent(), [0.0, 2.0, 10.0, 11.0]);
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
        assert!(linspace(5.0, 9.0, 0).is_empty());
    }

    #[test]
    fn raster_order() {
        let px = scan(ScanType::Raster).pixels();
        assert_eq!(px.len(), 12);
        let idx: Vec<_> = px[..6].iter().map(|p| (p.k, p.j, p.i)).collect();
        assert_eq!(
            idx,
            vec![(0, 0, 0), (0, 0, 1), (0, 0, 2), (0, 1, 0), (0, 1, 1), (0, 1, 2)]
        );
        let slow: Vec<_> = px[..6].iter().map(|p| p.slow_move).collect();
        assert_eq!(slow, vec![true, false, false, true, false, false]);
        assert_eq!(px[6].k, 1);
        assert_eq!((px[4].h, px[4].v), (1.0, 11.0));
    }

    #[test]
    fn serpentine_reverses_odd_lines() {
        let px = scan(ScanType::Serpentine).pixels();
        let cols: Vec<_> = px[..6].iter().map(|p| p.i).collect();
        assert_eq!(cols, vec![0, 1, 2, 2, 1, 0]);
        let slow: Vec<_> = px.iter().filter(|p| p.slow_move).map(|p| p.k).collect();
        assert_eq!(slow, vec![0, 1]);
    }

    #[test]
    fn settings_build_geometry() {
        let mut set = ParameterSet::new();
        let rs = RasterSettings::register(&mut set);
        rs.h1.store(20.0);
        rs.nh.store(5);
        rs.scan_type.store("serpentine".into());
        let g = rs.geometry().unwrap();
        assert_eq!(g.scan_type, ScanType::Serpentine);
        assert_eq!(rs.dh.get(), 5.0);
        assert_eq!(g.scan_shape(), [1, 11, 5]);

        rs.nv.store(0);
        assert!(rs.geometry().is_err());
        assert!(ScanType::parse("spiral").is_err());
    }
}
