//! Logical to controller axis mapping and per-axis [`Movable`] handles.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use labscope_core::{Movable, Parameter};

/// Parse an axis map such as `"21"` or `"213"` into controller axis ids.
///
/// Character `n` gives the controller axis (1-based) of logical axis `n`
/// (X, Y, Z in that order).
pub fn parse_axis_map(map: &str, len: usize) -> Result<Vec<u32>> {
    ensure!(
        map.chars().count() == len,
        "axis map '{map}' must have {len} digits"
    );
    let ids: Vec<u32> = map
        .chars()
        .map(|c| c.to_digit(10).filter(|d| (1..=3).contains(d)))
        .collect::<Option<_>>()
        .ok_or_else(|| anyhow::anyhow!("axis map '{map}' may only contain 1, 2 or 3"))?;
    for (i, id) in ids.iter().enumerate() {
        ensure!(
            !ids[..i].contains(id),
            "axis map '{map}' uses axis {id} twice"
        );
    }
    Ok(ids)
}

/// Controller axes behind the logical X and Y axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XyAxisMap {
    pub x: u32,
    pub y: u32,
}

impl XyAxisMap {
    pub fn parse(map: &str) -> Result<Self> {
        let ids = parse_axis_map(map, 2)?;
        Ok(Self { x: ids[0], y: ids[1] })
    }

    /// Id for a logical axis name (`"X"` or `"Y"`).
    pub fn id(&self, logical: &str) -> Option<u32> {
        match logical {
            "X" => Some(self.x),
            "Y" => Some(self.y),
            _ => None,
        }
    }

    /// Place per-logical-axis values into controller axis order.
    pub fn to_controller(&self, x: Option<f64>, y: Option<f64>) -> [Option<f64>; 2] {
        let mut out = [None, None];
        for (id, value) in [(self.x, x), (self.y, y)] {
            if let Some(slot) = out.get_mut((id as usize).wrapping_sub(1)) {
                *slot = value;
            }
        }
        out
    }
}

impl Default for XyAxisMap {
    fn default() -> Self {
        Self { x: 2, y: 1 }
    }
}

/// One stage axis driven through its target / position settings.
///
/// Moves write the target setting straight to the slow per-axis move bound
/// on connect. The target limits only guard user edits; the controller clamps
/// the move to its travel, so scans may start at the origin.
#[derive(Clone)]
pub struct StageAxis {
    name: String,
    target: Parameter<f64>,
    position: Parameter<f64>,
}

impl StageAxis {
    pub fn new(name: impl Into<String>, target: Parameter<f64>, position: Parameter<f64>) -> Self {
        Self {
            name: name.into(),
            target,
            position,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for StageAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageAxis").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Movable for StageAxis {
    async fn move_abs(&self, position: f64) -> Result<()> {
        self.target.update_value(position, true).await
    }

    async fn position(&self) -> Result<f64> {
        if self.position.has_hardware_reader() {
            self.position.read_from_hardware().await
        } else {
            Ok(self.position.get())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_maps() {
        assert_eq!(XyAxisMap::parse("21").unwrap(), XyAxisMap { x: 2, y: 1 });
        assert_eq!(parse_axis_map("213", 3).unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn rejects_bad_maps() {
        assert!(XyAxisMap::parse("2").is_err());
        assert!(XyAxisMap::parse("22").is_err());
        assert!(XyAxisMap::parse("2x").is_err());
        assert!(parse_axis_map("214", 3).is_err());
    }

    #[test]
    fn controller_order() {
        let map = XyAxisMap::default();
        assert_eq!(map.to_controller(Some(5.0), Some(7.0)), [Some(7.0), Some(5.0)]);
        assert_eq!(map.to_controller(Some(5.0), None), [None, Some(5.0)]);
        let straight = XyAxisMap::parse("12").unwrap();
        assert_eq!(straight.to_controller(Some(5.0), None), [Some(5.0), None]);
    }

    #[tokio::test]
    async fn stage_axis_moves_through_target() {
        let target = Parameter::new("x_target", 0.0).with_range(0.0, 10.0);
        let position = Parameter::new("x_position", 0.0);
        let axis = StageAxis::new("X", target.clone(), position.clone());
        axis.move_abs(4.0).await.unwrap();
        assert_eq!(target.get(), 4.0);
        assert!(target.set(11.0).await.is_err());
        axis.move_abs(11.0).await.unwrap();
        assert_eq!(target.get(), 11.0);
        position.store(3.5);
        assert_eq!(axis.position().await.unwrap(), 3.5);
    }
}
