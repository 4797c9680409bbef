use std::{collections::BTreeMap, fmt};

use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

pub type FrameIndex = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelPosition {
    pub row: f64,
    pub col: f64,
}

impl PixelPosition {
    pub const ORIGIN: PixelPosition = PixelPosition { row: 0., col: 0. };

    pub fn new(row: f64, col: f64) -> Self {
        PixelPosition { row, col }
    }

    pub fn as_vector(&self) -> Vector2<f64> {
        Vector2::new(self.row, self.col)
    }
}

impl fmt::Display for PixelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkerAttribute {
    Position(PixelPosition),
    Contour(Vec<PixelPosition>),
    Angle(f64),
    Area(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub position: PixelPosition,
    pub attributes: BTreeMap<String, MarkerAttribute>,
}

impl MarkerObservation {
    pub fn at(position: PixelPosition) -> Self {
        MarkerObservation {
            position,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: MarkerAttribute) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn angle(&self) -> Option<f64> {
        match self.attributes.get("angle") {
            Some(MarkerAttribute::Angle(angle)) => Some(*angle),
            _ => None,
        }
    }

    pub fn area(&self) -> Option<f64> {
        match self.attributes.get("area") {
            Some(MarkerAttribute::Area(area)) => Some(*area),
            _ => None,
        }
    }

    pub fn contour(&self) -> Option<&[PixelPosition]> {
        match self.attributes.get("contour") {
            Some(MarkerAttribute::Contour(points)) => Some(points),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerReading {
    pub name: String,
    pub observation: MarkerObservation,
}

impl MarkerReading {
    pub fn new(name: impl Into<String>, observation: MarkerObservation) -> Self {
        MarkerReading {
            name: name.into(),
            observation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedFrame {
    pub index: FrameIndex,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveCommand {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MoveCommand {
    pub fn as_point(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.z)
    }
}

impl From<Point3<f64>> for MoveCommand {
    fn from(point: Point3<f64>) -> Self {
        MoveCommand {
            x: point.x,
            y: point.y,
            z: point.z,
        }
    }
}

/// Linear map from pixel positions to stage coordinates.
///
/// The stage x axis follows image columns and y follows rows; both are shifted
/// by the same `offset` and z is pinned for planar tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetMapping {
    pub offset: f64,
    pub z: f64,
}

impl TargetMapping {
    pub fn target_for(&self, position: PixelPosition) -> MoveCommand {
        let shifted = position.as_vector() - Vector2::repeat(self.offset);
        Point3::new(shifted.y, shifted.x, self.z).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_subtracts_offset_on_both_axes() {
        let mapping = TargetMapping { offset: 30., z: 0. };
        let target = mapping.target_for(PixelPosition::new(60., 60.));
        assert_eq!(target, MoveCommand { x: 30., y: 30., z: 0. });

        let target = mapping.target_for(PixelPosition::new(100., 45.));
        assert_eq!(target, MoveCommand { x: 15., y: 70., z: 0. });
    }

    #[test]
    fn typed_attribute_lookup() {
        let observation = MarkerObservation::at(PixelPosition::new(1., 2.))
            .with_attribute("angle", MarkerAttribute::Angle(0.5))
            .with_attribute("area", MarkerAttribute::Position(PixelPosition::ORIGIN));

        assert_eq!(observation.angle(), Some(0.5));
        assert_eq!(observation.area(), None);
        assert!(observation.contour().is_none());
    }

    #[test]
    fn position_display_matches_report_format() {
        assert_eq!(PixelPosition::new(60., 12.5).to_string(), "(60, 12.5)");
    }
}
