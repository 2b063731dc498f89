use serde::{Deserialize, Serialize};

/// A point in the host world: map identity plus coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub map: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub orientation: f32,
}

impl Location {
    pub const fn new(map: u32, x: f32, y: f32, z: f32) -> Self {
        Self {
            map,
            x,
            y,
            z,
            orientation: 0.0,
        }
    }

    /// Euclidean distance, or `None` when the two points are on different maps.
    pub fn distance_to(&self, other: &Location) -> Option<f32> {
        if self.map != other.map {
            return None;
        }
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        Some((dx * dx + dy * dy + dz * dz).sqrt())
    }

    /// Whether this point lies on `center`'s map within `radius` of it.
    pub fn is_within(&self, center: &Location, radius: f32) -> bool {
        self.distance_to(center).is_some_and(|d| d <= radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_same_map() {
        let a = Location::new(1, 0.0, 0.0, 0.0);
        let b = Location::new(1, 3.0, 4.0, 0.0);
        let d = a.distance_to(&b).unwrap();
        assert!((d - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn distance_other_map_is_none() {
        let a = Location::new(1, 0.0, 0.0, 0.0);
        let b = Location::new(2, 0.0, 0.0, 0.0);
        assert_eq!(a.distance_to(&b), None);
        assert!(!a.is_within(&b, 1000.0));
    }

    #[test]
    fn within_radius_is_inclusive() {
        let center = Location::new(1, 10.0, 10.0, 0.0);
        let edge = Location::new(1, 10.0, 40.0, 0.0);
        assert!(edge.is_within(&center, 30.0));
        assert!(!edge.is_within(&center, 29.9));
    }
}
