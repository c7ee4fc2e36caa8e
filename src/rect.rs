// src/rect.rs
//
// Axis-aligned boxes in metres. Mesh rectangles, electrode rectangles and
// CMBND contact faces are all `Rect`s; a contact face is a Rect with zero
// thickness along exactly one axis.

use serde::{Deserialize, Serialize};

/// Geometric tolerance for face matching (metres). Mesh rectangles are
/// user-specified, so "touching" means coincident to within this.
pub const GEOM_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Start corner (minimum coordinates).
    pub s: [f64; 3],
    /// End corner (maximum coordinates).
    pub e: [f64; 3],
}

impl Rect {
    pub fn new(s: [f64; 3], e: [f64; 3]) -> Self {
        Self { s, e }
    }

    pub fn size(&self) -> [f64; 3] {
        [
            self.e[0] - self.s[0],
            self.e[1] - self.s[1],
            self.e[2] - self.s[2],
        ]
    }

    pub fn volume(&self) -> f64 {
        let d = self.size();
        d[0].max(0.0) * d[1].max(0.0) * d[2].max(0.0)
    }

    pub fn center(&self) -> [f64; 3] {
        [
            0.5 * (self.s[0] + self.e[0]),
            0.5 * (self.s[1] + self.e[1]),
            0.5 * (self.s[2] + self.e[2]),
        ]
    }

    pub fn contains(&self, p: [f64; 3]) -> bool {
        (0..3).all(|d| p[d] >= self.s[d] - GEOM_EPS && p[d] <= self.e[d] + GEOM_EPS)
    }

    /// Intersection of two closed boxes. `None` if they are disjoint beyond
    /// tolerance. A returned Rect may have zero extent along some axes (the
    /// boxes touch there).
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let mut s = [0.0; 3];
        let mut e = [0.0; 3];
        for d in 0..3 {
            s[d] = self.s[d].max(other.s[d]);
            e[d] = self.e[d].min(other.e[d]);
            if e[d] < s[d] - GEOM_EPS {
                return None;
            }
            if e[d] < s[d] {
                e[d] = s[d];
            }
        }
        Some(Rect::new(s, e))
    }

    /// If `self` and `other` share a face (zero thickness along exactly one
    /// axis, positive area in the other two), return that axis and the face
    /// rectangle. Edge/corner touches and disjoint boxes return `None`;
    /// positive-volume overlap also returns `None` (callers treat overlap as a
    /// configuration error, detected via `intersection().volume()`).
    pub fn touching_face(&self, other: &Rect) -> Option<(usize, Rect)> {
        let inter = self.intersection(other)?;
        let d = inter.size();
        let mut flat_axis = None;
        for axis in 0..3 {
            if d[axis] <= GEOM_EPS {
                if flat_axis.is_some() {
                    return None; // edge or corner touch
                }
                flat_axis = Some(axis);
            }
        }
        let axis = flat_axis?;
        let (a1, a2) = ((axis + 1) % 3, (axis + 2) % 3);
        if d[a1] > GEOM_EPS && d[a2] > GEOM_EPS {
            Some((axis, inter))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersection_and_volume() {
        let a = Rect::new([0.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        let b = Rect::new([1.0, 0.0, 0.0], [3.0, 1.0, 1.0]);
        let i = a.intersection(&b).unwrap();
        assert!((i.volume() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn touching_face_detected_on_x() {
        let a = Rect::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = Rect::new([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        let (axis, face) = a.touching_face(&b).unwrap();
        assert_eq!(axis, 0);
        assert!((face.s[0] - 1.0).abs() < 1e-12 && (face.e[0] - 1.0).abs() < 1e-12);
        assert!(face.volume() < 1e-12);
    }

    #[test]
    fn edge_touch_is_not_a_face() {
        let a = Rect::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        let b = Rect::new([1.0, 1.0, 0.0], [2.0, 2.0, 1.0]);
        assert!(a.touching_face(&b).is_none());
    }

    #[test]
    fn overlap_is_not_a_face() {
        let a = Rect::new([0.0, 0.0, 0.0], [1.5, 1.0, 1.0]);
        let b = Rect::new([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]);
        assert!(a.touching_face(&b).is_none());
        assert!(a.intersection(&b).unwrap().volume() > 0.0);
    }
}
