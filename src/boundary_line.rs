// src/boundary_line.rs
//
// Directional divider between the clean side and the dirty side of the
// frame. The line is stored with its endpoints in a canonical order chosen
// from the orientation, so the cross-product sign test classifies a point the
// same way no matter which endpoint the configuration lists first:
//
//   height orientation: clean = above the line (smaller y)
//   width orientation:  clean = left of the line (smaller x)
//
// Both axis mappings are precomputed. A line parallel to an axis has no
// finite slope along it; that mapping degrades to the midpoint constant.

use tracing::warn;

use crate::types::{BBox, Orientation};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LineError {
    #[error("line endpoints coincide at ({0}, {1})")]
    Degenerate(f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AxisMapping {
    Linear { slope: f32, intercept: f32 },
    Constant(f32),
}

impl AxisMapping {
    fn between(a: (f32, f32), b: (f32, f32)) -> Self {
        // maps a.0 -> a.1
        if (b.0 - a.0).abs() < f32::EPSILON {
            Self::Constant((a.1 + b.1) / 2.0)
        } else {
            let slope = (b.1 - a.1) / (b.0 - a.0);
            Self::Linear {
                slope,
                intercept: a.1 - slope * a.0,
            }
        }
    }

    fn eval(&self, v: f32) -> f32 {
        match *self {
            Self::Linear { slope, intercept } => slope * v + intercept,
            Self::Constant(c) => c,
        }
    }
}

/// A box projected onto the travel axis together with the line position
/// under it. `start` is the edge nearer the clean side.
#[derive(Debug, Clone, Copy)]
pub struct AxisProjection {
    pub start: f32,
    pub end: f32,
    pub center: f32,
    pub length: f32,
    pub line: f32,
}

impl AxisProjection {
    pub fn fully_clean(&self) -> bool {
        self.end < self.line
    }

    pub fn fully_dirty(&self) -> bool {
        self.start > self.line
    }
}

#[derive(Debug, Clone)]
pub struct BoundaryLine {
    start: (f32, f32),
    end: (f32, f32),
    orientation: Orientation,
    /// y as a function of x
    y_of_x: AxisMapping,
    /// x as a function of y
    x_of_y: AxisMapping,
}

impl BoundaryLine {
    pub fn new(
        a: (f32, f32),
        b: (f32, f32),
        orientation: Orientation,
    ) -> Result<Self, LineError> {
        if (a.0 - b.0).abs() < f32::EPSILON && (a.1 - b.1).abs() < f32::EPSILON {
            return Err(LineError::Degenerate(a.0, a.1));
        }

        let a_first = match orientation {
            // left to right; a vertical line is walked bottom to top
            Orientation::Height => a.0 < b.0 || (a.0 == b.0 && a.1 > b.1),
            // bottom to top; a horizontal line is walked left to right
            Orientation::Width => a.1 > b.1 || (a.1 == b.1 && a.0 < b.0),
        };
        let (start, end) = if a_first { (a, b) } else { (b, a) };

        Ok(Self {
            start,
            end,
            orientation,
            y_of_x: AxisMapping::between(start, end),
            x_of_y: AxisMapping::between((start.1, start.0), (end.1, end.0)),
        })
    }

    pub fn from_coords(coords: [i32; 4], orientation: Orientation) -> Result<Self, LineError> {
        let [x1, y1, x2, y2] = coords.map(|c| c as f32);
        Self::new((x1, y1), (x2, y2), orientation)
    }

    /// Line through the middle of the frame, perpendicular to travel.
    pub fn centered(width: usize, height: usize, orientation: Orientation) -> Self {
        let (w, h) = (width as f32, height as f32);
        let (a, b) = match orientation {
            Orientation::Height => ((0.0, (h / 2.0).floor()), (w, (h / 2.0).floor())),
            Orientation::Width => (((w / 2.0).floor(), 0.0), ((w / 2.0).floor(), h)),
        };
        Self {
            start: a,
            end: b,
            orientation,
            y_of_x: AxisMapping::between(a, b),
            x_of_y: AxisMapping::between((a.1, a.0), (b.1, b.0)),
        }
        .canonical()
    }

    /// Configured line, or the centered line with a warning when the
    /// coordinates are absent or degenerate.
    pub fn from_config_or_centered(
        coords: Option<[i32; 4]>,
        orientation: Orientation,
        width: usize,
        height: usize,
    ) -> Self {
        match coords.map(|c| Self::from_coords(c, orientation)) {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!("⚠️  Invalid line_coords ({}), using centered line", e);
                Self::centered(width, height, orientation)
            }
            None => {
                warn!("⚠️  line_coords not set, using centered line");
                Self::centered(width, height, orientation)
            }
        }
    }

    fn canonical(self) -> Self {
        match Self::new(self.start, self.end, self.orientation) {
            Ok(line) => line,
            Err(_) => self,
        }
    }

    pub fn y_at(&self, x: f32) -> f32 {
        self.y_of_x.eval(x)
    }

    pub fn x_at(&self, y: f32) -> f32 {
        self.x_of_y.eval(y)
    }

    /// Line coordinate on the travel axis at the given orthogonal coordinate.
    #[cfg(test)]
    pub fn position_along(&self, orthogonal: f32) -> f32 {
        match self.orientation {
            Orientation::Height => self.y_at(orthogonal),
            Orientation::Width => self.x_at(orthogonal),
        }
    }

    /// True when the point lies on the clean side (negative cross product).
    pub fn is_above_line(&self, point: (f32, f32)) -> bool {
        let ((x1, y1), (x2, y2)) = (self.start, self.end);
        let (x, y) = point;
        (x2 - x1) * (y - y1) - (y2 - y1) * (x - x1) < 0.0
    }

    /// Point on the travel axis at `along`, keeping the box's orthogonal center.
    pub fn axis_point(&self, bbox: &BBox, along: f32) -> (f32, f32) {
        let (cx, cy) = bbox.center();
        match self.orientation {
            Orientation::Height => (cx, along),
            Orientation::Width => (along, cy),
        }
    }

    pub fn project(&self, bbox: &BBox) -> AxisProjection {
        let (cx, cy) = bbox.center();
        match self.orientation {
            Orientation::Height => AxisProjection {
                start: bbox.y1,
                end: bbox.y2,
                center: cy,
                length: bbox.height(),
                line: self.y_at(cx),
            },
            Orientation::Width => AxisProjection {
                start: bbox.x1,
                end: bbox.x2,
                center: cx,
                length: bbox.width(),
                line: self.x_at(cy),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_stable_under_endpoint_swap() {
        let points = [(100.0, 50.0), (320.0, 300.0), (600.0, 190.0), (10.0, 210.0)];
        for orientation in [Orientation::Height, Orientation::Width] {
            let a = BoundaryLine::new((0.0, 180.0), (640.0, 220.0), orientation).unwrap();
            let b = BoundaryLine::new((640.0, 220.0), (0.0, 180.0), orientation).unwrap();
            for p in points {
                assert_eq!(
                    a.is_above_line(p),
                    b.is_above_line(p),
                    "point {:?} flipped for {:?}",
                    p,
                    orientation
                );
            }
        }
    }

    #[test]
    fn test_height_clean_side_is_above() {
        let line = BoundaryLine::new((640.0, 200.0), (0.0, 200.0), Orientation::Height).unwrap();
        assert!(line.is_above_line((320.0, 100.0)));
        assert!(!line.is_above_line((320.0, 300.0)));
        assert_eq!(line.position_along(123.0), 200.0);
    }

    #[test]
    fn test_width_clean_side_is_left() {
        let line = BoundaryLine::new((320.0, 0.0), (320.0, 384.0), Orientation::Width).unwrap();
        assert!(line.is_above_line((100.0, 200.0)));
        assert!(!line.is_above_line((500.0, 200.0)));
        assert_eq!(line.position_along(50.0), 320.0);
    }

    #[test]
    fn test_vertical_line_y_mapping_uses_midpoint() {
        let line = BoundaryLine::new((300.0, 100.0), (300.0, 300.0), Orientation::Width).unwrap();
        assert_eq!(line.y_at(42.0), 200.0);
        assert_eq!(line.x_at(42.0), 300.0);
    }

    #[test]
    fn test_sloped_mapping() {
        let line = BoundaryLine::new((0.0, 100.0), (200.0, 300.0), Orientation::Height).unwrap();
        assert!((line.y_at(100.0) - 200.0).abs() < 1e-4);
        assert!((line.x_at(250.0) - 150.0).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_line_rejected() {
        assert!(matches!(
            BoundaryLine::new((5.0, 5.0), (5.0, 5.0), Orientation::Height),
            Err(LineError::Degenerate(..))
        ));
        let fallback =
            BoundaryLine::from_config_or_centered(Some([5, 5, 5, 5]), Orientation::Height, 640, 384);
        assert_eq!(fallback.position_along(10.0), 192.0);
    }

    #[test]
    fn test_centered_width_line() {
        let line = BoundaryLine::centered(640, 384, Orientation::Width);
        assert_eq!(line.position_along(0.0), 320.0);
        assert!(line.is_above_line((10.0, 10.0)));
    }

    #[test]
    fn test_projection_full_sides() {
        let line = BoundaryLine::centered(640, 384, Orientation::Height);
        let above = line.project(&BBox::new(10.0, 10.0, 50.0, 100.0));
        assert!(above.fully_clean() && !above.fully_dirty());
        let below = line.project(&BBox::new(10.0, 250.0, 50.0, 300.0));
        assert!(below.fully_dirty() && !below.fully_clean());
    }
}
