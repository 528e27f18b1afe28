use num::{Num, ToPrimitive};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point<T: Num> {
    pub x: T,
    pub y: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointLabel {
    Exclude = 0,
    Include = 1,
}

impl PointLabel {
    pub fn value(self) -> f32 {
        self as i32 as f32
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledPoint<T: Num> {
    pub point: Point<T>,
    pub label: PointLabel,
}

/// Axis-aligned box given by two opposite corners.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox<T: Num> {
    pub x1: T,
    pub y1: T,
    pub x2: T,
    pub y2: T,
}

impl<T: Num + ToPrimitive + Copy> BoundingBox<T> {
    /// Corners reordered so that `x1 < x2` and `y1 < y2`, or `None` for an
    /// empty or non-finite box.
    pub fn normalized(&self) -> Option<BoundingBox<f32>> {
        let [x1, y1, x2, y2] = [self.x1, self.y1, self.x2, self.y2].map(|v| v.to_f32());
        let (x1, y1, x2, y2) = (x1?, y1?, x2?, y2?);
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) || x1 == x2 || y1 == y2 {
            return None;
        }
        Some(BoundingBox {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        })
    }
}

/// Points and/or a box in source image pixel coordinates.
///
/// The caller owns accumulation and passes the whole current set on each decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamPrompt<T: Num> {
    pub points: Vec<LabeledPoint<T>>,
    pub bbox: Option<BoundingBox<T>>,
}

impl<T: Num> Default for SamPrompt<T> {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            bbox: None,
        }
    }
}

impl<T: Num> SamPrompt<T> {
    pub fn point(x: T, y: T, label: PointLabel) -> Self {
        Self::default().with_point(x, y, label)
    }

    pub fn bbox(x1: T, y1: T, x2: T, y2: T) -> Self {
        Self {
            points: Vec::new(),
            bbox: Some(BoundingBox { x1, y1, x2, y2 }),
        }
    }

    pub fn with_point(mut self, x: T, y: T, label: PointLabel) -> Self {
        self.points.push(LabeledPoint {
            point: Point { x, y },
            label,
        });
        self
    }

    pub fn with_bbox(mut self, x1: T, y1: T, x2: T, y2: T) -> Self {
        self.bbox = Some(BoundingBox { x1, y1, x2, y2 });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.bbox.is_none()
    }
}
