//! Axis-aligned box arithmetic used to decide how much of an object a tile
//! actually sees.

/// Axis-aligned box in pixel units, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from a COCO `[x, y, width, height]` array.
    pub fn from_xywh(xywh: [f64; 4]) -> Self {
        let [x, y, width, height] = xywh;
        Self::new(x, y, width, height)
    }

    pub fn to_xywh(&self) -> [f64; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Strict disjointness: boxes that only share an edge do not overlap.
    pub fn is_disjoint(&self, other: &BBox) -> bool {
        self.right() <= other.x
            || self.x >= other.right()
            || self.bottom() <= other.y
            || self.y >= other.bottom()
    }

    /// Overlapping rectangle, or `None` when the overlap is empty on either axis.
    pub fn intersect(&self, other: &BBox) -> Option<BBox> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        (x2 > x1 && y2 > y1).then(|| BBox::new(x1, y1, x2 - x1, y2 - y1))
    }

    /// True when the box has positive extent and lies inside a `width x height` image.
    pub fn is_within(&self, width: f64, height: f64) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= width
            && self.bottom() <= height
    }
}

/// Area shared by two boxes, zero when they do not overlap.
pub fn intersection_area(a: &BBox, b: &BBox) -> f64 {
    a.intersect(b).map(|rect| rect.area()).unwrap_or(0.0)
}

/// Fraction of `bbox` that falls inside `region` (IoA).
///
/// A box without area yields 0 instead of NaN.
pub fn intersection_over_area(bbox: &BBox, region: &BBox) -> f64 {
    let area = bbox.area();
    if area <= 0.0 {
        return 0.0;
    }
    intersection_area(bbox, region) / area
}
