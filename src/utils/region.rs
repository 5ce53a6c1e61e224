//! Integer pixel regions and the transformations the surface pipeline
//! applies to them.
//!
//! A [`Region`] is kept as a set of non-overlapping rectangles. This is not a
//! band-optimized representation, but it keeps every operation exact, which
//! is what damage accounting needs: a region must cover every affected pixel,
//! and fractional scaling therefore always rounds outward.

use super::geometry::{Logical, Point, Rectangle, Size, Transform};

/// Kind of a rectangle part of a region
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RectangleKind {
    /// This rectangle should be added to the region
    Add,
    /// The intersection of this rectangle with the region should
    /// be removed from the region
    Subtract,
}

/// Description of the contents of a client-built region
///
/// A region is defined as a union and difference of rectangles.
///
/// This struct contains an ordered `Vec` containing the rectangles defining
/// a region. They should be added or subtracted in this order to compute the
/// actual contents of the region.
#[derive(Clone, Debug, Default)]
pub struct RegionAttributes {
    /// List of rectangles part of this region
    pub rects: Vec<(RectangleKind, Rectangle<i32, Logical>)>,
}

impl RegionAttributes {
    /// Evaluate the add/subtract list into a computed [`Region`]
    pub fn to_region(&self) -> Region<Logical> {
        let mut region = Region::new();
        for &(kind, rect) in &self.rects {
            match kind {
                RectangleKind::Add => region.union_rect(rect),
                RectangleKind::Subtract => region.subtract_rect(rect),
            }
        }
        region
    }
}

/// A 2D integer pixel region, stored as disjoint rectangles
pub struct Region<Kind = Logical> {
    rects: Vec<Rectangle<i32, Kind>>,
}

impl<Kind> std::fmt::Debug for Region<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rects.iter()).finish()
    }
}

impl<Kind> Default for Region<Kind> {
    fn default() -> Self {
        Region { rects: Vec::new() }
    }
}

impl<Kind> Clone for Region<Kind> {
    fn clone(&self) -> Self {
        Region {
            rects: self.rects.clone(),
        }
    }
}

fn retag<K1, K2>(rect: Rectangle<i32, K1>) -> Rectangle<i32, K2> {
    Rectangle::new((rect.loc.x, rect.loc.y).into(), (rect.size.w, rect.size.h).into())
}

impl<Kind> Region<Kind> {
    /// Create a new empty region
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a region covering a single rectangle
    pub fn from_rect(rect: Rectangle<i32, Kind>) -> Self {
        let mut region = Region::new();
        region.union_rect(rect);
        region
    }

    /// Check if the region covers no pixel
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Remove all rectangles from the region
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// The disjoint rectangles making up the region
    pub fn rects(&self) -> &[Rectangle<i32, Kind>] {
        &self.rects
    }

    /// The bounding rectangle of the region
    pub fn extents(&self) -> Rectangle<i32, Kind> {
        let mut iter = self.rects.iter();
        let Some(first) = iter.next() else {
            return Rectangle::zero();
        };
        iter.fold(*first, |acc, rect| acc.merge(*rect))
    }

    /// Check whether the given point is inside the region
    pub fn contains(&self, point: Point<i32, Kind>) -> bool {
        self.rects.iter().any(|rect| rect.contains(point))
    }

    /// Add a rectangle to the region
    pub fn union_rect(&mut self, rect: Rectangle<i32, Kind>) {
        if rect.is_empty() {
            return;
        }
        let pieces = rect.subtract_rects(self.rects.iter().copied());
        self.rects.extend(pieces);
    }

    /// Add every rectangle of another region to this one
    pub fn union(&mut self, other: &Region<Kind>) {
        for &rect in &other.rects {
            self.union_rect(rect);
        }
    }

    /// Remove a rectangle from the region
    pub fn subtract_rect(&mut self, rect: Rectangle<i32, Kind>) {
        if rect.is_empty() {
            return;
        }
        let rects = std::mem::take(&mut self.rects);
        self.rects = Rectangle::subtract_rects_many_in_place(rects, [rect]);
    }

    /// Clip the region to the given bounds
    pub fn intersect_rect(&mut self, bounds: Rectangle<i32, Kind>) {
        self.rects = self
            .rects
            .iter()
            .filter_map(|rect| rect.intersection(bounds))
            .collect();
    }

    /// Clip the region to the given bounds and move the result so the bounds
    /// origin becomes the region origin
    pub fn cropped(&self, bounds: Rectangle<i32, Kind>) -> Region<Kind> {
        let mut region = self.clone();
        region.intersect_rect(bounds);
        region.translate((-bounds.loc.x, -bounds.loc.y).into());
        region
    }

    /// Move every rectangle of the region by the given offset
    pub fn translate(&mut self, offset: Point<i32, Kind>) {
        for rect in &mut self.rects {
            rect.loc += offset;
        }
    }

    /// Scale the region by a uniform factor
    ///
    /// Fractional factors round outward, so the result covers every pixel the
    /// source region touched.
    pub fn scale(&self, factor: f64) -> Region<Kind> {
        self.scale_xy(factor, factor)
    }

    /// Scale the region by per-axis factors, rounding outward
    pub fn scale_xy(&self, fx: f64, fy: f64) -> Region<Kind> {
        let mut region = Region::new();
        for rect in &self.rects {
            let x1 = (rect.loc.x as f64 * fx).floor() as i32;
            let y1 = (rect.loc.y as f64 * fy).floor() as i32;
            let x2 = ((rect.loc.x + rect.size.w) as f64 * fx).ceil() as i32;
            let y2 = ((rect.loc.y + rect.size.h) as f64 * fy).ceil() as i32;
            region.union_rect(Rectangle::from_extremities((x1, y1), (x2, y2)));
        }
        region
    }

    /// Apply a [`Transform`] to the region within an area of the given size
    ///
    /// The area is the size of the space the region currently lives in; the
    /// result is expressed in the transformed space, which may carry a
    /// different coordinate kind.
    pub fn transform<K2>(&self, transform: Transform, area: Size<i32, Kind>) -> Region<K2> {
        Region {
            rects: self
                .rects
                .iter()
                .map(|&rect| retag(transform.transform_rect_in(rect, &area)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
        Rectangle::new((x, y).into(), (w, h).into())
    }

    fn area_of(region: &Region<Logical>) -> i32 {
        region.rects().iter().map(|r| r.size.w * r.size.h).sum()
    }

    #[test]
    fn union_overlapping_stays_disjoint() {
        let mut region = Region::from_rect(rect(0, 0, 10, 10));
        region.union_rect(rect(5, 5, 10, 10));

        assert_eq!(area_of(&region), 100 + 100 - 25);
        for (i, a) in region.rects().iter().enumerate() {
            for b in region.rects().iter().skip(i + 1) {
                assert!(!a.overlaps(*b));
            }
        }
    }

    #[test]
    fn subtract_then_contains() {
        let mut region = Region::from_rect(rect(0, 0, 100, 100));
        region.subtract_rect(rect(25, 25, 50, 50));

        assert!(region.contains((10, 10).into()));
        assert!(!region.contains((50, 50).into()));
        assert_eq!(area_of(&region), 100 * 100 - 50 * 50);
    }

    #[test]
    fn crop_translates_to_origin() {
        let region = Region::from_rect(rect(10, 10, 40, 40));
        let cropped = region.cropped(rect(20, 20, 100, 100));

        assert_eq!(cropped.rects(), &[rect(0, 0, 30, 30)]);
    }

    #[test]
    fn fractional_scale_rounds_outward() {
        let region = Region::from_rect(rect(1, 1, 2, 2));
        let scaled = region.scale(0.5);

        // (1, 1)-(3, 3) scaled by 0.5 lands on (0.5, 0.5)-(1.5, 1.5) and
        // must still cover the partial pixels on both sides
        assert_eq!(scaled.extents(), rect(0, 0, 2, 2));
    }

    #[test]
    fn integer_scale_is_exact() {
        let region = Region::from_rect(rect(3, 4, 5, 6));
        let scaled = region.scale(2.0);
        assert_eq!(scaled.extents(), rect(6, 8, 10, 12));
    }

    #[test]
    fn transform_90_region() {
        let region = Region::from_rect(rect(0, 0, 10, 20));
        let transformed: Region<Logical> = region.transform(Transform::_90, (30, 40).into());
        assert_eq!(transformed.rects(), &[rect(20, 0, 20, 10)]);
    }

    #[test]
    fn attributes_evaluate_in_order() {
        let attrs = RegionAttributes {
            rects: vec![
                (RectangleKind::Add, rect(0, 0, 10, 10)),
                (RectangleKind::Subtract, rect(0, 0, 5, 5)),
                (RectangleKind::Add, rect(0, 0, 2, 2)),
            ],
        };
        let region = attrs.to_region();
        assert!(region.contains((1, 1).into()));
        assert!(!region.contains((4, 4).into()));
        assert!(region.contains((7, 7).into()));
    }
}
