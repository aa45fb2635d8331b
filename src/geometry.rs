//! Circle through three points
//!
//! The center is the intersection of the perpendicular bisectors of AB and BC rounded
//! to whole pixels, the radius the mean distance of the three points to that center.

pub use nalgebra::{distance, Point2};

/// Offset applied to a coordinate shared by two points before taking slopes
pub const PERTURBATION: f64 = 1e-4;
/// Relative slope difference under which two bisectors are parallel
const PARALLEL_TOLERANCE: f64 = 1e-9;
/// Relative cross product under which three points are collinear
const COLLINEAR_TOLERANCE: f64 = 1e-9;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("points {0}, {1} and {2} are collinear, no circle passes through them")]
    Collinear(Point2<f64>, Point2<f64>, Point2<f64>),
    #[error("circle fit through {0}, {1} and {2} is not finite")]
    NonFinite(Point2<f64>, Point2<f64>, Point2<f64>),
}
type Result<T> = std::result::Result<T, GeometryError>;

/// The line `y = slope * x + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}
impl Line {
    /// Perpendicular bisector of the segment AB
    ///
    /// B is nudged by [PERTURBATION] along any axis it shares with A so that neither
    /// AB nor its bisector is axis-parallel.
    pub fn perpendicular_bisector(a: &Point2<f64>, b: &Point2<f64>) -> Self {
        let mut b = *b;
        if a.y == b.y {
            b.y += PERTURBATION;
        }
        if a.x == b.x {
            b.x += PERTURBATION;
        }
        let slope = -(b.x - a.x) / (b.y - a.y);
        let midpoint = nalgebra::center(a, &b);
        Self {
            slope,
            intercept: midpoint.y - slope * midpoint.x,
        }
    }
    /// Intersection point, `None` for parallel lines
    pub fn intersection(&self, other: &Line) -> Option<Point2<f64>> {
        let delta = self.slope - other.slope;
        let scale = self.slope.abs().max(other.slope.abs()).max(1.);
        if !(delta.abs() > PARALLEL_TOLERANCE * scale) {
            return None;
        }
        let x = (other.intercept - self.intercept) / delta;
        // the flatter line gives the better conditioned ordinate
        let flat = if self.slope.abs() <= other.slope.abs() {
            self
        } else {
            other
        };
        Some(Point2::new(x, flat.slope * x + flat.intercept))
    }
}

/// A circle in whole pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Circle {
    pub center: [i64; 2],
    pub radius: i64,
}

/// Checks whether A, B and C lie on one line, coincident points included
pub fn collinear(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> bool {
    let (ab, ac) = (b - a, c - a);
    let cross = ab.x * ac.y - ab.y * ac.x;
    cross.abs() <= COLLINEAR_TOLERANCE * ab.norm() * ac.norm()
}

/// Fits the circle passing through A, B and C
///
/// Collinear points are an error, never a far away approximate circle: the perturbation
/// of shared coordinates would otherwise turn points on a horizontal or vertical line
/// into a huge circle.
pub fn circle_from_three_points(
    a: Point2<f64>,
    b: Point2<f64>,
    c: Point2<f64>,
) -> Result<Circle> {
    if collinear(&a, &b, &c) {
        return Err(GeometryError::Collinear(a, b, c));
    }
    let ab = Line::perpendicular_bisector(&a, &b);
    let bc = Line::perpendicular_bisector(&b, &c);
    let center = ab
        .intersection(&bc)
        .ok_or(GeometryError::Collinear(a, b, c))?;
    if !(center.x.is_finite() && center.y.is_finite()) {
        return Err(GeometryError::NonFinite(a, b, c));
    }
    // the radius is measured from the whole pixel center
    let center = center.map(f64::round);
    let radius = [a, b, c].iter().map(|p| distance(p, &center)).sum::<f64>() / 3.;
    if !radius.is_finite() {
        return Err(GeometryError::NonFinite(a, b, c));
    }
    Ok(Circle {
        center: [center.x as i64, center.y as i64],
        radius: radius.round() as i64,
    })
}
