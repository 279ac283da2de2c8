//! Perspective transforms.
//!
//! Homographies are built from the standard four-point square-to-quad
//! formula; the inverse direction uses the adjugate matrix, and two of
//! them compose into an arbitrary quad-to-quad mapping.

use crate::geometry::{Point, Vector2};
use crate::tables::DISTANCE_TO_BORDER;

/// 3x3 homography.
#[derive(Debug, Clone, Copy)]
pub struct PerspectiveTransform {
	a11: f32,
	a12: f32,
	a13: f32,
	a21: f32,
	a22: f32,
	a23: f32,
	a31: f32,
	a32: f32,
	a33: f32,
}

/// Maps the unit square to the quadrilateral `(p0, p1, p2, p3)`.
fn square_to_quad(p0: Point, p1: Point, p2: Point, p3: Point) -> PerspectiveTransform {
	let dx3 = p0.x - p1.x + p2.x - p3.x;
	let dy3 = p0.y - p1.y + p2.y - p3.y;
	if dx3 == 0.0 && dy3 == 0.0 {
		// affine case
		PerspectiveTransform {
			a11: p1.x - p0.x,
			a21: p2.x - p1.x,
			a31: p0.x,
			a12: p1.y - p0.y,
			a22: p2.y - p1.y,
			a32: p0.y,
			a13: 0.0,
			a23: 0.0,
			a33: 1.0,
		}
	} else {
		let dx1 = p1.x - p2.x;
		let dx2 = p3.x - p2.x;
		let dy1 = p1.y - p2.y;
		let dy2 = p3.y - p2.y;
		let denominator = dx1 * dy2 - dx2 * dy1;
		let a13 = (dx3 * dy2 - dx2 * dy3) / denominator;
		let a23 = (dx1 * dy3 - dx3 * dy1) / denominator;
		PerspectiveTransform {
			a11: p1.x - p0.x + a13 * p1.x,
			a21: p3.x - p0.x + a23 * p3.x,
			a31: p0.x,
			a12: p1.y - p0.y + a13 * p1.y,
			a22: p3.y - p0.y + a23 * p3.y,
			a32: p0.y,
			a13,
			a23,
			a33: 1.0,
		}
	}
}

/// Maps the quadrilateral `(p0, p1, p2, p3)` to the unit square.
fn quad_to_square(p0: Point, p1: Point, p2: Point, p3: Point) -> PerspectiveTransform {
	let s2q = square_to_quad(p0, p1, p2, p3);
	// adjugate matrix of the forward transform
	PerspectiveTransform {
		a11: s2q.a22 * s2q.a33 - s2q.a23 * s2q.a32,
		a21: s2q.a23 * s2q.a31 - s2q.a21 * s2q.a33,
		a31: s2q.a21 * s2q.a32 - s2q.a22 * s2q.a31,
		a12: s2q.a13 * s2q.a32 - s2q.a12 * s2q.a33,
		a22: s2q.a11 * s2q.a33 - s2q.a13 * s2q.a31,
		a32: s2q.a12 * s2q.a31 - s2q.a11 * s2q.a32,
		a13: s2q.a12 * s2q.a23 - s2q.a13 * s2q.a22,
		a23: s2q.a13 * s2q.a21 - s2q.a11 * s2q.a23,
		a33: s2q.a11 * s2q.a22 - s2q.a12 * s2q.a21,
	}
}

fn multiply(m1: &PerspectiveTransform, m2: &PerspectiveTransform) -> PerspectiveTransform {
	PerspectiveTransform {
		a11: m1.a11 * m2.a11 + m1.a12 * m2.a21 + m1.a13 * m2.a31,
		a21: m1.a21 * m2.a11 + m1.a22 * m2.a21 + m1.a23 * m2.a31,
		a31: m1.a31 * m2.a11 + m1.a32 * m2.a21 + m1.a33 * m2.a31,
		a12: m1.a11 * m2.a12 + m1.a12 * m2.a22 + m1.a13 * m2.a32,
		a22: m1.a21 * m2.a12 + m1.a22 * m2.a22 + m1.a23 * m2.a32,
		a32: m1.a31 * m2.a12 + m1.a32 * m2.a22 + m1.a33 * m2.a32,
		a13: m1.a11 * m2.a13 + m1.a12 * m2.a23 + m1.a13 * m2.a33,
		a23: m1.a21 * m2.a13 + m1.a22 * m2.a23 + m1.a23 * m2.a33,
		a33: m1.a31 * m2.a13 + m1.a32 * m2.a23 + m1.a33 * m2.a33,
	}
}

/// Maps the quadrilateral `(s0..s3)` to the quadrilateral `(d0..d3)`.
pub fn perspective_transform(
	s0: Point,
	s1: Point,
	s2: Point,
	s3: Point,
	d0: Point,
	d1: Point,
	d2: Point,
	d3: Point,
) -> PerspectiveTransform {
	let q2s = quad_to_square(s0, s1, s2, s3);
	let s2q = square_to_quad(d0, d1, d2, d3);
	multiply(&q2s, &s2q)
}

/// Maps symbol module space to the four pattern centers `p0..p3`.
pub fn symbol_transform(
	p0: Point,
	p1: Point,
	p2: Point,
	p3: Point,
	side_size: Vector2,
) -> PerspectiveTransform {
	let border = DISTANCE_TO_BORDER as f32 - 0.5;
	perspective_transform(
		Point::new(border, border),
		Point::new(side_size.x as f32 - border, border),
		Point::new(side_size.x as f32 - border, side_size.y as f32 - border),
		Point::new(border, side_size.y as f32 - border),
		p0,
		p1,
		p2,
		p3,
	)
}

impl PerspectiveTransform {
	/// Warps `points` in place through the transform.
	pub fn warp_points(&self, points: &mut [Point]) {
		for p in points {
			let x = p.x;
			let y = p.y;
			let denominator = self.a13 * x + self.a23 * y + self.a33;
			p.x = (self.a11 * x + self.a21 * y + self.a31) / denominator;
			p.y = (self.a12 * x + self.a22 * y + self.a32) / denominator;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn warp(pt: &PerspectiveTransform, x: f32, y: f32) -> Point {
		let mut p = [Point::new(x, y)];
		pt.warp_points(&mut p);
		p[0]
	}

	#[test]
	fn identity_like_mapping() {
		let corners = [
			Point::new(0.0, 0.0),
			Point::new(10.0, 0.0),
			Point::new(10.0, 10.0),
			Point::new(0.0, 10.0),
		];
		let pt = perspective_transform(
			corners[0], corners[1], corners[2], corners[3], corners[0], corners[1], corners[2],
			corners[3],
		);
		for c in corners {
			let w = warp(&pt, c.x, c.y);
			assert!((w.x - c.x).abs() < 1e-3 && (w.y - c.y).abs() < 1e-3);
		}
		let mid = warp(&pt, 5.0, 5.0);
		assert!((mid.x - 5.0).abs() < 1e-3 && (mid.y - 5.0).abs() < 1e-3);
	}

	#[test]
	fn scale_and_translate() {
		let pt = perspective_transform(
			Point::new(0.0, 0.0),
			Point::new(1.0, 0.0),
			Point::new(1.0, 1.0),
			Point::new(0.0, 1.0),
			Point::new(10.0, 20.0),
			Point::new(30.0, 20.0),
			Point::new(30.0, 40.0),
			Point::new(10.0, 40.0),
		);
		let w = warp(&pt, 0.5, 0.5);
		assert!((w.x - 20.0).abs() < 1e-3);
		assert!((w.y - 30.0).abs() < 1e-3);
	}

	#[test]
	fn perspective_quad_corners_map_exactly() {
		let dst = [
			Point::new(2.0, 3.0),
			Point::new(40.0, 8.0),
			Point::new(35.0, 44.0),
			Point::new(5.0, 38.0),
		];
		let src = [
			Point::new(0.0, 0.0),
			Point::new(20.0, 0.0),
			Point::new(20.0, 20.0),
			Point::new(0.0, 20.0),
		];
		let pt = perspective_transform(
			src[0], src[1], src[2], src[3], dst[0], dst[1], dst[2], dst[3],
		);
		for (s, d) in src.iter().zip(&dst) {
			let w = warp(&pt, s.x, s.y);
			assert!((w.x - d.x).abs() < 0.05, "{w:?} vs {d:?}");
			assert!((w.y - d.y).abs() < 0.05, "{w:?} vs {d:?}");
		}
	}

	#[test]
	fn symbol_transform_places_finder_centers() {
		let side = Vector2::new(21, 21);
		// upright symbol rendered at 12 pixels per module
		let scale = 12.0f32;
		let centers = [
			Point::new(3.5 * scale, 3.5 * scale),
			Point::new(17.5 * scale, 3.5 * scale),
			Point::new(17.5 * scale, 17.5 * scale),
			Point::new(3.5 * scale, 17.5 * scale),
		];
		let pt = symbol_transform(centers[0], centers[1], centers[2], centers[3], side);
		let w = warp(&pt, 3.5, 3.5);
		assert!((w.x - centers[0].x).abs() < 0.1);
		assert!((w.y - centers[0].y).abs() < 0.1);
		let w = warp(&pt, 10.5, 10.5);
		assert!((w.x - 10.5 * scale).abs() < 0.5);
	}
}
