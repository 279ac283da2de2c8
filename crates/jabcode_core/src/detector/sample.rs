//! Symbol sampling.
//!
//! Maps every module center through a perspective transform and samples
//! the source bitmap with 3x3 neighborhood averaging, producing a
//! module-resolution RGBA matrix for the decoder.

use crate::bitmap::Bitmap;
use crate::geometry::{Point, Vector2};

use super::transform::PerspectiveTransform;

/// Samples a symbol of `side_size` modules from `bitmap`.
///
/// Returns `None` when a mapped module center leaves the image by more
/// than one pixel.
pub fn sample_symbol(
	bitmap: &Bitmap,
	pt: &PerspectiveTransform,
	side_size: Vector2,
) -> Option<Bitmap> {
	let width = side_size.x as usize;
	let height = side_size.y as usize;
	let mut matrix = Bitmap::new(width, height);

	let mut points = vec![Point::default(); width];
	for i in 0..height {
		for (j, p) in points.iter_mut().enumerate() {
			p.x = j as f32 + 0.5;
			p.y = i as f32 + 0.5;
		}
		pt.warp_points(&mut points);
		for (j, p) in points.iter().enumerate() {
			let mut mapped_x = p.x as i32;
			let mut mapped_y = p.y as i32;
			if mapped_x < 0 || mapped_x > bitmap.width() as i32 - 1 {
				if mapped_x == -1 {
					mapped_x = 0;
				} else if mapped_x == bitmap.width() as i32 {
					mapped_x = bitmap.width() as i32 - 1;
				} else {
					return None;
				}
			}
			if mapped_y < 0 || mapped_y > bitmap.height() as i32 - 1 {
				if mapped_y == -1 {
					mapped_y = 0;
				} else if mapped_y == bitmap.height() as i32 {
					mapped_y = bitmap.height() as i32 - 1;
				} else {
					return None;
				}
			}

			let mut rgba = [0u8; 4];
			for (c, slot) in rgba.iter_mut().enumerate() {
				// average the 3x3 neighborhood around the mapped center
				let mut sum = 0f32;
				for dx in -1i32..=1 {
					for dy in -1i32..=1 {
						let mut px = mapped_x + dx;
						let mut py = mapped_y + dy;
						if px < 0 || px > bitmap.width() as i32 - 1 {
							px = mapped_x;
						}
						if py < 0 || py > bitmap.height() as i32 - 1 {
							py = mapped_y;
						}
						sum += f32::from(bitmap.channel_at(px as usize, py as usize, c));
					}
				}
				*slot = (sum / 9.0 + 0.5) as u8;
			}
			matrix.set_rgba(j, i, rgba);
		}
	}
	Some(matrix)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::detector::transform::perspective_transform;

	#[test]
	fn samples_module_centers_of_an_upright_grid() {
		// 4x4 modules at 10 pixels each, alternating red and blue
		let mut bmp = Bitmap::new(40, 40);
		for y in 0..40 {
			for x in 0..40 {
				let module = (x / 10 + y / 10) % 2;
				let rgba = if module == 0 {
					[255, 0, 0, 255]
				} else {
					[0, 0, 255, 255]
				};
				bmp.set_rgba(x, y, rgba);
			}
		}
		let pt = perspective_transform(
			Point::new(0.5, 0.5),
			Point::new(3.5, 0.5),
			Point::new(3.5, 3.5),
			Point::new(0.5, 3.5),
			Point::new(5.0, 5.0),
			Point::new(35.0, 5.0),
			Point::new(35.0, 35.0),
			Point::new(5.0, 35.0),
		);
		let matrix = sample_symbol(&bmp, &pt, Vector2::new(4, 4)).unwrap();
		assert_eq!(matrix.rgb_at(0, 0), [255, 0, 0]);
		assert_eq!(matrix.rgb_at(1, 0), [0, 0, 255]);
		assert_eq!(matrix.rgb_at(1, 1), [255, 0, 0]);
		assert_eq!(matrix.rgb_at(3, 2), [0, 0, 255]);
	}

	#[test]
	fn rejects_out_of_image_mapping() {
		let bmp = Bitmap::new(20, 20);
		let pt = perspective_transform(
			Point::new(0.5, 0.5),
			Point::new(3.5, 0.5),
			Point::new(3.5, 3.5),
			Point::new(0.5, 3.5),
			Point::new(50.0, 50.0),
			Point::new(90.0, 50.0),
			Point::new(90.0, 90.0),
			Point::new(50.0, 90.0),
		);
		assert!(sample_symbol(&bmp, &pt, Vector2::new(4, 4)).is_none());
	}
}
