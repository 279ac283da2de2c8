//! Image binarization.
//!
//! The detector works on three binarized RGB channels. Channels are first
//! balanced by linear stretching, then quantized either per pixel against
//! block averages (the RGB quantizer used by the main path) or per channel
//! with local block thresholds or a global histogram threshold.

use crate::bitmap::Bitmap;

const BLOCK_SIZE_POWER: usize = 5;
/// Block edge length of the local thresholding binarizer.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_POWER;
const BLOCK_SIZE_MASK: usize = BLOCK_SIZE - 1;
const MINIMUM_DIMENSION: usize = BLOCK_SIZE * 5;

/// Checks for a bimodal (trimodal for green) histogram.
fn is_bi_trimodal(hist: &[f32; 256], channel: usize) -> bool {
	let modal_number = if channel == 1 {
		3
	} else {
		2
	};
	let mut count = 0;
	for i in 1..255 {
		if hist[i - 1] < hist[i] && hist[i + 1] < hist[i] {
			count += 1;
			if count > modal_number {
				return false;
			}
		}
	}
	count == modal_number
}

/// Smooths the histogram until bimodal and returns the valley threshold.
fn minimum_threshold(hist: &[u32; 256], channel: usize) -> Option<i32> {
	let mut hist_c: [f32; 256] = std::array::from_fn(|i| hist[i] as f32);
	let mut hist_s = hist_c;

	let mut iter = 0;
	while !is_bi_trimodal(&hist_s, channel) {
		hist_s[0] = (hist_c[0] + hist_c[0] + hist_c[1]) / 3.0;
		for i in 1..255 {
			hist_s[i] = (hist_c[i - 1] + hist_c[i] + hist_c[i + 1]) / 3.0;
		}
		hist_s[255] = (hist_c[254] + hist_c[255] + hist_c[255]) / 3.0;
		hist_c = hist_s;
		iter += 1;
		if iter >= 1000 {
			return None;
		}
	}

	let peak_number = if channel == 1 {
		2
	} else {
		1
	};
	let mut peaks_found = 0;
	for i in 1..255 {
		if hist_s[i - 1] < hist_s[i] && hist_s[i + 1] < hist_s[i] {
			peaks_found += 1;
		}
		if peaks_found == peak_number && hist_s[i - 1] >= hist_s[i] && hist_s[i + 1] >= hist_s[i] {
			return Some(i as i32 - 1);
		}
	}
	None
}

/// Binarizes one channel with a global histogram threshold.
pub fn binarize_histogram(bitmap: &Bitmap, channel: usize) -> Bitmap {
	let mut binary = Bitmap::new_gray(bitmap.width(), bitmap.height());
	let channels = bitmap.channels();
	let pixels = bitmap.pixels();

	let mut hist = [0u32; 256];
	for i in 0..bitmap.width() * bitmap.height() {
		let r = pixels[i * channels];
		let g = pixels[i * channels + 1];
		let b = pixels[i * channels + 2];

		if channel > 0 {
			let mean = f32::from(r) + f32::from(g) + f32::from(b);
			let mean = mean / 3.0;
			let pr = f32::from(r) / mean;
			let pg = f32::from(g) / mean;
			let pb = f32::from(b) / mean;
			if channel == 1 {
				// skip white, black and yellow pixels
				if (r > 200 && g > 200 && b > 200) || (r < 50 && g < 50 && b < 50) || (r > 200 && g > 200)
				{
					continue;
				}
				if (0.8..1.25).contains(&pr) && (0.8..1.25).contains(&pg) && (0.8..1.25).contains(&pb)
				{
					continue;
				}
				if pb < 0.5 && (0.8..1.25).contains(&(pr / pg)) {
					continue;
				}
			} else if channel == 2 {
				if (r > 200 && g > 200 && b > 200) || (r < 50 && g < 50 && b < 50) {
					continue;
				}
				if (0.8..1.25).contains(&pr) && (0.8..1.25).contains(&pg) && (0.8..1.25).contains(&pb)
				{
					continue;
				}
			}
		}
		hist[pixels[i * channels + channel] as usize] += 1;
	}

	let ths = minimum_threshold(&hist, channel).unwrap_or(-1);
	for i in 0..bitmap.width() * bitmap.height() {
		let value = i32::from(pixels[i * channels + channel]);
		binary.pixels_mut()[i] = if value > ths {
			255
		} else {
			0
		};
	}
	binary
}

/// Binarizes one channel with a fixed threshold.
pub fn binarize_hard(bitmap: &Bitmap, channel: usize, threshold: i32) -> Bitmap {
	let mut binary = Bitmap::new_gray(bitmap.width(), bitmap.height());
	let channels = bitmap.channels();
	for i in 0..bitmap.width() * bitmap.height() {
		let value = i32::from(bitmap.pixels()[i * channels + channel]);
		binary.pixels_mut()[i] = if value > threshold {
			255
		} else {
			0
		};
	}
	binary
}

/// Black point of every block for the local thresholding binarizer.
fn calculate_black_points(
	bitmap: &Bitmap,
	channel: usize,
	sub_width: usize,
	sub_height: usize,
) -> Vec<u8> {
	let min_dynamic_range = 24i32;
	let channels = bitmap.channels();
	let pixels = bitmap.pixels();
	let mut black_points = vec![0u8; sub_width * sub_height];

	for y in 0..sub_height {
		let yoffset = (y << BLOCK_SIZE_POWER).min(bitmap.height() - BLOCK_SIZE);
		for x in 0..sub_width {
			let xoffset = (x << BLOCK_SIZE_POWER).min(bitmap.width() - BLOCK_SIZE);
			let mut sum = 0i32;
			let mut min = 0xFFi32;
			let mut max = 0i32;
			let mut yy = 0;
			while yy < BLOCK_SIZE {
				for xx in 0..BLOCK_SIZE {
					let offset = ((yoffset + yy) * bitmap.width() + xoffset + xx) * channels;
					let pixel = i32::from(pixels[offset + channel]);
					sum += pixel;
					min = min.min(pixel);
					max = max.max(pixel);
				}
				// once the contrast is proven, only the sum matters
				if max - min > min_dynamic_range {
					yy += 1;
					while yy < BLOCK_SIZE {
						for xx in 0..BLOCK_SIZE {
							let offset =
								((yoffset + yy) * bitmap.width() + xoffset + xx) * channels;
							sum += i32::from(pixels[offset + channel]);
						}
						yy += 1;
					}
					break;
				}
				yy += 1;
			}

			let mut average = sum >> (BLOCK_SIZE_POWER * 2);
			if max - min <= min_dynamic_range {
				// low contrast block, assume background
				average = min / 2;
				if y > 0 && x > 0 {
					let neighbor = (i32::from(black_points[(y - 1) * sub_width + x])
						+ 2 * i32::from(black_points[y * sub_width + x - 1])
						+ i32::from(black_points[(y - 1) * sub_width + x - 1]))
						/ 4;
					if min < neighbor {
						average = neighbor;
					}
				}
			}
			black_points[y * sub_width + x] = average as u8;
		}
	}
	black_points
}

/// Thresholds every block against its 5x5 neighborhood average.
fn threshold_blocks(
	bitmap: &Bitmap,
	channel: usize,
	sub_width: usize,
	sub_height: usize,
	black_points: &[u8],
	binary: &mut Bitmap,
) {
	let channels = bitmap.channels();
	for y in 0..sub_height {
		let yoffset = (y << BLOCK_SIZE_POWER).min(bitmap.height() - BLOCK_SIZE);
		for x in 0..sub_width {
			let xoffset = (x << BLOCK_SIZE_POWER).min(bitmap.width() - BLOCK_SIZE);
			let left = x.clamp(2, sub_width - 3);
			let top = y.clamp(2, sub_height - 3);
			let mut sum = 0u32;
			for z in -2i32..=2 {
				let row = &black_points[(top as i32 + z) as usize * sub_width..];
				sum += u32::from(row[left - 2])
					+ u32::from(row[left - 1])
					+ u32::from(row[left])
					+ u32::from(row[left + 1])
					+ u32::from(row[left + 2]);
			}
			let average = (sum / 25) as u8;
			for yy in 0..BLOCK_SIZE {
				for xx in 0..BLOCK_SIZE {
					let offset = ((yoffset + yy) * bitmap.width() + xoffset + xx) * channels;
					if bitmap.pixels()[offset + channel] > average {
						binary.set_gray(xoffset + xx, yoffset + yy, 255);
					}
				}
			}
		}
	}
}

/// Majority filter removing isolated noise from a binary bitmap.
pub fn filter_binary(binary: &mut Bitmap) {
	let width = binary.width();
	let height = binary.height();
	let half_size = 2usize;
	if width < 2 * half_size + 1 || height < 2 * half_size + 1 {
		return;
	}

	// horizontal pass
	let tmp = binary.clone();
	for i in half_size..height - half_size {
		for j in half_size..width - half_size {
			let mut sum = u32::from(tmp.gray_at(j, i) > 0);
			for k in 1..=half_size {
				sum += u32::from(tmp.gray_at(j - k, i) > 0);
				sum += u32::from(tmp.gray_at(j + k, i) > 0);
			}
			binary.set_gray(
				j,
				i,
				if sum > half_size as u32 {
					255
				} else {
					0
				},
			);
		}
	}
	// vertical pass
	let tmp = binary.clone();
	for i in half_size..height - half_size {
		for j in half_size..width - half_size {
			let mut sum = u32::from(tmp.gray_at(j, i) > 0);
			for k in 1..=half_size {
				sum += u32::from(tmp.gray_at(j, i - k) > 0);
				sum += u32::from(tmp.gray_at(j, i + k) > 0);
			}
			binary.set_gray(
				j,
				i,
				if sum > half_size as u32 {
					255
				} else {
					0
				},
			);
		}
	}
}

/// Binarizes one channel, choosing local blocks or the global histogram
/// depending on the image size.
pub fn binarize(bitmap: &Bitmap, channel: usize) -> Bitmap {
	if bitmap.width() >= MINIMUM_DIMENSION && bitmap.height() >= MINIMUM_DIMENSION {
		let mut sub_width = bitmap.width() >> BLOCK_SIZE_POWER;
		if sub_width & BLOCK_SIZE_MASK != 0 {
			sub_width += 1;
		}
		let mut sub_height = bitmap.height() >> BLOCK_SIZE_POWER;
		if sub_height & BLOCK_SIZE_MASK != 0 {
			sub_height += 1;
		}
		let black_points = calculate_black_points(bitmap, channel, sub_width, sub_height);
		let mut binary = Bitmap::new_gray(bitmap.width(), bitmap.height());
		threshold_blocks(bitmap, channel, sub_width, sub_height, &black_points, &mut binary);
		filter_binary(&mut binary);
		binary
	} else {
		binarize_histogram(bitmap, channel)
	}
}

/// Histogram of one channel.
fn histogram(bitmap: &Bitmap, channel: usize) -> [u32; 256] {
	let mut hist = [0u32; 256];
	let channels = bitmap.channels();
	for i in 0..bitmap.width() * bitmap.height() {
		hist[bitmap.pixels()[i * channels + channel] as usize] += 1;
	}
	hist
}

/// Lowest and highest histogram bins with more than `ths` entries.
fn hist_min_max(hist: &[u32; 256], ths: u32) -> (i32, i32) {
	let min = (0..256).find(|&i| hist[i] > ths).unwrap_or(0) as i32;
	let max = (0..256).rev().find(|&i| hist[i] > ths).unwrap_or(255) as i32;
	(min, max)
}

/// Balances the RGB channels by linear histogram stretching.
pub fn balance_rgb(bitmap: &mut Bitmap) {
	let count_ths = 20u32;
	let ranges: Vec<(i32, i32)> =
		(0..3).map(|c| hist_min_max(&histogram(bitmap, c), count_ths)).collect();

	let channels = bitmap.channels();
	let pixels = bitmap.pixels_mut();
	for i in 0..pixels.len() / channels {
		for (c, &(min, max)) in ranges.iter().enumerate() {
			let value = i32::from(pixels[i * channels + c]);
			pixels[i * channels + c] = if value < min {
				0
			} else if value > max {
				255
			} else if max > min {
				(f64::from(value - min) / f64::from(max - min) * 255.0) as u8
			} else {
				value as u8
			};
		}
	}
}

/// Mean and variance of an RGB triple.
pub fn ave_var(rgb: &[u8; 3]) -> (f64, f64) {
	let ave = (u32::from(rgb[0]) + u32::from(rgb[1]) + u32::from(rgb[2])) / 3;
	let ave = f64::from(ave);
	let var = rgb.iter().map(|&c| (f64::from(c) - ave).powi(2)).sum::<f64>() / 3.0;
	(ave, var)
}

/// Channel indices of an RGB triple ordered by value.
///
/// Returns `(index_min, index_mid, index_max)`.
pub fn min_mid_max(rgb: &[u8; 3]) -> (usize, usize, usize) {
	let mut idx = [0usize, 1, 2];
	if rgb[idx[0]] > rgb[idx[2]] {
		idx.swap(0, 2);
	}
	if rgb[idx[0]] > rgb[idx[1]] {
		idx.swap(0, 1);
	}
	if rgb[idx[1]] > rgb[idx[2]] {
		idx.swap(1, 2);
	}
	(idx[0], idx[1], idx[2])
}

/// Quantizes every pixel into the canonical palette across three binary
/// channels.
///
/// `black_ths` overrides the per-block average thresholds used for the
/// black cutoff.
pub fn binarize_rgb(bitmap: &Bitmap, black_ths: Option<[f32; 3]>) -> [Bitmap; 3] {
	let width = bitmap.width();
	let height = bitmap.height();
	let mut rgb = [
		Bitmap::new_gray(width, height),
		Bitmap::new_gray(width, height),
		Bitmap::new_gray(width, height),
	];

	// block-wise average pixel values as the default black thresholds
	let max_block_size = (width.max(height) / 2).max(1);
	let block_num_x = width.div_ceil(max_block_size);
	let block_num_y = height.div_ceil(max_block_size);
	let block_size_x = width / block_num_x;
	let block_size_y = height / block_num_y;
	let mut pixel_ave = vec![[0f32; 3]; block_num_x * block_num_y];
	if black_ths.is_none() {
		for i in 0..block_num_y {
			for j in 0..block_num_x {
				let block_index = i * block_num_x + j;
				let sx = j * block_size_x;
				let ex = if j == block_num_x - 1 {
					width
				} else {
					sx + block_size_x
				};
				let sy = i * block_size_y;
				let ey = if i == block_num_y - 1 {
					height
				} else {
					sy + block_size_y
				};
				let mut counter = 0u32;
				for y in sy..ey {
					for x in sx..ex {
						let p = bitmap.rgb_at(x, y);
						pixel_ave[block_index][0] += f32::from(p[0]);
						pixel_ave[block_index][1] += f32::from(p[1]);
						pixel_ave[block_index][2] += f32::from(p[2]);
						counter += 1;
					}
				}
				for c in 0..3 {
					pixel_ave[block_index][c] /= counter as f32;
				}
			}
		}
	}

	let ths_std = 0.08f64;
	for i in 0..height {
		for j in 0..width {
			let pixel = bitmap.rgb_at(j, i);
			let rgb_ths = match black_ths {
				Some(ths) => ths,
				None => {
					let block_index = (i / block_size_y).min(block_num_y - 1) * block_num_x
						+ (j / block_size_x).min(block_num_x - 1);
					pixel_ave[block_index]
				}
			};

			// black cutoff
			if f32::from(pixel[0]) < rgb_ths[0]
				&& f32::from(pixel[1]) < rgb_ths[1]
				&& f32::from(pixel[2]) < rgb_ths[2]
			{
				for ch in &mut rgb {
					ch.set_gray(j, i, 0);
				}
				continue;
			}

			let (_, var) = ave_var(&pixel);
			let (index_min, index_mid, index_max) = min_mid_max(&pixel);
			let std = var.sqrt() / f64::from(pixel[index_max].max(1));

			if std < ths_std
				&& f32::from(pixel[0]) > rgb_ths[0]
				&& f32::from(pixel[1]) > rgb_ths[1]
				&& f32::from(pixel[2]) > rgb_ths[2]
			{
				// white pixel
				for ch in &mut rgb {
					ch.set_gray(j, i, 255);
				}
			} else {
				rgb[index_max].set_gray(j, i, 255);
				rgb[index_min].set_gray(j, i, 0);
				let r1 = f64::from(pixel[index_mid]) / f64::from(pixel[index_min].max(1));
				let r2 = f64::from(pixel[index_max]) / f64::from(pixel[index_mid].max(1));
				rgb[index_mid].set_gray(
					j,
					i,
					if r1 > r2 {
						255
					} else {
						0
					},
				);
			}
		}
	}
	for ch in &mut rgb {
		filter_binary(ch);
	}
	rgb
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::color::DEFAULT_PALETTE;

	fn solid(width: usize, height: usize, rgb: [u8; 3]) -> Bitmap {
		let mut bmp = Bitmap::new(width, height);
		for y in 0..height {
			for x in 0..width {
				bmp.set_rgba(x, y, [rgb[0], rgb[1], rgb[2], 255]);
			}
		}
		bmp
	}

	#[test]
	fn quantizer_classifies_canonical_colors() {
		// paint stripes of all eight canonical colors
		let mut bmp = Bitmap::new(80, 16);
		for (k, rgb) in DEFAULT_PALETTE.iter().enumerate() {
			for y in 0..16 {
				for x in k * 10..(k + 1) * 10 {
					bmp.set_rgba(x, y, [rgb[0], rgb[1], rgb[2], 255]);
				}
			}
		}
		let channels = binarize_rgb(&bmp, Some([100.0, 100.0, 100.0]));
		// sample stripe centers away from the filter border
		for (k, rgb) in DEFAULT_PALETTE.iter().enumerate() {
			let x = k * 10 + 5;
			let y = 8;
			for c in 0..3 {
				let expected = if rgb[c] > 0 {
					255
				} else {
					0
				};
				assert_eq!(channels[c].gray_at(x, y), expected, "color {k} channel {c}");
			}
		}
	}

	#[test]
	fn balance_stretches_contrast() {
		let mut bmp = solid(64, 64, [100, 100, 100]);
		// one darker and one brighter patch per channel
		for y in 0..32 {
			for x in 0..32 {
				bmp.set_rgba(x, y, [60, 60, 60, 255]);
			}
		}
		for y in 32..64 {
			for x in 32..64 {
				bmp.set_rgba(x, y, [180, 180, 180, 255]);
			}
		}
		balance_rgb(&mut bmp);
		assert_eq!(bmp.rgb_at(0, 0), [0, 0, 0]);
		assert_eq!(bmp.rgb_at(63, 63), [255, 255, 255]);
	}

	#[test]
	fn filter_removes_isolated_pixels() {
		let mut binary = Bitmap::new_gray(16, 16);
		binary.set_gray(8, 8, 255);
		filter_binary(&mut binary);
		assert_eq!(binary.gray_at(8, 8), 0);
	}

	#[test]
	fn channel_binarizer_small_and_large_images() {
		// a small image takes the histogram path
		let mut small = Bitmap::new(40, 40);
		for y in 0..40 {
			for x in 0..40 {
				let v = if x < 20 {
					30
				} else {
					220
				};
				small.set_rgba(x, y, [v, v, v, 255]);
			}
		}
		let binary = binarize(&small, 0);
		assert_eq!(binary.gray_at(5, 20), 0);
		assert_eq!(binary.gray_at(35, 20), 255);

		// a large image takes the block threshold path
		let mut large = Bitmap::new(192, 192);
		for y in 0..192 {
			for x in 0..192 {
				let v = if (x / 16 + y / 16) % 2 == 0 {
					40
				} else {
					210
				};
				large.set_rgba(x, y, [v, v, v, 255]);
			}
		}
		let binary = binarize(&large, 0);
		assert_eq!(binary.gray_at(8, 8), 0);
		assert_eq!(binary.gray_at(24, 8), 255);
	}

	#[test]
	fn hard_threshold_splits_at_value() {
		let bmp = solid(8, 8, [120, 10, 200]);
		let r = binarize_hard(&bmp, 0, 100);
		let g = binarize_hard(&bmp, 1, 100);
		let b = binarize_hard(&bmp, 2, 100);
		assert_eq!(r.gray_at(4, 4), 255);
		assert_eq!(g.gray_at(4, 4), 0);
		assert_eq!(b.gray_at(4, 4), 255);
	}
}
