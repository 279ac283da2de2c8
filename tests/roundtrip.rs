//! End-to-end encode and decode scenarios.

use jabcode_rs::{
	Bitmap, DecodeMode, DecodeStatus, EncodeSettings, Encoder, Vector2, decode,
};

fn roundtrip_with(settings: EncodeSettings, payload: &[u8]) -> Vec<u8> {
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(payload).expect("encoding failed");
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.status, DecodeStatus::Full);
	decoded.payload
}

#[test]
fn hello_with_defaults() {
	let mut encoder = Encoder::new(EncodeSettings::default());
	let bitmap = encoder.generate(b"Hello").expect("encoding failed");
	// version 1 at 12 pixels per module
	assert_eq!(bitmap.width(), 252);
	assert_eq!(bitmap.height(), 252);
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, b"Hello");
	assert_eq!(decoded.status, DecodeStatus::Full);
}

#[test]
fn four_colors_low_ecc() {
	let settings = EncodeSettings {
		color_number: 4,
		symbol_ecc_levels: vec![2],
		..EncodeSettings::default()
	};
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(b"abc123").expect("encoding failed");
	// the planner stays at a small version for a short payload
	assert!(bitmap.width() <= (4 * 4 + 17) * 12);
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, b"abc123");
}

#[test]
fn default_mode_omits_master_metadata() {
	// default mode: 8 colors at the default ECC level
	let payload = roundtrip_with(EncodeSettings::default(), b"JAB");
	assert_eq!(payload, b"JAB");
}

#[test]
fn utf8_bytes_roundtrip() {
	let euro = "€".as_bytes();
	let payload = roundtrip_with(EncodeSettings::default(), euro);
	assert_eq!(payload, euro);
}

#[test]
fn sixteen_colors_survive_a_damaged_module() {
	let settings = EncodeSettings {
		color_number: 16,
		symbol_ecc_levels: vec![6],
		..EncodeSettings::default()
	};
	let payload: Vec<u8> = (0..1024u32).map(|i| (i * 31 % 251) as u8).collect();
	let mut encoder = Encoder::new(settings);
	let mut bitmap = encoder.generate(&payload).expect("encoding failed");

	// overwrite one interior data module with another module's color
	let module = 12usize;
	let side = bitmap.width() / module;
	let (mx, my) = (side / 2 + 3, side / 2 + 3);
	let replacement = bitmap.rgb_at((mx + 1) * module + 6, my * module + 6);
	for y in my * module..(my + 1) * module {
		for x in mx * module..(mx + 1) * module {
			bitmap.set_rgba(x, y, [replacement[0], replacement[1], replacement[2], 255]);
		}
	}

	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, payload);
}

#[test]
fn three_docked_symbols_roundtrip() {
	let settings = EncodeSettings {
		symbol_number: 3,
		symbol_positions: vec![0, 3, 2],
		symbol_versions: vec![Vector2::new(3, 2), Vector2::new(4, 2), Vector2::new(3, 2)],
		..EncodeSettings::default()
	};
	let payload = vec![b'x'; 500];
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(&payload).expect("encoding failed");
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, payload);
	assert_eq!(decoded.status, DecodeStatus::Full);
}

#[test]
fn detection_survives_a_translated_canvas() {
	let mut encoder = Encoder::new(EncodeSettings::default());
	let bitmap = encoder.generate(b"shifted payload").expect("encoding failed");

	// paste the code into a larger white canvas at an odd offset
	let (dx, dy) = (17usize, 9usize);
	let mut canvas = Bitmap::new(bitmap.width() + 60, bitmap.height() + 60);
	for value in canvas.pixels_mut() {
		*value = 255;
	}
	for y in 0..bitmap.height() {
		for x in 0..bitmap.width() {
			let rgb = bitmap.rgb_at(x, y);
			canvas.set_rgba(x + dx, y + dy, [rgb[0], rgb[1], rgb[2], 255]);
		}
	}

	let decoded = decode(&canvas, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, b"shifted payload");
}

#[test]
fn decoding_is_repeatable() {
	let mut encoder = Encoder::new(EncodeSettings::default());
	let bitmap = encoder.generate(b"idempotent").expect("encoding failed");
	let first = decode(&bitmap, DecodeMode::Normal).expect("first decode failed");
	let second = decode(&bitmap, DecodeMode::Normal).expect("second decode failed");
	assert_eq!(first.payload, second.payload);
}

#[test]
fn larger_payload_selects_larger_version() {
	let payload: Vec<u8> = std::iter::repeat_with(|| b"lorem ipsum dolor sit amet ")
		.take(20)
		.flatten()
		.copied()
		.collect();
	let mut encoder = Encoder::new(EncodeSettings::default());
	let bitmap = encoder.generate(&payload).expect("encoding failed");
	assert!(bitmap.width() > 252);
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, payload);
}

#[test]
fn thirty_two_colors_roundtrip() {
	let settings = EncodeSettings {
		color_number: 32,
		symbol_ecc_levels: vec![4],
		..EncodeSettings::default()
	};
	let payload = b"thirty-two color palette".to_vec();
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(&payload).expect("encoding failed");
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, payload);
}

#[test]
fn explicit_version_and_level_roundtrip() {
	let settings = EncodeSettings {
		symbol_versions: vec![Vector2::new(4, 3)],
		symbol_ecc_levels: vec![5],
		..EncodeSettings::default()
	};
	let payload = b"rectangular symbol with explicit parameters".to_vec();
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(&payload).expect("encoding failed");
	// 33 x 29 modules at 12 pixels
	assert_eq!(bitmap.width(), 33 * 12);
	assert_eq!(bitmap.height(), 29 * 12);
	let decoded = decode(&bitmap, DecodeMode::Normal).expect("decoding failed");
	assert_eq!(decoded.payload, payload);
}
