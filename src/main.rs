//! Command line front-end for encoding and decoding JAB Codes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use jabcode_core::{Bitmap, DecodeMode, DecodeStatus, EncodeSettings, Encoder, Vector2, decode};
use log::{error, info};

#[derive(Parser)]
#[command(name = "jabcode-rs", version, about = "JAB Code encoder and decoder")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand)]
enum Command {
	/// Encode a message into a JAB Code image.
	Encode(EncodeArgs),
	/// Decode a JAB Code image.
	Decode(DecodeArgs),
}

#[derive(Args)]
struct EncodeArgs {
	/// Message to encode.
	#[arg(long, conflicts_with = "input_file")]
	input: Option<String>,

	/// File holding the data to encode.
	#[arg(long)]
	input_file: Option<PathBuf>,

	/// Output PNG file.
	#[arg(long)]
	output: PathBuf,

	/// Number of colors (4, 8, 16, 32, 64, 128, 256).
	#[arg(long, default_value_t = 8)]
	color_number: usize,

	/// Module size in pixels.
	#[arg(long, default_value_t = 12)]
	module_size: usize,

	/// Master symbol width in pixels.
	#[arg(long, default_value_t = 0)]
	symbol_width: usize,

	/// Master symbol height in pixels.
	#[arg(long, default_value_t = 0)]
	symbol_height: usize,

	/// Number of symbols (1 - 61).
	#[arg(long, default_value_t = 1)]
	symbol_number: usize,

	/// Error correction levels, master first (0 = default / inherit).
	#[arg(long, num_args = 1.., value_delimiter = ' ')]
	ecc_level: Vec<u8>,

	/// Side versions of each symbol as x y pairs, master first.
	#[arg(long, num_args = 1.., value_delimiter = ' ')]
	symbol_version: Vec<i32>,

	/// Symbol positions (0 - 60), master first.
	#[arg(long, num_args = 1.., value_delimiter = ' ')]
	symbol_position: Vec<i32>,

	/// Read all encoder settings from a JSON file instead.
	#[arg(long, conflicts_with_all = [
		"color_number", "module_size", "symbol_width", "symbol_height",
		"symbol_number", "ecc_level", "symbol_version", "symbol_position",
	])]
	settings: Option<PathBuf>,
}

#[derive(Args)]
struct DecodeArgs {
	/// Input PNG file.
	input: PathBuf,

	/// Also output partly decoded data when some symbols fail.
	#[arg(long)]
	compatible: bool,

	/// Write the decoded payload to a file instead of stdout.
	#[arg(long)]
	output: Option<PathBuf>,
}

fn main() -> ExitCode {
	env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
	let cli = Cli::parse();
	let result = match cli.command {
		Command::Encode(args) => run_encode(args),
		Command::Decode(args) => run_decode(args),
	};
	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(message) => {
			error!("{message}");
			ExitCode::FAILURE
		}
	}
}

fn encode_settings(args: &EncodeArgs) -> Result<EncodeSettings, String> {
	if let Some(path) = &args.settings {
		let text = std::fs::read_to_string(path)
			.map_err(|e| format!("reading settings file failed: {e}"))?;
		return serde_json::from_str(&text).map_err(|e| format!("parsing settings failed: {e}"));
	}
	if args.symbol_version.len() % 2 != 0 {
		return Err("symbol versions must be given as x y pairs".into());
	}
	Ok(EncodeSettings {
		color_number: args.color_number,
		symbol_number: args.symbol_number,
		module_size: args.module_size,
		master_symbol_width: args.symbol_width,
		master_symbol_height: args.symbol_height,
		symbol_positions: args.symbol_position.clone(),
		symbol_versions: args
			.symbol_version
			.chunks(2)
			.map(|pair| Vector2::new(pair[0], pair[1]))
			.collect(),
		symbol_ecc_levels: args.ecc_level.clone(),
	})
}

fn run_encode(args: EncodeArgs) -> Result<(), String> {
	let data = match (&args.input, &args.input_file) {
		(Some(text), _) => text.clone().into_bytes(),
		(None, Some(path)) => {
			std::fs::read(path).map_err(|e| format!("reading input file failed: {e}"))?
		}
		(None, None) => return Err("either --input or --input-file is required".into()),
	};

	let settings = encode_settings(&args)?;
	let mut encoder = Encoder::new(settings);
	let bitmap = encoder.generate(&data).map_err(|e| format!("encoding failed: {e}"))?;

	let image = image::RgbaImage::from_raw(
		bitmap.width() as u32,
		bitmap.height() as u32,
		bitmap.pixels().to_vec(),
	)
	.ok_or("building the output image failed")?;
	image.save(&args.output).map_err(|e| format!("saving the image failed: {e}"))?;
	info!(
		"wrote {} ({}x{} pixels)",
		args.output.display(),
		bitmap.width(),
		bitmap.height()
	);
	Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<(), String> {
	let image = image::open(&args.input)
		.map_err(|e| format!("reading the image failed: {e}"))?
		.into_rgba8();
	let (width, height) = image.dimensions();
	let bitmap = Bitmap::from_rgba(width as usize, height as usize, image.into_raw())
		.ok_or("image buffer size mismatch")?;

	let mode = if args.compatible {
		DecodeMode::Compatible
	} else {
		DecodeMode::Normal
	};
	let decoded = decode(&bitmap, mode).map_err(|e| format!("decoding failed: {e}"))?;
	if decoded.status == DecodeStatus::Partial {
		info!("some symbols could not be decoded, the payload is partial");
	}

	match &args.output {
		Some(path) => {
			std::fs::write(path, &decoded.payload)
				.map_err(|e| format!("writing the payload failed: {e}"))?;
			info!("wrote {} bytes to {}", decoded.payload.len(), path.display());
		}
		None => match std::str::from_utf8(&decoded.payload) {
			Ok(text) => println!("{text}"),
			Err(_) => println!("{}", hex::encode(&decoded.payload)),
		},
	}
	Ok(())
}
