use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use forensix_core::carving::FileCarver;
use forensix_core::export;
use forensix_core::fs;
use forensix_core::integrity::{
	ComparisonStatus, HashAlgorithm, HashRecord, HashService, SourceType,
};
use forensix_core::task::{self, TaskContext};
use forensix_core::{CarveMode, EvidenceImage, ForensixConfig, ImageBackend, TimestampAnalyzer};

#[derive(Parser, Debug)]
#[command(
	name = "forensix",
	version,
	about = "Forensix - disk image carving, timestamp and integrity analysis"
)]
struct Cli {
	/// Configuration file (defaults to ~/.forensix/config.json when present)
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	/// Debug logging
	#[arg(short, long, global = true)]
	verbose: bool,
	/// How to open image arguments
	#[arg(long, value_enum, default_value_t = Backend::Auto, global = true)]
	backend: Backend,
	#[command(subcommand)]
	command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
	Auto,
	Raw,
	Ewf,
	Synthetic,
}

impl From<Backend> for ImageBackend {
	fn from(b: Backend) -> Self {
		match b {
			Backend::Auto => ImageBackend::Auto,
			Backend::Raw => ImageBackend::Raw,
			Backend::Ewf => ImageBackend::Ewf,
			Backend::Synthetic => ImageBackend::Synthetic,
		}
	}
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
	Csv,
	Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// List partitions and container metadata
	Partitions {
		image: PathBuf,
	},
	/// List one directory of a file system
	Ls {
		image: PathBuf,
		#[arg(default_value = "/")]
		path: String,
		/// Byte offset of the file system within the image
		#[arg(long, default_value_t = 0)]
		offset: u64,
	},
	/// Extract one file's content
	Cat {
		image: PathBuf,
		path: String,
		#[arg(long, default_value_t = 0)]
		offset: u64,
		/// Write to this file instead of stdout
		#[arg(long)]
		out: Option<PathBuf>,
	},
	/// Walk a whole file system, deleted entries included
	Walk {
		image: PathBuf,
		#[arg(long, default_value_t = 0)]
		offset: u64,
		/// Write entries to this file instead of printing them
		#[arg(long)]
		out: Option<PathBuf>,
		#[arg(long, value_enum, default_value_t = Format::Csv)]
		format: Format,
	},
	/// Recover files by header/footer signatures
	Carve {
		image: PathBuf,
		#[arg(long)]
		out: PathBuf,
		/// Comma-separated type tags (default: all registered types)
		#[arg(long, value_delimiter = ',')]
		types: Vec<String>,
		/// Validate file structure before writing
		#[arg(long)]
		smart: bool,
		/// Write the carved file list as JSON
		#[arg(long)]
		report: Option<PathBuf>,
	},
	/// Score file timestamps for manipulation
	Timestamps {
		image: PathBuf,
		#[arg(long, default_value_t = 0)]
		offset: u64,
		/// Write per-file results to this file
		#[arg(long)]
		out: Option<PathBuf>,
		#[arg(long, value_enum, default_value_t = Format::Json)]
		format: Format,
	},
	/// Hash files and record them in the hash store
	Hash {
		#[arg(required = true)]
		paths: Vec<PathBuf>,
		/// Comma-separated algorithms (md5, sha1, sha256, sha512)
		#[arg(long, value_delimiter = ',')]
		algorithms: Vec<String>,
		#[arg(
			long,
			value_parser = ["file_system", "carved", "evidence"],
			default_value = "evidence"
		)]
		source: String,
		/// Do not write to the hash store
		#[arg(long)]
		no_store: bool,
	},
	/// Check a file against expected digests
	Verify {
		file: PathBuf,
		#[arg(long)]
		md5: Option<String>,
		#[arg(long)]
		sha1: Option<String>,
		#[arg(long)]
		sha256: Option<String>,
		#[arg(long)]
		sha512: Option<String>,
	},
	/// Export the hash store
	ExportHashes {
		#[arg(long)]
		out: PathBuf,
		#[arg(long, value_enum, default_value_t = Format::Csv)]
		format: Format,
	},
	/// Compare a JSON hash set against the hash store
	CompareHashes {
		reference: PathBuf,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let default_level = if cli.verbose { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.with_writer(io::stderr)
		.init();

	let config = match &cli.config {
		Some(path) => ForensixConfig::load(path)
			.with_context(|| format!("Failed to load {}", path.display()))?,
		None => ForensixConfig::load_or_default()?,
	};
	let backend = ImageBackend::from(cli.backend);

	match cli.command {
		Commands::Partitions { image } => {
			let image = open(&image, backend)?;
			println!(
				"💾 {} ({} image, {} bytes)",
				image.path().display(),
				image.kind(),
				image.size()
			);
			for (key, value) in image.metadata() {
				println!("   {}: {}", key, value);
			}
			println!();
			println!("{:>3}  {:>14}  {:>14}  {:<5}  {}", "#", "Start", "Length", "Boot", "Type");
			for p in image.partitions()? {
				let label = match &p.name {
					Some(name) => format!("{} ({})", p.label, name),
					None => p.label.clone(),
				};
				println!(
					"{:>3}  {:>14}  {:>14}  {:<5}  {}",
					p.index,
					p.start,
					p.length,
					if p.bootable { "*" } else { "" },
					label
				);
			}
			image.close();
		}
		Commands::Ls { image, path, offset } => {
			let image = open(&image, backend)?;
			let fs = image.open_file_system(offset)?;
			println!("📁 {} ({})", path, fs.kind());
			for entry in fs.list_directory(&path)? {
				println!(
					"{}{} {:>12}  {}{}",
					if entry.is_directory { "d" } else { "-" },
					if entry.is_deleted { "x" } else { "-" },
					entry.size,
					entry.name,
					if entry.is_deleted { "  (deleted)" } else { "" }
				);
			}
			image.close();
		}
		Commands::Cat { image, path, offset, out } => {
			let image = open(&image, backend)?;
			let fs = image.open_file_system(offset)?;
			let Some(content) = fs.read_content(&path) else {
				bail!("{} not found or not readable", path);
			};
			match out {
				Some(out) => std::fs::write(&out, &content)
					.with_context(|| format!("Failed to write {}", out.display()))?,
				None => io::stdout().write_all(&content)?,
			}
			image.close();
		}
		Commands::Walk { image, offset, out, format } => {
			let image = open(&image, backend)?;
			let outcome = walk_image(image, offset, config.walk.max_depth)?;

			for failed in &outcome.failed_directories {
				eprintln!("⚠️  Could not list {}", failed);
			}
			match out {
				Some(out) => write_records(&outcome.entries, &out, format)?,
				None => {
					for entry in &outcome.entries {
						let marker = if entry.is_deleted { "  (deleted)" } else { "" };
						println!("{}{}", entry.path, marker);
					}
				}
			}
			println!(
				"✅ {} entries ({} deleted)",
				outcome.entries.len(),
				outcome.entries.iter().filter(|e| e.is_deleted).count()
			);
		}
		Commands::Carve { image, out, types, smart, report } => {
			let image = open(&image, backend)?;
			let mut carving = config.carving.clone();
			if smart {
				carving.mode = CarveMode::Smart;
			}
			let carver = FileCarver::new(carving).with_types(&types);
			let output_dir = out.clone();
			let outcome = run_with_progress("carve", move |ctx| {
				let result = carver.carve(image.backend().as_ref(), &output_dir, &ctx);
				image.close();
				result
			})??;

			for file in &outcome.files {
				println!(
					"{:>12}  {:<4} {:>10}  {}{}",
					file.offset,
					file.file_type,
					file.size,
					file.filename,
					if file.footer_found { "" } else { "  (partial)" }
				);
			}
			if let Some(report) = report {
				write_records(&outcome.files, &report, Format::Json)?;
			}
			println!("✅ Carved {} files into {}", outcome.files.len(), out.display());
		}
		Commands::Timestamps { image, offset, out, format } => {
			let image = open(&image, backend)?;
			let walked = walk_image(image, offset, config.walk.max_depth)?;

			let summary =
				TimestampAnalyzer::new(config.timestamps.clone()).analyze_all(&walked.entries);
			println!(
				"🕒 {} files analyzed, {} suspicious",
				summary.total_files,
				summary.suspicious_count()
			);
			if summary.suspicious_count() > 0 {
				println!("   Average confidence: {:.0}%", summary.average_confidence * 100.0);
				println!("   Maximum confidence: {:.0}%", summary.max_confidence * 100.0);
			}
			for pattern in &summary.patterns {
				println!("   ⚠️  {} at {}", pattern.description, pattern.timestamp);
			}

			let mut ranked = summary.suspicious_files.clone();
			ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
			for file in &ranked {
				println!("{:>4.0}%  {}", file.confidence * 100.0, file.file_path);
				for anomaly in &file.anomalies {
					println!("        - {} ({})", anomaly.description, anomaly.severity);
				}
			}
			if let Some(out) = out {
				write_records(&summary.suspicious_files, &out, format)?;
			}
		}
		Commands::Hash { paths, algorithms, source, no_store } => {
			let algorithms = HashAlgorithm::parse_list(&algorithms);
			let source: SourceType = source.parse()?;
			let service = if no_store {
				HashService::without_store(&config.hashing)
			} else {
				HashService::open(&config.hashing)?
			};
			let outcome = run_with_progress("hash", move |ctx| {
				service.batch(&paths, &algorithms, source, &ctx)
			})?;

			for item in &outcome.items {
				match &item.result {
					Ok(record) => {
						println!("{}", record.file_path);
						for (alg, digest) in record.digests() {
							println!("   {:<7} {}", alg, digest);
						}
					}
					Err(e) => eprintln!("❌ {}: {}", item.path.display(), e),
				}
			}
			println!("✅ {} hashed, {} failed", outcome.succeeded(), outcome.failed());
		}
		Commands::Verify { file, md5, sha1, sha256, sha512 } => {
			let expected: BTreeMap<HashAlgorithm, String> = [
				(HashAlgorithm::Md5, md5),
				(HashAlgorithm::Sha1, sha1),
				(HashAlgorithm::Sha256, sha256),
				(HashAlgorithm::Sha512, sha512),
			]
			.into_iter()
			.filter_map(|(alg, digest)| digest.map(|d| (alg, d)))
			.collect();
			if expected.is_empty() {
				bail!("Give at least one of --md5, --sha1, --sha256, --sha512");
			}

			let results = HashService::without_store(&config.hashing).verify(&file, &expected);
			for (alg, ok) in &results {
				println!("{:<7} {}", alg, if *ok { "✅ match" } else { "❌ MISMATCH" });
			}
			if results.values().any(|ok| !ok) {
				std::process::exit(1);
			}
		}
		Commands::ExportHashes { out, format } => {
			let service = HashService::open(&config.hashing)?;
			let file = File::create(&out)
				.with_context(|| format!("Failed to create {}", out.display()))?;
			let writer = BufWriter::new(file);
			match format {
				Format::Csv => service.export_csv(writer)?,
				Format::Json => service.export_json(writer)?,
			}
			println!("✅ Exported hash store to {}", out.display());
		}
		Commands::CompareHashes { reference } => {
			let raw = std::fs::read_to_string(&reference)
				.with_context(|| format!("Failed to read {}", reference.display()))?;
			let records: Vec<HashRecord> = serde_json::from_str(&raw)
				.context("Reference must be a JSON array of hash records")?;
			let service = HashService::open(&config.hashing)?;
			let comparisons = service.compare(&records)?;
			for c in &comparisons {
				let status = match c.status {
					ComparisonStatus::Match => "match".to_string(),
					ComparisonStatus::NotFound => "not found".to_string(),
					ComparisonStatus::Mismatch if c.differing.is_empty() => {
						"mismatch (no common algorithm)".to_string()
					}
					ComparisonStatus::Mismatch => format!(
						"MISMATCH ({})",
						c.differing.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
					),
				};
				println!("{:<32} {}", status, c.file_path);
			}
			let matched =
				comparisons.iter().filter(|c| c.status == ComparisonStatus::Match).count();
			println!("✅ {} of {} records match", matched, comparisons.len());
		}
	}
	Ok(())
}

fn open(path: &Path, backend: ImageBackend) -> Result<EvidenceImage> {
	EvidenceImage::open_with(path, backend)
		.with_context(|| format!("Failed to open {}", path.display()))
}

/// Run `job` as a background task, drawing its progress on stderr when that is a terminal
/// Walk the file system at `offset` on a worker thread, closing the image afterwards
fn walk_image(image: EvidenceImage, offset: u64, max_depth: usize) -> Result<fs::WalkOutcome> {
	let walked = run_with_progress("walk", move |ctx| -> forensix_core::Result<_> {
		let file_system = image.open_file_system(offset)?;
		let outcome = fs::walk_with_progress(file_system.as_ref(), max_depth, &ctx);
		image.close();
		Ok(outcome)
	})?;
	Ok(walked?)
}

fn run_with_progress<T, F>(name: &str, job: F) -> Result<T>
where
	T: Send + 'static,
	F: FnOnce(TaskContext) -> T + Send + 'static,
{
	let handle = task::spawn(name, job)?;

	let bar = if atty::is(atty::Stream::Stderr) {
		let bar = ProgressBar::new(100);
		bar.set_style(
			ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")
				.unwrap_or_else(|_| ProgressStyle::default_bar())
				.progress_chars("=> "),
		);
		Some(bar)
	} else {
		None
	};

	for event in handle.progress().iter() {
		match &bar {
			Some(bar) => {
				bar.set_position(event.percent as u64);
				bar.set_message(event.message);
			}
			None => tracing::debug!("{}% {}", event.percent, event.message),
		}
	}
	if let Some(bar) = bar {
		bar.finish_and_clear();
	}

	Ok(handle.wait()?)
}

fn write_records<T>(records: &[T], out: &Path, format: Format) -> Result<()>
where
	T: export::CsvRecord + serde::Serialize,
{
	let file =
		File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
	let writer = BufWriter::new(file);
	match format {
		Format::Csv => export::write_csv(records, writer)?,
		Format::Json => export::write_json(records, writer)?,
	}
	println!("📄 Wrote {} records to {}", records.len(), out.display());
	Ok(())
}
