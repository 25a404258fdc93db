//! Point cloud octree store tool.
//!
//! Inspects, decorates, merges and queries point sets in a directory store.
//! Library events are printed through `env_logger`; set `RUST_LOG=debug` for
//! per-pass timings.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use glam::DVec3;
use point_octree::{
	Box3d, CancellationToken, Filter, LodConfig, PointSet, Storage, TreeStats, WorkerPool,
};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use config::Settings;

/// Point cloud octree store tool.
#[derive(Parser, Debug)]
#[command(name = "octree_tool")]
#[command(about = "Inspects and maintains point cloud octree stores")]
struct Cli {
	/// Store directory.
	#[arg(short, long)]
	store: PathBuf,

	/// Optional settings TOML file.
	#[arg(long)]
	settings: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Print point count, bounds and tree statistics of a point set.
	Info { key: String },
	/// Generate LOD data and store the result under a new key.
	Lod {
		key: String,
		#[arg(short, long)]
		out: String,
	},
	/// Merge two point sets of the store into a new one.
	Merge {
		a: String,
		b: String,
		#[arg(short, long)]
		out: String,
	},
	/// Count points inside an axis-aligned box.
	CountBox {
		#[command(flatten)]
		query: BoxQuery,
		/// Upper bound from node classification only.
		#[arg(long)]
		approximate: bool,
	},
	/// Print the points inside an axis-aligned box, one per line.
	QueryBox {
		#[command(flatten)]
		query: BoxQuery,
	},
}

#[derive(Args, Debug)]
struct BoxQuery {
	key: String,
	/// Box minimum as x,y,z.
	#[arg(long, value_delimiter = ',', num_args = 3, allow_negative_numbers = true)]
	min: Vec<f64>,
	/// Box maximum as x,y,z.
	#[arg(long, value_delimiter = ',', num_args = 3, allow_negative_numbers = true)]
	max: Vec<f64>,
	/// Stop descending at cells of this exponent and take their LOD points.
	#[arg(long, allow_negative_numbers = true)]
	min_exponent: Option<i32>,
}

impl BoxQuery {
	fn bounds(&self) -> Result<Box3d> {
		let (min, max) = (vec3(&self.min)?, vec3(&self.max)?);
		if min.cmpgt(max).any() {
			bail!("box minimum {min} exceeds maximum {max}");
		}
		Ok(Box3d::new(min, max))
	}
}

fn vec3(values: &[f64]) -> Result<DVec3> {
	match values {
		[x, y, z] => Ok(DVec3::new(*x, *y, *z)),
		_ => bail!("expected three comma separated values, got {}", values.len()),
	}
}

fn main() -> Result<()> {
	env_logger::init();
	let cli = Cli::parse();

	let settings = match &cli.settings {
		Some(path) => Settings::load(path)?,
		None => Settings::default(),
	};
	tracing::debug!(?settings, "loaded settings");
	let storage = Storage::open_directory(&cli.store, settings.cache_size_bytes)
		.with_context(|| format!("Failed to open store: {}", cli.store.display()))?;
	let pool = WorkerPool::new(settings.max_degree_of_parallelism)?;

	pool.install(|| run(&storage, cli.command))?;
	storage.flush().context("Failed to flush store")?;
	Ok(())
}

fn load(storage: &Storage, key: &str) -> Result<Arc<PointSet>> {
	storage
		.get_point_set(key)
		.with_context(|| format!("Failed to read point set {key}"))?
		.with_context(|| format!("No point set stored under {key}"))
}

fn run(storage: &Storage, command: Command) -> Result<()> {
	let token = CancellationToken::new();
	match command {
		Command::Info { key } => info(storage, &key),
		Command::Lod { key, out } => {
			let ps = load(storage, &key)?;
			let config = LodConfig::default().with_token(token);
			let lodded = ps.generate_lod(storage, &out, &config)?;
			println!("Stored {} ({} points)", lodded.id, lodded.point_count(storage)?);
			Ok(())
		}
		Command::Merge { a, b, out } => {
			let (a, b) = (load(storage, &a)?, load(storage, &b)?);
			let merged = a.merge(storage, &b, storage, &token)?;
			let stored = storage.put_point_set(PointSet::new(out, merged.split_limit, merged.root_id))?;
			println!("Stored {} ({} points)", stored.id, stored.point_count(storage)?);
			Ok(())
		}
		Command::CountBox { query, approximate } => {
			let ps = load(storage, &query.key)?;
			let bounds = query.bounds()?;
			let filter = Filter::InsideBox3d(bounds);
			let n = if approximate {
				ps.count_approximately(storage, &filter, query.min_exponent)?
			} else {
				ps.count(storage, &filter, query.min_exponent)?
			};
			println!("{n}");
			Ok(())
		}
		Command::QueryBox { query } => {
			let ps = load(storage, &query.key)?;
			let stdout = std::io::stdout();
			let mut out = BufWriter::new(stdout.lock());
			for chunk in ps.query_points_inside_box(storage, query.bounds()?, query.min_exponent)? {
				for p in chunk?.positions() {
					writeln!(out, "{} {} {}", p.x, p.y, p.z)?;
				}
			}
			out.flush()?;
			Ok(())
		}
	}
}

fn info(storage: &Storage, key: &str) -> Result<()> {
	let ps = load(storage, key)?;
	println!("Point set:   {}", ps.id);
	println!("Split limit: {}", ps.split_limit);
	let Some(root) = ps.root(storage)? else {
		println!("Empty");
		return Ok(());
	};

	let bounds = root.bounding_box();
	let stats = TreeStats::collect(storage, &root)?;
	println!("Root:        {} (cell {:?})", root.id, root.cell);
	println!("Points:      {}", stats.point_count_tree);
	println!("Bounds:      {} .. {}", bounds.min, bounds.max);
	println!(
		"Nodes:       {} ({} leaves, {} with LOD)",
		stats.node_count, stats.leaf_count, stats.lod_node_count
	);
	println!("Max depth:   {}", stats.max_depth);
	println!("Leaf fill:   {:.1} points", stats.average_leaf_points());
	for (depth, leaves, points) in stats.depth_histogram() {
		println!("  depth {depth:>2}: {leaves:>8} leaves {points:>12} points");
	}
	Ok(())
}
