mod board;
mod catalog;
mod config;
mod session;
mod storage;
mod timer;

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{LevelFilter, info, warn};

use crate::board::run_board;
use crate::catalog::TaskCatalog;
use crate::config::{Config, diagnostics_path, load_config, resolve_config_path, save_config};
use crate::session::SessionSettings;
use crate::storage::{LogStore, summarize};
use crate::timer::display_time;

const SUMMARY_GRANULARITY: usize = 3;

#[derive(Debug, Parser)]
#[command(name = "chronos-taskboard", about = "Four-button task timer with an append-only time log")]
struct Cli {
	#[arg(long)]
	config: Option<PathBuf>,
	#[arg(long)]
	log: Option<PathBuf>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	Run {
		/// Task to select on start, as category:name.
		#[arg(long)]
		task: Option<String>,
	},
	Log {
		#[arg(long, default_value_t = 20)]
		limit: usize,
		#[arg(long)]
		json: bool,
	},
	Summary,
	Tasks,
	Undo,
	Clear,
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let command = cli.command.unwrap_or(Command::Run { task: None });
	init_logging(matches!(command, Command::Run { .. }));

	let config_path = resolve_config_path(cli.config);
	if let Command::Init = command {
		if config_path.exists() {
			println!("config already exists at {}", config_path.display());
		} else {
			save_config(&config_path, &Config::default())?;
			println!("initialized config at {}", config_path.display());
		}
		return Ok(());
	}

	let config = load_config(&config_path)?;
	let log_path = cli.log.unwrap_or_else(|| config.resolved_log_path());
	let store = LogStore::open(log_path, config.delimiter.clone());
	let mut catalog = TaskCatalog::new(config.tasks.clone())?;

	match command {
		Command::Init => {}
		Command::Run { task } => {
			if let Some(task) = task {
				if !catalog.select(&task) {
					return Err(format!("unknown task: {task}").into());
				}
			}
			let settings = SessionSettings {
				refresh_frequency: config.refresh_frequency,
				screen_timeout: config.screen_timeout(),
			};
			run_board(catalog, store, settings, config.poll_interval())?;
		}
		Command::Log { limit, json } => {
			print_log(&store, limit, json)?;
		}
		Command::Summary => {
			print_summary(&store)?;
		}
		Command::Tasks => {
			println!("{} tasks", catalog.len());
			for (index, task) in catalog.iter().enumerate() {
				println!("{:>2}. {}", index + 1, task);
			}
		}
		Command::Undo => match store.delete_last()? {
			Some(entry) => println!("removed {} ({})", entry.task_label, display_time(entry.seconds, 2)),
			None => println!("log is empty"),
		},
		Command::Clear => {
			store.clear()?;
			info!("cleared {}", store.path().display());
			println!("cleared {}", store.path().display());
		}
	}

	Ok(())
}

/// The board owns the terminal, so its diagnostics go to a file instead of
/// stderr.
fn init_logging(to_file: bool) {
	let mut builder = env_logger::Builder::new();
	builder.filter_level(LevelFilter::Info).parse_default_env();

	if to_file {
		let path = diagnostics_path();
		if let Some(parent) = path.parent() {
			let _ = fs::create_dir_all(parent);
		}
		match OpenOptions::new().create(true).append(true).open(&path) {
			Ok(file) => {
				builder.target(env_logger::Target::Pipe(Box::new(file)));
			}
			Err(_) => {
				builder.filter_level(LevelFilter::Off);
			}
		}
	}

	builder.init();
}

fn print_log(store: &LogStore, limit: usize, json: bool) -> Result<(), Box<dyn Error>> {
	let entries = store.entries()?;
	if entries.is_empty() {
		if !json {
			println!("no logged time yet");
		}
		return Ok(());
	}

	let skip = entries.len().saturating_sub(limit);
	for entry in &entries[skip..] {
		if json {
			println!("{}", serde_json::to_string(entry)?);
		} else {
			println!("{:>12} | {}", display_time(entry.seconds, 2), entry.task_label);
		}
	}

	Ok(())
}

fn print_summary(store: &LogStore) -> Result<(), Box<dyn Error>> {
	let entries = store.entries()?;

	let rows = summarize(&entries);
	if rows.is_empty() {
		println!("no logged time yet");
		return Ok(());
	}

	let total = rows
		.iter()
		.map(|(_, seconds)| *seconds)
		.fold(0, u64::saturating_add);
	for (label, seconds) in &rows {
		println!("{:>16} | {}", display_time(*seconds, SUMMARY_GRANULARITY), label);
	}
	println!("{:>16} | total", display_time(total, SUMMARY_GRANULARITY));

	if store.size()? > entries.len() {
		warn!("some log lines could not be parsed and were left out");
	}

	Ok(())
}
