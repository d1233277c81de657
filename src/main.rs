use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use replayguard::config::{Config, DEFAULT_CONFIG_PATH};
use replayguard::report::{self, Summary};
use replayguard::store::has_valid_keys;
use replayguard::{AnalysisResult, DetectionKind, MemoryStore, Replay, Service, Storage, Verdict};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "replayguard")]
#[command(author, version, about = "Detect cheated osu! replays")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Replay file or directory of .osr files (optional in GUI mode)
    path: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Launch GUI folder picker (auto-enabled when no path is given)
    #[arg(long)]
    gui: bool,

    /// Write a report (.json or .csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Persist replays and detections in the configured storage
    #[arg(long)]
    store: bool,

    /// Don't prompt to open the report
    #[arg(long)]
    no_open: bool,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Print every flag's reason
    #[arg(short, long)]
    verbose: bool,

    /// Only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Port to listen on (overrides api.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show stored replay and detection counts
    Stats,

    /// Show flagged replays of one beatmap
    Beatmap {
        /// Beatmap MD5 hash
        hash: String,
    },

    /// Re-run detection over every stored replay
    Rescan,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config);

    if let Some(cmd) = args.command {
        let code = match run_command(cmd, &config) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        };
        std::process::exit(code);
    }

    #[cfg(feature = "gui")]
    let use_gui = args.gui || args.path.is_none();

    #[cfg(not(feature = "gui"))]
    let use_gui = false;

    let path = match args.path.clone() {
        Some(p) if !args.gui => p,
        _ => match pick_path(use_gui) {
            Some(p) => p,
            None => std::process::exit(if use_gui { 0 } else { 1 }),
        },
    };

    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .ok();
    }

    let files = collect_replays(&path);
    if files.is_empty() {
        eprintln!("No .osr replays found in {}", path.display());
        std::process::exit(1);
    }

    if !args.quiet {
        eprintln!("\x1b[1mreplayguard - osu! replay checker\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Found {} replay(s)\n", files.len());
    }

    let pb = progress_bar(files.len(), args.quiet);

    let parsed: Vec<(PathBuf, Result<Replay, String>)> = files
        .par_iter()
        .map(|path| {
            let outcome = read_replay(path);
            if let Some(ref pb) = pb {
                pb.inc(1);
            }
            (path.clone(), outcome)
        })
        .collect();

    // Without --store the batch itself is the corpus, so copies within it are still caught
    let storage: Arc<dyn Storage> = if args.store {
        match config.open_storage() {
            Ok(storage) => storage,
            Err(e) => {
                eprintln!("Failed to open storage: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Arc::new(MemoryStore::from_replays(
            parsed.iter().filter_map(|(_, r)| r.as_ref().ok().cloned()),
        ))
    };
    let mut service = Service::new(storage);
    if args.store {
        service = service.with_audit_dir(&config.storage.data_dir);
    }

    if let Some(ref pb) = pb {
        pb.set_position(0);
        pb.set_message("analysing");
    }

    let results: Vec<AnalysisResult> = parsed
        .par_iter()
        .map(|(path, outcome)| {
            let result = match outcome {
                Ok(replay) => analyze(&service, path, replay, args.store),
                Err(e) => AnalysisResult::failed(path, e),
            };
            if let Some(ref pb) = pb {
                pb.inc(1);
                pb.set_message(result.file_name.clone());
            }
            result
        })
        .collect();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if !args.quiet {
        for r in &results {
            print_result(r, args.verbose);
        }
    }

    let summary = Summary::from_results(&results);
    if !args.quiet {
        print_summary(&summary);
    }

    if let Some(ref output_path) = args.output {
        if let Err(e) = report::generate(output_path, &results) {
            eprintln!("Failed to write report: {}", e);
            std::process::exit(1);
        }
        if !args.quiet {
            eprintln!("\n\x1b[32mReport saved: {}\x1b[0m", output_path.display());
        }
        if !args.no_open {
            offer_to_open(output_path, use_gui, args.quiet);
        }
    }

    if summary.flagged > 0 {
        std::process::exit(2);
    } else if summary.error > 0 {
        std::process::exit(1);
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logger.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_command(cmd: Command, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let storage = config.open_storage()?;
    let service = Service::new(storage).with_audit_dir(&config.storage.data_dir);

    match cmd {
        Command::Serve { port } => {
            let mut api = config.api.clone();
            if let Some(port) = port {
                api.port = port;
            }
            replayguard::serve::start(&api, service)?;
        }

        Command::Stats => {
            let stats = service.storage().stats()?;
            println!("Replays:    {}", stats.replay_count);
            println!("Detections: {}", stats.detection_count);
        }

        Command::Beatmap { hash } => match service.storage().beatmap_report(&hash)? {
            Some(report) => {
                println!("Beatmap {} ({} replays)", report.hash, report.replay_count);
                if report.flagged_replays.is_empty() {
                    println!("No flagged replays.");
                }
                for (replay_hash, flags) in &report.flagged_replays {
                    println!("\n\x1b[31m{}\x1b[0m", replay_hash);
                    for flag in flags {
                        println!("  {}", flag);
                    }
                }
            }
            None => println!("No replays stored for beatmap {}", hash),
        },

        Command::Rescan => {
            let flagged = service.reanalyze_all()?;
            for (key, flags) in &flagged {
                let kinds: Vec<&str> = flags.iter().map(|f| f.kind.as_str()).collect();
                println!("{}  {}  {}", key.beatmap_hash, key.replay_hash, kinds.join(","));
            }
            eprintln!("{} flagged replay(s)", flagged.len());
        }
    }

    Ok(())
}

fn read_replay(path: &Path) -> Result<Replay, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Replay::from_bytes(name, &bytes).map_err(|e| e.to_string())
}

fn analyze(service: &Service, path: &Path, replay: &Replay, store: bool) -> AnalysisResult {
    if store && has_valid_keys(replay) {
        if let Err(e) = service.storage().store_replay(replay) {
            error!(file = %path.display(), "could not store replay: {}", e);
            return AnalysisResult::failed(path, e);
        }
    }
    match service.analyze_and_record(replay) {
        Ok(flags) => AnalysisResult::from_replay(path, replay, flags),
        Err(e) => {
            warn!(file = %path.display(), "analysis not recorded: {}", e);
            AnalysisResult::failed(path, e)
        }
    }
}

fn collect_replays(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("osr"))
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

fn progress_bar(len: usize, quiet: bool) -> Option<ProgressBar> {
    if quiet || len < 2 {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    Some(pb)
}

fn print_result(r: &AnalysisResult, verbose: bool) {
    let color = match r.verdict {
        Verdict::Clean => "\x1b[32m",
        Verdict::Flagged => "\x1b[31m",
        Verdict::Error => "\x1b[90m",
    };
    let reset = "\x1b[0m";

    let flags_str = if let Some(ref e) = r.error {
        e.clone()
    } else if r.flags.is_empty() {
        "-".to_string()
    } else {
        r.flags.iter().map(|f| f.kind.as_str()).collect::<Vec<_>>().join(",")
    };

    println!(
        "{}{:<10}{} {:<16} {:<8} {:>10}  {:<40}  {}",
        color,
        format!("[{}]", r.verdict),
        reset,
        truncate(&r.player, 16),
        r.mods,
        r.score,
        truncate(&flags_str, 40),
        &r.file_name
    );

    if verbose {
        for flag in &r.flags {
            eprintln!("    {}", flag);
        }
    }
}

fn print_summary(summary: &Summary) {
    eprintln!("\n{}", "─".repeat(70));
    eprintln!("\x1b[1mSummary:\x1b[0m");
    eprintln!("  \x1b[32m✓ Clean:\x1b[0m   {}", summary.clean);
    eprintln!("  \x1b[31m✗ Flagged:\x1b[0m {}", summary.flagged);
    for kind in DetectionKind::ALL {
        let count = summary.count(kind);
        if count > 0 {
            eprintln!("      {:<22} {}", kind.as_str(), count);
        }
    }
    if summary.error > 0 {
        eprintln!("  \x1b[90mErrors:\x1b[0m    {}", summary.error);
    }
}

fn offer_to_open(path: &Path, use_gui: bool, quiet: bool) {
    if use_gui {
        let _ = open::that(path);
        return;
    }
    if quiet {
        return;
    }
    eprint!("\nOpen report? [Y/n] ");
    io::stderr().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_ok() {
        let input = input.trim().to_lowercase();
        if input.is_empty() || input == "y" || input == "yes" {
            if let Err(e) = open::that(path) {
                eprintln!("Failed to open report: {}", e);
            }
        }
    }
}

#[cfg(feature = "gui")]
fn pick_path(use_gui: bool) -> Option<PathBuf> {
    if !use_gui {
        return None;
    }
    if let Some(folder) = rfd::FileDialog::new()
        .set_title("Select replay folder (or Cancel for a single file)")
        .pick_folder()
    {
        return Some(folder);
    }
    rfd::FileDialog::new()
        .set_title("Select replay to analyse")
        .add_filter("osu! replays", &["osr"])
        .pick_file()
}

#[cfg(not(feature = "gui"))]
fn pick_path(_use_gui: bool) -> Option<PathBuf> {
    eprintln!("Usage: replayguard <PATH>");
    eprintln!("Run 'replayguard --help' for more options.");
    None
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
