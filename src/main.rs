use clap::{Parser, Subcommand, ValueEnum};
use dlc_table::locate::DEFAULT_CSV_SUFFIXES;
use dlc_table::{
    logging, refresh_maze, report, CenterRule, CsvIndex, CsvLookup, FfprobeProbe, FilenameParser,
    IngestConfig, IngestError, IngestResult, Ingestor, MotherIndex, SummaryReport, VideoProbe,
    WriteMode,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dlc-table")]
#[command(author, version, about = "Build the per-trial table from pose-tracking videos")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only show warnings and the summary
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest videos into the trial table
    Ingest(IngestArgs),

    /// Recompute maze and center for every row of an existing table
    RefreshMaze {
        /// Table to update (.csv, .db, .sqlite)
        table: PathBuf,

        /// Mother video directory or CSV of mother video names
        #[arg(short, long, env = "DLC_TABLE_REFERENCE")]
        reference: PathBuf,

        /// How to fill the center column
        #[arg(long, value_enum, default_value = "none")]
        center: CenterArg,
    },

    /// Show what the filename rules extract
    Parse {
        /// File names or paths
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show container metadata of a video
    Probe {
        video: PathBuf,

        /// ffprobe binary
        #[arg(long, env = "DLC_TABLE_FFPROBE", default_value = "ffprobe")]
        ffprobe: String,
    },

    /// Find the tracking CSV of a video
    Locate {
        /// Video file name or path
        video: String,

        /// Directory to search (repeatable)
        #[arg(long = "csv-dir", required = true)]
        csv_dirs: Vec<PathBuf>,
    },

    /// Look up the maze number of a video
    Maze {
        /// Video file name or path
        video: String,

        /// Mother video directory or CSV of mother video names
        #[arg(short, long, env = "DLC_TABLE_REFERENCE")]
        reference: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// Directory of videos (with --data-layout: the lab data root)
    input_dir: Option<PathBuf>,

    /// Output table (.csv, or .db/.sqlite for SQLite)
    #[arg(short, long, env = "DLC_TABLE_OUTPUT")]
    output: Option<PathBuf>,

    /// Mother video directory or CSV of mother video names
    #[arg(short, long, env = "DLC_TABLE_REFERENCE")]
    reference: Option<PathBuf>,

    /// Directory to search for tracking CSVs (repeatable; default: input dir)
    #[arg(long = "csv-dir")]
    csv_dirs: Vec<PathBuf>,

    /// What to do with videos already in the table
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Worker threads for reading videos (default: 1)
    #[arg(short, long, env = "DLC_TABLE_JOBS")]
    jobs: Option<usize>,

    /// How to fill the center column
    #[arg(long, value_enum)]
    center: Option<CenterArg>,

    /// JSON configuration file
    #[arg(long, env = "DLC_TABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Write the run summary (.json, or .csv for one line per issue)
    #[arg(long = "summary-json")]
    summary: Option<PathBuf>,

    /// Treat INPUT_DIR as the lab data root (SplitVideos, DlcDataPytorchFiltered, RawVideos)
    #[arg(long)]
    data_layout: bool,

    /// ffprobe binary
    #[arg(long, env = "DLC_TABLE_FFPROBE")]
    ffprobe: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Upsert,
    Append,
}

impl From<ModeArg> for WriteMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Upsert => WriteMode::Upsert,
            ModeArg::Append => WriteMode::Append,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CenterArg {
    None,
    Quadrant,
}

impl From<CenterArg> for CenterRule {
    fn from(center: CenterArg) -> Self {
        match center {
            CenterArg::None => CenterRule::None,
            CenterArg::Quadrant => CenterRule::Quadrant,
        }
    }
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    logging::init(level);

    let code = match args.command {
        Command::Ingest(ingest) => run_ingest(ingest, args.verbose, args.quiet),
        Command::RefreshMaze {
            table,
            reference,
            center,
        } => run_refresh(table, reference, center),
        Command::Parse { names } => run_parse(&names),
        Command::Probe { video, ffprobe } => run_probe(video, ffprobe),
        Command::Locate { video, csv_dirs } => run_locate(&video, &csv_dirs),
        Command::Maze { video, reference } => run_maze(&video, reference),
    };

    std::process::exit(code);
}

/// Layer CLI flags over the config file over the defaults.
fn build_config(args: &IngestArgs) -> IngestResult<IngestConfig> {
    let mut config = match &args.config {
        Some(path) => IngestConfig::load_json(path)?,
        None => IngestConfig::default(),
    };

    if args.data_layout {
        let Some(data_dir) = &args.input_dir else {
            return Err(IngestError::Config("--data-layout needs INPUT_DIR".to_string()));
        };
        let output = args
            .output
            .clone()
            .unwrap_or_else(|| data_dir.join("dlc_table.csv"));
        let layout = IngestConfig::from_data_layout(data_dir, output);
        config.video_dirs = layout.video_dirs;
        config.csv_dirs = layout.csv_dirs;
        config.reference = layout.reference;
        config.output = layout.output;
    } else if let Some(input_dir) = &args.input_dir {
        config.video_dirs = vec![input_dir.clone()];
        config.csv_dirs = vec![input_dir.clone()];
    }

    if let Some(output) = &args.output {
        config.output = output.clone();
    }
    if let Some(reference) = &args.reference {
        config.reference = Some(reference.clone());
    }
    if !args.csv_dirs.is_empty() {
        config.csv_dirs = args.csv_dirs.clone();
    }
    if config.csv_dirs.is_empty() {
        config.csv_dirs = config.video_dirs.clone();
    }
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(jobs) = args.jobs {
        config.jobs = Some(jobs);
    }
    if let Some(center) = args.center {
        config.center = center.into();
    }
    if let Some(ffprobe) = &args.ffprobe {
        config.ffprobe = ffprobe.clone();
    }

    config.validate()?;
    Ok(config)
}

fn run_ingest(args: IngestArgs, verbose: bool, quiet: bool) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return 1;
        }
    };

    if !quiet {
        eprintln!("\x1b[1mdlc-table - Trial Table Ingestion\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        for dir in &config.video_dirs {
            eprintln!("Videos:  {}", dir.display());
        }
        eprintln!(
            "Table:   {} ({}, {})",
            config.output.display(),
            config.sink_kind(),
            match config.mode {
                WriteMode::Upsert => "upsert",
                WriteMode::Append => "append",
            }
        );
        eprintln!();
    }

    let ingestor = match Ingestor::new(config) {
        Ok(ingestor) => ingestor.with_progress(!quiet),
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return 1;
        }
    };

    let summary = match ingestor.run() {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("\x1b[31mIngestion failed:\x1b[0m {}", e);
            return 1;
        }
    };

    if verbose {
        for row in &summary.rows {
            let notes: Vec<String> = row.issues.iter().map(|i| i.to_string()).collect();
            eprintln!(
                "\x1b[90m  #{:<5} {:<50} {}\x1b[0m",
                row.id,
                truncate(&row.video_name, 50),
                notes.join("; ")
            );
        }
    }

    print_summary(&summary);

    if let Some(ref path) = args.summary {
        if let Err(e) = report::generate(path, &summary) {
            eprintln!("Failed to write summary: {}", e);
            return 1;
        }
        if !quiet {
            eprintln!("\n\x1b[32mSummary saved: {}\x1b[0m", path.display());
        }
    }

    if !quiet {
        eprintln!("\n\x1b[90mIngestion complete.\x1b[0m");
    }
    0
}

fn print_summary(s: &SummaryReport) {
    eprintln!("\n{}", "─".repeat(70));
    eprintln!("\x1b[1mSummary:\x1b[0m");
    eprintln!("  Videos:            {}", s.total);
    eprintln!("  \x1b[32m+ Inserted:\x1b[0m        {}", s.inserted);
    eprintln!("  \x1b[32m~ Updated:\x1b[0m         {}", s.updated);
    eprintln!("  Table rows:        {}", s.table_rows);

    let issues = [
        ("Parse failures", s.parse_failures),
        ("Video unreadable", s.video_unreadable),
        ("CSV not found", s.csv_not_found),
        ("Ambiguous CSV", s.ambiguous_csv),
        ("Maze unresolved", s.maze_unresolved),
        ("Duplicate names", s.duplicate_names),
    ];
    for (label, count) in issues {
        if count > 0 {
            eprintln!("  \x1b[33m? {:<16}\x1b[0m {}", format!("{}:", label), count);
        }
    }

    if !s.by_task.is_empty() {
        let tasks: Vec<String> = s.by_task.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        eprintln!("  \x1b[90mTasks: {}\x1b[0m", tasks.join(", "));
    }
}

fn run_refresh(table: PathBuf, reference: PathBuf, center: CenterArg) -> i32 {
    let config = IngestConfig {
        output: table,
        reference: Some(reference),
        center: center.into(),
        ..Default::default()
    };

    match refresh_maze(&config) {
        Ok(counts) => {
            eprintln!(
                "Refreshed {}: {} rows, {} changed, {} without maze",
                config.output.display(),
                counts.rows,
                counts.changed,
                counts.unresolved
            );
            0
        }
        Err(e) => {
            eprintln!("\x1b[31mRefresh failed:\x1b[0m {}", e);
            1
        }
    }
}

fn run_parse(names: &[String]) -> i32 {
    let parser = match FilenameParser::new() {
        Ok(parser) => parser,
        Err(e) => {
            eprintln!("Invalid filename rules: {}", e);
            return 1;
        }
    };

    for name in names {
        let parsed = parser.parse(name);
        match serde_json::to_string_pretty(&parsed) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing result: {}", e),
        }
        let missing = parsed.missing_fields();
        if !missing.is_empty() {
            eprintln!("\x1b[33m{}: unparsed {}\x1b[0m", name, missing.join(", "));
        }
    }
    0
}

fn run_probe(video: PathBuf, ffprobe: String) -> i32 {
    match FfprobeProbe::new(ffprobe).probe(&video) {
        Ok(info) => {
            println!("{:<14} {}", "num_frames", info.num_frames);
            println!("{:<14} {:.3}", "frame_rate", info.frame_rate);
            println!(
                "{:<14} {}",
                "trial_length",
                info.trial_length()
                    .map(|t| format!("{:.3}s", t))
                    .unwrap_or_else(|| "n/a".to_string())
            );
            println!("{:<14} {}x{}", "dimensions", info.width, info.height);
            0
        }
        Err(e) => {
            eprintln!("{}: {}", video.display(), e);
            1
        }
    }
}

fn run_locate(video: &str, csv_dirs: &[PathBuf]) -> i32 {
    let index = match CsvIndex::build(csv_dirs, DEFAULT_CSV_SUFFIXES) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("Invalid suffix pattern: {}", e);
            return 1;
        }
    };

    match index.lookup(video) {
        CsvLookup::Found(path) => println!("{}", path.display()),
        CsvLookup::Ambiguous { chosen, candidates } => {
            println!("{}", chosen.display());
            eprintln!("\x1b[33m{} candidates:\x1b[0m", candidates.len());
            for c in candidates {
                eprintln!("  {}", c.display());
            }
        }
        CsvLookup::NotFound => eprintln!("No tracking csv found for {}", video),
    }
    0
}

fn run_maze(video: &str, reference: PathBuf) -> i32 {
    let extensions = IngestConfig::default().video_extensions;
    let index = match MotherIndex::load(&reference, &extensions) {
        Ok(index) => index,
        Err(e) => {
            eprintln!("{}", e);
            return 1;
        }
    };

    let name = std::path::Path::new(video)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| video.to_string());
    match index.maze_number(&name) {
        Some(maze) => println!("{}", maze),
        None => eprintln!("No maze for {} in {} sessions", name, index.len()),
    }
    0
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{}...", cut)
    }
}
