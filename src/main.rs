//! Guide Engine - command line front end
//! Shows what is on a guide channel and which subtitle cue is active at given times

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use log::{debug, info};

use guide_engine::epg::{
    current_program, format_datetime, format_time, next_programs, GuideService, Program, RefreshOutcome,
    ScheduleCache, ScheduleParser,
};
use guide_engine::subtitles::{format_media_time, CueFormat, LoadOutcome, SubtitleSelection, SubtitleTrack};
use guide_engine::{
    parse_broadcast_time, parse_media_time, EngineConfig, EngineError, FileBlobStore, HttpFetcher, Result,
};

#[derive(Parser)]
#[command(name = "guide-engine")]
#[command(about = "Program guide and subtitle timing engine", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    log_verbosity: u8,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current and upcoming programmes of a channel
    Guide {
        /// XMLTV source (http(s) URL, file:// URL or path); defaults to the configured guide
        #[arg(long, value_name = "URL")]
        url: Option<String>,

        /// Channel id as used in the guide
        #[arg(long)]
        channel: String,

        /// Number of upcoming programmes to list
        #[arg(long)]
        count: Option<usize>,

        /// Point in time as YYYYMMDDHHMMSS [+zzzz]; defaults to now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },
    /// Print the active subtitle cue at each playback time
    Cues {
        /// Subtitle source (http(s) URL, file:// URL or path)
        #[arg(long, value_name = "URL")]
        url: String,

        /// Track format (srt, vtt); guessed from the URL when omitted
        #[arg(long)]
        format: Option<String>,

        /// Playback times as seconds or HH:MM:SS.mmm
        #[arg(long, value_name = "TIME", num_args = 1.., required = true)]
        at: Vec<String>,
    },
    /// Drop the persisted guide snapshot
    ClearCache,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_verbosity);

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    debug!("Using config: {:?}", config);

    let result = match cli.command {
        Commands::Guide {
            url,
            channel,
            count,
            at,
        } => run_guide(&config, url, &channel, count, at.as_deref()),
        Commands::Cues { url, format, at } => run_cues(&config, url, format.as_deref(), &at),
        Commands::ClearCache => run_clear_cache(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn guide_service(config: &EngineConfig) -> Result<Arc<GuideService>> {
    let store = FileBlobStore::new(config.store_dir())?;
    let cache = ScheduleCache::with_store(config.retention(), Arc::new(store));
    Ok(Arc::new(GuideService::new(
        Arc::new(cache),
        Arc::new(HttpFetcher::new(config.download_config())),
        ScheduleParser::new(config.timezone_policy),
    )))
}

fn run_guide(
    config: &EngineConfig,
    url: Option<String>,
    channel_id: &str,
    count: Option<usize>,
    at: Option<&str>,
) -> Result<()> {
    let url = url.unwrap_or_else(|| config.guide_url.clone());
    if url.trim().is_empty() {
        return Err(EngineError::TransportFailure(
            "no guide URL given and none configured".to_string(),
        ));
    }
    let at: DateTime<Utc> = match at {
        Some(text) => parse_broadcast_time(text, config.timezone_policy)?,
        None => Utc::now(),
    };

    let service = guide_service(config)?;
    let outcome = service
        .spawn_refresh(url)
        .recv()
        .unwrap_or(RefreshOutcome::NoData);
    match &outcome {
        RefreshOutcome::Fetched {
            channels,
            programs,
            report,
        } => info!(
            "Guide loaded: {} channels, {} programmes ({} skipped, {} orphaned)",
            channels, programs, report.skipped_programs, report.orphaned_programs
        ),
        other => info!("Guide refresh: {:?}", other),
    }

    let Some(channel) = service.cache().get(channel_id, Utc::now()) else {
        println!("No guide data for channel {}", channel_id);
        return Ok(());
    };

    println!("{} ({}) at {}", channel.name, channel.id, format_datetime(at));
    match current_program(&channel, at) {
        Some(program) => {
            print_program("Now ", program);
            println!("      {:.0}% done", program.progress_percent(at));
        }
        None => println!("Now   (nothing scheduled)"),
    }
    for program in next_programs(&channel, at, count.unwrap_or(config.next_count)) {
        print_program("Next", program);
    }
    Ok(())
}

fn print_program(label: &str, program: &Program) {
    println!(
        "{}  {}-{}  {} ({} min)",
        label,
        format_time(program.start),
        format_time(program.end),
        program.title,
        program.duration_minutes()
    );
    if let Some(category) = &program.category {
        println!("      [{}]", category);
    }
}

/// Seconds, or a HH:MM:SS[.mmm] media timestamp
fn parse_playback_time(text: &str) -> Result<f64> {
    match text.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() => Ok(seconds),
        _ => parse_media_time(text),
    }
}

fn run_cues(config: &EngineConfig, url: String, format: Option<&str>, times: &[String]) -> Result<()> {
    let format = match format {
        Some(name) => CueFormat::from_name(name),
        None => CueFormat::from_url(&url),
    };
    let times = times
        .iter()
        .map(|t| parse_playback_time(t))
        .collect::<Result<Vec<f64>>>()?;

    let selection = Arc::new(SubtitleSelection::new(Arc::new(HttpFetcher::new(
        config.download_config(),
    ))));
    let track = SubtitleTrack::new("cli", url, format);
    match selection.select(Some(track)).recv() {
        Ok(LoadOutcome::Loaded { cues, .. }) => info!("Loaded {} cues", cues),
        Ok(LoadOutcome::Failed { track_id }) => {
            return Err(EngineError::TransportFailure(format!("could not load track {}", track_id)))
        }
        other => debug!("Subtitle load: {:?}", other),
    }

    for t in times {
        match selection.active_cue(t) {
            Some(cue) => println!("{}  {}", format_media_time(t), cue.text.replace('\n', " / ")),
            None => println!("{}  -", format_media_time(t)),
        }
    }
    Ok(())
}

fn run_clear_cache(config: &EngineConfig) -> Result<()> {
    let store = FileBlobStore::new(config.store_dir())?;
    let dir = store.dir().display().to_string();
    ScheduleCache::with_store(config.retention(), Arc::new(store)).clear();
    println!("Cleared guide snapshot in {}", dir);
    Ok(())
}
