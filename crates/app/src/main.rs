use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vinyl_visualiser_core::{
    AnalysisHandle, AppConfig, AudioConfig, AudioEngine, BandMapper, DecoderCommand,
    DecoderProcess, EngineState, FrameClock, FramePlan, SampleNormalizer, SourceKind,
    SpectrumAnalyzer, SpectrumScene,
};

/// Frames between FPS log lines, five seconds at 60 fps.
const FPS_LOG_INTERVAL: u64 = 300;

fn main() -> vinyl_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Snapshot(args) => snapshot(args),
    }
}

fn run(args: RunArgs) -> vinyl_visualiser_core::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(url) = args.stream_url {
        config.audio.stream_url = url;
    }
    tracing::info!(source = ?args.source, url = %config.audio.stream_url, "starting visualiser");

    let (mut engine, handle) = start_engine(&config.audio, args.source)?;
    let mut scene = SpectrumScene::new(&config.visualization.psychedelic_spectrum, &config.display);
    let mut clock = FrameClock::new(config.display.fps_target);
    let deadline = args.duration.map(|duration| Instant::now() + duration);

    let mut frames: u64 = 0;
    let mut reported_failure = false;
    loop {
        let latest = handle.try_take_latest();
        scene.update(latest.as_ref());
        present(&scene.plan());

        clock.tick();
        frames += 1;
        if frames % FPS_LOG_INTERVAL == 0 {
            tracing::info!(fps = clock.fps(), "render rate");
        }

        match handle.state() {
            EngineState::Ended => {
                drain_final(&mut scene, &handle);
                tracing::info!(frames, "audio stream ended");
                break;
            }
            EngineState::Failed if !reported_failure => {
                tracing::warn!("audio ingestion halted, keeping the last band state on screen");
                reported_failure = true;
            }
            _ => {}
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }

    tracing::info!("shutting down");
    engine.stop()?;
    tracing::info!(stats = ?engine.stats(), "shutdown complete");
    Ok(())
}

/// Starts the requested source. In `auto` mode a stream that cannot be
/// opened falls back to the live capture device.
fn start_engine(
    audio: &AudioConfig,
    source: SourceArg,
) -> vinyl_visualiser_core::Result<(AudioEngine, AnalysisHandle)> {
    let launch = |kind: SourceKind| -> vinyl_visualiser_core::Result<_> {
        let mut engine = AudioEngine::new(audio.clone(), kind);
        let handle = engine.start()?;
        Ok((engine, handle))
    };

    match source {
        SourceArg::Stream => launch(SourceKind::stream(audio)),
        SourceArg::Capture => launch(SourceKind::Capture),
        SourceArg::Auto => match launch(SourceKind::stream(audio)) {
            Err(err) if err.is_source_unavailable() => {
                tracing::warn!(%err, "stream engine failed, using fallback capture");
                launch(SourceKind::Capture)
            }
            other => other,
        },
    }
}

/// Shows the block published just before the stream ended, if the tick
/// has not taken it yet.
fn drain_final(scene: &mut SpectrumScene, handle: &AnalysisHandle) -> bool {
    let Some(last) = handle.try_take_latest() else {
        return false;
    };
    scene.update(Some(&last));
    present(&scene.plan());
    true
}

/// Hands the draw list to the presentation backend.
fn present(plan: &FramePlan) {
    tracing::trace!(
        bars = plan.bars.len(),
        pulse = plan.pulse.is_some(),
        "frame planned"
    );
}

/// Decodes `input` block by block and writes every smoothed band vector.
fn snapshot(args: SnapshotArgs) -> vinyl_visualiser_core::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let audio = &config.audio;
    tracing::info!(input = %args.input, output = ?args.output, "capturing band snapshot");

    let command = DecoderCommand::ffmpeg(&args.input, audio.sample_rate, audio.channels);
    let (mut process, mut reader) = DecoderProcess::spawn(&command, audio)?;
    let normalizer = SampleNormalizer::new(audio.buffer_size);
    let mut analyzer = SpectrumAnalyzer::new(audio.sample_rate, audio.buffer_size);
    let mut mapper = BandMapper::new(&config.visualization.psychedelic_spectrum);

    let mut frames = Vec::new();
    while args.frames.map_or(true, |limit| frames.len() < limit) {
        let Some(frame) = reader.read_frame()? else {
            break;
        };
        let result = analyzer.analyze(normalizer.normalize(&frame)?)?;
        mapper.update(Some(&result));
        frames.push(serde_json::json!({
            "energies": mapper.energies(),
            "rms": result.samples.rms(),
            "spectral_centroid": result.spectral_centroid(),
            "peak_frequency": result.peak_bin().map(|bin| result.frequencies[bin]),
        }));
    }
    process.stop()?;

    let document = serde_json::json!({
        "sample_rate": audio.sample_rate,
        "buffer_size": audio.buffer_size,
        "bands": mapper.bands(),
        "frames": frames,
    });
    let writer = BufWriter::new(File::create(&args.output)?);
    serde_json::to_writer_pretty(writer, &document)?;

    tracing::info!(frames = frames.len(), "snapshot written");
    Ok(())
}

fn load_config(path: Option<&Path>) -> vinyl_visualiser_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => {
            tracing::info!("no configuration file given, using defaults");
            Ok(AppConfig::default())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time spectrum visualiser for network audio streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Visualise a live stream (or the capture device) at the display frame rate.
    Run(RunArgs),
    /// Decode an input offline and write its band energies as JSON.
    Snapshot(SnapshotArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where audio comes from.
    #[arg(short, long, value_enum, default_value_t = SourceArg::Auto)]
    source: SourceArg,
    /// Overrides `audio.stream_url` from the configuration.
    #[arg(long)]
    stream_url: Option<String>,
    /// Stop after this many seconds instead of running until the stream ends.
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Stream URL or file path understood by ffmpeg.
    #[arg(short, long)]
    input: String,
    /// Destination JSON file.
    #[arg(short, long)]
    output: PathBuf,
    /// Maximum number of blocks to record.
    #[arg(short, long)]
    frames: Option<usize>,
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|err| format!("{err}"))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("`{value}` is not a non-negative number of seconds"))
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceArg {
    /// Try the stream decoder, fall back to the capture device.
    Auto,
    Stream,
    Capture,
}
