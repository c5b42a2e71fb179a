use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::decode::{CaptureDevice, DecoderCommand, DecoderProcess, PcmFrame, PcmReader};
use crate::{
    AnalysisResult, AudioConfig, PublishOutcome, Result, ResultSlot, SampleNormalizer, SlotStats,
    SpectrumAnalyzer,
};

/// How long `stop` waits for the producer thread after releasing the source.
const PRODUCER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where PCM frames come from. Chosen once, when the engine is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Pull frames from a decoder subprocess's stdout.
    Stream(DecoderCommand),
    /// Have frames pushed by the default capture device.
    Capture,
}

impl SourceKind {
    /// ffmpeg decoding the configured `stream_url`.
    pub fn stream(config: &AudioConfig) -> Self {
        Self::Stream(DecoderCommand::for_stream(config))
    }
}

/// Lifecycle of the producer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Idle,
    Running,
    /// The source ran out of data.
    Ended,
    /// A runtime fault halted ingestion; consumers keep their last state.
    Failed,
    Stopped,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Ended,
            3 => Self::Failed,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// State crossing from the producer to the render tick.
#[derive(Debug)]
struct Shared {
    slot: ResultSlot,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Moves `Running` to `next`; any other state is left as it is.
    fn leave_running(&self, next: EngineState) -> bool {
        self.state
            .compare_exchange(
                EngineState::Running as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Stop flag for a single `start`..`stop` run. A producer left detached by a
/// timed-out stop keeps its own raised token, so it can never touch a later run.
#[derive(Debug, Clone, Default)]
struct RunToken(Arc<AtomicBool>);

impl RunToken {
    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Normalize, analyze and publish, one frame at a time.
#[derive(Debug)]
struct Pipeline {
    normalizer: SampleNormalizer,
    analyzer: SpectrumAnalyzer,
    shared: Arc<Shared>,
    run: RunToken,
}

impl Pipeline {
    fn new(config: &AudioConfig, shared: Arc<Shared>, run: RunToken) -> Self {
        Self {
            normalizer: SampleNormalizer::new(config.buffer_size),
            analyzer: SpectrumAnalyzer::new(config.sample_rate, config.buffer_size),
            shared,
            run,
        }
    }

    fn stopping(&self) -> bool {
        self.run.is_cancelled()
    }

    /// Leaves `Running` unless this run has already been stopped.
    fn halt(&self, next: EngineState) -> bool {
        !self.stopping() && self.shared.leave_running(next)
    }

    fn process(&mut self, frame: &PcmFrame) -> Result<PublishOutcome> {
        let block = self.normalizer.normalize(frame)?;
        let result = self.analyzer.analyze(block)?;
        Ok(self.shared.slot.publish(result))
    }

    /// Runs one pushed frame, halting ingestion on the first fault.
    fn accept(&mut self, frame: PcmFrame) {
        if self.stopping() || self.shared.state() != EngineState::Running {
            return;
        }
        if let Err(err) = self.process(&frame) {
            tracing::error!(%err, "audio pipeline fault, halting ingestion");
            self.halt(EngineState::Failed);
        }
    }
}

#[derive(Debug)]
enum ActiveSource {
    Decoder {
        process: DecoderProcess,
        producer: JoinHandle<()>,
    },
    Capture(CaptureDevice),
}

/// Producer side of the visualiser: owns the audio source and feeds the
/// result slot from its own thread (or the capture host's callback thread).
#[derive(Debug)]
pub struct AudioEngine {
    config: AudioConfig,
    source: SourceKind,
    shared: Arc<Shared>,
    run: RunToken,
    active: Option<ActiveSource>,
}

impl AudioEngine {
    pub fn new(config: AudioConfig, source: SourceKind) -> Self {
        tracing::info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            buffer_size = config.buffer_size,
            "audio engine initialized"
        );

        let shared = Arc::new(Shared {
            slot: ResultSlot::new(config.slot_policy),
            state: AtomicU8::new(EngineState::Idle as u8),
        });

        Self {
            config,
            source,
            shared,
            run: RunToken::default(),
            active: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn source(&self) -> &SourceKind {
        &self.source
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Starts ingestion and returns a consumer handle.
    ///
    /// A no-op while already running. Failing to acquire the source (missing
    /// decoder binary, no capture device) is returned as is; choosing another
    /// source is up to the caller.
    pub fn start(&mut self) -> Result<AnalysisHandle> {
        if self.is_running() {
            return Ok(self.handle());
        }

        self.release_source()?;
        self.run = RunToken::default();
        self.shared.slot.clear();

        let mut pipeline = Pipeline::new(&self.config, Arc::clone(&self.shared), self.run.clone());
        let active = match &self.source {
            SourceKind::Stream(command) => {
                let (process, reader) = DecoderProcess::spawn(command, &self.config)
                    .inspect_err(|_| self.shared.set_state(EngineState::Failed))?;

                self.shared.set_state(EngineState::Running);
                let producer = thread::Builder::new()
                    .name("audio-decoder".into())
                    .spawn(move || run_reader(reader, pipeline))
                    .inspect_err(|_| self.shared.set_state(EngineState::Failed))?;

                ActiveSource::Decoder { process, producer }
            }
            SourceKind::Capture => {
                self.shared.set_state(EngineState::Running);
                let device = CaptureDevice::open(&self.config, move |frame| pipeline.accept(frame))
                    .inspect_err(|_| self.shared.set_state(EngineState::Failed))?;
                ActiveSource::Capture(device)
            }
        };

        self.active = Some(active);
        tracing::info!(source = ?self.source, "audio engine started");
        Ok(self.handle())
    }

    /// Stops ingestion and releases the decoder or capture device.
    ///
    /// Only waits a bounded time for a blocked read to return. Calling it
    /// while nothing is running is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        if self.active.is_none() {
            return Ok(());
        }

        self.run.cancel();
        self.shared.leave_running(EngineState::Stopped);
        self.release_source()?;

        tracing::debug!(stats = ?self.shared.slot.stats(), "result slot statistics");
        tracing::info!("audio engine stopped");
        Ok(())
    }

    /// Latest result published since the previous take, if any.
    pub fn try_take_latest(&self) -> Option<AnalysisResult> {
        self.shared.slot.try_take()
    }

    pub fn stats(&self) -> SlotStats {
        self.shared.slot.stats()
    }

    /// Cloneable consumer view for the render tick.
    pub fn handle(&self) -> AnalysisHandle {
        AnalysisHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn release_source(&mut self) -> Result<()> {
        match self.active.take() {
            Some(ActiveSource::Decoder {
                mut process,
                producer,
            }) => {
                let stopped = process.stop();
                join_producer(producer);
                stopped
            }
            Some(ActiveSource::Capture(mut device)) => device.stop(),
            None => Ok(()),
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "failed to stop audio engine");
        }
    }
}

/// Shared, thread-safe consumer view over an [`AudioEngine`].
#[derive(Clone)]
pub struct AnalysisHandle {
    shared: Arc<Shared>,
}

impl AnalysisHandle {
    /// Never blocks; `None` means nothing new since the last take.
    pub fn try_take_latest(&self) -> Option<AnalysisResult> {
        self.shared.slot.try_take()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn stats(&self) -> SlotStats {
        self.shared.slot.stats()
    }
}

impl std::fmt::Debug for AnalysisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisHandle")
            .field("state", &self.state())
            .finish()
    }
}

fn run_reader<R: Read>(mut reader: PcmReader<R>, mut pipeline: Pipeline) {
    while !pipeline.stopping() {
        let frame = match reader.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if pipeline.halt(EngineState::Ended) {
                    tracing::warn!("stream ended or incomplete data");
                }
                return;
            }
            Err(err) => {
                if pipeline.halt(EngineState::Failed) {
                    tracing::error!(%err, "failed to read from decoder, halting ingestion");
                }
                return;
            }
        };

        if pipeline.stopping() {
            break;
        }
        if let Err(err) = pipeline.process(&frame) {
            tracing::error!(%err, "audio pipeline fault, halting ingestion");
            pipeline.halt(EngineState::Failed);
            return;
        }
    }
}

fn join_producer(producer: JoinHandle<()>) {
    let deadline = Instant::now() + PRODUCER_JOIN_TIMEOUT;
    while !producer.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("producer thread still blocked, detaching it");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if producer.join().is_err() {
        tracing::error!("producer thread panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;
    use std::io::{self, Cursor};

    use super::*;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared {
            slot: ResultSlot::default(),
            state: AtomicU8::new(EngineState::Running as u8),
        })
    }

    fn pipeline(config: &AudioConfig, shared: &Arc<Shared>) -> Pipeline {
        Pipeline::new(config, Arc::clone(shared), RunToken::default())
    }

    fn wait_for(engine: &AudioEngine, state: EngineState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if engine.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn small_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            buffer_size: 64,
            channels: 2,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn full_scale_sine_peaks_at_the_expected_bin() {
        let config = AudioConfig::default();
        let bytes: Vec<u8> = (0..config.buffer_size)
            .flat_map(|n| {
                let phase = 2.0 * PI * 1_000.0 * n as f32 / config.sample_rate as f32;
                let value = (phase.sin() * i16::MAX as f32) as i16;
                [value, value]
            })
            .flat_map(i16::to_le_bytes)
            .collect();

        let shared = shared();
        let reader = PcmReader::new(Cursor::new(bytes), config.buffer_size, config.channels);
        run_reader(reader, pipeline(&config, &shared));

        assert_eq!(shared.state(), EngineState::Ended);
        let result = shared.slot.try_take().unwrap();
        let expected = (1_000.0_f32 * 1024.0 / 44_100.0).round() as usize;
        assert!(result.peak_bin().unwrap().abs_diff(expected) <= 1);
    }

    #[test]
    fn read_errors_fail_the_pipeline() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "decoder vanished"))
            }
        }

        let shared = shared();
        let config = small_config();
        run_reader(
            PcmReader::new(Broken, config.buffer_size, config.channels),
            pipeline(&config, &shared),
        );

        assert_eq!(shared.state(), EngineState::Failed);
        assert!(shared.slot.try_take().is_none());
    }

    #[test]
    fn malformed_pushed_frames_fail_the_pipeline() {
        let shared = shared();
        let mut pipeline = pipeline(&small_config(), &shared);

        pipeline.accept(PcmFrame::new(vec![0; 128], 2));
        assert_eq!(shared.slot.stats().published, 1);

        pipeline.accept(PcmFrame::new(vec![0; 100], 2));
        assert_eq!(shared.state(), EngineState::Failed);

        pipeline.accept(PcmFrame::new(vec![0; 128], 2));
        assert_eq!(shared.slot.stats().published, 1);
    }

    #[test]
    fn missing_decoder_fails_start() {
        let command = DecoderCommand::new("vinyl-visualiser-no-such-decoder", ["-"]);
        let mut engine = AudioEngine::new(small_config(), SourceKind::Stream(command));

        let err = engine.start().unwrap_err();
        assert!(err.is_source_unavailable());
        assert_eq!(engine.state(), EngineState::Failed);
        assert!(engine.try_take_latest().is_none());
        engine.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn silent_stream_runs_to_the_end() {
        let config = small_config();
        // Three whole frames of zeros.
        let bytes = (config.frame_bytes() * 3).to_string();
        let command = DecoderCommand::new("head", ["-c", bytes.as_str(), "/dev/zero"]);
        let mut engine = AudioEngine::new(config, SourceKind::Stream(command));

        let handle = engine.start().unwrap();
        assert!(wait_for(&engine, EngineState::Ended));

        assert_eq!(handle.stats().published, 3);
        let result = handle.try_take_latest().unwrap();
        assert_eq!(result.bins(), 33);
        assert!(result.magnitude.iter().all(|&m| m == 0.0));
        assert!(handle.try_take_latest().is_none());

        // Restarting after the end spawns a fresh decoder.
        engine.start().unwrap();
        assert!(wait_for(&engine, EngineState::Ended));
        assert_eq!(engine.stats().published, 6);
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Ended);
    }

    #[cfg(unix)]
    #[test]
    fn stop_releases_a_blocked_decoder() {
        let command = DecoderCommand::new("sleep", ["30"]);
        let mut engine = AudioEngine::new(small_config(), SourceKind::Stream(command));

        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        engine.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.try_take_latest().is_none());

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn stopped_pipelines_leave_the_state_alone() {
        let shared = shared();
        let config = small_config();
        let pipeline = pipeline(&config, &shared);
        pipeline.run.cancel();

        run_reader(PcmReader::new(Cursor::new(Vec::new()), 64, 2), pipeline);
        assert_eq!(shared.state(), EngineState::Running);
    }

    #[cfg(unix)]
    #[test]
    fn detached_producer_cannot_end_the_next_run() {
        // The forked `sleep` keeps stdout open after `sh` is killed, so the
        // first producer outlives the join timeout and is detached.
        let command = DecoderCommand::new("sh", ["-c", "sleep 3; true"]);
        let mut engine = AudioEngine::new(small_config(), SourceKind::Stream(command));

        engine.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.stop().unwrap();

        engine.start().unwrap();
        assert!(engine.is_running());

        // Long enough for the detached producer's pipe to close.
        thread::sleep(Duration::from_millis(1_500));
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.stats().published, 0);

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
