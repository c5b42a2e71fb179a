use std::io::ErrorKind;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::PcmReader;
use crate::{AudioConfig, Result, VisualiserError};

/// How long [`DecoderProcess::stop`] waits for the decoder to exit.
pub const DECODER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// External program that writes raw s16le PCM to its stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DecoderCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Decodes `url` with ffmpeg into headerless interleaved s16le PCM.
    pub fn ffmpeg(url: &str, sample_rate: u32, channels: u16) -> Self {
        Self::new(
            "ffmpeg",
            [
                "-i".to_string(),
                url.to_string(),
                "-f".into(),
                "s16le".into(),
                "-acodec".into(),
                "pcm_s16le".into(),
                "-ar".into(),
                sample_rate.to_string(),
                "-ac".into(),
                channels.to_string(),
                "-".into(),
            ],
        )
    }

    /// The ffmpeg command matching an audio configuration.
    pub fn for_stream(config: &AudioConfig) -> Self {
        Self::ffmpeg(&config.stream_url, config.sample_rate, config.channels)
    }
}

/// A running decoder subprocess.
///
/// The process handle stays here while its stdout is handed to the producer
/// thread as a [`PcmReader`], so `stop` can run while a read is blocked.
/// Killing the process closes the pipe and unblocks that read.
#[derive(Debug)]
pub struct DecoderProcess {
    program: String,
    child: Option<Child>,
}

impl DecoderProcess {
    pub fn spawn(
        command: &DecoderCommand,
        config: &AudioConfig,
    ) -> Result<(Self, PcmReader<ChildStdout>)> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| match source.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    VisualiserError::DecoderUnavailable {
                        program: command.program.clone(),
                        source,
                    }
                }
                _ => VisualiserError::Io(source),
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(VisualiserError::msg("decoder stdout was not captured"));
        };

        tracing::info!(program = %command.program, pid = child.id(), "decoder started");

        let reader = PcmReader::new(stdout, config.buffer_size, config.channels);
        Ok((
            Self {
                program: command.program.clone(),
                child: Some(child),
            },
            reader,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Terminates the decoder and waits up to [`DECODER_STOP_TIMEOUT`] for
    /// it to exit. Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Err(err) = child.kill() {
            // Already exited on its own.
            if err.kind() != ErrorKind::InvalidInput {
                return Err(err.into());
            }
        }

        match wait_with_timeout(&mut child, DECODER_STOP_TIMEOUT)? {
            Some(status) => {
                tracing::debug!(program = %self.program, %status, "decoder exited");
            }
            None => {
                tracing::warn!(
                    program = %self.program,
                    timeout = ?DECODER_STOP_TIMEOUT,
                    "decoder did not exit in time"
                );
            }
        }
        Ok(())
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "failed to stop decoder");
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_config(buffer_size: usize) -> AudioConfig {
        AudioConfig {
            buffer_size,
            channels: 1,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn builds_the_ffmpeg_pipeline_arguments() {
        let command = DecoderCommand::ffmpeg("http://radio.local/stream.ogg", 44_100, 2);
        assert_eq!(command.program, "ffmpeg");
        assert_eq!(
            command.args,
            [
                "-i",
                "http://radio.local/stream.ogg",
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ar",
                "44100",
                "-ac",
                "2",
                "-"
            ]
        );
    }

    #[test]
    fn missing_binary_is_reported_as_unavailable() {
        let command = DecoderCommand::new("vinyl-visualiser-no-such-decoder", Vec::<String>::new());
        let err = DecoderProcess::spawn(&command, &mono_config(16)).unwrap_err();
        assert!(err.is_source_unavailable());
    }

    #[cfg(unix)]
    #[test]
    fn reads_frames_until_the_decoder_exits() {
        // 3.5 frames of silence: three full frames and a short tail.
        let command = DecoderCommand::new("head", ["-c", "112", "/dev/zero"]);
        let (mut process, mut reader) = DecoderProcess::spawn(&command, &mono_config(16)).unwrap();

        let mut frames = 0;
        while let Some(frame) = reader.read_frame().unwrap() {
            assert_eq!(frame.frames(), 16);
            frames += 1;
        }
        assert_eq!(frames, 3);

        process.stop().unwrap();
        assert!(!process.is_running());
        process.stop().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn stop_unblocks_a_pending_read() {
        let command = DecoderCommand::new("sleep", ["30"]);
        let (mut process, mut reader) = DecoderProcess::spawn(&command, &mono_config(16)).unwrap();

        let pending = thread::spawn(move || reader.read_frame().map(|frame| frame.is_none()));
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        process.stop().unwrap();
        let ended = pending.join().unwrap().unwrap();

        assert!(ended);
        assert!(started.elapsed() < DECODER_STOP_TIMEOUT + Duration::from_secs(1));
    }
}
