use super::PcmFrame;
use crate::{AudioConfig, Result, VisualiserError};

/// Stand-in used when the crate is built without the `capture` feature.
#[derive(Debug)]
pub struct CaptureDevice {
    _private: (),
}

impl CaptureDevice {
    pub fn open<F>(_config: &AudioConfig, _on_frame: F) -> Result<Self>
    where
        F: FnMut(PcmFrame) + Send + 'static,
    {
        Err(VisualiserError::DeviceUnavailable(
            "built without the `capture` feature".into(),
        ))
    }

    pub fn channels(&self) -> u16 {
        0
    }

    pub fn is_running(&self) -> bool {
        false
    }

    pub fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
