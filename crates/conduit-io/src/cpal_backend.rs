//! cpal-based hardware backend.
//!
//! [`CpalBackend`] wraps [cpal](https://crates.io/crates/cpal) (ALSA,
//! CoreAudio, WASAPI, ...). A driver with Sinks gets an output stream whose
//! callback runs the handoff; if it also has Sources, an input stream feeds
//! captured frames to that callback through a bounded channel. A capture-only
//! driver runs the handoff from the input callback.

use std::collections::VecDeque;

use conduit_core::DriverPort;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host};
use crossbeam_channel::{Receiver, Sender};

use crate::backend::{AudioDevice, BackendConfig, HardwareBackend, StreamHandle};
use crate::{Error, Result};

/// Captured chunks buffered between the input and output callbacks.
const CAPTURE_QUEUE: usize = 8;

pub(crate) fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// cpal-based hardware backend using the platform's default host.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Create a backend on the default audio host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        Self { host }
    }

    fn find_output_device(&self, name: Option<&str>) -> Result<Device> {
        match name {
            Some(search) => {
                let devices = self
                    .host
                    .output_devices()
                    .map_err(|e| Error::Stream(e.to_string()))?;
                find_by_name(devices, search)
                    .ok_or_else(|| Error::DeviceNotFound(format!("no output device matching '{search}'")))
            }
            None => self.host.default_output_device().ok_or(Error::NoDevice),
        }
    }

    fn find_input_device(&self, name: Option<&str>) -> Result<Device> {
        match name {
            Some(search) => {
                let devices = self
                    .host
                    .input_devices()
                    .map_err(|e| Error::Stream(e.to_string()))?;
                find_by_name(devices, search)
                    .ok_or_else(|| Error::DeviceNotFound(format!("no input device matching '{search}'")))
            }
            None => self.host.default_input_device().ok_or(Error::NoDevice),
        }
    }

    fn open_duplex(&self, config: &BackendConfig, mut port: DriverPort) -> Result<StreamHandle> {
        let capture_channels = usize::from(config.capture_channels);
        let playback_channels = usize::from(config.playback_channels);

        let (input_stream, receiver) = if capture_channels > 0 {
            let (sender, receiver) = crossbeam_channel::bounded(CAPTURE_QUEUE);
            (Some(self.capture_into(config, sender)?), Some(receiver))
        } else {
            (None, None)
        };

        let device = self.find_output_device(config.device_name.as_deref())?;
        let stream_config = stream_config(config, config.playback_channels);
        let node = port.node().name().to_string();
        let mut pending = VecDeque::with_capacity(capture_channels * config.buffer_size as usize * 2);
        let mut input = Vec::with_capacity(capture_channels * config.buffer_size as usize);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / playback_channels;
                    if let Some(receiver) = &receiver {
                        fill_input(receiver, &mut pending, &mut input, frames * capture_channels);
                    }
                    port.process(&input, data, frames);
                },
                move |err| {
                    tracing::error!(node = %node, error = %err, "output stream error");
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(
            playback = config.playback_channels,
            capture = config.capture_channels,
            sample_rate = config.sample_rate,
            "output stream started"
        );
        Ok(StreamHandle::new((stream, input_stream)))
    }

    fn capture_into(&self, config: &BackendConfig, sender: Sender<Vec<f32>>) -> Result<cpal::Stream> {
        let device = self.find_input_device(config.device_name.as_deref())?;
        let stream = device
            .build_input_stream(
                &stream_config(config, config.capture_channels),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if sender.try_send(data.to_vec()).is_err() {
                        tracing::warn!(samples = data.len(), "capture queue full, dropping input");
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "input stream error");
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(channels = config.capture_channels, sample_rate = config.sample_rate, "input stream started");
        Ok(stream)
    }

    fn open_capture_only(&self, config: &BackendConfig, mut port: DriverPort) -> Result<StreamHandle> {
        let device = self.find_input_device(config.device_name.as_deref())?;
        let channels = usize::from(config.capture_channels);
        let node = port.node().name().to_string();
        let stream = device
            .build_input_stream(
                &stream_config(config, config.capture_channels),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let frames = data.len() / channels;
                    let mut output: [f32; 0] = [];
                    port.process(data, &mut output, frames);
                },
                move |err| {
                    tracing::error!(node = %node, error = %err, "input stream error");
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;
        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(channels = config.capture_channels, sample_rate = config.sample_rate, "input stream started");
        Ok(StreamHandle::new(stream))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn list_devices(&self) -> Result<Vec<AudioDevice>> {
        let mut devices: Vec<AudioDevice> = Vec::new();

        if let Ok(inputs) = self.host.input_devices() {
            for device in inputs {
                if let Ok(name) = device_name(&device) {
                    devices.push(AudioDevice {
                        name,
                        is_input: true,
                        is_output: device.default_output_config().is_ok(),
                        default_sample_rate: device.default_input_config().map(|c| c.sample_rate()).ok(),
                    });
                }
            }
        }

        if let Ok(outputs) = self.host.output_devices() {
            for device in outputs {
                if let Ok(name) = device_name(&device) {
                    if let Some(known) = devices.iter_mut().find(|d| d.name == name) {
                        known.is_output = true;
                        continue;
                    }
                    devices.push(AudioDevice {
                        name,
                        is_input: false,
                        is_output: true,
                        default_sample_rate: device.default_output_config().map(|c| c.sample_rate()).ok(),
                    });
                }
            }
        }

        Ok(devices)
    }

    fn open(&self, config: &BackendConfig, port: DriverPort) -> Result<StreamHandle> {
        match (config.playback_channels, config.capture_channels) {
            (0, 0) => Err(Error::Unsupported(format!(
                "driver '{}' has no sources or sinks",
                port.node().name()
            ))),
            (0, _) => self.open_capture_only(config, port),
            _ => self.open_duplex(config, port),
        }
    }
}

fn find_by_name(devices: impl IntoIterator<Item = Device>, search: &str) -> Option<Device> {
    let search = search.to_lowercase();
    devices.into_iter().find(|device| {
        device_name(device).is_ok_and(|name| name.to_lowercase().contains(search.as_str()))
    })
}

fn stream_config(config: &BackendConfig, channels: u16) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels,
        sample_rate: config.sample_rate,
        buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
    }
}

/// Assembles `samples` captured samples into `input`, padding with silence
/// when the input stream is behind.
fn fill_input(receiver: &Receiver<Vec<f32>>, pending: &mut VecDeque<f32>, input: &mut Vec<f32>, samples: usize) {
    while pending.len() < samples {
        match receiver.try_recv() {
            Ok(chunk) => pending.extend(chunk),
            Err(_) => break,
        }
    }
    input.clear();
    let available = samples.min(pending.len());
    input.extend(pending.drain(..available));
    input.resize(samples, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpal_backend_name() {
        assert_eq!(CpalBackend::new().name(), "cpal");
    }

    #[test]
    fn cpal_backend_list_devices() {
        // Device availability depends on the system; enumeration must not fail.
        assert!(CpalBackend::new().list_devices().is_ok());
    }

    #[test]
    fn input_is_padded_when_capture_lags() {
        let (sender, receiver) = crossbeam_channel::bounded(CAPTURE_QUEUE);
        sender.send(vec![1.0, 2.0, 3.0]).unwrap();
        let mut pending = VecDeque::new();
        let mut input = Vec::new();
        fill_input(&receiver, &mut pending, &mut input, 4);
        assert_eq!(input, [1.0, 2.0, 3.0, 0.0]);

        sender.send(vec![4.0, 5.0, 6.0]).unwrap();
        fill_input(&receiver, &mut pending, &mut input, 2);
        assert_eq!(input, [4.0, 5.0]);
        assert_eq!(pending, [6.0]);
    }
}
