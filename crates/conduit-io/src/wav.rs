//! WAV file nodes.
//!
//! - `wav.reader` ([`WavPlayer`]): generator Filter that publishes one period
//!   per run and ends the stream at end of file. File channel `i` feeds the
//!   Source of index `i`; a mono file feeds every Source.
//! - `wav.writer` ([`WavRecorder`]): Driver that interleaves its Sinks into a
//!   file, one channel per Sink. The file is finalized when the node stops.
//!
//! Both read `config.path`. The writer also reads `config.bits` (16, 24 or
//! 32; 32 writes IEEE float, the default).

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use conduit_core::{
    ActivateContext, Buffer, Config, ConfigurationError, Flow, PluginFactory, PluginKind, PluginSpec, ProcessContext,
    Processor,
};
use hound::SampleFormat;

use crate::Error;

/// Plays a WAV file into the graph.
pub struct WavPlayer {
    path: PathBuf,
    reader: Option<hound::WavReader<BufReader<File>>>,
    frames_read: u64,
}

impl std::fmt::Debug for WavPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavPlayer")
            .field("path", &self.path)
            .field("open", &self.reader.is_some())
            .field("frames_read", &self.frames_read)
            .finish_non_exhaustive()
    }
}

impl WavPlayer {
    /// A player for the file at `path`; the file is opened on activation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            frames_read: 0,
        }
    }

    /// Builds from `config.path`.
    pub fn from_config(config: &Config) -> conduit_core::Result<Self> {
        Ok(Self::new(config.require("config.path")?))
    }

    /// Frames published so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl Processor for WavPlayer {
    fn activate(&mut self, ctx: &ActivateContext<'_, '_>) -> conduit_core::Result<()> {
        let reader = hound::WavReader::open(&self.path).map_err(Error::from)?;
        let spec = reader.spec();
        if spec.sample_rate != ctx.format().sample_rate {
            tracing::warn!(
                path = %self.path.display(),
                file_rate = spec.sample_rate,
                graph_rate = ctx.format().sample_rate,
                "sample rate mismatch, playing without conversion"
            );
        }
        tracing::debug!(path = %self.path.display(), channels = spec.channels, "wav reader opened");
        self.reader = Some(reader);
        self.frames_read = 0;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> conduit_core::Result<Flow> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(Flow::EndOfStream);
        };
        let frames = ctx.format().buffer_size;
        let channels = usize::from(reader.spec().channels);
        let interleaved = read_block(reader, frames * channels)?;
        if interleaved.is_empty() {
            return Ok(Flow::EndOfStream);
        }
        let read = interleaved.len() / channels;
        self.frames_read += read as u64;

        let sources: Vec<String> = ctx.sources().map(str::to_owned).collect();
        for (index, source) in sources.iter().enumerate() {
            let channel = index.min(channels - 1);
            let mut samples: Vec<f32> = interleaved.iter().skip(channel).step_by(channels).copied().collect();
            samples.resize(frames, 0.0);
            ctx.publish(source, Buffer::from_vec(samples))?;
        }
        Ok(Flow::Continue)
    }

    fn stop(&mut self) {
        self.reader = None;
        tracing::debug!(path = %self.path.display(), frames = self.frames_read, "wav reader closed");
    }
}

/// Reads up to `samples` interleaved samples, scaled to `[-1, 1]`.
fn read_block(reader: &mut hound::WavReader<BufReader<File>>, samples: usize) -> conduit_core::Result<Vec<f32>> {
    let spec = reader.spec();
    let block = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .take(samples)
            .collect::<std::result::Result<Vec<_>, _>>(),
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(samples)
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    };
    block.map_err(|err| Error::from(err).into())
}

/// Records the graph into a WAV file.
pub struct WavRecorder {
    path: PathBuf,
    bits_per_sample: u16,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    frames_written: u64,
    interleaved: Vec<f32>,
}

impl std::fmt::Debug for WavRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRecorder")
            .field("path", &self.path)
            .field("bits_per_sample", &self.bits_per_sample)
            .field("open", &self.writer.is_some())
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

impl WavRecorder {
    /// A recorder writing `bits_per_sample` samples to `path`, created on
    /// activation.
    pub fn new(path: impl Into<PathBuf>, bits_per_sample: u16) -> conduit_core::Result<Self> {
        if !matches!(bits_per_sample, 16 | 24 | 32) {
            return Err(ConfigurationError::InvalidValue {
                key: "config.bits".into(),
                value: bits_per_sample.to_string(),
                reason: "expected 16, 24 or 32".into(),
            }
            .into());
        }
        Ok(Self {
            path: path.into(),
            bits_per_sample,
            writer: None,
            frames_written: 0,
            interleaved: Vec::new(),
        })
    }

    /// Builds from `config.path` and `config.bits`.
    pub fn from_config(config: &Config) -> conduit_core::Result<Self> {
        Self::new(config.require("config.path")?, config.parse_or("config.bits", 32u16)?)
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn write(&mut self) -> crate::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if self.bits_per_sample == 32 {
            for &sample in &self.interleaved {
                writer.write_sample(sample)?;
            }
        } else {
            let max_val = (1i32 << (self.bits_per_sample - 1)) as f32;
            for &sample in &self.interleaved {
                writer.write_sample((sample * max_val).clamp(-max_val, max_val - 1.0) as i32)?;
            }
        }
        Ok(())
    }
}

impl Processor for WavRecorder {
    fn activate(&mut self, ctx: &ActivateContext<'_, '_>) -> conduit_core::Result<()> {
        let channels = ctx.sinks().count();
        if channels == 0 {
            return Err(Error::Unsupported(format!("{} has no sinks to record", ctx.node_name())).into());
        }
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate: ctx.format().sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: if self.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        };
        self.writer = Some(hound::WavWriter::create(&self.path, spec).map_err(Error::from)?);
        self.frames_written = 0;
        tracing::debug!(path = %self.path.display(), channels, "wav writer created");
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> conduit_core::Result<Flow> {
        let sinks: Vec<String> = ctx.sinks().map(str::to_owned).collect();
        let mut inputs = Vec::with_capacity(sinks.len());
        for sink in &sinks {
            inputs.push(ctx.input(sink)?);
        }
        let frames = inputs.iter().flatten().map(Buffer::len).max().unwrap_or(0);

        self.interleaved.clear();
        self.interleaved.resize(frames * inputs.len(), 0.0);
        for (channel, input) in inputs.iter().enumerate() {
            let Some(buffer) = input else { continue };
            for (frame, sample) in buffer.samples().iter().enumerate() {
                self.interleaved[frame * inputs.len() + channel] = *sample;
            }
        }
        self.write()?;
        self.frames_written += frames as u64;
        Ok(Flow::Continue)
    }

    fn stop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        match writer.finalize() {
            Ok(()) => tracing::info!(path = %self.path.display(), frames = self.frames_written, "wav file written"),
            Err(err) => tracing::error!(path = %self.path.display(), error = %err, "failed to finalize wav file"),
        }
    }
}

/// Registers `wav.reader` and `wav.writer`.
pub fn register_wav(factory: &mut PluginFactory) {
    factory.register(
        "wav.reader",
        PluginKind::Filter,
        "plays a WAV file, then ends the stream: config.path",
        |config, _| Ok(PluginSpec::new(PluginKind::Filter, WavPlayer::from_config(config)?)),
    );
    factory.register(
        "wav.writer",
        PluginKind::Driver,
        "records its sinks to a WAV file: config.path, config.bits",
        |config, _| Ok(PluginSpec::new(PluginKind::Driver, WavRecorder::from_config(config)?)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_rejects_odd_bit_depths() {
        let err = WavRecorder::new("out.wav", 12).unwrap_err();
        assert!(err.is_configuration());
        assert!(WavRecorder::new("out.wav", 24).is_ok());
    }

    #[test]
    fn nodes_require_a_path() {
        assert!(WavPlayer::from_config(&Config::new()).unwrap_err().is_configuration());
        assert!(WavRecorder::from_config(&Config::new()).unwrap_err().is_configuration());
        let recorder = WavRecorder::from_config(&Config::new().with("config.path", "x.wav")).unwrap();
        assert_eq!(recorder.bits_per_sample, 32);
    }
}
