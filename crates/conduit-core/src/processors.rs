//! Builtin processors.
//!
//! Small, allocation-light processing steps used by the builtin plugin types
//! and by tests. Each operates on whole buffers; Sinks and Sources are paired
//! by their sorted position.

use std::f32::consts::TAU;

use crate::buffer::{Buffer, StreamFormat};
use crate::config::Config;
use crate::error::{ConfigurationError, Result};
use crate::plugin::{Flow, ProcessContext, Processor};

/// Forwards each Sink's buffer unchanged to the Source at the same index.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Processor for Passthrough {
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        let pairs = paired(ctx);
        for (sink, source) in pairs {
            if let Some(buffer) = ctx.input(&sink)? {
                ctx.publish(&source, buffer)?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Multiplies each Sink by a constant and publishes on the paired Source.
#[derive(Debug, Clone, Copy)]
pub struct Gain {
    gain: f32,
}

impl Gain {
    /// Linear gain factor.
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    /// Reads `config.gain` (linear, `%` or `dB`), defaulting to unity.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.param("config.gain")?.unwrap_or(1.0)))
    }

    /// Current linear gain.
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Processor for Gain {
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        for (sink, source) in paired(ctx) {
            if let Some(input) = ctx.input(&sink)? {
                let scaled: Vec<f32> = input.samples().iter().map(|s| s * self.gain).collect();
                ctx.publish(&source, Buffer::from_vec(scaled))?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Sums every Sink and publishes the mix on every Source.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mixer;

impl Processor for Mixer {
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        let sinks: Vec<String> = ctx.sinks().map(str::to_owned).collect();
        let mut mix: Vec<f32> = Vec::new();
        for sink in &sinks {
            let Some(input) = ctx.input(sink)? else {
                continue;
            };
            if mix.len() < input.len() {
                mix.resize(input.len(), 0.0);
            }
            for (acc, sample) in mix.iter_mut().zip(input.samples()) {
                *acc += sample;
            }
        }
        ctx.publish_all(&Buffer::from_vec(mix))?;
        Ok(Flow::Continue)
    }
}

/// Sine generator. Runs as a Filter without Sinks: every time its Sources
/// are clear it publishes one block, and after `blocks` blocks (if set) it
/// reports end of stream.
#[derive(Debug, Clone)]
pub struct Tone {
    frequency: f32,
    amplitude: f32,
    blocks: Option<u64>,
    produced: u64,
    phase: f32,
    phase_inc: f32,
    buffer_size: usize,
}

impl Tone {
    /// A tone at `frequency` Hz.
    pub fn new(frequency: f32, amplitude: f32, format: &StreamFormat) -> Self {
        Self {
            frequency,
            amplitude,
            blocks: None,
            produced: 0,
            phase: 0.0,
            phase_inc: frequency / format.sample_rate as f32,
            buffer_size: format.buffer_size,
        }
    }

    /// Stops after `blocks` buffers.
    pub fn with_blocks(mut self, blocks: u64) -> Self {
        self.blocks = Some(blocks);
        self
    }

    /// Reads `config.frequency` (default 440 Hz), `config.amplitude`
    /// (default 0.5) and `config.blocks` (default unlimited).
    pub fn from_config(config: &Config, format: &StreamFormat) -> Result<Self> {
        let frequency = config.param("config.frequency")?.unwrap_or(440.0);
        let nyquist = format.sample_rate as f32 / 2.0;
        if !(frequency > 0.0 && frequency < nyquist) {
            return Err(ConfigurationError::InvalidValue {
                key: "config.frequency".into(),
                value: frequency.to_string(),
                reason: format!("must be between 0 and {nyquist} Hz"),
            }
            .into());
        }
        let amplitude = config.param("config.amplitude")?.unwrap_or(0.5);
        let mut tone = Self::new(frequency, amplitude, format);
        if let Some(blocks) = config.parse::<u64>("config.blocks")? {
            tone = tone.with_blocks(blocks);
        }
        Ok(tone)
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Blocks produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn render(&mut self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.buffer_size);
        for _ in 0..self.buffer_size {
            samples.push(self.amplitude * (TAU * self.phase).sin());
            self.phase += self.phase_inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
        samples
    }
}

impl Processor for Tone {
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        if self.blocks.is_some_and(|blocks| self.produced >= blocks) {
            return Ok(Flow::EndOfStream);
        }
        let block = Buffer::from_vec(self.render());
        ctx.publish_all(&block)?;
        self.produced += 1;
        Ok(Flow::Continue)
    }
}

/// Consumes its Sinks and discards the data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink {
    buffers: u64,
    frames: u64,
}

impl NullSink {
    /// Buffers consumed so far.
    pub fn buffers(&self) -> u64 {
        self.buffers
    }
}

impl Processor for NullSink {
    fn process(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<Flow> {
        let sinks: Vec<String> = ctx.sinks().map(str::to_owned).collect();
        for sink in &sinks {
            if let Some(buffer) = ctx.input(sink)? {
                self.buffers += 1;
                self.frames += buffer.len() as u64;
            }
        }
        Ok(Flow::Continue)
    }

    fn stop(&mut self) {
        tracing::debug!(buffers = self.buffers, frames = self.frames, "null sink stopped");
    }
}

/// Sink/Source name pairs by sorted position.
fn paired(ctx: &ProcessContext<'_, '_>) -> Vec<(String, String)> {
    ctx.sinks()
        .zip(ctx.sources())
        .map(|(sink, source)| (sink.to_owned(), source.to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_renders_one_block_of_the_requested_length() {
        let format = StreamFormat {
            sample_rate: 48000,
            buffer_size: 64,
        };
        let mut tone = Tone::new(1000.0, 1.0, &format);
        let block = tone.render();
        assert_eq!(block.len(), 64);
        assert_eq!(block[0], 0.0);
        // Quarter period of 1 kHz at 48 kHz is 12 samples.
        assert!((block[12] - 1.0).abs() < 1e-4);
        assert!(block.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn tone_config_validates_frequency() {
        let format = StreamFormat::default();
        let ok = Tone::from_config(&Config::new().with("config.frequency", "1kHz"), &format).unwrap();
        assert_eq!(ok.frequency(), 1000.0);
        let err = Tone::from_config(&Config::new().with("config.frequency", "30kHz"), &format);
        assert!(err.is_err());
    }

    #[test]
    fn gain_reads_decibels() {
        let gain = Gain::from_config(&Config::new().with("config.gain", "-6dB")).unwrap();
        assert!((gain.gain() - 0.501).abs() < 0.01);
        assert_eq!(Gain::from_config(&Config::new()).unwrap().gain(), 1.0);
    }
}
