//! cpal-backed duplex audio engine
//!
//! Owns the physical input and output streams and bridges them to the
//! [`AudioChannel`] arbiter: captured samples are framed and fed in,
//! queued output frames are pulled and played. When the hardware refuses
//! the channel's sample rate the engine negotiates the device default and
//! resamples both directions.

use std::collections::VecDeque;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};

use crate::config::AudioSettings;
use crate::{Error, Result};

use super::channel::AudioChannel;
use super::frame::AudioFrame;

/// Drives the physical device pair for an [`AudioChannel`].
///
/// Dropping the engine stops both streams; the channel itself keeps
/// working (tests feed it directly).
pub struct AudioEngine {
    _input_stream: Stream,
    _output_stream: Stream,
}

impl AudioEngine {
    /// Open the default input and output devices and start streaming.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no device is available or no usable
    /// stream configuration can be negotiated.
    pub fn start(channel: &AudioChannel, settings: &AudioSettings) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let input_stream = build_input_stream(&input_device, channel, settings)?;
        let output_stream = build_output_stream(&output_device, channel, settings)?;

        input_stream
            .play()
            .map_err(|e| Error::Device(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| Error::Device(e.to_string()))?;

        tracing::info!(
            input = input_device.name().unwrap_or_default(),
            output = output_device.name().unwrap_or_default(),
            sample_rate = settings.sample_rate,
            "audio engine started"
        );

        Ok(Self {
            _input_stream: input_stream,
            _output_stream: output_stream,
        })
    }
}

/// Pick an input config, preferring mono at the wanted rate, falling back
/// to the device default. Returns the config and its actual sample rate.
fn negotiate_input(
    device: &cpal::Device,
    want_rate: u32,
) -> Result<(StreamConfig, u32)> {
    let exact = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(want_rate)
                && c.max_sample_rate() >= SampleRate(want_rate)
        });

    if let Some(supported) = exact {
        let config = supported.with_sample_rate(SampleRate(want_rate)).config();
        return Ok((config, want_rate));
    }

    let default = device
        .default_input_config()
        .map_err(|e| Error::Device(e.to_string()))?;
    let rate = default.sample_rate().0;
    tracing::debug!(
        hardware_rate = rate,
        want_rate,
        "input device lacks wanted rate, resampling"
    );
    Ok((default.config(), rate))
}

/// Pick an output config: mono at the wanted rate, then stereo, then the
/// device default.
fn negotiate_output(
    device: &cpal::Device,
    want_rate: u32,
) -> Result<(StreamConfig, u32)> {
    for channels in [1u16, 2] {
        let found = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(want_rate)
                    && c.max_sample_rate() >= SampleRate(want_rate)
            });
        if let Some(supported) = found {
            let config = supported.with_sample_rate(SampleRate(want_rate)).config();
            return Ok((config, want_rate));
        }
    }

    let default = device
        .default_output_config()
        .map_err(|e| Error::Device(e.to_string()))?;
    let rate = default.sample_rate().0;
    tracing::debug!(
        hardware_rate = rate,
        want_rate,
        "output device lacks wanted rate, resampling"
    );
    Ok((default.config(), rate))
}

#[allow(clippy::cast_possible_truncation)]
fn build_input_stream(
    device: &cpal::Device,
    channel: &AudioChannel,
    settings: &AudioSettings,
) -> Result<Stream> {
    let (config, hw_rate) = negotiate_input(device, settings.sample_rate)?;
    let in_channels = usize::from(config.channels);
    let channel_scale = f32::from(config.channels);
    let frame_samples = settings.frame_samples();
    let channel_rate = settings.sample_rate;
    let gain = settings.input_gain;

    let mut resampler = if hw_rate == channel_rate {
        None
    } else {
        Some(StreamResampler::new(hw_rate, channel_rate)?)
    };
    let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

    let feed = channel.clone();
    let fault = channel.clone();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Mix down to mono and apply gain
                let mut mono: Vec<f32> = Vec::with_capacity(data.len() / in_channels);
                for chunk in data.chunks(in_channels) {
                    let sum: f32 = chunk.iter().sum();
                    mono.push((sum / channel_scale) * gain);
                }

                match &mut resampler {
                    Some(r) => {
                        if let Err(e) = r.push(&mono, &mut pending) {
                            feed.fault(format!("input resample failed: {e}"));
                            return;
                        }
                    }
                    None => pending.extend_from_slice(&mono),
                }

                while pending.len() >= frame_samples {
                    let rest = pending.split_off(frame_samples);
                    let samples: Vec<i16> = pending
                        .iter()
                        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                        .collect();
                    pending = rest;
                    feed.feed(AudioFrame::new(samples, channel_rate));
                }
            },
            move |err| {
                fault.fault(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    Ok(stream)
}

#[allow(clippy::cast_possible_truncation)]
fn build_output_stream(
    device: &cpal::Device,
    channel: &AudioChannel,
    settings: &AudioSettings,
) -> Result<Stream> {
    let (config, hw_rate) = negotiate_output(device, settings.sample_rate)?;
    let out_channels = usize::from(config.channels);
    let channel_rate = settings.sample_rate;

    let mut resampler = if hw_rate == channel_rate {
        None
    } else {
        Some(StreamResampler::new(channel_rate, hw_rate)?)
    };
    let mut ring: VecDeque<f32> = VecDeque::new();
    let mut ring_gen: u64 = 0;

    let source = channel.clone();
    let fault = channel.clone();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // A flush invalidates samples pulled before it
                let current = source.flush_gen();
                if current != ring_gen {
                    ring.clear();
                    ring_gen = current;
                }

                for frame in data.chunks_mut(out_channels) {
                    if ring.is_empty() {
                        match source.try_pop_output() {
                            Some((pulled, generation)) => {
                                ring_gen = generation;
                                let floats: Vec<f32> = pulled
                                    .samples
                                    .iter()
                                    .map(|&s| f32::from(s) / 32768.0)
                                    .collect();
                                match &mut resampler {
                                    Some(r) => {
                                        let mut out = Vec::new();
                                        if let Err(e) = r.push(&floats, &mut out) {
                                            source.fault(format!(
                                                "output resample failed: {e}"
                                            ));
                                            return;
                                        }
                                        ring.extend(out);
                                    }
                                    None => ring.extend(floats),
                                }
                            }
                            None => {
                                source.output_idle();
                            }
                        }
                    }

                    let sample = ring.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            move |err| {
                fault.fault(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    Ok(stream)
}

/// Streaming mono resampler over rubato's fixed-input FFT resampler.
///
/// Input is buffered into the fixed chunk size rubato requires; whole
/// chunks are converted as they fill. The sub-chunk remainder stays
/// buffered for the next push, which for continuous streams means no
/// audio is lost, only delayed by under a chunk.
pub(crate) struct StreamResampler {
    inner: FftFixedIn<f64>,
    buffered: Vec<f64>,
}

/// rubato fixed input chunk size
const RESAMPLE_CHUNK: usize = 1024;

impl StreamResampler {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = FftFixedIn::<f64>::new(
            from_rate as usize,
            to_rate as usize,
            RESAMPLE_CHUNK,
            2,
            1,
        )
        .map_err(|e| Error::Device(format!("resampler init failed: {e}")))?;
        Ok(Self {
            inner,
            buffered: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Push samples through, appending converted output to `out`.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.buffered.extend(samples.iter().map(|&s| f64::from(s)));
        while self.buffered.len() >= RESAMPLE_CHUNK {
            let rest = self.buffered.split_off(RESAMPLE_CHUNK);
            let chunk = std::mem::replace(&mut self.buffered, rest);
            let result = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Device(format!("resample failed: {e}")))?;
            out.extend(result[0].iter().map(|&s| s as f32));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resampler_halves_sample_count_at_double_rate() {
        let mut resampler = StreamResampler::new(48_000, 24_000).unwrap();
        let input = vec![0.5f32; RESAMPLE_CHUNK * 4];
        let mut out = Vec::new();
        resampler.push(&input, &mut out).unwrap();
        // 4 chunks in, roughly half the samples out
        let expected = RESAMPLE_CHUNK * 2;
        assert!(out.len().abs_diff(expected) <= RESAMPLE_CHUNK);
    }

    #[test]
    fn resampler_buffers_partial_chunks() {
        let mut resampler = StreamResampler::new(48_000, 24_000).unwrap();
        let mut out = Vec::new();
        resampler.push(&[0.1f32; 100], &mut out).unwrap();
        assert!(out.is_empty());
        resampler
            .push(&[0.1f32; RESAMPLE_CHUNK], &mut out)
            .unwrap();
        assert!(!out.is_empty());
    }
}
