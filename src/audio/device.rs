//! cpal glue that drives the engine from real hardware.
//!
//! cpal has no duplex callback, so the input stream pushes interleaved
//! samples into a lock-free SPSC ring and the output callback pops them,
//! deinterleaves into channel-major scratch, runs the engine block, and
//! reinterleaves into the device buffer. Streams are intentionally leaked so
//! they live for the process lifetime. Input capture is best-effort: a
//! missing or unreadable input device leaves the engine running output-only.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::box_node::MAX_BLOCK_FRAMES;
use super::engine::TransportEngine;

/// Hardware input channels forwarded to the engine.
const MAX_INPUT_CHANNELS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 512,
        }
    }
}

/// Resolve one device for `role`: the named one if it exists, else the host
/// default. Works for either direction; the caller passes the matching
/// candidate set.
fn resolve_device<I>(
    requested: Option<&str>,
    role: &str,
    default: Option<cpal::Device>,
    candidates: Result<I, cpal::DevicesError>,
) -> Result<cpal::Device, String>
where
    I: Iterator<Item = cpal::Device>,
{
    let Some(wanted) = requested else {
        return default.ok_or_else(|| format!("no default {} device", role));
    };
    let devices =
        candidates.map_err(|e| format!("cannot enumerate {} devices: {}", role, e))?;
    for device in devices {
        if matches!(device.name(), Ok(name) if name == wanted) {
            return Ok(device);
        }
    }
    Err(format!("{} device '{}' is not present", role, wanted))
}

/// Stream shape for the output side: the requested rate and channel count
/// when the device can do them, otherwise whatever the device prefers.
fn output_stream_config(
    device: &cpal::Device,
    wanted: &AudioConfig,
) -> Result<cpal::StreamConfig, String> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| format!("cannot query output formats: {}", e))?;
    let fits = supported.into_iter().any(|range| {
        range.channels() >= wanted.channels
            && (range.min_sample_rate().0..=range.max_sample_rate().0)
                .contains(&wanted.sample_rate)
    });
    if fits {
        return Ok(cpal::StreamConfig {
            channels: wanted.channels,
            sample_rate: cpal::SampleRate(wanted.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(wanted.buffer_size),
        });
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| format!("cannot query output formats: {}", e))?;
    log::warn!(
        "Output device cannot do {} Hz / {} channels; using its preferred format",
        wanted.sample_rate,
        wanted.channels
    );
    Ok(cpal::StreamConfig {
        channels: fallback.channels().min(2),
        sample_rate: fallback.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}

/// Open the capture stream at the device's native rate (forcing another rate
/// fights CoreAudio duplex devices), publish the per-channel names the
/// command surface reports, and leave the stream running. Returns the number
/// of channels feeding the ring.
fn attach_input(
    engine: &TransportEngine,
    device: cpal::Device,
    mut into_ring: ringbuf::HeapProd<f32>,
) -> Result<usize, String> {
    let format = device
        .default_input_config()
        .map_err(|e| format!("cannot query input format: {}", e))?;
    let channels = (format.channels() as usize).min(MAX_INPUT_CHANNELS).max(1);
    let stream_config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: format.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let label = device.name().unwrap_or_else(|_| "Input".to_string());
    engine.set_input_names((1..=channels).map(|n| format!("{} {}", label, n)).collect());

    log::info!(
        "Input stream: '{}', {} Hz, {} channels",
        label,
        stream_config.sample_rate.0,
        channels
    );

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Drop samples if the ring is full; the output side pads
                // with silence on underrun.
                for &sample in data {
                    let _ = into_ring.try_push(sample);
                }
            },
            move |err| {
                log::error!("Input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("cannot open input stream: {}", e))?;
    stream
        .play()
        .map_err(|e| format!("cannot start input stream: {}", e))?;
    std::mem::forget(stream);
    Ok(channels)
}

/// Open the input and output streams and wire them to the engine. Both
/// streams are leaked and keep running until process exit.
pub fn start_audio(
    engine: Arc<TransportEngine>,
    config: &AudioConfig,
    input_name: Option<&str>,
    output_name: Option<&str>,
) -> Result<(), String> {
    let host = cpal::default_host();

    let output_device = resolve_device(
        output_name,
        "output",
        host.default_output_device(),
        host.output_devices(),
    )?;
    let output_config = output_stream_config(&output_device, config)?;
    let out_channels = (output_config.channels as usize).max(1);
    let sample_rate = output_config.sample_rate.0;

    if (sample_rate as f64 - engine.sample_rate()).abs() > f64::EPSILON {
        log::warn!(
            "Device runs at {} Hz but the engine was built for {} Hz",
            sample_rate,
            engine.sample_rate()
        );
    }

    // Ring sized for ~100ms of interleaved input, 3x for timing jitter.
    let ring_capacity = ((sample_rate as usize / 10) * MAX_INPUT_CHANNELS * 3).max(1024);
    let (producer, mut consumer) = HeapRb::<f32>::new(ring_capacity).split();

    let input_device = resolve_device(
        input_name,
        "input",
        host.default_input_device(),
        host.input_devices(),
    );
    let in_channels = match input_device.and_then(|device| attach_input(&engine, device, producer))
    {
        Ok(channels) => channels,
        Err(e) => {
            log::warn!("No input capture: {}", e);
            engine.set_input_names(Vec::new());
            0
        }
    };

    let output_latency = match output_config.buffer_size {
        cpal::BufferSize::Fixed(frames) => frames as i64,
        cpal::BufferSize::Default => 0,
    };
    engine.set_latency(0, output_latency);

    log::info!(
        "Output stream: {} Hz, {} channels",
        sample_rate,
        out_channels
    );

    // Preallocated so the callback never touches the allocator.
    let mut in_interleaved = vec![0.0f32; MAX_BLOCK_FRAMES * MAX_INPUT_CHANNELS];
    let mut in_planar = vec![0.0f32; MAX_BLOCK_FRAMES * MAX_INPUT_CHANNELS];
    let mut out_planar = vec![0.0f32; MAX_BLOCK_FRAMES * out_channels];

    let output_stream = output_device
        .build_output_stream(
            &output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames_total = data.len() / out_channels;
                let mut offset = 0usize;
                while offset < frames_total {
                    let frames = (frames_total - offset).min(MAX_BLOCK_FRAMES);

                    let mut refs: [&[f32]; MAX_INPUT_CHANNELS] = [&[]; MAX_INPUT_CHANNELS];
                    if in_channels > 0 {
                        let want = frames * in_channels;
                        let got = consumer.pop_slice(&mut in_interleaved[..want]);
                        in_interleaved[got..want].fill(0.0);
                        for ch in 0..in_channels {
                            for i in 0..frames {
                                in_planar[ch * frames + i] =
                                    in_interleaved[i * in_channels + ch];
                            }
                        }
                        let mut rest: &[f32] = &in_planar[..want];
                        for slot in refs.iter_mut().take(in_channels) {
                            let (head, tail) = rest.split_at(frames);
                            *slot = head;
                            rest = tail;
                        }
                    }

                    engine.on_block(
                        &refs[..in_channels],
                        &mut out_planar[..frames * out_channels],
                        out_channels,
                        frames,
                    );

                    for i in 0..frames {
                        for ch in 0..out_channels {
                            data[(offset + i) * out_channels + ch] = out_planar[ch * frames + i];
                        }
                    }
                    offset += frames;
                }
            },
            move |err| {
                log::error!("Output stream error: {}", err);
            },
            None,
        )
        .map_err(|e| format!("cannot open output stream: {}", e))?;
    output_stream
        .play()
        .map_err(|e| format!("cannot start output stream: {}", e))?;
    std::mem::forget(output_stream);

    log::info!("Audio streams running");
    Ok(())
}
