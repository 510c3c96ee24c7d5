use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, Stream, StreamConfig};
use rtrb::RingBuffer;

use super::engine::LoopEngine;

/// Largest device callback we expect, in frames.
const MAX_BLOCK_FRAMES: usize = 8192;
/// Input ring capacity per channel; a couple of blocks of slack.
const INPUT_RING_CAPACITY: usize = MAX_BLOCK_FRAMES * 4;
/// Upper bound on engine input channels for the stack-side slice table.
const MAX_ENGINE_CHANNELS: usize = 64;

/// cpal device binding: resolves input/output devices, then bridges the
/// input callback to the engine (which runs inside the output callback)
/// through per-channel lock-free rings.
pub struct AudioStream {
    host: Host,
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_device_name: String,
    output_device_name: String,
}

impl AudioStream {
    /// Resolve devices by name, falling back to the system defaults.
    pub fn new(input_name: Option<&str>, output_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = match input_name {
            Some(name) => find_device(host.input_devices()?, name)
                .ok_or_else(|| anyhow!("Input device '{}' not found", name))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };

        let output_device = match output_name {
            Some(name) => find_device(host.output_devices()?, name)
                .ok_or_else(|| anyhow!("Output device '{}' not found", name))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?,
        };

        let input_default = input_device.default_input_config()?;
        let output_default = output_device.default_output_config()?;

        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        let input_config = StreamConfig {
            channels: input_default.channels(),
            sample_rate: input_default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: output_default.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        if input_config.sample_rate != output_config.sample_rate {
            log::warn!(
                "input rate {} Hz != output rate {} Hz; loops will play at the output rate",
                input_config.sample_rate.0,
                output_config.sample_rate.0
            );
        }

        log::info!(
            "audio devices: in '{}' ({} ch @ {} Hz), out '{}' ({} ch @ {} Hz)",
            input_device_name,
            input_config.channels,
            input_config.sample_rate.0,
            output_device_name,
            output_config.channels,
            output_config.sample_rate.0
        );

        Ok(Self {
            host,
            input_device,
            output_device,
            input_config,
            output_config,
            input_device_name,
            output_device_name,
        })
    }

    /// Sample rate the engine should run at.
    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }

    /// Enumerate device names for selection UIs.
    pub fn device_names(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut inputs = Vec::new();
        for device in self.host.input_devices()? {
            inputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
        }
        let mut outputs = Vec::new();
        for device in self.host.output_devices()? {
            outputs.push(device.name().unwrap_or_else(|_| "Unknown".to_string()));
        }
        Ok((inputs, outputs))
    }

    /// Start both streams. The engine is moved into the output callback,
    /// which becomes the audio thread; input frames travel through
    /// per-channel SPSC rings, never a lock.
    pub fn start(&self, mut engine: LoopEngine) -> Result<(Stream, Stream)> {
        let engine_channels = engine.num_input_channels().min(MAX_ENGINE_CHANNELS);
        let device_in_channels = self.input_config.channels as usize;

        let mut producers = Vec::with_capacity(engine_channels);
        let mut consumers = Vec::with_capacity(engine_channels);
        for _ in 0..engine_channels {
            let (producer, consumer) = RingBuffer::<f32>::new(INPUT_RING_CAPACITY);
            producers.push(producer);
            consumers.push(consumer);
        }

        let input_stream = self.input_device.build_input_stream(
            &self.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Deinterleave device frames into the per-channel rings.
                // Engine channels beyond the device's channel count get
                // silence; overruns drop samples rather than block.
                for frame in data.chunks(device_in_channels) {
                    for (ch, producer) in producers.iter_mut().enumerate() {
                        let sample = frame.get(ch).copied().unwrap_or(0.0);
                        let _ = producer.push(sample);
                    }
                }
            },
            |err| {
                log::error!("input stream error: {}", err);
            },
            None,
        )?;

        let out_channels = self.output_config.channels as usize;
        let mut channel_scratch = vec![vec![0.0f32; MAX_BLOCK_FRAMES]; engine_channels];
        let mut mono_out = vec![0.0f32; MAX_BLOCK_FRAMES];

        let output_stream = self.output_device.build_output_stream(
            &self.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = (data.len() / out_channels).min(MAX_BLOCK_FRAMES);

                for (ch, consumer) in consumers.iter_mut().enumerate() {
                    let scratch = &mut channel_scratch[ch][..frames];
                    for slot in scratch.iter_mut() {
                        *slot = consumer.pop().unwrap_or(0.0);
                    }
                }

                let empty: &[f32] = &[];
                let mut inputs = [empty; MAX_ENGINE_CHANNELS];
                for ch in 0..consumers.len() {
                    inputs[ch] = &channel_scratch[ch][..frames];
                }

                engine.process_block(&inputs[..consumers.len()], &mut mono_out[..frames]);

                // Fan the mono engine output out to every device channel
                for (frame_idx, frame) in data.chunks_mut(out_channels).enumerate() {
                    if frame_idx >= frames {
                        break;
                    }
                    frame.fill(mono_out[frame_idx]);
                }
            },
            |err| {
                log::error!("output stream error: {}", err);
            },
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;

        Ok((input_stream, output_stream))
    }
}

fn find_device<I>(devices: I, name: &str) -> Option<Device>
where
    I: Iterator<Item = Device>,
{
    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Some(device);
            }
        }
    }
    None
}
