//! Output PCM format.
//!
//! [`AudioFormat`] is the only "wire format" of the engine: the resampler writes
//! bytes in this layout and the hardware callback reads them back. It is chosen once,
//! from the output device configuration, and never changes afterwards.

use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Sample encoding of the output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    Signed16,
    Float32,
}

impl SampleFormat {
    /// Size of one sample in bytes.
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::Signed16 => 2,
            SampleFormat::Float32 => 4,
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host CPU.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Fixed PCM layout expected by the output device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub byte_order: ByteOrder,
}

impl AudioFormat {
    /// Build a format using the host byte order.
    pub fn native(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
            byte_order: ByteOrder::native(),
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes()
    }

    /// Bytes in one frame (one sample for every channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Whole frames covering `duration`, rounded down.
    pub fn frames_for_duration(&self, duration: Duration) -> u64 {
        let frames = duration.as_nanos() * self.sample_rate as u128 / NANOS_PER_SEC;
        u64::try_from(frames).unwrap_or(u64::MAX)
    }

    /// Frame-aligned byte count covering `duration`.
    pub fn bytes_for_duration(&self, duration: Duration) -> usize {
        self.bytes_for_frames(self.frames_for_duration(duration))
    }

    pub fn bytes_for_frames(&self, frames: u64) -> usize {
        usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.bytes_per_frame())
    }

    pub fn frames_for_bytes(&self, bytes: usize) -> u64 {
        match self.bytes_per_frame() {
            0 => 0,
            bpf => (bytes / bpf) as u64,
        }
    }

    /// Playback time represented by `bytes`.
    pub fn duration_for_bytes(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.frames_for_bytes(bytes) as u128;
        let nanos = frames * NANOS_PER_SEC / self.sample_rate as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Write one `f32` sample into `out` (exactly `bytes_per_sample` long).
    ///
    /// Signed 16-bit output is clamped to `[-1.0, 1.0]` before quantising.
    pub fn encode_sample(&self, sample: f32, out: &mut [u8]) {
        match self.sample_format {
            SampleFormat::Signed16 => {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                let bytes = match self.byte_order {
                    ByteOrder::Little => v.to_le_bytes(),
                    ByteOrder::Big => v.to_be_bytes(),
                };
                out[..2].copy_from_slice(&bytes);
            }
            SampleFormat::Float32 => {
                let bytes = match self.byte_order {
                    ByteOrder::Little => sample.to_le_bytes(),
                    ByteOrder::Big => sample.to_be_bytes(),
                };
                out[..4].copy_from_slice(&bytes);
            }
        }
    }

    /// Read one sample from `bytes` (at least `bytes_per_sample` long) as `f32`.
    pub fn decode_sample(&self, bytes: &[u8]) -> f32 {
        match self.sample_format {
            SampleFormat::Signed16 => {
                let raw = [bytes[0], bytes[1]];
                let v = match self.byte_order {
                    ByteOrder::Little => i16::from_le_bytes(raw),
                    ByteOrder::Big => i16::from_be_bytes(raw),
                };
                v as f32 / i16::MAX as f32
            }
            SampleFormat::Float32 => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                match self.byte_order {
                    ByteOrder::Little => f32::from_le_bytes(raw),
                    ByteOrder::Big => f32::from_be_bytes(raw),
                }
            }
        }
    }
}
