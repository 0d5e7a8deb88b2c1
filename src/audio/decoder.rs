//! # Audio Decoding
//!
//! Turns an uploaded recording (whatever the browser produced: webm, ogg, mp3,
//! wav) into mono 32-bit float PCM at the sample rate the speech models expect.
//!
//! ## Decoding Paths:
//! 1. **WAV fast path**: a RIFF/WAVE file already at the target rate is parsed
//!    in-process with the `wav` crate and down-mixed to mono
//! 2. **ffmpeg**: everything else is piped through
//!    `ffmpeg -i - -f s16le -ac 1 -ar <rate> -` and the raw little-endian
//!    samples are read back with `byteorder`
//!
//! ## Sample Conversion:
//! 16-bit samples are scaled by 1/32768 into `[-1.0, 1.0)`.

use crate::error::DecodeError;
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Mono PCM samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Raw upload bytes → mono PCM.
///
/// Decode failures are a distinct error type so the HTTP layer can report
/// them as the client's problem rather than a server fault.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError>;
}

/// Decoder that handles plain WAV itself and shells out to ffmpeg for the rest.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    ffmpeg_path: String,
    sample_rate: u32,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            sample_rate,
        }
    }

    async fn run_ffmpeg(&self, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let rate = self.sample_rate.to_string();
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-i", "-", "-f", "s16le", "-ac", "1", "-ar", rate.as_str(), "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DecodeError::FfmpegMissing,
                _ => DecodeError::Io(e),
            })?;

        // Feed stdin from its own task so a full stdout pipe cannot deadlock us.
        let mut stdin = child.stdin.take().ok_or_else(|| {
            DecodeError::Io(std::io::Error::other("ffmpeg stdin was not captured"))
        })?;
        let input = bytes.to_vec();
        let writer = tokio::spawn(async move {
            // ffmpeg may stop reading early on a corrupt stream; the exit status reports that.
            let _ = stdin.write_all(&input).await;
            let _ = stdin.shutdown().await;
        });

        let output = child.wait_with_output().await?;
        let _ = writer.await;

        if !output.status.success() {
            return Err(DecodeError::Ffmpeg {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl AudioDecoder for FfmpegDecoder {
    async fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        if is_riff_wave(bytes) {
            match decode_wav(bytes, self.sample_rate) {
                Ok(Some(samples)) => {
                    debug!(samples = samples.len(), "Decoded WAV upload in-process");
                    return finish(samples, self.sample_rate);
                }
                Ok(None) => debug!("WAV upload needs resampling, handing it to ffmpeg"),
                Err(e) => debug!("WAV fast path failed ({}), handing it to ffmpeg", e),
            }
        }

        let raw = self.run_ffmpeg(bytes).await?;
        let samples = pcm_s16le_to_f32(&raw);
        debug!(samples = samples.len(), "Decoded upload with ffmpeg");
        finish(samples, self.sample_rate)
    }
}

fn finish(samples: Vec<f32>, sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn is_riff_wave(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Parse a WAV file. Returns `Ok(None)` when the sample rate differs from
/// `target_rate` and the file has to be resampled elsewhere.
fn decode_wav(bytes: &[u8], target_rate: u32) -> Result<Option<Vec<f32>>, DecodeError> {
    let mut reader = Cursor::new(bytes);
    let (header, data) = wav::read(&mut reader)?;
    if header.sampling_rate != target_rate {
        return Ok(None);
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(samples) => samples
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => {
            return Err(DecodeError::Unsupported("WAV file has no audio data".to_string()))
        }
    };

    Ok(Some(downmix(&interleaved, header.channel_count.max(1) as usize)))
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Little-endian signed 16-bit PCM → floats. A trailing odd byte is ignored.
pub fn pcm_s16le_to_f32(raw: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(raw);
    let mut samples = Vec::with_capacity(raw.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    samples
}
