use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioError;

/// Extensions the ingest pipeline and CLI recognize.
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["wav", "mp3"];

/// Decoded, mono PCM plus its native sample rate. Stereo and multi-channel
/// input is reduced to mono by averaging channels; per-channel fingerprinting
/// with a union of the results is a valid alternative this crate doesn't
/// implement.
pub struct Decoded {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub fn decode_file(path: &Path) -> Result<Decoded, AudioError> {
    if !path.exists() {
        return Err(AudioError::NotFound(path.to_path_buf()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "wav" => decode_wav(path),
        "mp3" => decode_with_symphonia(path),
        other => Err(AudioError::UnsupportedFormat(other.to_string())),
    }
}

fn decode_wav(path: &Path) -> Result<Decoded, AudioError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AudioError::DecodeFailed(e.to_string()))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>, _> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
        hound::SampleFormat::Int => match spec.bits_per_sample {
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|s| s as f32 / i16::MAX as f32))
                .collect(),
            24 | 32 => reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / (1i64 << (spec.bits_per_sample - 1)) as f32))
                .collect(),
            other => return Err(AudioError::UnsupportedFormat(format!("{other}-bit WAV"))),
        },
    };
    let samples = samples.map_err(|e| AudioError::DecodeFailed(e.to_string()))?;

    Ok(Decoded {
        samples: to_mono(&samples, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(path: &Path) -> Result<Decoded, AudioError> {
    let file = File::open(path).map_err(|e| AudioError::DecodeFailed(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AudioError::DecodeFailed("no audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;

    let mut channels = 1usize;
    let mut sample_rate = 0u32;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count();
                sample_rate = spec.rate;

                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buf.samples());
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        }
    }

    if interleaved.is_empty() {
        return Err(AudioError::DecodeFailed("no samples decoded".into()));
    }

    Ok(Decoded {
        samples: to_mono(&interleaved, channels),
        sample_rate,
    })
}

fn to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub fn is_recognized(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| RECOGNIZED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
