//! 16-bit little-endian PCM conversions.
//!
//! Inbound speech arrives as signed 16-bit LE samples and is normalised to
//! f32 by dividing by 32768, giving a range of `[-1.0, 1.0)`.
//!
//! Outbound microphone frames use the asymmetric conversion: negative
//! samples scale by 32768 and positive samples by 32767, so both -1.0 and
//! 1.0 map exactly onto the ends of the i16 range without wrapping.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Result, VoxlineError};

/// Divisor used when normalising i16 samples.
pub const PCM16_SCALE: f32 = 32768.0;

/// Bytes per mono PCM16 sample.
pub const PCM16_BYTES_PER_SAMPLE: usize = 2;

/// Number of whole samples in a PCM16 buffer of `byte_len` bytes.
pub fn pcm16_sample_count(byte_len: usize) -> usize {
    byte_len / PCM16_BYTES_PER_SAMPLE
}

/// Decode PCM16 LE bytes into normalised f32 samples.
///
/// # Errors
/// Returns `VoxlineError::MalformedChunk` when the byte length is odd, since
/// the trailing byte cannot belong to any sample.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % PCM16_BYTES_PER_SAMPLE != 0 {
        return Err(VoxlineError::MalformedChunk(format!(
            "odd byte length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(PCM16_BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Convert one normalised sample to i16, clamping out-of-range input.
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode normalised samples as PCM16 LE bytes.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * PCM16_BYTES_PER_SAMPLE);
    for &s in samples {
        out.extend_from_slice(&f32_to_pcm16(s).to_le_bytes());
    }
    out
}

/// Decode a base64 transport payload into raw PCM bytes.
pub fn decode_base64_pcm(payload: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(payload.trim())?)
}

/// Encode raw PCM bytes as a base64 transport payload.
pub fn encode_base64_pcm(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decodes_extremes_and_zero() {
        let bytes = [
            0x00, 0x80, // i16::MIN
            0x00, 0x00, // 0
            0xff, 0x7f, // i16::MAX
        ];
        let samples = pcm16_le_to_f32(&bytes).unwrap();
        assert_eq!(samples.len(), 3);
        assert_relative_eq!(samples[0], -1.0);
        assert_relative_eq!(samples[1], 0.0);
        assert_relative_eq!(samples[2], 32767.0 / 32768.0);
    }

    #[test]
    fn odd_length_is_malformed() {
        let err = pcm16_le_to_f32(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, VoxlineError::MalformedChunk(_)));
    }

    #[test]
    fn empty_input_decodes_to_no_samples() {
        assert!(pcm16_le_to_f32(&[]).unwrap().is_empty());
        assert_eq!(pcm16_sample_count(0), 0);
        assert_eq!(pcm16_sample_count(8192), 4096);
    }

    #[test]
    fn asymmetric_encoding_hits_both_rails() {
        assert_eq!(f32_to_pcm16(-1.0), i16::MIN);
        assert_eq!(f32_to_pcm16(1.0), i16::MAX);
        assert_eq!(f32_to_pcm16(0.0), 0);
        assert_eq!(f32_to_pcm16(3.5), i16::MAX);
        assert_eq!(f32_to_pcm16(-7.0), i16::MIN);
        assert_eq!(f32_to_pcm16(f32::NAN), 0);
    }

    #[test]
    fn encode_writes_little_endian() {
        let bytes = encode_pcm16_le(&[-1.0, 1.0]);
        assert_eq!(bytes, vec![0x00, 0x80, 0xff, 0x7f]);
    }

    #[test]
    fn base64_payload_decodes() {
        let payload = encode_base64_pcm(&[0x00, 0x80, 0xff, 0x7f]);
        assert_eq!(payload, "AID/fw==");
        assert_eq!(
            decode_base64_pcm(" AID/fw==\n").unwrap(),
            vec![0x00, 0x80, 0xff, 0x7f]
        );
        assert!(decode_base64_pcm("not base64!").is_err());
    }
}
