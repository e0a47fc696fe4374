// WAV output: 16-bit signed mono PCM tagged with the render's sample rate.

use std::io::{Cursor, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::ContinuoError;

fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn write_samples<W: Write + Seek>(
    mut writer: WavWriter<W>,
    samples: &[i16],
) -> Result<(), ContinuoError> {
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode samples as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, ContinuoError> {
    let mut cursor = Cursor::new(Vec::new());
    write_samples(WavWriter::new(&mut cursor, mono_spec(sample_rate))?, samples)?;
    Ok(cursor.into_inner())
}

/// Write samples to a WAV file at `path`.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), ContinuoError> {
    write_samples(WavWriter::create(path, mono_spec(sample_rate))?, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    #[test]
    fn header_describes_mono_16_bit() {
        let bytes = encode_wav(&[0, 1000, -1000, i16::MAX, i16::MIN], 22_050).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, SampleFormat::Int);
    }

    #[test]
    fn samples_survive_encoding() {
        let samples = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let bytes = encode_wav(&samples, 44_100).unwrap();
        let mut reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn file_matches_in_memory_encoding() {
        let samples = vec![3, -3, 300, -300];
        let path = std::env::temp_dir().join(format!("continuo-wav-{}.wav", std::process::id()));
        write_wav(&path, &samples, 16_000).unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(on_disk, encode_wav(&samples, 16_000).unwrap());
    }

    #[test]
    fn empty_render_is_a_valid_file() {
        let bytes = encode_wav(&[], 44_100).unwrap();
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }
}
