// RIFF/WAVE, RF64 and raw CF32 container layout.
//
// The on-disk and on-wire headers are built by hand: recorded files carry
// the SDR `auxi` metadata chunk and may be promoted from WAVE to RF64 in
// place, neither of which a stock WAV writer can express. All multi-byte
// fields are little-endian.
//
// Recorded layout (fixed offsets, see the OFF_* constants):
//   "RIFF"/"RF64" size32 "WAVE"
//   "JUNK"/"ds64" (28-byte payload; JUNK reserves the ds64 slot in WAVE)
//   "fmt " (16-byte payload)
//   "auxi" (64-byte payload)
//   "data" size32, then the sample payload.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::{self, Seek, SeekFrom, Write};

/// Container written by a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// RIFF/WAVE, promoted to RF64 at close only if the payload outgrew it.
    Wav,
    /// RF64 declared up front, for captures expected to pass 4 GiB.
    Rf64,
    /// Headerless interleaved f32 I/Q.
    Cf32,
}

/// Sample encoding of a session or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    F32,
    S16,
}

impl SampleEncoding {
    /// WAVE format tag: 3 = IEEE float, 1 = integer PCM.
    pub fn format_tag(self) -> u16 {
        match self {
            SampleEncoding::F32 => 3,
            SampleEncoding::S16 => 1,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleEncoding::F32 => 32,
            SampleEncoding::S16 => 16,
        }
    }

    /// Bytes per complex sample frame (2 channels).
    pub fn block_align(self) -> u16 {
        match self {
            SampleEncoding::F32 => 8,
            SampleEncoding::S16 => 4,
        }
    }

    /// Full-scale value recorded in `auxi.max_val`.
    pub fn max_val(self) -> i32 {
        match self {
            SampleEncoding::F32 => 1,
            SampleEncoding::S16 => 32767,
        }
    }
}

pub const OFF_RIFF_MAGIC: u64 = 0;
pub const OFF_RIFF_SIZE: u64 = 4;
pub const OFF_DS64_MAGIC: u64 = 12;
pub const OFF_DS64_RIFF_SIZE: u64 = 20;
pub const OFF_DS64_DATA_SIZE: u64 = 28;
pub const OFF_DS64_SAMPLE_COUNT: u64 = 36;
pub const OFF_AUXI_STOP_TIME: u64 = 96;
pub const OFF_DATA_SIZE: u64 = 148;
/// Total header length of a recorded WAVE/RF64 file; the payload starts here.
pub const HEADER_LEN: u64 = 152;

/// Size fields in a streaming header, where the length is unknowable.
const STREAMING_SIZE: u32 = 0xFFFF_FFFF;
/// Stay this far under u32::MAX before promoting to RF64.
const PROMOTE_HEADROOM: u64 = 16 * 1024 * 1024;

/// Radio metadata recorded in the `auxi` chunk.
#[derive(Debug, Clone, Copy)]
pub struct AuxiInfo {
    pub start: DateTime<Utc>,
    pub center_freq_hz: u32,
    pub sample_rate_hz: u32,
    pub encoding: SampleEncoding,
}

/// Pack a UTC instant as a Windows SYSTEMTIME (eight little-endian u16s:
/// year, month, day-of-week, day, hour, minute, second, millisecond).
pub fn systemtime_bytes(t: DateTime<Utc>) -> [u8; 16] {
    let fields: [u16; 8] = [
        t.year() as u16,
        t.month() as u16,
        t.weekday().num_days_from_sunday() as u16,
        t.day() as u16,
        t.hour() as u16,
        t.minute() as u16,
        t.second() as u16,
        (t.nanosecond() / 1_000_000) as u16,
    ];
    let mut out = [0u8; 16];
    for (chunk, v) in out.chunks_exact_mut(2).zip(fields) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    out
}

/// The 64-byte `auxi` payload, SpectraVue/HDSDR convention. The stop time
/// stays zeroed until the session closes.
fn auxi_payload(info: &AuxiInfo) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[0..16].copy_from_slice(&systemtime_bytes(info.start));
    // out[16..32]: stop_time, zero until close.
    out[32..36].copy_from_slice(&info.center_freq_hz.to_le_bytes());
    out[36..40].copy_from_slice(&info.sample_rate_hz.to_le_bytes());
    // out[40..44]: if_freq = 0.
    out[44..48].copy_from_slice(&info.sample_rate_hz.to_le_bytes()); // bandwidth
    // out[48..52]: iq_offset = 0; out[52..56]: db_offset = 0.
    out[56..60].copy_from_slice(&info.encoding.max_val().to_le_bytes());
    // out[60..64]: reserved zeros, padding the chunk to its fixed size.
    out
}

fn fmt_payload(enc: SampleEncoding, sample_rate_hz: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..2].copy_from_slice(&enc.format_tag().to_le_bytes());
    out[2..4].copy_from_slice(&2u16.to_le_bytes()); // channels: I and Q
    out[4..8].copy_from_slice(&sample_rate_hz.to_le_bytes());
    let byte_rate = sample_rate_hz * enc.block_align() as u32;
    out[8..12].copy_from_slice(&byte_rate.to_le_bytes());
    out[12..14].copy_from_slice(&enc.block_align().to_le_bytes());
    out[14..16].copy_from_slice(&enc.bits_per_sample().to_le_bytes());
    out
}

fn push_chunk(out: &mut Vec<u8>, id: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(id);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

/// Header for a recorded session. WAVE files carry a `JUNK` placeholder
/// where RF64 puts `ds64`, so promotion at close is an in-place rewrite.
/// Returns an empty header for raw CF32.
pub fn recording_header(kind: ContainerKind, info: &AuxiInfo) -> Vec<u8> {
    if kind == ContainerKind::Cf32 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(HEADER_LEN as usize);
    match kind {
        ContainerKind::Wav => {
            out.extend_from_slice(b"RIFF");
            // Accounts for the header only until the first size patch.
            out.extend_from_slice(&riff_size32(0).to_le_bytes());
            out.extend_from_slice(b"WAVE");
            push_chunk(&mut out, b"JUNK", &[0u8; 28]);
        }
        ContainerKind::Rf64 => {
            out.extend_from_slice(b"RF64");
            out.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
            out.extend_from_slice(b"WAVE");
            push_chunk(&mut out, b"ds64", &ds64_payload(0));
        }
        ContainerKind::Cf32 => unreachable!(),
    }
    push_chunk(&mut out, b"fmt ", &fmt_payload(info.encoding, info.sample_rate_hz));
    push_chunk(&mut out, b"auxi", &auxi_payload(info));
    out.extend_from_slice(b"data");
    let data32 = match kind {
        ContainerKind::Rf64 => STREAMING_SIZE,
        _ => 0,
    };
    out.extend_from_slice(&data32.to_le_bytes());
    debug_assert_eq!(out.len() as u64, HEADER_LEN);
    out
}

/// Header for a live HTTP stream: a WAVE header whose size fields are
/// 0xFFFFFFFF, since the stream has no known end. No `JUNK` reservation.
pub fn stream_header(info: &AuxiInfo) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    push_chunk(&mut out, b"fmt ", &fmt_payload(info.encoding, info.sample_rate_hz));
    push_chunk(&mut out, b"auxi", &auxi_payload(info));
    out.extend_from_slice(b"data");
    out.extend_from_slice(&STREAMING_SIZE.to_le_bytes());
    out
}

/// Initial `ds64` payload (riffSize, dataSize, sampleCount, empty table);
/// the real values are patched in as the payload grows.
fn ds64_payload(data_bytes: u64) -> [u8; 28] {
    let mut out = [0u8; 28];
    out[0..8].copy_from_slice(&riff_size64(data_bytes).to_le_bytes());
    out[8..16].copy_from_slice(&data_bytes.to_le_bytes());
    // out[16..24]: sampleCount, patched with the encoding's frame size.
    // out[24..28]: table length = 0.
    out
}

/// RIFF size field value: everything after the 8-byte RIFF header.
fn riff_size64(data_bytes: u64) -> u64 {
    HEADER_LEN - 8 + data_bytes
}

fn riff_size32(data_bytes: u64) -> u32 {
    riff_size64(data_bytes).min(u64::from(u32::MAX)) as u32
}

/// True once a WAVE payload has outgrown what 32-bit size fields can
/// express (with headroom so the check runs ahead of the overflow).
pub fn needs_rf64(data_bytes: u64) -> bool {
    riff_size64(data_bytes) >= u64::from(u32::MAX) - PROMOTE_HEADROOM
}

fn write_at<F: Write + Seek>(f: &mut F, offset: u64, bytes: &[u8]) -> io::Result<()> {
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(bytes)
}

/// Patch the size fields in place so a crash leaves a playable file.
/// Leaves the stream positioned at the end of the payload.
pub fn patch_sizes<F: Write + Seek>(
    f: &mut F,
    kind: ContainerKind,
    enc: SampleEncoding,
    data_bytes: u64,
) -> io::Result<()> {
    match kind {
        ContainerKind::Cf32 => return Ok(()),
        ContainerKind::Wav => {
            write_at(f, OFF_RIFF_SIZE, &riff_size32(data_bytes).to_le_bytes())?;
            write_at(f, OFF_DATA_SIZE, &(data_bytes.min(u64::from(u32::MAX)) as u32).to_le_bytes())?;
        }
        ContainerKind::Rf64 => {
            write_at(f, OFF_DS64_RIFF_SIZE, &riff_size64(data_bytes).to_le_bytes())?;
            write_at(f, OFF_DS64_DATA_SIZE, &data_bytes.to_le_bytes())?;
            let frames = data_bytes / u64::from(enc.block_align());
            write_at(f, OFF_DS64_SAMPLE_COUNT, &frames.to_le_bytes())?;
        }
    }
    f.seek(SeekFrom::Start(HEADER_LEN + data_bytes))?;
    Ok(())
}

/// Record the session stop time in the `auxi` chunk.
pub fn patch_stop_time<F: Write + Seek>(
    f: &mut F,
    data_bytes: u64,
    stop: DateTime<Utc>,
) -> io::Result<()> {
    write_at(f, OFF_AUXI_STOP_TIME, &systemtime_bytes(stop))?;
    f.seek(SeekFrom::Start(HEADER_LEN + data_bytes))?;
    Ok(())
}

/// Rewrite a WAVE header as RF64 in place: the `JUNK` reservation becomes
/// the `ds64` chunk and the 32-bit size fields are pinned to 0xFFFFFFFF.
pub fn promote_to_rf64<F: Write + Seek>(
    f: &mut F,
    enc: SampleEncoding,
    data_bytes: u64,
) -> io::Result<()> {
    write_at(f, OFF_RIFF_MAGIC, b"RF64")?;
    write_at(f, OFF_RIFF_SIZE, &STREAMING_SIZE.to_le_bytes())?;
    write_at(f, OFF_DS64_MAGIC, b"ds64")?;
    write_at(f, OFF_DS64_RIFF_SIZE, &riff_size64(data_bytes).to_le_bytes())?;
    write_at(f, OFF_DS64_DATA_SIZE, &data_bytes.to_le_bytes())?;
    let frames = data_bytes / u64::from(enc.block_align());
    write_at(f, OFF_DS64_SAMPLE_COUNT, &frames.to_le_bytes())?;
    write_at(f, OFF_DATA_SIZE, &STREAMING_SIZE.to_le_bytes())?;
    f.seek(SeekFrom::Start(HEADER_LEN + data_bytes))?;
    Ok(())
}

/// Quantize f32 samples to 16-bit PCM bytes: `clamp(round(x * 32768))`.
pub fn f32_to_s16_bytes(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for &x in samples {
        let v = (x * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
}

/// Serialize f32 samples as little-endian bytes.
pub fn f32_to_le_bytes(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * 4);
    for &x in samples {
        out.extend_from_slice(&x.to_le_bytes());
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
