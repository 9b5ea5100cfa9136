// SPDX-License-Identifier: GPL-3.0-only

//! Raw camera file container (spec §6.2): a fixed header followed by a
//! sequence of length-prefixed records, read/written with explicit
//! little-endian byte encode/decode (`u32::from_le_bytes` etc.) rather
//! than a derive-based serializer, since the layout is a fixed C-struct
//! shape with a magic and reserved padding — the same reason the teacher
//! hand-writes its GStreamer caps strings instead of reaching for serde.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::error::{err, Result};
use crate::frame::{ColorMode, GrabMode, ShutterMode};

pub const MAGIC: [u8; 7] = *b"ISCRAW\0";
pub const CURRENT_VERSION: u32 = 1;
const HEADER_RESERVED: usize = 64;

/// File-level metadata, written once at the start of a raw capture file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFileHeader {
    pub version: u32,
    pub model_id: u32,
    pub grab_mode: GrabMode,
    pub color_mode: ColorMode,
    pub shutter_mode: ShutterMode,
    pub base_length: f32,
    pub bf: f32,
    pub d_inf: f32,
    pub width: u32,
    pub height: u32,
    /// Nominal inter-frame interval in milliseconds, `0` if variable (the
    /// player then paces from each record's own timestamp delta, spec §4.D).
    pub interval_ms: u32,
    pub start_utc_ms: u64,
}

fn grab_mode_to_u8(m: GrabMode) -> u8 {
    match m {
        GrabMode::Parallax => 0,
        GrabMode::Corrected => 1,
        GrabMode::BeforeCorrect => 2,
        GrabMode::BayerS0 => 3,
        GrabMode::BayerS1 => 4,
    }
}

fn grab_mode_from_u8(v: u8) -> Result<GrabMode> {
    Ok(match v {
        0 => GrabMode::Parallax,
        1 => GrabMode::Corrected,
        2 => GrabMode::BeforeCorrect,
        3 => GrabMode::BayerS0,
        4 => GrabMode::BayerS1,
        other => return Err(err!(UnsupportedFileVersion, "unknown grab mode tag {other}")),
    })
}

fn color_mode_to_u8(m: ColorMode) -> u8 {
    match m {
        ColorMode::Mono => 0,
        ColorMode::Color => 1,
        ColorMode::Bayer => 2,
    }
}

fn color_mode_from_u8(v: u8) -> Result<ColorMode> {
    Ok(match v {
        0 => ColorMode::Mono,
        1 => ColorMode::Color,
        2 => ColorMode::Bayer,
        other => return Err(err!(UnsupportedFileVersion, "unknown color mode tag {other}")),
    })
}

fn shutter_mode_to_u8(m: ShutterMode) -> u8 {
    match m {
        ShutterMode::Manual => 0,
        ShutterMode::Single => 1,
        ShutterMode::Double => 2,
        ShutterMode::Double2 => 3,
        ShutterMode::SystemDefault => 4,
    }
}

fn shutter_mode_from_u8(v: u8) -> Result<ShutterMode> {
    Ok(match v {
        0 => ShutterMode::Manual,
        1 => ShutterMode::Single,
        2 => ShutterMode::Double,
        3 => ShutterMode::Double2,
        4 => ShutterMode::SystemDefault,
        other => return Err(err!(UnsupportedFileVersion, "unknown shutter mode tag {other}")),
    })
}

impl RawFileHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(7 + 4 + 4 + 3 + 4 * 3 + 4 * 2 + 4 + 8 + HEADER_RESERVED);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.model_id.to_le_bytes());
        buf.push(grab_mode_to_u8(self.grab_mode));
        buf.push(color_mode_to_u8(self.color_mode));
        buf.push(shutter_mode_to_u8(self.shutter_mode));
        buf.extend_from_slice(&self.base_length.to_le_bytes());
        buf.extend_from_slice(&self.bf.to_le_bytes());
        buf.extend_from_slice(&self.d_inf.to_le_bytes());
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.interval_ms.to_le_bytes());
        buf.extend_from_slice(&self.start_utc_ms.to_le_bytes());
        buf.resize(buf.len() + HEADER_RESERVED, 0);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 7 {
            return Err(err!(UnsupportedFileVersion, "file too short to contain a header"));
        }
        if bytes[0..7] != MAGIC {
            return Err(err!(UnsupportedFileVersion, "bad magic, not an ISCRAW file"));
        }
        let mut p = 7usize;
        let version = read_u32(bytes, &mut p)?;
        if version > CURRENT_VERSION {
            return Err(err!(UnsupportedFileVersion, "file version {version} newer than supported {CURRENT_VERSION}"));
        }
        let model_id = read_u32(bytes, &mut p)?;
        let grab_mode = grab_mode_from_u8(read_u8(bytes, &mut p)?)?;
        let color_mode = color_mode_from_u8(read_u8(bytes, &mut p)?)?;
        let shutter_mode = shutter_mode_from_u8(read_u8(bytes, &mut p)?)?;
        let base_length = f32::from_le_bytes(read_n(bytes, &mut p)?);
        let bf = f32::from_le_bytes(read_n(bytes, &mut p)?);
        let d_inf = f32::from_le_bytes(read_n(bytes, &mut p)?);
        let width = read_u32(bytes, &mut p)?;
        let height = read_u32(bytes, &mut p)?;
        let interval_ms = read_u32(bytes, &mut p)?;
        let start_utc_ms = u64::from_le_bytes(read_n(bytes, &mut p)?);

        Ok(Self {
            version,
            model_id,
            grab_mode,
            color_mode,
            shutter_mode,
            base_length,
            bf,
            d_inf,
            width,
            height,
            interval_ms,
            start_utc_ms,
        })
    }

    pub const ENCODED_LEN: usize = 7 + 4 + 4 + 3 + 4 + 4 + 4 + 4 + 4 + 4 + 8 + HEADER_RESERVED;
}

/// One captured exposure as persisted to disk (spec §6.2): the driver's
/// raw bytes, unchanged, so playback can feed the same [`crate::decode`]
/// path as live capture.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub frame_number: u64,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

impl RawRecord {
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.frame_number.to_le_bytes())?;
        w.write_all(&self.timestamp_ms.to_le_bytes())?;
        w.write_all(&(self.payload.len() as u32).to_le_bytes())?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Read one record, or `None` at a clean end-of-stream. A truncated
    /// trailing record (e.g. a capture killed mid-write) is treated the
    /// same as a clean EOF rather than an I/O error (spec §6.2: "truncated
    /// trailing record is silently skipped on playback").
    pub fn read_from(r: &mut impl Read) -> Result<Option<Self>> {
        let Some(frame_number_buf) = read_full_or_none::<8>(r)? else {
            return Ok(None);
        };
        let frame_number = u64::from_le_bytes(frame_number_buf);

        let Some(timestamp_buf) = read_full_or_none::<8>(r)? else {
            return Ok(None);
        };
        let timestamp_ms = u64::from_le_bytes(timestamp_buf);

        let Some(len_buf) = read_full_or_none::<4>(r)? else {
            return Ok(None);
        };
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut payload = vec![0u8; len];
        if r.read_exact(&mut payload).is_err() {
            return Ok(None);
        }

        Ok(Some(Self { frame_number, timestamp_ms, payload }))
    }
}

/// Summary statistics returned alongside the header by `GetFileInformation`
/// (spec §4.H) without starting playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub total_frame_count: u64,
    pub first_frame_number: Option<u64>,
    pub last_frame_number: Option<u64>,
}

/// Read `path`'s header and scan the record stream to completion, per
/// spec §4.H `GetFileInformation(path, out header, out info)`. Does not
/// start playback and leaves no open handle behind.
pub fn scan_file(path: impl AsRef<Path>) -> Result<(RawFileHeader, FileInfo)> {
    let mut file = BufReader::new(File::open(path.as_ref())?);
    let mut header_bytes = vec![0u8; RawFileHeader::ENCODED_LEN];
    file.read_exact(&mut header_bytes)?;
    let header = RawFileHeader::decode(&header_bytes)?;

    let mut total = 0u64;
    let mut first = None;
    let mut last = None;
    while let Some(record) = RawRecord::read_from(&mut file)? {
        first.get_or_insert(record.frame_number);
        last = Some(record.frame_number);
        total += 1;
    }

    Ok((
        header,
        FileInfo {
            total_frame_count: total,
            first_frame_number: first,
            last_frame_number: last,
        },
    ))
}

/// Read exactly `N` bytes, or `None` if the stream ends before any bytes
/// of this field are read. A partial read strictly between `0` and `N`
/// bytes is treated as `None` too (a truncated trailing record).
fn read_full_or_none<const N: usize>(r: &mut impl Read) -> Result<Option<[u8; N]>> {
    let mut buf = [0u8; N];
    let mut filled = 0usize;
    while filled < N {
        match r.read(&mut buf[filled..])? {
            0 => return Ok(None),
            n => filled += n,
        }
    }
    Ok(Some(buf))
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let v = *bytes.get(*pos).ok_or_else(|| err!(UnsupportedFileVersion, "header truncated"))?;
    *pos += 1;
    Ok(v)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_n(bytes, pos)?))
}

fn read_n<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let slice = bytes
        .get(*pos..*pos + N)
        .ok_or_else(|| err!(UnsupportedFileVersion, "header truncated"))?;
    *pos += N;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> RawFileHeader {
        RawFileHeader {
            version: CURRENT_VERSION,
            model_id: 2,
            grab_mode: GrabMode::Corrected,
            color_mode: ColorMode::Mono,
            shutter_mode: ShutterMode::Manual,
            base_length: 0.1,
            bf: 60.0,
            d_inf: 2.0,
            width: 752,
            height: 480,
            interval_ms: 33,
            start_utc_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let bytes = header.encode();
        assert_eq!(bytes.len(), RawFileHeader::ENCODED_LEN);
        let decoded = RawFileHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample_header().encode();
        bytes[0] = b'X';
        let err = RawFileHeader::decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedFileVersion);
    }

    #[test]
    fn record_round_trips_through_a_cursor() {
        let record = RawRecord { frame_number: 42, timestamp_ms: 123, payload: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = RawRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.frame_number, 42);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
        assert!(RawRecord::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_trailing_record_reads_as_eof_not_error() {
        let record = RawRecord { frame_number: 1, timestamp_ms: 5, payload: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 2); // chop the last two payload bytes
        let mut cursor = Cursor::new(buf);
        assert!(RawRecord::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn scan_file_reports_frame_count_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.iscraw");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&sample_header().encode()).unwrap();
        for n in 1..=5u64 {
            RawRecord { frame_number: n, timestamp_ms: n * 10, payload: vec![n as u8] }
                .write_to(&mut file)
                .unwrap();
        }
        drop(file);

        let (header, info) = scan_file(&path).unwrap();
        assert_eq!(header.width, 752);
        assert_eq!(info.total_frame_count, 5);
        assert_eq!(info.first_frame_number, Some(1));
        assert_eq!(info.last_frame_number, Some(5));
    }
}
