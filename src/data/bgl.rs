//! Parser for MSFS `.bgl` scenery container files.
//!
//! A BGL file is a table-of-contents container: a fixed header, a table of
//! top-level records (one per record type present in the file), and for
//! each record a section of 16-byte subrecord entries pointing at payload
//! byte ranges. The payloads are what the higher-level decoders consume:
//! - SceneryObject payloads → [`crate::data::placement`]
//! - Airport payloads       → [`crate::data::airport`]
//! - ModelData payloads     → [`crate::data::riff`]

use std::io;

use thiserror::Error;
use tracing::warn;
use winnow::Parser;
use winnow::binary::le_u32;
use winnow::token::take;

use crate::data::parser_utils::{WResult, peek_record_frame};

#[derive(Debug, Error)]
pub enum BglError {
    #[error("file does not start with the BGL magic")]
    InvalidHeader,
    #[error("file too small for a BGL header ({0} bytes)")]
    FileTooSmall(usize),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Bytes 0..4 of every BGL file.
const MAGIC1: [u8; 4] = [0x01, 0x02, 0x92, 0x19];
/// Bytes 0x10..0x14 of every BGL file.
const MAGIC2: [u8; 4] = [0x03, 0x18, 0x05, 0x08];

/// Offset of the top-level record count.
const RECORD_COUNT_OFFSET: usize = 0x14;
/// Offset of the first top-level record table entry.
const RECORD_TABLE_OFFSET: usize = 0x38;
/// Size of one top-level record table entry.
const RECORD_ENTRY_SIZE: usize = 16;
/// Size of one subrecord index entry.
const SUBRECORD_ENTRY_SIZE: usize = 16;

/// Top-level record types the converter consumes. Everything else in the
/// table is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Airport,
    SceneryObject,
    ModelData,
}

impl RecordType {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0003 => Some(RecordType::Airport),
            0x0025 => Some(RecordType::SceneryObject),
            0x002B => Some(RecordType::ModelData),
            _ => None,
        }
    }
}

/// One entry of the top-level record table.
#[derive(Debug, Clone)]
pub struct TopLevelRecord {
    pub record_type: Option<RecordType>,
    pub raw_type: u32,
    pub subrecord_count: u32,
    pub subrecord_section_offset: u32,
    pub record_size: u32,
}

/// A subrecord payload located through the record's subrecord section.
#[derive(Debug, Clone, Copy)]
pub struct Subrecord<'a> {
    /// Absolute byte offset of the payload within the file.
    pub offset: usize,
    pub payload: &'a [u8],
}

/// A parsed BGL table of contents over a borrowed byte slice.
#[derive(Debug)]
pub struct BglFile<'a> {
    data: &'a [u8],
    records: Vec<TopLevelRecord>,
}

fn parse_record_entry(input: &mut &[u8]) -> WResult<TopLevelRecord> {
    let raw_type = le_u32.parse_next(input)?;
    let subrecord_count = le_u32.parse_next(input)?;
    let subrecord_section_offset = le_u32.parse_next(input)?;
    let record_size = le_u32.parse_next(input)?;
    Ok(TopLevelRecord {
        record_type: RecordType::from_code(raw_type),
        raw_type,
        subrecord_count,
        subrecord_section_offset,
        record_size,
    })
}

/// File header: both magics and the top-level record count. Leaves the
/// input positioned at the record table.
fn parse_file_header<'a>(input: &mut &'a [u8]) -> WResult<(&'a [u8], &'a [u8], u32)> {
    let magic1 = take(4usize).parse_next(input)?;
    let _ = take(12usize).parse_next(input)?;
    let magic2 = take(4usize).parse_next(input)?;
    let record_count = le_u32.parse_next(input)?;
    let _ = take(RECORD_TABLE_OFFSET - RECORD_COUNT_OFFSET - 4).parse_next(input)?;
    Ok((magic1, magic2, record_count))
}

/// Subrecord index entry: payload offset and size live in the last 8 of
/// the entry's 16 bytes.
fn parse_subrecord_entry(input: &mut &[u8]) -> WResult<(u32, u32)> {
    let _ = take(8usize).parse_next(input)?;
    let sub_offset = le_u32.parse_next(input)?;
    let size = le_u32.parse_next(input)?;
    Ok((sub_offset, size))
}

impl<'a> BglFile<'a> {
    /// Validate the header magics and read the top-level record table.
    pub fn parse(data: &'a [u8]) -> Result<Self, BglError> {
        let input = &mut &data[..];
        let Ok((magic1, magic2, record_count)) = parse_file_header(input) else {
            return Err(BglError::FileTooSmall(data.len()));
        };
        if magic1 != &MAGIC1 || magic2 != &MAGIC2 {
            return Err(BglError::InvalidHeader);
        }

        let record_count = record_count as usize;
        let mut records = Vec::with_capacity(record_count);
        for i in 0..record_count {
            if input.len() < RECORD_ENTRY_SIZE {
                warn!(
                    entry = i,
                    count = record_count,
                    "record table extends beyond file; keeping what was read"
                );
                break;
            }
            // 16 fixed bytes; the parse cannot fail once bounds are checked.
            let record = parse_record_entry(input).expect("record entry underrun");
            records.push(record);
        }

        Ok(BglFile { data, records })
    }

    /// All top-level records of the given type.
    pub fn records_of(&self, kind: RecordType) -> impl Iterator<Item = &TopLevelRecord> {
        self.records
            .iter()
            .filter(move |r| r.record_type == Some(kind))
    }

    /// All top-level records, decoded or not.
    pub fn records(&self) -> &[TopLevelRecord] {
        &self.records
    }

    /// Iterate the subrecord payloads of a top-level record.
    ///
    /// Entries whose declared range falls outside the file are logged and
    /// skipped (truncated-record tolerance).
    pub fn subrecords(&self, record: &TopLevelRecord) -> Vec<Subrecord<'a>> {
        let mut out = Vec::with_capacity(record.subrecord_count as usize);
        let section = record.subrecord_section_offset as usize;
        for i in 0..record.subrecord_count as usize {
            let entry_offset = section + i * SUBRECORD_ENTRY_SIZE;
            let Some(entry) = self.data.get(entry_offset..entry_offset + SUBRECORD_ENTRY_SIZE)
            else {
                warn!(
                    entry = i,
                    section, "subrecord index extends beyond file; stopping"
                );
                break;
            };
            let (sub_offset, size) =
                parse_subrecord_entry(&mut &entry[..]).expect("entry is 16 bytes");
            let (sub_offset, size) = (sub_offset as usize, size as usize);
            match self.data.get(sub_offset..sub_offset + size) {
                Some(payload) => out.push(Subrecord {
                    offset: sub_offset,
                    payload,
                }),
                None => {
                    warn!(
                        offset = sub_offset,
                        size,
                        file_len = self.data.len(),
                        "subrecord payload out of bounds; skipping"
                    );
                }
            }
        }
        out
    }
}

/// Walk the `(id:u16, size:u16)`-framed records inside a subrecord payload.
///
/// Yields `(id, record_bytes)` with `record_bytes` covering the whole frame
/// including the 4 header bytes. An unknown id is resynced by its declared
/// length; a frame whose declared length is zero or overruns the payload
/// ends the walk.
pub struct FrameWalker<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> FrameWalker<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        FrameWalker { payload, pos: 0 }
    }
}

impl<'a> Iterator for FrameWalker<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.payload.get(self.pos..)?;
        let (id, size) = peek_record_frame(remaining)?;
        let size = size as usize;
        if size < 4 || size > remaining.len() {
            warn!(
                id = format_args!("{id:#06x}"),
                size,
                remaining = remaining.len(),
                "truncated record frame; ending walk"
            );
            return None;
        }
        let frame = &remaining[..size];
        self.pos += size;
        Some((id, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal single-record BGL image in memory.
    fn synthetic_bgl(rec_type: u32, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 0x38];
        data[0..4].copy_from_slice(&MAGIC1);
        data[0x10..0x14].copy_from_slice(&MAGIC2);
        data[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());

        // One record table entry at 0x38; subrecord section right after it;
        // payload after the section.
        let section_offset = 0x38 + RECORD_ENTRY_SIZE;
        let payload_offset = section_offset + SUBRECORD_ENTRY_SIZE;

        data.extend_from_slice(&rec_type.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(section_offset as u32).to_le_bytes());
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());

        let mut entry = [0u8; SUBRECORD_ENTRY_SIZE];
        entry[8..12].copy_from_slice(&(payload_offset as u32).to_le_bytes());
        entry[12..16].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(&entry);
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn rejects_zero_magic() {
        let data = vec![0u8; 0x100];
        assert!(matches!(
            BglFile::parse(&data),
            Err(BglError::InvalidHeader)
        ));
    }

    #[test]
    fn rejects_short_file() {
        let data = vec![0u8; 8];
        assert!(matches!(
            BglFile::parse(&data),
            Err(BglError::FileTooSmall(8))
        ));
    }

    #[test]
    fn walks_single_scenery_record() {
        let payload = [0xAAu8; 32];
        let data = synthetic_bgl(0x0025, &payload);
        let bgl = BglFile::parse(&data).unwrap();
        let records: Vec<_> = bgl.records_of(RecordType::SceneryObject).collect();
        assert_eq!(records.len(), 1);
        let subs = bgl.subrecords(records[0]);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].payload, &payload);
    }

    #[test]
    fn out_of_bounds_subrecord_is_skipped() {
        let payload = [0u8; 16];
        let mut data = synthetic_bgl(0x002B, &payload);
        // Corrupt the declared size so the payload overruns the file.
        let entry_offset = 0x38 + RECORD_ENTRY_SIZE;
        data[entry_offset + 12..entry_offset + 16]
            .copy_from_slice(&0xFFFF_u32.to_le_bytes());
        let bgl = BglFile::parse(&data).unwrap();
        let record = bgl.records_of(RecordType::ModelData).next().unwrap().clone();
        assert!(bgl.subrecords(&record).is_empty());
    }

    #[test]
    fn frame_walker_resyncs_by_declared_length() {
        // Unknown frame (id 0x0042, 8 bytes) followed by a known-size frame.
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0042u16.to_le_bytes());
        payload.extend_from_slice(&8u16.to_le_bytes());
        payload.extend_from_slice(&[0; 4]);
        payload.extend_from_slice(&0x000Bu16.to_le_bytes());
        payload.extend_from_slice(&4u16.to_le_bytes());
        let frames: Vec<_> = FrameWalker::new(&payload).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, 0x0042);
        assert_eq!(frames[1].0, 0x000B);
    }

    #[test]
    fn frame_walker_stops_on_overrun() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x000Bu16.to_le_bytes());
        payload.extend_from_slice(&200u16.to_le_bytes());
        payload.extend_from_slice(&[0; 4]);
        assert_eq!(FrameWalker::new(&payload).count(), 0);
    }
}
