//! Reader for the FASTER digital acquisition `.fast` format
//!
//! A `.fast` file is a flat stream of little-endian records. Every record
//! starts with a 12-byte header:
//!
//! | bytes | content                                   |
//! |-------|-------------------------------------------|
//! | 0     | type alias (what the payload contains)    |
//! | 1     | magic byte, always `0xAA`                 |
//! | 2..8  | 48-bit clock, in units of 2 ns            |
//! | 8..10 | label (channel number)                    |
//! | 10..12| payload size in bytes                     |
//!
//! Coincidence groups are records whose payload is itself a stream of
//! records. Files may be gzip-compressed.

mod event;
mod qdc;
mod reader;
mod record;

pub use self::{
    event::{detector_id, read_events, PulseEvent, SubEvent},
    qdc::{
        GroupCounter, QdcCharge, QdcCounter, QdcMeasure, CHARGE_MV_NS_PER_LSB, TDC_NS_PER_LSB,
    },
    reader::FasterReader,
    record::{
        alias, NestedRecords, Record, RecordHeader, HEADER_SIZE, MAGIC, MAX_LOAD_SIZE, TICK_NS,
    },
};
