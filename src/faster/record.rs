//! Raw FASTER records and their headers

use crate::error::FasterError;

/// Size of a record header in bytes
pub const HEADER_SIZE: usize = 12;

/// Magic byte found in every record header
pub const MAGIC: u8 = 0xAA;

/// Largest payload that a record may carry
pub const MAX_LOAD_SIZE: usize = 8192;

/// Duration of one clock tick in nanoseconds
pub const TICK_NS: f64 = 2.0;

/// Known record type aliases
pub mod alias {
    #![allow(missing_docs)]

    pub const SYNCHRO: u8 = 0;
    pub const START: u8 = 1;
    pub const STOP: u8 = 2;
    pub const MISSING: u8 = 3;
    pub const MISSED: u8 = 4;
    pub const SMART: u8 = 5;
    pub const GROUP: u8 = 10;
    pub const TREF: u8 = 11;
    pub const TREF_TDC: u8 = 12;
    pub const UNLOCK: u8 = 13;
    pub const RF_DATA: u8 = 19;
    pub const RF_COUNTER: u8 = 20;
    pub const OSCILLO: u8 = 21;
    pub const SAMPLER: u8 = 22;
    pub const SAMPLER_COUNTER: u8 = 23;
    pub const PLAS_FIRST: u8 = 24;
    pub const PLAS_LAST: u8 = 28;
    pub const GROUP_COUNTER: u8 = 30;
    pub const QDC_X1: u8 = 41;
    pub const QDC_X2: u8 = 42;
    pub const QDC_X3: u8 = 43;
    pub const QDC_X4: u8 = 44;
    pub const QTDC: u8 = 45;
    pub const QT2T: u8 = 46;
    pub const QDC_COUNTER: u8 = 50;
    pub const QTDC_COUNTER: u8 = 51;
    pub const QT2T_COUNTER: u8 = 52;
    pub const ELECTROMETER: u8 = 81;
    pub const SCALER_MEASUREMENT: u8 = 82;
    pub const SCALER_COUNTER: u8 = 83;
    pub const JDB_HV: u8 = 84;
    pub const QDC_TDC_X1: u8 = 141;
    pub const QDC_TDC_X2: u8 = 142;
    pub const QDC_TDC_X3: u8 = 143;
    pub const QDC_TDC_X4: u8 = 144;
    pub const QDC_TOF_X1: u8 = 241;
    pub const QDC_TOF_X2: u8 = 242;
    pub const QDC_TOF_X3: u8 = 243;
    pub const QDC_TOF_X4: u8 = 244;

    /// Number of charge channels of a QDC-like alias, if it is one
    pub fn qdc_channels(type_alias: u8) -> Option<usize> {
        match type_alias {
            QDC_X1..=QDC_X4 => Some((type_alias - QDC_X1 + 1) as usize),
            QDC_TDC_X1..=QDC_TDC_X4 => Some((type_alias - QDC_TDC_X1 + 1) as usize),
            QDC_TOF_X1..=QDC_TOF_X4 => Some((type_alias - QDC_TOF_X1 + 1) as usize),
            _ => None,
        }
    }

    /// Truth that an alias carries a TDC word after its charges
    pub fn has_tdc(type_alias: u8) -> bool {
        matches!(type_alias, QDC_TDC_X1..=QDC_TDC_X4 | QDC_TOF_X1..=QDC_TOF_X4)
    }
}

/// Decoded record header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    /// What kind of payload follows
    pub type_alias: u8,

    /// Acquisition clock, in 2 ns ticks
    pub clock: u64,

    /// Channel label
    pub label: u16,

    /// Payload size in bytes
    pub load_size: usize,
}
//
impl RecordHeader {
    /// Decode a header, `offset` only serves error reporting
    pub fn parse(bytes: &[u8; HEADER_SIZE], offset: u64) -> Result<Self, FasterError> {
        if bytes[1] != MAGIC {
            return Err(FasterError::BadMagic {
                found: bytes[1],
                offset,
            });
        }
        // The clock is the upper 48 bits of the first little-endian u64
        let mut first_word = [0u8; 8];
        first_word.copy_from_slice(&bytes[0..8]);
        let clock = u64::from_le_bytes(first_word) >> 16;
        let label = u16::from_le_bytes([bytes[8], bytes[9]]);
        let load_size = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
        if load_size > MAX_LOAD_SIZE {
            return Err(FasterError::OversizedLoad {
                size: load_size,
                max: MAX_LOAD_SIZE,
            });
        }
        Ok(Self {
            type_alias: bytes[0],
            clock,
            label,
            load_size,
        })
    }

    /// Encode the header back into its on-disk form
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let first_word = (self.clock << 16) | ((MAGIC as u64) << 8) | self.type_alias as u64;
        bytes[0..8].copy_from_slice(&first_word.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.label.to_le_bytes());
        bytes[10..12].copy_from_slice(&(self.load_size as u16).to_le_bytes());
        bytes
    }

    /// Acquisition time in nanoseconds
    pub fn time_ns(&self) -> f64 {
        self.clock as f64 * TICK_NS
    }
}

/// A complete record: header and payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Decoded header
    pub header: RecordHeader,

    /// Raw payload bytes
    pub load: Vec<u8>,
}
//
impl Record {
    /// Build a record from a header-less payload, mostly useful for writing
    /// test data
    pub fn new(type_alias: u8, clock: u64, label: u16, load: Vec<u8>) -> Self {
        Self {
            header: RecordHeader {
                type_alias,
                clock,
                label,
                load_size: load.len(),
            },
            load,
        }
    }

    /// Encode the record into its on-disk form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.load.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.load);
        bytes
    }

    /// Truth that this record is a coincidence group
    pub fn is_group(&self) -> bool {
        self.header.type_alias == alias::GROUP
    }

    /// Iterate over the records nested inside of a group payload
    ///
    /// Iteration stops once fewer bytes than a header remain. A nested record
    /// whose payload overflows the group is reported as an error.
    ///
    pub fn nested(&self) -> NestedRecords<'_> {
        NestedRecords {
            buffer: &self.load,
            position: 0,
        }
    }
}

/// Iterator over the records packed in a group payload
pub struct NestedRecords<'load> {
    buffer: &'load [u8],
    position: usize,
}
//
impl Iterator for NestedRecords<'_> {
    type Item = Result<Record, FasterError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.buffer[self.position..];
        if remaining.len() < HEADER_SIZE {
            return None;
        }
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&remaining[..HEADER_SIZE]);
        let header = match RecordHeader::parse(&header_bytes, self.position as u64) {
            Ok(header) => header,
            Err(e) => {
                self.position = self.buffer.len();
                return Some(Err(e));
            }
        };
        let needed = HEADER_SIZE + header.load_size;
        if remaining.len() < needed {
            self.position = self.buffer.len();
            return Some(Err(FasterError::TruncatedGroup {
                needed,
                available: remaining.len(),
            }));
        }
        let load = remaining[HEADER_SIZE..needed].to_vec();
        self.position += needed;
        Some(Ok(Record { header, load }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let record = Record::new(alias::QDC_X1, 0x0000_1234_5678_9ABC, 1002, vec![1, 2, 3, 4]);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[0], alias::QDC_X1);
        assert_eq!(bytes[1], MAGIC);
        assert_eq!(&bytes[2..8], &[0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(&bytes[8..10], &1002u16.to_le_bytes());
        assert_eq!(&bytes[10..12], &4u16.to_le_bytes());
    }

    #[test]
    fn clock_is_converted_to_nanoseconds() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[1] = MAGIC;
        bytes[2] = 100;
        let header = RecordHeader::parse(&bytes, 0).expect("valid header");
        assert_eq!(header.clock, 100);
        assert_eq!(header.time_ns(), 200.0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[1] = 0x55;
        let err = RecordHeader::parse(&bytes, 24).expect_err("magic must be checked");
        assert!(matches!(
            err,
            FasterError::BadMagic {
                found: 0x55,
                offset: 24
            }
        ));
    }

    #[test]
    fn oversized_loads_are_rejected() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[1] = MAGIC;
        bytes[10..12].copy_from_slice(&9000u16.to_le_bytes());
        assert!(matches!(
            RecordHeader::parse(&bytes, 0),
            Err(FasterError::OversizedLoad { size: 9000, .. })
        ));
    }

    #[test]
    fn nested_records_are_split() {
        let a = Record::new(alias::QDC_X1, 10, 1, vec![0; 4]);
        let b = Record::new(alias::QDC_X1, 12, 2, vec![0; 4]);
        let mut load = a.to_bytes();
        load.extend(b.to_bytes());
        let group = Record::new(alias::GROUP, 10, 0, load);
        let nested = group
            .nested()
            .collect::<Result<Vec<_>, _>>()
            .expect("well-formed group");
        assert_eq!(nested, vec![a, b]);
    }

    #[test]
    fn truncated_nested_record_is_an_error() {
        let a = Record::new(alias::QDC_X1, 10, 1, vec![0; 4]);
        let mut load = a.to_bytes();
        load.truncate(14);
        let group = Record::new(alias::GROUP, 10, 0, load);
        let mut nested = group.nested();
        assert!(matches!(
            nested.next(),
            Some(Err(FasterError::TruncatedGroup { needed: 16, available: 14 }))
        ));
        assert!(nested.next().is_none());
    }

    #[test]
    fn qdc_aliases_are_recognized() {
        assert_eq!(alias::qdc_channels(alias::QDC_X1), Some(1));
        assert_eq!(alias::qdc_channels(alias::QDC_TDC_X3), Some(3));
        assert_eq!(alias::qdc_channels(alias::QDC_TOF_X4), Some(4));
        assert_eq!(alias::qdc_channels(alias::GROUP), None);
        assert!(alias::has_tdc(alias::QDC_TDC_X2));
        assert!(!alias::has_tdc(alias::QDC_X2));
    }
}
