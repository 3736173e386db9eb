//! Assembly of detector events from raw records

use super::{
    qdc::QdcMeasure,
    reader::FasterReader,
    record::{alias, Record, TICK_NS},
};
use crate::error::FasterError;
use std::path::Path;

/// Labels are numbered per crate, the detector is the last three digits
pub fn detector_id(label: u16) -> u16 {
    label % 1000
}

/// One detector hit within an event
#[derive(Clone, Debug, PartialEq)]
pub struct SubEvent {
    /// Channel label of the hit
    pub label: u16,

    /// Time of the hit relative to the event time (ns)
    pub delta_t_ns: f64,

    /// Raw integrated charge (channel)
    pub charge: i32,
}
//
impl SubEvent {
    /// Detector that produced this hit
    pub fn detector(&self) -> u16 {
        detector_id(self.label)
    }
}

/// An acquisition event: a coincidence group or a single hit
#[derive(Clone, Debug, PartialEq)]
pub struct PulseEvent {
    /// Event time (ns)
    pub time_ns: f64,

    /// Label of the top-level record
    pub label: u16,

    /// Number of hits in the event
    pub multiplicity: usize,

    /// Individual hits
    pub sub_events: Vec<SubEvent>,
}
//
impl PulseEvent {
    /// Interpret a top-level record
    ///
    /// Groups give one hit per nested record, group counters give an event
    /// without hits, anything else is a single hit.
    ///
    pub fn from_record(record: &Record) -> Result<Self, FasterError> {
        let header = &record.header;
        let mut event = Self {
            time_ns: header.time_ns(),
            label: header.label,
            multiplicity: 0,
            sub_events: Vec::new(),
        };
        match header.type_alias {
            alias::GROUP => {
                for nested in record.nested() {
                    let nested = nested?;
                    let delta_ticks = nested.header.clock as i64 - header.clock as i64;
                    event.sub_events.push(SubEvent {
                        label: nested.header.label,
                        delta_t_ns: delta_ticks as f64 * TICK_NS,
                        charge: record_charge(&nested),
                    });
                }
                event.multiplicity = event.sub_events.len();
            }
            alias::GROUP_COUNTER => {}
            _ => {
                event.sub_events.push(SubEvent {
                    label: header.label,
                    delta_t_ns: 0.,
                    charge: record_charge(record),
                });
                event.multiplicity = 1;
            }
        }
        Ok(event)
    }

    /// Charges of the hits that come from a given detector
    pub fn charges_of(&self, detector: u16) -> impl Iterator<Item = i32> + '_ {
        self.sub_events
            .iter()
            .filter(move |sub| sub.detector() == detector)
            .map(|sub| sub.charge)
    }
}

/// Charge carried by a record: first QDC window for QDC-like aliases, the
/// first 31-bit word otherwise
fn record_charge(record: &Record) -> i32 {
    if let Some(measure) = QdcMeasure::decode(record.header.type_alias, &record.load) {
        return measure.charges.first().map_or(0, |charge| charge.value);
    }
    if record.load.len() >= 4 {
        let word = u32::from_le_bytes([record.load[0], record.load[1], record.load[2], record.load[3]]);
        ((word << 1) as i32) >> 1
    } else {
        0
    }
}

/// Read every event of a `.fast` file
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<PulseEvent>, FasterError> {
    FasterReader::open(path)?
        .map(|record| record.and_then(|record| PulseEvent::from_record(&record)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faster::QdcCharge;

    fn qdc_record(clock: u64, label: u16, charge: i32) -> Record {
        let word = QdcCharge {
            value: charge,
            saturated: false,
        }
        .to_word();
        Record::new(alias::QDC_X1, clock, label, word.to_le_bytes().to_vec())
    }

    #[test]
    fn group_becomes_multi_hit_event() {
        let mut load = qdc_record(100, 1001, 300_000).to_bytes();
        load.extend(qdc_record(103, 1002, 250_000).to_bytes());
        let group = Record::new(alias::GROUP, 100, 0, load);
        let event = PulseEvent::from_record(&group).expect("valid group");
        assert_eq!(event.time_ns, 200.0);
        assert_eq!(event.multiplicity, 2);
        assert_eq!(event.sub_events[1].delta_t_ns, 6.0);
        assert_eq!(event.sub_events[0].detector(), 1);
        assert_eq!(event.charges_of(2).collect::<Vec<_>>(), vec![250_000]);
    }

    #[test]
    fn single_hit_and_counter_events() {
        let single = PulseEvent::from_record(&qdc_record(7, 2, 1234)).expect("valid record");
        assert_eq!(single.multiplicity, 1);
        assert_eq!(single.sub_events[0].charge, 1234);

        let counter = Record::new(alias::GROUP_COUNTER, 7, 0, vec![0; 8]);
        let counter = PulseEvent::from_record(&counter).expect("valid counter");
        assert_eq!(counter.multiplicity, 0);
        assert!(counter.sub_events.is_empty());
    }

    #[test]
    fn detector_id_strips_crate_number() {
        assert_eq!(detector_id(1001), 1);
        assert_eq!(detector_id(2), 2);
        assert_eq!(detector_id(12002), 2);
    }
}
