//! Reading `.fast` files from disk, plain and gzipped

use compton_coincidence::{
    calibration::{CalibrationPair, LinearCalibration},
    coincidence::{coincidence_histogram, COINCIDENCE_BINNING},
    faster::{alias, read_events, QdcCharge, Record},
};
use flate2::{write::GzEncoder, Compression};
use std::{fs::File, io::Write, path::Path};

fn qdc_record(clock: u64, label: u16, charge: i32) -> Record {
    let word = QdcCharge {
        value: charge,
        saturated: false,
    }
    .to_word();
    Record::new(alias::QDC_X1, clock, label, word.to_le_bytes().to_vec())
}

/// A coincidence between both detectors followed by a single hit
fn acquisition() -> Vec<u8> {
    let mut load = qdc_record(1000, 1001, 340).to_bytes();
    load.extend(qdc_record(1002, 1002, 171).to_bytes());
    let mut bytes = Record::new(alias::GROUP, 1000, 0, load).to_bytes();
    bytes.extend(qdc_record(5000, 1001, 662).to_bytes());
    bytes
}

fn write_plain(path: &Path, bytes: &[u8]) {
    File::create(path).unwrap().write_all(bytes).unwrap();
}

fn write_gzipped(path: &Path, bytes: &[u8]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap();
}

fn unit_calibrations() -> CalibrationPair {
    let unit = LinearCalibration {
        gain: 1.,
        offset: 0.,
    };
    CalibrationPair {
        detector_1: unit,
        detector_2: unit,
    }
}

#[test]
fn plain_and_gzipped_files_give_the_same_events() {
    let dir = tempfile::tempdir().unwrap();
    let plain = dir.path().join("run_0001.fast");
    let gzipped = dir.path().join("run_0002.fast");
    write_plain(&plain, &acquisition());
    write_gzipped(&gzipped, &acquisition());

    let events = read_events(&plain).unwrap();
    assert_eq!(events, read_events(&gzipped).unwrap());
    assert_eq!(events.len(), 2);

    let group = &events[0];
    assert_eq!(group.multiplicity, 2);
    assert_eq!(group.charges_of(1).collect::<Vec<_>>(), vec![340]);
    assert_eq!(group.charges_of(2).collect::<Vec<_>>(), vec![171]);
    assert_eq!(group.sub_events[1].delta_t_ns, 4.);

    let single = &events[1];
    assert_eq!(single.multiplicity, 1);
    assert_eq!(single.sub_events[0].charge, 662);
}

#[test]
fn interrupted_acquisition_keeps_complete_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interrupted.fast");
    let mut bytes = acquisition();
    bytes.extend(&qdc_record(9000, 1002, 100).to_bytes()[..7]);
    write_plain(&path, &bytes);
    assert_eq!(read_events(&path).unwrap().len(), 2);
}

#[test]
fn corrupted_and_missing_files_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupted.fast");
    let mut bytes = acquisition();
    bytes[1] = 0x42;
    write_plain(&path, &bytes);
    assert!(read_events(&path).is_err());
    assert!(read_events(dir.path().join("missing.fast")).is_err());
}

#[test]
fn events_from_disk_fill_the_coincidence_histogram() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("compton.fast");
    write_gzipped(&path, &acquisition());
    let events = read_events(&path).unwrap();
    let h = coincidence_histogram(&events, &unit_calibrations(), &COINCIDENCE_BINNING).unwrap();
    assert_eq!(h.entries(), 1);
    assert_eq!(h.content(34, 17), 1.);
}
