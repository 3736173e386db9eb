//! Payload decoding for charge-to-digital converters and counters

use super::record::alias;

/// Charge LSB in mV·ns (2 × 2390 mV / 2^17 over a 2 ns sample)
pub const CHARGE_MV_NS_PER_LSB: f64 = 0.036468506 * 2.0;

/// High-resolution clock LSB in ns (2 ns / 256)
pub const TDC_NS_PER_LSB: f64 = 7.8125e-3;

/// One integrated charge from a QDC word
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QdcCharge {
    /// Signed 31-bit charge, in LSB
    pub value: i32,

    /// Truth that the integrator saturated
    pub saturated: bool,
}
//
impl QdcCharge {
    /// Split a 32-bit QDC word into its 31-bit signed charge and its
    /// saturation bit (the most significant one)
    pub fn from_word(word: u32) -> Self {
        Self {
            value: ((word << 1) as i32) >> 1,
            saturated: (word >> 31) != 0,
        }
    }

    /// Encode the charge back into a QDC word
    pub fn to_word(self) -> u32 {
        (self.value as u32 & 0x7FFF_FFFF) | ((self.saturated as u32) << 31)
    }

    /// Charge in mV·ns
    pub fn mv_ns(self) -> f64 {
        self.value as f64 * CHARGE_MV_NS_PER_LSB
    }
}

/// Decoded payload of a QDC, QDC-TDC or QDC-TOF record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QdcMeasure {
    /// Charges of the integration windows
    pub charges: Vec<QdcCharge>,

    /// Fine time, when the alias carries one
    pub tdc: Option<i32>,
}
//
impl QdcMeasure {
    /// Decode the payload of a record with the given alias
    ///
    /// Returns `None` for non-QDC aliases and for payloads too short for
    /// their alias.
    ///
    pub fn decode(type_alias: u8, load: &[u8]) -> Option<Self> {
        let channels = alias::qdc_channels(type_alias)?;
        let has_tdc = alias::has_tdc(type_alias);
        let needed = 4 * (channels + has_tdc as usize);
        if load.len() < needed {
            return None;
        }
        let mut words = load.chunks_exact(4).map(read_u32);
        let charges = (&mut words)
            .take(channels)
            .map(QdcCharge::from_word)
            .collect();
        let tdc = if has_tdc {
            words.next().map(|word| word as i32)
        } else {
            None
        };
        Some(Self { charges, tdc })
    }

    /// Fine time in ns, when available
    pub fn tdc_ns(&self) -> Option<f64> {
        self.tdc.map(|tdc| tdc as f64 * TDC_NS_PER_LSB)
    }
}

/// Payload of a group counter record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupCounter {
    /// Number of groups built
    pub mult: u32,

    /// Coincidence window
    pub delta_t: u32,
}
//
impl GroupCounter {
    /// Decode from a record payload
    pub fn decode(load: &[u8]) -> Option<Self> {
        let (mult, delta_t) = read_u32_pair(load)?;
        Some(Self { mult, delta_t })
    }
}

/// Payload of a QDC counter record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QdcCounter {
    /// Number of computed measures
    pub calc: u32,

    /// Number of measures sent to the acquisition
    pub sent: u32,
}
//
impl QdcCounter {
    /// Decode from a record payload
    pub fn decode(load: &[u8]) -> Option<Self> {
        let (calc, sent) = read_u32_pair(load)?;
        Some(Self { calc, sent })
    }
}

fn read_u32(chunk: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&chunk[..4]);
    u32::from_le_bytes(word)
}

fn read_u32_pair(load: &[u8]) -> Option<(u32, u32)> {
    if load.len() < 8 {
        return None;
    }
    Some((read_u32(&load[0..4]), read_u32(&load[4..8])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_word_sign_extension() {
        let positive = QdcCharge::from_word(1000);
        assert_eq!(positive.value, 1000);
        assert!(!positive.saturated);

        let negative = QdcCharge::from_word(0x7FFF_FFFF);
        assert_eq!(negative.value, -1);
        assert!(!negative.saturated);

        let saturated = QdcCharge::from_word(0x8000_0010);
        assert_eq!(saturated.value, 16);
        assert!(saturated.saturated);

        let charge = QdcCharge {
            value: -42,
            saturated: true,
        };
        assert_eq!(QdcCharge::from_word(charge.to_word()), charge);
    }

    #[test]
    fn qdc_tdc_payload() {
        let mut load = QdcCharge {
            value: 250_000,
            saturated: false,
        }
        .to_word()
        .to_le_bytes()
        .to_vec();
        load.extend((-128i32).to_le_bytes());
        let measure = QdcMeasure::decode(alias::QDC_TDC_X1, &load).expect("QDC-TDC payload");
        assert_eq!(measure.charges.len(), 1);
        assert_eq!(measure.charges[0].value, 250_000);
        assert_eq!(measure.tdc, Some(-128));
        assert!((measure.tdc_ns().unwrap_or_default() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_or_foreign_payloads_are_not_decoded() {
        assert!(QdcMeasure::decode(alias::QDC_X2, &[0; 4]).is_none());
        assert!(QdcMeasure::decode(alias::GROUP, &[0; 16]).is_none());
        assert!(GroupCounter::decode(&[0; 7]).is_none());
    }

    #[test]
    fn counters() {
        let mut load = 7u32.to_le_bytes().to_vec();
        load.extend(600u32.to_le_bytes());
        assert_eq!(
            GroupCounter::decode(&load),
            Some(GroupCounter {
                mult: 7,
                delta_t: 600
            })
        );
        assert_eq!(
            QdcCounter::decode(&load),
            Some(QdcCounter {
                calc: 7,
                sent: 600
            })
        );
    }

    #[test]
    fn charge_conversion() {
        let charge = QdcCharge {
            value: 1000,
            saturated: false,
        };
        assert!((charge.mv_ns() - 72.937012).abs() < 1e-6);
    }
}
