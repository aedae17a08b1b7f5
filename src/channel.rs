use crate::protocol::DecodedMessage;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChannelKind {
    /// Real valued reading, shown when inside `min..=max`.
    Measurement,
    /// Sensor health flag: 0 = OK, 1 = fault.
    Sensor,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelSpec {
    pub id: u8,
    pub label: String,
    pub kind: ChannelKind,
    #[cfg_attr(feature = "serde", serde(default))]
    pub min: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub max: f64,
    /// Has a dial gauge on the monitor front panel.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gauge: bool,
}

impl ChannelSpec {
    pub fn measurement(id: u8, label: &str, min: f64, max: f64) -> Self {
        Self {
            id,
            label: label.to_string(),
            kind: ChannelKind::Measurement,
            min,
            max,
            gauge: false,
        }
    }

    pub fn sensor(id: u8, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            kind: ChannelKind::Sensor,
            min: 0.0,
            max: 1.0,
            gauge: false,
        }
    }

    pub fn with_gauge(mut self) -> Self {
        self.gauge = true;
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorState {
    Ok,
    Fault,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SensorState::Ok => write!(f, "OK"),
            SensorState::Fault => write!(f, "ERROR"),
        }
    }
}

/// What a display consumer should do with one decoded reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection<'a> {
    Measurement { spec: &'a ChannelSpec, value: f64 },
    Sensor { spec: &'a ChannelSpec, state: SensorState },
    /// Known channel, value outside the plausible range; not displayed.
    OutOfRange { spec: &'a ChannelSpec, value: f64 },
    Unknown { channel_id: u8, value: f64 },
}

// (label, max, gauge) for ids 0x01.., the sensor status of the same measurement is at
// id + 0x10
const ENGINE_CHANNELS: [(&str, f64, bool); 15] = [
    ("Oil Pressure", 1000.0, true),
    ("Oil Temp", 400.0, true),
    ("Fuel Flow", 800.0, false),
    ("Fuel", 800.0, true),
    ("EGT", 400.0, false),
    ("Torque", 400.0, true),
    ("Indicated Power", 400.0, false),
    ("Friction Power", 400.0, false),
    ("Therm Efficiency", 100.0, false),
    ("Air-Fuel Ratio", 20.0, false),
    ("Motor Speed", 1000.0, true),
    ("Output Air Speed", 1000.0, false),
    ("Vibration", 100.0, true),
    ("Body Temp", 400.0, false),
    ("Air Temp", 400.0, false),
];
const SENSOR_CHANNEL_OFFSET: u8 = 0x10;

/// Display value with one decimal, as shown on the panel.
///
/// Rounds through the same `{:.1}` formatting the CSV records use, so the shown and
/// the stored value never differ.
pub fn display_value(value: f64) -> f64 {
    format!("{value:.1}").parse().unwrap_or(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTable {
    channels: BTreeMap<u8, ChannelSpec>,
}

impl ChannelTable {
    /// Later specs replace earlier ones with the same id.
    pub fn new(specs: impl IntoIterator<Item = ChannelSpec>) -> Self {
        Self {
            channels: specs.into_iter().map(|spec| (spec.id, spec)).collect(),
        }
    }

    pub fn get(&self, channel_id: u8) -> Option<&ChannelSpec> {
        self.channels.get(&channel_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn project(&self, channel_id: u8, scaled_value: f64) -> Projection<'_> {
        let value = display_value(scaled_value);
        let Some(spec) = self.get(channel_id) else {
            return Projection::Unknown { channel_id, value };
        };
        match spec.kind {
            ChannelKind::Measurement if spec.contains(value) => {
                Projection::Measurement { spec, value }
            }
            ChannelKind::Sensor if value == 0.0 => Projection::Sensor {
                spec,
                state: SensorState::Ok,
            },
            ChannelKind::Sensor if value == 1.0 => Projection::Sensor {
                spec,
                state: SensorState::Fault,
            },
            _ => {
                log::debug!(
                    "Channel {:02X} ({}) value {value} outside {}..={}",
                    channel_id,
                    spec.label,
                    spec.min,
                    spec.max
                );
                Projection::OutOfRange { spec, value }
            }
        }
    }

    /// Projects every entry of `message` in payload order.
    pub fn project_message<'a>(
        &'a self,
        message: &'a DecodedMessage,
    ) -> impl Iterator<Item = Projection<'a>> + 'a {
        message
            .readings()
            .map(move |(channel_id, value)| self.project(channel_id, value))
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        let measurements = ENGINE_CHANNELS
            .iter()
            .zip(1u8..)
            .map(|(&(label, max, gauge), id)| {
                let spec = ChannelSpec::measurement(id, label, 0.0, max);
                if gauge {
                    spec.with_gauge()
                } else {
                    spec
                }
            });
        let sensors = ENGINE_CHANNELS
            .iter()
            .zip(1u8..)
            .map(|(&(label, _, _), id)| {
                ChannelSpec::sensor(id + SENSOR_CHANNEL_OFFSET, &format!("{label} Sensor"))
            });
        Self::new(measurements.chain(sensors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DecodedEntry;
    use test_case::test_case;

    #[test]
    fn default_table_layout() {
        let table = ChannelTable::default();
        assert_eq!(table.len(), 30);
        let oil = table.get(0x01).unwrap();
        assert_eq!(oil.label, "Oil Pressure");
        assert_eq!((oil.min, oil.max), (0.0, 1000.0));
        assert!(oil.gauge);
        assert!(!table.get(0x03).unwrap().gauge);
        assert_eq!(table.get(0x0a).unwrap().max, 20.0);
        let sensor = table.get(0x1f).unwrap();
        assert_eq!(sensor.label, "Air Temp Sensor");
        assert_eq!(sensor.kind, ChannelKind::Sensor);
        assert!(table.get(0x10).is_none());
        assert!(table.get(0x20).is_none());
    }

    #[test_case(0x01, 0.0; "lower bound")]
    #[test_case(0x01, 1000.0; "upper bound")]
    #[test_case(0x0a, 14.7; "air fuel ratio")]
    fn measurement_in_range(channel_id: u8, value: f64) {
        let table = ChannelTable::default();
        match table.project(channel_id, value) {
            Projection::Measurement { spec, value: shown } => {
                assert_eq!(spec.id, channel_id);
                assert_eq!(shown, value);
            }
            other => panic!("unexpected projection {other:?}"),
        }
    }

    #[test_case(0x02, 400.1; "oil temp above")]
    #[test_case(0x0a, 20.5; "air fuel ratio above")]
    #[test_case(0x15, 2.0; "unknown sensor code")]
    fn value_out_of_range(channel_id: u8, value: f64) {
        let table = ChannelTable::default();
        assert!(matches!(
            table.project(channel_id, value),
            Projection::OutOfRange { .. }
        ));
    }

    #[test]
    fn projection_rounds_to_one_decimal() {
        let table = ChannelTable::default();
        // 400.04 is shown as 400.0 and therefore still inside the oil temp range
        assert_eq!(
            table.project(0x02, 400.04),
            Projection::Measurement {
                spec: table.get(0x02).unwrap(),
                value: 400.0
            }
        );
    }

    #[test]
    fn sensor_states() {
        let table = ChannelTable::default();
        assert_eq!(
            table.project(0x11, 0.0),
            Projection::Sensor {
                spec: table.get(0x11).unwrap(),
                state: SensorState::Ok
            }
        );
        assert_eq!(
            table.project(0x11, 1.0),
            Projection::Sensor {
                spec: table.get(0x11).unwrap(),
                state: SensorState::Fault
            }
        );
        assert_eq!(SensorState::Fault.to_string(), "ERROR");
    }

    #[test]
    fn unknown_channel_passes_value_through() {
        let table = ChannelTable::default();
        assert_eq!(
            table.project(0x42, 12.5),
            Projection::Unknown {
                channel_id: 0x42,
                value: 12.5
            }
        );
    }

    #[test]
    fn custom_table_replaces_duplicates() {
        let table = ChannelTable::new([
            ChannelSpec::measurement(0x01, "Boost", 0.0, 3.0),
            ChannelSpec::measurement(0x01, "Boost Pressure", 0.0, 2.5),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0x01).unwrap().label, "Boost Pressure");
        assert!(matches!(
            table.project(0x01, 2.8),
            Projection::OutOfRange { .. }
        ));
    }

    #[test]
    fn project_message_keeps_payload_order() {
        let table = ChannelTable::default();
        let message = DecodedMessage::new(
            1,
            vec![
                DecodedEntry::new(0x0b, 5000, 10),
                DecodedEntry::new(0x01, 2505, 10),
                DecodedEntry::new(0x01, 2505, 10),
            ],
        );
        let ids: Vec<Option<u8>> = table
            .project_message(&message)
            .map(|projection| match projection {
                Projection::Measurement { spec, .. } | Projection::OutOfRange { spec, .. } => {
                    Some(spec.id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![Some(0x0b), Some(0x01), Some(0x01)]);
    }
}
