use crate::error::{DecodeError, ValidationError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fmt;

/// The four payload kinds a node can send, one per request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NodeLog,
    Power,
    Environment,
    Soil,
}

impl MessageKind {
    pub const LOG_PATH: &'static str = "/sensor/log";
    pub const POWER_PATH: &'static str = "/sensor/ina";
    pub const ENVIRONMENT_PATH: &'static str = "/sensor/dht";
    pub const SOIL_PATH: &'static str = "/sensor/moisture";

    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            Self::LOG_PATH => Some(MessageKind::NodeLog),
            Self::POWER_PATH => Some(MessageKind::Power),
            Self::ENVIRONMENT_PATH => Some(MessageKind::Environment),
            Self::SOIL_PATH => Some(MessageKind::Soil),
            _ => None,
        }
    }
}

/// The (node_id, sequence) pair every message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Identity {
    #[serde(rename = "n")]
    pub node_id: Option<i64>,
    #[serde(rename = "s")]
    pub sequence: Option<i64>,
}

impl Identity {
    /// Checks that both identity fields are present and usable as a correlation key.
    ///
    /// A zero counts as missing, the same as an absent field.
    pub fn key(&self) -> Result<CorrelationKey, ValidationError> {
        let node_id = match self.node_id {
            Some(id) if id != 0 => id,
            _ => return Err(ValidationError::MissingNodeId),
        };
        let sequence = match self.sequence {
            Some(seq) if seq != 0 => seq,
            _ => return Err(ValidationError::MissingSequence),
        };

        Ok(CorrelationKey {
            node_id: positive_i32("n", node_id)?,
            sequence: positive_i32("s", sequence)?,
        })
    }
}

fn positive_i32(field: &'static str, value: i64) -> Result<i32, ValidationError> {
    match i32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ValidationError::OutOfRange(field, value)),
    }
}

/// Locates the transmission an auxiliary reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub node_id: i32,
    pub sequence: i32,
}

impl CorrelationKey {
    pub fn new(node_id: i32, sequence: i32) -> Self {
        CorrelationKey { node_id, sequence }
    }

    /// Key of the transmission announced one cycle earlier by the same node
    pub fn previous(&self) -> Option<CorrelationKey> {
        if self.sequence > 1 {
            Some(CorrelationKey::new(self.node_id, self.sequence - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} sequence {}", self.node_id, self.sequence)
    }
}

/// Delivery metrics a node reports for its previous transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionMetrics {
    pub delay: f64,
    pub payload_size: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeLogMessage {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "d")]
    pub delay: Option<f64>,
    #[serde(rename = "p")]
    pub payload_size: Option<f64>,
    #[serde(rename = "t")]
    pub throughput: Option<f64>,
}

impl NodeLogMessage {
    /// Returns the backfill metrics, only if all three are present
    pub fn metrics(&self) -> Option<TransmissionMetrics> {
        Some(TransmissionMetrics {
            delay: self.delay?,
            payload_size: self.payload_size?,
            throughput: self.throughput?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PowerReading {
    #[serde(rename = "c")]
    pub current: Option<f64>,
    #[serde(rename = "v")]
    pub voltage: Option<f64>,
    #[serde(rename = "p")]
    pub power: Option<f64>,
    #[serde(rename = "w")]
    pub power_consumption: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PowerMessage {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(flatten)]
    pub reading: PowerReading,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvironmentReading {
    #[serde(rename = "t")]
    pub temperature: Option<f64>,
    #[serde(rename = "h")]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvironmentMessage {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(flatten)]
    pub reading: EnvironmentReading,
}

/// One sample of a soil moisture batch
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SoilSample {
    #[serde(rename = "o", default, deserialize_with = "integral")]
    pub order: Option<i32>,
    #[serde(rename = "v")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SoilMessage {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "m", default)]
    pub samples: Option<Vec<SoilSample>>,
}

/// Accepts `3` as well as `3.0`, rejects fractions and values beyond `i32`
fn integral<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(value) if value.fract() == 0.0 && value.abs() <= i32::MAX as f64 => {
            Ok(Some(value as i32))
        }
        Some(value) => Err(D::Error::custom(format!("expected an integer, got {}", value))),
    }
}

impl SoilMessage {
    pub fn samples(&self) -> &[SoilSample] {
        self.samples.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorMessage {
    NodeLog(NodeLogMessage),
    Power(PowerMessage),
    Environment(EnvironmentMessage),
    Soil(SoilMessage),
}

impl SensorMessage {
    /// Decodes a request body into the record type selected by `kind`.
    ///
    /// Only checks the syntax; identity fields are validated by the handlers.
    pub fn decode(kind: MessageKind, body: &[u8]) -> Result<SensorMessage, DecodeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        Ok(match kind {
            MessageKind::NodeLog => SensorMessage::NodeLog(serde_json::from_slice(body)?),
            MessageKind::Power => SensorMessage::Power(serde_json::from_slice(body)?),
            MessageKind::Environment => SensorMessage::Environment(serde_json::from_slice(body)?),
            MessageKind::Soil => SensorMessage::Soil(serde_json::from_slice(body)?),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_route_paths() {
        let routes = [
            ("/sensor/log", MessageKind::NodeLog),
            ("/sensor/ina", MessageKind::Power),
            ("/sensor/dht", MessageKind::Environment),
            ("/sensor/moisture", MessageKind::Soil),
        ];
        for (path, kind) in routes {
            assert_eq!(Some(kind), MessageKind::from_path(path));
        }
        assert_eq!(None, MessageKind::from_path("/sensor"));
        assert_eq!(None, MessageKind::from_path("/sensor/log/"));
        assert_eq!(None, MessageKind::from_path("sensor/log"));
    }

    #[test]
    fn test_decode_node_log() {
        let body = br#"{"n":1,"s":2,"d":12,"p":64,"t":500.5}"#;

        let msg = SensorMessage::decode(MessageKind::NodeLog, body).unwrap();

        if let SensorMessage::NodeLog(log) = msg {
            assert_eq!(CorrelationKey::new(1, 2), log.identity.key().unwrap());
            assert_eq!(
                Some(TransmissionMetrics {
                    delay: 12.0,
                    payload_size: 64.0,
                    throughput: 500.5
                }),
                log.metrics()
            );
        } else {
            panic!("decoded wrong kind");
        }
    }

    #[test]
    fn test_partial_metrics_are_ignored() {
        let body = br#"{"n":1,"s":2,"d":12,"t":500}"#;

        let msg = SensorMessage::decode(MessageKind::NodeLog, body).unwrap();

        match msg {
            SensorMessage::NodeLog(log) => assert_eq!(None, log.metrics()),
            _ => panic!("decoded wrong kind"),
        }
    }

    #[test]
    fn test_same_key_different_meaning() {
        // "p" is the payload size on a log and the power on an ina reading
        let body = br#"{"n":3,"s":9,"c":0.2,"v":5.1,"p":1.02,"w":7.5}"#;

        let msg = SensorMessage::decode(MessageKind::Power, body).unwrap();

        match msg {
            SensorMessage::Power(power) => {
                assert_eq!(Some(1.02), power.reading.power);
                assert_eq!(Some(7.5), power.reading.power_consumption);
            }
            _ => panic!("decoded wrong kind"),
        }
    }

    #[test]
    fn test_decode_environment() {
        let body = br#"{"n":2,"s":4,"t":24.5,"h":61}"#;

        let msg = SensorMessage::decode(MessageKind::Environment, body).unwrap();

        match msg {
            SensorMessage::Environment(env) => {
                assert_eq!(Some(24.5), env.reading.temperature);
                assert_eq!(Some(61.0), env.reading.humidity);
            }
            _ => panic!("decoded wrong kind"),
        }
    }

    #[test]
    fn test_soil_samples() {
        let cases: [(&[u8], usize); 4] = [
            (br#"{"n":1,"s":1,"m":[{"o":1,"v":40},{"o":2,"v":38.5}]}"#, 2),
            (br#"{"n":1,"s":1,"m":[]}"#, 0),
            (br#"{"n":1,"s":1,"m":null}"#, 0),
            (br#"{"n":1,"s":1}"#, 0),
        ];

        for (body, expected) in cases {
            match SensorMessage::decode(MessageKind::Soil, body).unwrap() {
                SensorMessage::Soil(soil) => assert_eq!(expected, soil.samples().len()),
                _ => panic!("decoded wrong kind"),
            }
        }
    }

    #[test]
    fn test_float_payload_size() {
        let body = br#"{"n":1,"s":2,"d":12,"p":64.5,"t":500}"#;

        match SensorMessage::decode(MessageKind::NodeLog, body).unwrap() {
            SensorMessage::NodeLog(log) => {
                assert_eq!(Some(64.5), log.metrics().map(|m| m.payload_size))
            }
            _ => panic!("decoded wrong kind"),
        }
    }

    #[test]
    fn test_soil_order() {
        let body = br#"{"n":1,"s":1,"m":[{"o":1.0,"v":3},{"o":2},{"v":4}]}"#;

        let orders: Vec<Option<i32>> = match SensorMessage::decode(MessageKind::Soil, body).unwrap()
        {
            SensorMessage::Soil(soil) => soil.samples().iter().map(|s| s.order).collect(),
            _ => panic!("decoded wrong kind"),
        };

        assert_eq!(vec![Some(1), Some(2), None], orders);
        let fraction = br#"{"n":1,"s":1,"m":[{"o":1.5,"v":3}]}"#;
        assert!(SensorMessage::decode(MessageKind::Soil, fraction).is_err());
    }

    #[test]
    fn test_malformed_bodies() {
        let bodies: [&[u8]; 6] = [
            b"",
            b"  \n",
            b"{\"n\":1,",
            b"42",
            b"{\"n\":\"one\",\"s\":1}",
            &[0xff, 0xfe, 0x00],
        ];

        for body in bodies {
            assert!(SensorMessage::decode(MessageKind::NodeLog, body).is_err());
        }
        let soil = br#"{"n":1,"s":1,"m":{"o":1}}"#;
        assert!(SensorMessage::decode(MessageKind::Soil, soil).is_err());
    }

    #[test]
    fn test_identity_validation() {
        let ident = |n, s| Identity {
            node_id: n,
            sequence: s,
        };

        assert_eq!(
            Err(ValidationError::MissingNodeId),
            ident(None, Some(1)).key()
        );
        assert_eq!(
            Err(ValidationError::MissingNodeId),
            ident(Some(0), Some(1)).key()
        );
        assert_eq!(
            Err(ValidationError::MissingSequence),
            ident(Some(1), None).key()
        );
        assert_eq!(
            Err(ValidationError::OutOfRange("s", -4)),
            ident(Some(1), Some(-4)).key()
        );
        assert_eq!(
            Err(ValidationError::OutOfRange("n", 1 << 40)),
            ident(Some(1 << 40), Some(1)).key()
        );
        assert_eq!(
            Ok(CorrelationKey::new(7, 3)),
            ident(Some(7), Some(3)).key()
        );
    }

    #[test]
    fn test_previous_key() {
        assert_eq!(
            Some(CorrelationKey::new(4, 9)),
            CorrelationKey::new(4, 10).previous()
        );
        assert_eq!(None, CorrelationKey::new(4, 1).previous());
    }
}
