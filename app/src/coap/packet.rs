use std::fmt;

use crate::error::PacketError;

pub const VERSION: u8 = 1;
pub const MAX_TOKEN_LENGTH: usize = 8;
pub const PAYLOAD_MARKER: u8 = 0xFF;

pub const OPTION_URI_PATH: u16 = 11;
pub const OPTION_BLOCK1: u16 = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    fn bits(&self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

/// Request method or response code, `class.detail` packed into one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    #[cfg(test)]
    pub const POST: Code = Code(0x02);

    pub const CREATED: Code = Code(0x41);
    pub const CONTINUE: Code = Code(0x5F);
    pub const BAD_REQUEST: Code = Code(0x80);
    pub const BAD_OPTION: Code = Code(0x82);
    pub const NOT_FOUND: Code = Code(0x84);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code(0x88);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code(0x8D);
    pub const INTERNAL_SERVER_ERROR: Code = Code(0xA0);

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1F
    }

    pub fn is_request(&self) -> bool {
        self.class() == 0 && self.detail() != 0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

/// A single CoAP message as it travels in one datagram.
///
/// Options are kept ordered by number, the order they are encoded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub mtype: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(mtype: MessageType, code: Code, message_id: u16) -> Self {
        Packet {
            mtype,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn reset(message_id: u16) -> Self {
        Packet::new(MessageType::Reset, Code::EMPTY, message_id)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Packet, PacketError> {
        if data.len() < 4 {
            return Err(PacketError::Truncated);
        }
        let version = data[0] >> 6;
        if version != VERSION {
            return Err(PacketError::InvalidVersion(version));
        }
        let mtype = MessageType::from_bits(data[0] >> 4);
        let token_length = data[0] & 0x0F;
        if token_length as usize > MAX_TOKEN_LENGTH {
            return Err(PacketError::InvalidTokenLength(token_length));
        }
        let code = Code(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        if code == Code::EMPTY {
            if token_length != 0 || data.len() > 4 {
                return Err(PacketError::TrailingBytes);
            }
            return Ok(Packet::new(mtype, code, message_id));
        }

        let mut pos = 4 + token_length as usize;
        let token = data.get(4..pos).ok_or(PacketError::Truncated)?.to_vec();

        let mut options = Vec::new();
        let mut payload = Vec::new();
        let mut number: u16 = 0;
        while pos < data.len() {
            let byte = data[pos];
            pos += 1;
            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(PacketError::EmptyPayload);
                }
                payload = data[pos..].to_vec();
                break;
            }

            let delta = read_extended(data, &mut pos, byte >> 4)?;
            let length = read_extended(data, &mut pos, byte & 0x0F)?;
            number = u16::try_from(number as usize + delta).map_err(|_| PacketError::InvalidOption)?;

            let value = data.get(pos..pos + length).ok_or(PacketError::Truncated)?;
            options.push(CoapOption {
                number,
                value: value.to_vec(),
            });
            pos += length;
        }

        Ok(Packet {
            mtype,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 16);
        out.push(VERSION << 6 | self.mtype.bits() << 4 | self.token.len() as u8);
        out.push(self.code.0);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut previous = 0;
        for option in &self.options {
            let (delta, delta_ext) = split_extended((option.number - previous) as usize);
            let (length, length_ext) = split_extended(option.value.len());
            out.push(delta << 4 | length);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&length_ext);
            out.extend_from_slice(&option.value);
            previous = option.number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        out
    }

    pub fn option(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|option| option.number == number)
            .map(|option| option.value.as_slice())
    }

    pub fn add_option(&mut self, number: u16, value: Vec<u8>) {
        let index = self
            .options
            .iter()
            .position(|option| option.number > number)
            .unwrap_or(self.options.len());
        self.options.insert(index, CoapOption { number, value });
    }

    /// Joins the Uri-Path segments to `/a/b`. A `/` or `%` inside a segment is
    /// percent-encoded so that `["sensor/log"]` never equals `["sensor", "log"]`.
    pub fn uri_path(&self) -> String {
        let mut path = String::new();
        for option in self.options.iter().filter(|o| o.number == OPTION_URI_PATH) {
            path.push('/');
            for c in String::from_utf8_lossy(&option.value).chars() {
                match c {
                    '%' => path.push_str("%25"),
                    '/' => path.push_str("%2F"),
                    c => path.push(c),
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

/// Type and message id of a datagram that failed to parse, if the header is intact
pub fn peek_header(data: &[u8]) -> Option<(MessageType, u16)> {
    if data.len() < 4 || data[0] >> 6 != VERSION {
        return None;
    }
    Some((
        MessageType::from_bits(data[0] >> 4),
        u16::from_be_bytes([data[2], data[3]]),
    ))
}

pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0u32, |acc, b| acc << 8 | *b as u32))
}

fn read_extended(data: &[u8], pos: &mut usize, nibble: u8) -> Result<usize, PacketError> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let ext = *data.get(*pos).ok_or(PacketError::Truncated)?;
            *pos += 1;
            Ok(ext as usize + 13)
        }
        14 => {
            let ext = data.get(*pos..*pos + 2).ok_or(PacketError::Truncated)?;
            *pos += 2;
            Ok(u16::from_be_bytes([ext[0], ext[1]]) as usize + 269)
        }
        _ => Err(PacketError::InvalidOption),
    }
}

fn split_extended(value: usize) -> (u8, Vec<u8>) {
    if value < 13 {
        (value as u8, Vec::new())
    } else if value < 269 {
        (13, vec![(value - 13) as u8])
    } else {
        (14, ((value - 269) as u16).to_be_bytes().to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn post(path: &str, payload: &[u8]) -> Packet {
        let mut packet = Packet::new(MessageType::Confirmable, Code::POST, 0x1234);
        packet.token = vec![0xCA, 0xFE];
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(OPTION_URI_PATH, segment.as_bytes().to_vec());
        }
        packet.payload = payload.to_vec();
        packet
    }

    #[test]
    fn test_parse_request() {
        // CON POST mid=0x1234 token=CAFE Uri-Path "sensor" "log" payload "{}"
        let data = [
            0x42, 0x02, 0x12, 0x34, 0xCA, 0xFE, 0xB6, b's', b'e', b'n', b's', b'o', b'r', 0x03,
            b'l', b'o', b'g', 0xFF, b'{', b'}',
        ];

        let packet = Packet::from_bytes(&data).unwrap();

        assert_eq!(MessageType::Confirmable, packet.mtype);
        assert_eq!(Code::POST, packet.code);
        assert_eq!(0x1234, packet.message_id);
        assert_eq!(vec![0xCA, 0xFE], packet.token);
        assert_eq!("/sensor/log", packet.uri_path());
        assert_eq!(b"{}".to_vec(), packet.payload);
        assert_eq!(data.to_vec(), packet.to_bytes());
    }

    #[test]
    fn test_extended_option_fields() {
        let mut packet = post("/sensor/moisture", b"x");
        // Uri-Query
        packet.add_option(15, b"a=1".to_vec());
        packet.add_option(300, vec![7; 20]);
        packet.add_option(OPTION_BLOCK1, encode_uint(0x1E));

        let parsed = Packet::from_bytes(&packet.to_bytes()).unwrap();

        assert_eq!(packet, parsed);
        assert_eq!("/sensor/moisture", parsed.uri_path());
        assert_eq!(Some(&[0x1E][..]), parsed.option(OPTION_BLOCK1));
        assert_eq!(Some(&[7u8; 20][..]), parsed.option(300));
    }

    #[test]
    fn test_empty_path() {
        let packet = post("", b"");
        assert_eq!("/", packet.uri_path());
    }

    #[test]
    fn test_path_segment_escaping() {
        let mut packet = Packet::new(MessageType::Confirmable, Code::POST, 1);
        packet.add_option(OPTION_URI_PATH, b"sensor/log".to_vec());
        assert_eq!("/sensor%2Flog", packet.uri_path());

        let mut packet = Packet::new(MessageType::Confirmable, Code::POST, 2);
        packet.add_option(OPTION_URI_PATH, b"50%".to_vec());
        packet.add_option(OPTION_URI_PATH, b"log".to_vec());
        assert_eq!("/50%25/log", packet.uri_path());

        assert_eq!("/sensor/log", post("/sensor/log", b"").uri_path());
    }

    #[test]
    fn test_empty_message() {
        let ping = Packet::from_bytes(&[0x40, 0x00, 0x00, 0x07]).unwrap();
        assert_eq!(Code::EMPTY, ping.code);
        assert_eq!(7, ping.message_id);

        assert_eq!(vec![0x70, 0x00, 0x00, 0x07], Packet::reset(7).to_bytes());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            Packet::from_bytes(&[0x40, 0x02]),
            Err(PacketError::Truncated)
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x80, 0x02, 0x00, 0x01]),
            Err(PacketError::InvalidVersion(2))
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x49, 0x02, 0x00, 0x01]),
            Err(PacketError::InvalidTokenLength(9))
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x44, 0x02, 0x00, 0x01, 0xAA]),
            Err(PacketError::Truncated)
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x40, 0x02, 0x00, 0x01, 0xFF]),
            Err(PacketError::EmptyPayload)
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x40, 0x02, 0x00, 0x01, 0xF1, 0x00]),
            Err(PacketError::InvalidOption)
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x40, 0x02, 0x00, 0x01, 0xB4, b'a']),
            Err(PacketError::Truncated)
        ));
        assert!(matches!(
            Packet::from_bytes(&[0x40, 0x00, 0x00, 0x01, 0xFF]),
            Err(PacketError::TrailingBytes)
        ));
    }

    #[test]
    fn test_peek_header() {
        assert_eq!(
            Some((MessageType::Confirmable, 0x0102)),
            peek_header(&[0x40, 0x02, 0x01, 0x02, 0xFF])
        );
        assert_eq!(None, peek_header(&[0x40, 0x02]));
    }

    #[test]
    fn test_uint() {
        assert_eq!(Vec::<u8>::new(), encode_uint(0));
        assert_eq!(vec![0x01, 0x00], encode_uint(256));
        assert_eq!(Some(256), decode_uint(&[0x01, 0x00]));
        assert_eq!(Some(0), decode_uint(&[]));
        assert_eq!(None, decode_uint(&[1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_code_display() {
        assert_eq!("2.01", Code::CREATED.to_string());
        assert_eq!("4.04", Code::NOT_FOUND.to_string());
        assert_eq!("2.31", Code::CONTINUE.to_string());
        assert!(Code::POST.is_request());
        assert!(!Code::CREATED.is_request());
        assert!(!Code::EMPTY.is_request());
    }
}
