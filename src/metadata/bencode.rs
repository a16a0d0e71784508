use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use thiserror::Error;

const MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Integer(i64),
    ByteString(Vec<u8>),
    List(Vec<BencodeValue>),
    Dictionary(BTreeMap<Vec<u8>, BencodeValue>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("{num_remaining} unconsumed bytes after the top-level value")]
    UnconsumedContents {num_remaining: usize},
    #[error("input ended in the middle of a value")]
    InsufficientContents,
    #[error("unknown type specifier {value:#04x} at byte {pos}")]
    UnknownType {pos: usize, value: u8},
    #[error("integer at byte {pos} has leading zeros")]
    IntegerWithLeadingZeros {pos: usize},
    #[error("integer at byte {pos} has no digits")]
    EmptyInteger {pos: usize},
    #[error("integer at byte {pos} is not representable")]
    IllegalInteger {pos: usize},
    #[error("value at byte {pos} is missing its 'e' terminator")]
    UnterminatedValue {pos: usize},
    #[error("string length at byte {pos} is not representable")]
    IllegalStringLength {pos: usize},
    #[error("expected ':' after string length at byte {pos}")]
    StringMissingSeparator {pos: usize},
    #[error("dictionary key at byte {pos} is not a byte string")]
    IllegalDictionaryKeyType {pos: usize},
    #[error("dictionary key {name:?} appears more than once")]
    DuplicateDictionaryKey {name: String},
    #[error("values are nested too deeply")]
    NestingTooDeep,
}

type Result<T> = std::result::Result<T, BencodeError>;

/// A decoded document that remembers where each top-level dictionary value
/// came from, so callers can hash or forward the exact source bytes.
#[derive(Debug)]
pub struct BencodeDocument<'a> {
    source: &'a [u8],
    value: BencodeValue,
    spans: BTreeMap<Vec<u8>, Range<usize>>,
}

impl<'a> BencodeDocument<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut spans = BTreeMap::new();
        let mut parser = BencodeParser::new(bytes);
        let value = parser.deserialize(Some(&mut spans))?;
        Ok(BencodeDocument { source: bytes, value, spans })
    }

    pub fn value(&self) -> &BencodeValue {
        &self.value
    }

    /// Verbatim bytes of the top-level dictionary value stored under `key`.
    pub fn raw(&self, key: &[u8]) -> Option<&'a [u8]> {
        let source = self.source;
        self.spans.get(key).map(|range| &source[range.clone()])
    }
}

#[derive(Debug)]
struct BencodeParser<'a> {
    contents: &'a [u8],
    pos: usize,
    depth: usize,
}

fn write_bytes(bytes: &[u8], f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", hex::encode_upper(bytes))
}

fn write_byte_string(bytes: &[u8], f: &mut fmt::Formatter) -> fmt::Result {
    match std::str::from_utf8(bytes) {
        Ok(s) if bytes.iter().all(|byte| (0x20..=0x7e).contains(byte)) => write!(f, "{}", s),
        _ => write_bytes(bytes, f),
    }
}

impl fmt::Display for BencodeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BencodeValue::Integer(num) => write!(f, "{}", num),
            BencodeValue::ByteString(bytes) => write_byte_string(bytes, f),
            BencodeValue::List(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            },
            BencodeValue::Dictionary(items) => {
                write!(f, "{{")?;
                for (i, (key, value)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_byte_string(key, f)?;
                    write!(f, " => {}", value)?;
                }
                write!(f, "}}")
            },
        }
    }
}

impl TryFrom<&[u8]> for BencodeValue {
    type Error = BencodeError;
    fn try_from(bytes: &[u8]) -> Result<Self> {
        let mut parser = BencodeParser::new(bytes);
        parser.deserialize(None)
    }
}

impl BencodeValue {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            BencodeValue::Integer(i) => out.extend(format!("i{}e", i).as_bytes()),
            BencodeValue::ByteString(bytes) => {
                out.extend(format!("{}:", bytes.len()).as_bytes());
                out.extend_from_slice(bytes);
            },
            BencodeValue::List(elements) => {
                out.push(b'l');
                for element in elements {
                    element.encode_into(out);
                }
                out.push(b'e');
            },
            BencodeValue::Dictionary(items) => {
                out.push(b'd');
                for (key, value) in items {
                    out.extend(format!("{}:", key.len()).as_bytes());
                    out.extend_from_slice(key);
                    value.encode_into(out);
                }
                out.push(b'e');
            },
        }
    }

    pub fn as_dictionary(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dictionary(items) => Some(items),
            _ => None,
        }
    }
}

/// Canonical encoding: dictionary keys in byte order, integers in minimal form.
impl From<&BencodeValue> for Vec<u8> {
    fn from(value: &BencodeValue) -> Vec<u8> {
        let mut v = Vec::new();
        value.encode_into(&mut v);
        v
    }
}

impl<'a> BencodeParser<'a> {

    fn new(contents: &'a [u8]) -> Self {
        Self {contents, pos: 0, depth: 0}
    }

    fn deserialize(&mut self, spans: Option<&mut BTreeMap<Vec<u8>, Range<usize>>>) -> Result<BencodeValue> {
        let value = match spans {
            Some(spans) if self.peek()? == b'd' => self.parse_dictionary(Some(spans))?,
            _ => self.parse_value()?,
        };
        if self.pos != self.contents.len() {
            Err(BencodeError::UnconsumedContents {num_remaining: self.contents.len() - self.pos})
        } else {
            Ok(value)
        }
    }

    fn parse_value(&mut self) -> Result<BencodeValue> {
        let first: u8 = self.peek()?;
        match first {
            b'i' => self.parse_integer(),
            b'l' => self.nested(Self::parse_list),
            b'd' => self.nested(|parser| parser.parse_dictionary(None)),
            b'0'..=b'9' => self.parse_string().map(BencodeValue::ByteString),
            _ => Err(BencodeError::UnknownType{pos: self.pos, value: first})
        }
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<BencodeValue>) -> Result<BencodeValue> {
        if self.depth >= MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        self.depth += 1;
        let value = parse(self);
        self.depth -= 1;
        value
    }

    fn parse_integer_value(&mut self, leading_zeros_allowed: bool) -> Result<i64> {
        let start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }
        let slice = &self.contents[start..self.pos];
        if slice.is_empty() {
            return Err(BencodeError::EmptyInteger { pos: start });
        }
        if !leading_zeros_allowed && slice[0] == b'0' && slice.len() > 1 {
            return Err(BencodeError::IntegerWithLeadingZeros { pos: start });
        }

        let s = std::str::from_utf8(slice).map_err(|_| BencodeError::IllegalInteger { pos: start })?;
        s.parse::<i64>().map_err(|_| BencodeError::IllegalInteger { pos: start })
    }

    fn parse_integer(&mut self) -> Result<BencodeValue> {
        let start = self.pos;
        self.pos += 1;
        let negative = self.peek()? == b'-';
        if negative {
            self.pos += 1;
        }
        let value: i64 = self.parse_integer_value(false)?;
        if value == 0 && negative {
            return Err(BencodeError::IllegalInteger { pos: start })
        }
        self.expect_end()?;
        self.pos += 1;
        Ok(BencodeValue::Integer(if negative { -value } else { value }))
    }

    fn parse_string(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;
        let length: i64 = self.parse_integer_value(true)?;
        if self.peek()? != b':' {
            return Err(BencodeError::StringMissingSeparator { pos: self.pos })
        }
        self.pos += 1;
        let length = usize::try_from(length).map_err(|_| BencodeError::IllegalStringLength { pos: start })?;
        if length > self.contents.len() - self.pos {
            return Err(BencodeError::InsufficientContents);
        }
        let bytes = self.contents[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(bytes)
    }

    fn parse_list(&mut self) -> Result<BencodeValue> {
        self.pos += 1;
        let mut values: Vec<BencodeValue> = Vec::new();
        while self.peek()? != b'e' {
            values.push(self.parse_value()?);
        }
        self.pos += 1;
        Ok(BencodeValue::List(values))
    }

    fn parse_dictionary(&mut self, mut spans: Option<&mut BTreeMap<Vec<u8>, Range<usize>>>) -> Result<BencodeValue> {
        self.pos += 1;
        let mut map: BTreeMap<Vec<u8>, BencodeValue> = BTreeMap::new();
        loop {
            let next = self.peek()?;
            if next == b'e' {
                break
            }
            if !next.is_ascii_digit() {
                return Err(BencodeError::IllegalDictionaryKeyType { pos: self.pos });
            }
            let key = self.parse_string()?;

            if map.contains_key(&key) {
                let name = String::from_utf8_lossy(&key).into_owned();
                return Err(BencodeError::DuplicateDictionaryKey { name })
            }

            let value_start = self.pos;
            let value: BencodeValue = self.parse_value()?;
            if let Some(spans) = spans.as_deref_mut() {
                spans.insert(key.clone(), value_start..self.pos);
            }
            map.insert(key, value);
        }
        self.pos += 1;
        Ok(BencodeValue::Dictionary(map))
    }

    fn peek(&self) -> Result<u8> {
        self.contents.get(self.pos).copied().ok_or(BencodeError::InsufficientContents)
    }

    fn expect_end(&self) -> Result<()> {
        if self.peek()? != b'e' {
            Err(BencodeError::UnterminatedValue { pos: self.pos })
        } else {
            Ok(())
        }
    }
}
