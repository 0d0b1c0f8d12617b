//! Printable counterexample encoding.
//!
//! A [`SerializedExample`] is a recorded trace together with the size hint it
//! was generated under (flag probabilities depend on it, so replay needs it).
//! Its `Display` form is the string embedded in failure reports and accepted
//! by `PropertyChecker::rechecking`:
//!
//! ```text
//! hex( [version: u8] [size hint: u32] [trace] [checksum: 4 bytes] )
//!
//! trace   := span
//! span    := 0x01 [kind: u8] [child count: u32] element*
//! element := span | choice
//! choice  := 0x02 descriptor [value: i64]
//! descriptor := 0x00 [min: i64] [max: i64]   uniform
//!             | 0x01 [branches: u32]          weighted
//!             | 0x02                          flag
//! ```
//!
//! Integers are big-endian; the checksum is the first four bytes of the
//! SHA-256 of everything before it.

use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};

use crate::distributions::Descriptor;
use crate::error::DecodeError;
use crate::trace::{Choice, Span, SpanKind, TraceElement};

pub const FORMAT_VERSION: u8 = 1;

const CHECKSUM_LEN: usize = 4;
const HEADER_LEN: usize = 5;
const MAX_NESTING: usize = 4096;

const SPAN_TAG: u8 = 1;
const CHOICE_TAG: u8 = 2;

const UNIFORM_TAG: u8 = 0;
const WEIGHTED_TAG: u8 = 1;
const FLAG_TAG: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedExample {
    pub size_hint: usize,
    pub trace: Span,
}

impl SerializedExample {
    pub fn new(size_hint: usize, trace: Span) -> Self {
        SerializedExample { size_hint, trace }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_u8(FORMAT_VERSION)?;
        buffer.write_u32::<BigEndian>(u32::try_from(self.size_hint).unwrap_or(u32::MAX))?;
        write_span(&mut buffer, &self.trace)?;
        let checksum = Sha256::digest(&buffer);
        buffer.write_all(&checksum[..CHECKSUM_LEN])?;
        Ok(buffer)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(DecodeError::Truncated);
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body)[..CHECKSUM_LEN] != *checksum {
            return Err(DecodeError::Checksum);
        }

        let mut cursor = Cursor::new(body);
        let version = cursor.read_u8()?;
        if version != FORMAT_VERSION {
            return Err(DecodeError::Version(version));
        }
        let size_hint = cursor.read_u32::<BigEndian>()? as usize;
        let trace = match read_element(&mut cursor, 0)? {
            TraceElement::Span(span) => span,
            TraceElement::Choice(_) => return Err(DecodeError::NotASpan),
        };
        let remaining = body.len() - cursor.position() as usize;
        if remaining > 0 {
            return Err(DecodeError::TrailingBytes(remaining));
        }
        Ok(SerializedExample { size_hint, trace })
    }
}

impl fmt::Display for SerializedExample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes().map_err(|_| fmt::Error)?;
        f.write_str(&hex::encode(bytes))
    }
}

impl FromStr for SerializedExample {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| DecodeError::Hex(e.to_string()))?;
        SerializedExample::from_bytes(&bytes)
    }
}

/// SHA-256 of a trace's binary encoding; two traces have the same digest
/// exactly when they are structurally identical.
pub fn trace_digest(trace: &Span) -> io::Result<[u8; 32]> {
    let mut buffer = Vec::new();
    write_span(&mut buffer, trace)?;
    Ok(Sha256::digest(&buffer).into())
}

fn write_span<W: Write>(out: &mut W, span: &Span) -> io::Result<()> {
    out.write_u8(SPAN_TAG)?;
    out.write_u8(span.kind.tag())?;
    let count = u32::try_from(span.children.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "span has too many children"))?;
    out.write_u32::<BigEndian>(count)?;
    for child in &span.children {
        match child {
            TraceElement::Span(inner) => write_span(out, inner)?,
            TraceElement::Choice(choice) => write_choice(out, choice)?,
        }
    }
    Ok(())
}

fn write_choice<W: Write>(out: &mut W, choice: &Choice) -> io::Result<()> {
    out.write_u8(CHOICE_TAG)?;
    match choice.descriptor {
        Descriptor::Uniform { min, max } => {
            out.write_u8(UNIFORM_TAG)?;
            out.write_i64::<BigEndian>(min)?;
            out.write_i64::<BigEndian>(max)?;
        }
        Descriptor::Weighted { branches } => {
            out.write_u8(WEIGHTED_TAG)?;
            out.write_u32::<BigEndian>(branches)?;
        }
        Descriptor::Flag => out.write_u8(FLAG_TAG)?,
    }
    out.write_i64::<BigEndian>(choice.value)
}

fn read_element<R: Read>(input: &mut R, depth: usize) -> Result<TraceElement, DecodeError> {
    match input.read_u8()? {
        SPAN_TAG => {
            if depth >= MAX_NESTING {
                return Err(DecodeError::TooDeep(MAX_NESTING));
            }
            let tag = input.read_u8()?;
            let kind = SpanKind::from_tag(tag).ok_or(DecodeError::UnknownTag { what: "span kind", tag })?;
            let count = input.read_u32::<BigEndian>()?;
            let mut children = Vec::new();
            for _ in 0..count {
                children.push(read_element(input, depth + 1)?);
            }
            Ok(TraceElement::Span(Span { kind, children }))
        }
        CHOICE_TAG => {
            let descriptor = match input.read_u8()? {
                UNIFORM_TAG => {
                    let min = input.read_i64::<BigEndian>()?;
                    let max = input.read_i64::<BigEndian>()?;
                    Descriptor::Uniform { min, max }
                }
                WEIGHTED_TAG => Descriptor::Weighted {
                    branches: input.read_u32::<BigEndian>()?,
                },
                FLAG_TAG => Descriptor::Flag,
                tag => return Err(DecodeError::UnknownTag { what: "descriptor", tag }),
            };
            let value = input.read_i64::<BigEndian>()?;
            Ok(TraceElement::Choice(Choice { value, descriptor }))
        }
        tag => Err(DecodeError::UnknownTag { what: "element", tag }),
    }
}
