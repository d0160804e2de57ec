use std::str::Utf8Error;

use nom::{
    bytes::complete::{tag, take, take_till},
    combinator::{flat_map, map, map_res},
    error::{self as ne, ErrorKind},
    number::complete::{be_f64, le_i32, le_u16, le_u32, le_u64, u8},
    sequence::tuple,
    IResult,
};

use crate::ops::*;

/// Payloads longer than this can't be held in memory on this platform.
pub const MAX_PAYLOAD_LEN: u64 = isize::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input ended inside an opcode or its operand.
    UnexpectedEof,
    UnknownOpcode(u8),
    /// A length prefix larger than [MAX_PAYLOAD_LEN].
    LengthOverflow(u64),
    /// A signed length prefix that came out negative.
    NegativeLength(i32),
    /// A text operand that isn't UTF-8.
    InvalidText,
    Other(ErrorKind),
}

/// The nom error type used by all the parsers here. It keeps the
/// remaining input so the caller can work out the offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError<'a> {
    pub input: &'a [u8],
    pub kind: ParseErrorKind,
}

impl<'a> ParseError<'a> {
    pub fn new(input: &'a [u8], kind: ParseErrorKind) -> Self {
        Self { input, kind }
    }
}

impl<'a> ne::ParseError<&'a [u8]> for ParseError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        let kind = if kind == ErrorKind::Eof || input.is_empty() {
            ParseErrorKind::UnexpectedEof
        } else {
            ParseErrorKind::Other(kind)
        };
        Self { input, kind }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ne::FromExternalError<&'a [u8], Utf8Error> for ParseError<'a> {
    fn from_external_error(input: &'a [u8], _kind: ErrorKind, _e: Utf8Error) -> Self {
        Self::new(input, ParseErrorKind::InvalidText)
    }
}

pub type PResult<'a, O> = IResult<&'a [u8], O, ParseError<'a>>;

fn parse_line(i: &[u8]) -> PResult<'_, &[u8]> {
    let (i, s) = take_till(|c| c == b'\n')(i)?;
    let (i, _) = tag(b"\n")(i)?;
    Ok((i, s))
}

fn parse_string_nl(i: &[u8]) -> PResult<'_, &str> {
    map_res(parse_line, std::str::from_utf8)(i)
}

fn sized<'a>(len: u64) -> impl FnMut(&'a [u8]) -> PResult<'a, &'a [u8]> {
    move |i| {
        if len > MAX_PAYLOAD_LEN {
            return Err(nom::Err::Failure(ParseError::new(
                i,
                ParseErrorKind::LengthOverflow(len),
            )));
        }
        take(len as usize)(i)
    }
}

/// Four byte length prefix that the format defines as signed.
fn signed_len(i: &[u8]) -> PResult<'_, u64> {
    let (rest, n) = le_i32(i)?;
    match u64::try_from(n) {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Failure(ParseError::new(
            i,
            ParseErrorKind::NegativeLength(n),
        ))),
    }
}

fn data_u8(i: &[u8]) -> PResult<'_, &[u8]> {
    flat_map(map(u8, u64::from), sized)(i)
}

fn data_u32(i: &[u8]) -> PResult<'_, &[u8]> {
    flat_map(map(le_u32, u64::from), sized)(i)
}

fn data_i32(i: &[u8]) -> PResult<'_, &[u8]> {
    flat_map(signed_len, sized)(i)
}

fn data_u64(i: &[u8]) -> PResult<'_, &[u8]> {
    flat_map(le_u64, sized)(i)
}

/// Parse a single op. It's a nom parser.
pub fn parse_op(i: &[u8]) -> PResult<'_, PickleOp<'_>> {
    let start = i;
    let (i, opcode) = u8(i)?;
    IResult::Ok((
        i,
        match opcode {
            p_op::MARK => PickleOp::MARK,
            p_op::STOP => PickleOp::STOP,
            p_op::POP => PickleOp::POP,
            p_op::POP_MARK => PickleOp::POP_MARK,
            p_op::DUP => PickleOp::DUP,
            p_op::FLOAT => return map(parse_string_nl, PickleOp::FLOAT)(i),
            p_op::INT => return map(parse_string_nl, PickleOp::INT)(i),
            p_op::BININT => return map(le_i32, PickleOp::BININT)(i),
            p_op::BININT1 => return map(u8, PickleOp::BININT1)(i),
            p_op::LONG => return map(parse_string_nl, PickleOp::LONG)(i),
            p_op::BININT2 => return map(le_u16, PickleOp::BININT2)(i),
            p_op::NONE => PickleOp::NONE,
            p_op::PERSID => return map(parse_line, PickleOp::PERSID)(i),
            p_op::BINPERSID => PickleOp::BINPERSID,
            p_op::REDUCE => PickleOp::REDUCE,
            p_op::STRING => return map(parse_line, PickleOp::STRING)(i),
            p_op::BINSTRING => return map(data_i32, PickleOp::BINSTRING)(i),
            p_op::SHORT_BINSTRING => return map(data_u8, PickleOp::SHORT_BINSTRING)(i),
            p_op::UNICODE => return map(parse_line, PickleOp::UNICODE)(i),
            p_op::BINUNICODE => return map(data_u32, PickleOp::BINUNICODE)(i),
            p_op::APPEND => PickleOp::APPEND,
            p_op::BUILD => PickleOp::BUILD,
            p_op::GLOBAL => {
                return map(tuple((parse_string_nl, parse_string_nl)), |(mn, gn)| {
                    PickleOp::GLOBAL(mn, gn)
                })(i);
            }
            p_op::DICT => PickleOp::DICT,
            p_op::EMPTY_DICT => PickleOp::EMPTY_DICT,
            p_op::APPENDS => PickleOp::APPENDS,
            p_op::GET => return map(parse_string_nl, PickleOp::GET)(i),
            p_op::BINGET => return map(u8, PickleOp::BINGET)(i),
            p_op::INST => {
                return map(tuple((parse_string_nl, parse_string_nl)), |(mn, cn)| {
                    PickleOp::INST(mn, cn)
                })(i);
            }
            p_op::LONG_BINGET => return map(le_u32, PickleOp::LONG_BINGET)(i),
            p_op::LIST => PickleOp::LIST,
            p_op::EMPTY_LIST => PickleOp::EMPTY_LIST,
            p_op::OBJ => PickleOp::OBJ,
            p_op::PUT => return map(parse_string_nl, PickleOp::PUT)(i),
            p_op::BINPUT => return map(u8, PickleOp::BINPUT)(i),
            p_op::LONG_BINPUT => return map(le_u32, PickleOp::LONG_BINPUT)(i),
            p_op::SETITEM => PickleOp::SETITEM,
            p_op::TUPLE => PickleOp::TUPLE,
            p_op::EMPTY_TUPLE => PickleOp::EMPTY_TUPLE,
            p_op::SETITEMS => PickleOp::SETITEMS,
            p_op::BINFLOAT => return map(be_f64, PickleOp::BINFLOAT)(i),
            p_op::PROTO => return map(u8, PickleOp::PROTO)(i),
            p_op::NEWOBJ => PickleOp::NEWOBJ,
            p_op::EXT1 => return map(u8, PickleOp::EXT1)(i),
            p_op::EXT2 => return map(le_u16, PickleOp::EXT2)(i),
            p_op::EXT4 => return map(le_i32, PickleOp::EXT4)(i),
            p_op::TUPLE1 => PickleOp::TUPLE1,
            p_op::TUPLE2 => PickleOp::TUPLE2,
            p_op::TUPLE3 => PickleOp::TUPLE3,
            p_op::NEWTRUE => PickleOp::NEWTRUE,
            p_op::NEWFALSE => PickleOp::NEWFALSE,
            p_op::LONG1 => return map(data_u8, PickleOp::LONG1)(i),
            p_op::LONG4 => return map(data_i32, PickleOp::LONG4)(i),
            p_op::BINBYTES => return map(data_u32, PickleOp::BINBYTES)(i),
            p_op::BINBYTES8 => return map(data_u64, PickleOp::BINBYTES8)(i),
            p_op::SHORT_BINBYTES => return map(data_u8, PickleOp::SHORT_BINBYTES)(i),
            p_op::BINUNICODE8 => return map(data_u64, PickleOp::BINUNICODE8)(i),
            p_op::SHORT_BINUNICODE => return map(data_u8, PickleOp::SHORT_BINUNICODE)(i),
            p_op::EMPTY_SET => PickleOp::EMPTY_SET,
            p_op::ADDITEMS => PickleOp::ADDITEMS,
            p_op::FROZENSET => PickleOp::FROZENSET,
            p_op::NEWOBJ_EX => PickleOp::NEWOBJ_EX,
            p_op::STACK_GLOBAL => PickleOp::STACK_GLOBAL,
            p_op::MEMOIZE => PickleOp::MEMOIZE,
            p_op::FRAME => return map(le_u64, PickleOp::FRAME)(i),
            p_op::BYTEARRAY8 => return map(data_u64, PickleOp::BYTEARRAY8)(i),
            p_op::NEXT_BUFFER => PickleOp::NEXT_BUFFER,
            p_op::READONLY_BUFFER => PickleOp::READONLY_BUFFER,
            _ => {
                return Err(nom::Err::Failure(ParseError::new(
                    start,
                    ParseErrorKind::UnknownOpcode(opcode),
                )))
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure_kind(i: &[u8]) -> ParseErrorKind {
        match parse_op(i) {
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => e.kind,
            other => panic!("expected a parse failure, got {other:?}"),
        }
    }

    #[test]
    fn simple_ops() {
        assert_eq!(parse_op(b"K\x05."), Ok((&b"."[..], PickleOp::BININT1(5))));
        assert_eq!(parse_op(b"J\xff\xff\xff\xff"), Ok((&b""[..], PickleOp::BININT(-1))));
        assert_eq!(
            parse_op(b"cmod\nName\n"),
            Ok((&b""[..], PickleOp::GLOBAL("mod", "Name")))
        );
        assert_eq!(
            parse_op(b"\x8c\x02hi"),
            Ok((&b""[..], PickleOp::SHORT_BINUNICODE(b"hi")))
        );
    }

    #[test]
    fn binfloat_is_big_endian() {
        assert_eq!(
            parse_op(b"G?\xf0\x00\x00\x00\x00\x00\x00"),
            Ok((&b""[..], PickleOp::BINFLOAT(1.0)))
        );
    }

    #[test]
    fn binunicode_keeps_raw_bytes() {
        assert_eq!(
            parse_op(b"X\x02\x00\x00\x00\xff\xfe"),
            Ok((&b""[..], PickleOp::BINUNICODE(b"\xff\xfe")))
        );
    }

    #[test]
    fn unknown_opcode() {
        match parse_op(b"\xffabc") {
            Err(nom::Err::Failure(e)) => {
                assert_eq!(e.kind, ParseErrorKind::UnknownOpcode(0xff));
                assert_eq!(e.input.len(), 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_operands() {
        assert_eq!(failure_kind(b"X\x05\x00\x00\x00ab"), ParseErrorKind::UnexpectedEof);
        assert_eq!(failure_kind(b"J\x01\x00"), ParseErrorKind::UnexpectedEof);
        assert_eq!(failure_kind(b"cmod\nName"), ParseErrorKind::UnexpectedEof);
        assert_eq!(failure_kind(b""), ParseErrorKind::UnexpectedEof);
    }

    #[test]
    fn bad_lengths() {
        assert_eq!(
            failure_kind(b"\x8b\xff\xff\xff\xff"),
            ParseErrorKind::NegativeLength(-1)
        );
        assert_eq!(
            failure_kind(b"\x8d\x00\x00\x00\x00\x00\x00\x00\x80"),
            ParseErrorKind::LengthOverflow(1 << 63)
        );
    }

    #[test]
    fn global_names_must_be_text() {
        assert_eq!(failure_kind(b"c\xff\nName\n"), ParseErrorKind::InvalidText);
    }
}
