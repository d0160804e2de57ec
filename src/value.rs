use std::fmt::{self, Write as _};

use num_bigint::BigInt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// The types of sequences that exist.
pub enum SequenceType {
    List,
    Tuple,
    Set,
    FrozenSet,
}

/// Stand-in for a class named by the stream. Nothing gets imported and
/// "calling" it only ever builds a [PlaceholderInstance].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaceholderClass {
    pub module: String,
    pub name: String,
}

impl PlaceholderClass {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Call the class with `args`, which are stored verbatim.
    pub fn apply(&self, args: Vec<Value>) -> PlaceholderInstance {
        PlaceholderInstance {
            module: self.module.clone(),
            name: self.name.clone(),
            args,
            state: None,
        }
    }

    /// Like [Self::apply] for `__new__`-style construction, where the first
    /// argument is the class itself and gets dropped.
    pub fn apply_new(&self, mut args: Vec<Value>) -> PlaceholderInstance {
        if !args.is_empty() {
            args.remove(0);
        }
        self.apply(args)
    }
}

impl fmt::Display for PlaceholderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("state of {0} was already set")]
pub struct StateAlreadySet(pub String);

/// An object whose real type was never instantiated.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderInstance {
    pub module: String,
    pub name: String,
    pub args: Vec<Value>,
    pub(crate) state: Option<Box<Value>>,
}

impl PlaceholderInstance {
    /// What a persistent id turns into: `pers.obj(pid)`.
    pub fn persistent(pid: Value) -> Self {
        PlaceholderClass::new("pers", "obj").apply(vec![pid])
    }

    /// Sentinel that replaces a string which couldn't be decoded.
    pub fn invalid_utf8(message: impl Into<String>) -> Self {
        PlaceholderClass::new("builtin", "UnicodeDecodeError")
            .apply(vec![Value::String(Text::from(message.into()))])
    }

    /// The state set by `BUILD`. An explicit `None` state reads the same
    /// as no state at all.
    pub fn state(&self) -> Option<&Value> {
        match self.state.as_deref() {
            None | Some(Value::None) => None,
            Some(state) => Some(state),
        }
    }

    /// Set the instance state. It can only be set once.
    pub fn set_state(&mut self, state: Value) -> Result<(), StateAlreadySet> {
        if self.state.is_some() {
            return Err(StateAlreadySet(self.qualified_name()));
        }
        self.state = Some(Box::new(state));
        Ok(())
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

impl fmt::Display for PlaceholderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)?;
        write_tuple(f, &self.args)?;
        if let Some(state) = self.state() {
            write!(f, "(state={state})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A processed value.
pub enum Value {
    /// A reference back to an object that contains it. Only shows up in
    /// resolved output for self-referential structures.
    Ref(usize),

    /// A class reference that was never applied.
    Class(PlaceholderClass),

    /// The result of applying a class, or a persistent id, or a string
    /// that couldn't be decoded.
    Instance(PlaceholderInstance),

    /// A list, tuple or set.
    Seq(SequenceType, Vec<Value>),

    /// Key and value pairs, in the order they were first inserted.
    Dict(Vec<(Value, Value)>),

    String(Text),

    /// `bytes` or `bytearray`.
    Bytes(Vec<u8>),

    Int(i64),

    /// An integer that can't fit in i64.
    BigInt(BigInt),

    Float(f64),

    Bool(bool),

    /// Python `None`.
    None,
}

impl Value {
    pub fn string(s: &str) -> Self {
        Self::String(Text::from(s))
    }

    /// Python's name for the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Ref(_) => "reference",
            Value::Class(_) => "class",
            Value::Instance(_) => "object",
            Value::Seq(SequenceType::List, _) => "list",
            Value::Seq(SequenceType::Tuple, _) => "tuple",
            Value::Seq(SequenceType::Set, _) => "set",
            Value::Seq(SequenceType::FrozenSet, _) => "frozenset",
            Value::Dict(_) => "dict",
            Value::String(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::None => "NoneType",
        }
    }
}

/// Writes the Python `repr` of a value.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Ref(id) => write!(f, "<Recursion on object #{id}>"),
            Value::Class(cls) => fmt::Display::fmt(cls, f),
            Value::Instance(inst) => fmt::Display::fmt(inst, f),
            Value::Seq(SequenceType::List, items) => write_items(f, "[", items, "]"),
            Value::Seq(SequenceType::Tuple, items) => write_tuple(f, items),
            Value::Seq(SequenceType::Set, items) if items.is_empty() => f.write_str("set()"),
            Value::Seq(SequenceType::Set, items) => write_items(f, "{", items, "}"),
            Value::Seq(SequenceType::FrozenSet, items) if items.is_empty() => {
                f.write_str("frozenset()")
            }
            Value::Seq(SequenceType::FrozenSet, items) => {
                write_items(f, "frozenset({", items, "})")
            }
            Value::Dict(entries) => {
                f.write_char('{')?;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_char('}')
            }
            Value::String(s) => fmt::Display::fmt(s, f),
            Value::Bytes(b) => write_bytes(f, b),
            Value::Int(n) => write!(f, "{n}"),
            Value::BigInt(n) => write!(f, "{n}"),
            Value::Float(x) => write_float(f, *x),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::None => f.write_str("None"),
        }
    }
}

fn write_items(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: &[Value],
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

fn write_tuple(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    let close = if items.len() == 1 { ",)" } else { ")" };
    write_items(f, "(", items, close)
}

fn write_bytes(f: &mut fmt::Formatter<'_>, b: &[u8]) -> fmt::Result {
    let quote = pick_quote(b.contains(&b'\''), b.contains(&b'"'));
    f.write_char('b')?;
    f.write_char(quote)?;
    for &c in b {
        match c {
            b'\\' => f.write_str("\\\\")?,
            b'\t' => f.write_str("\\t")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            c if char::from(c) == quote => write!(f, "\\{quote}")?,
            0x20..=0x7e => f.write_char(char::from(c))?,
            c => write!(f, "\\x{c:02x}")?,
        }
    }
    f.write_char(quote)
}

fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        return f.write_str("nan");
    }
    if x.is_infinite() {
        return f.write_str(if x > 0.0 { "inf" } else { "-inf" });
    }
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{x:e}");
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exp),
        };
        return write!(f, "{mantissa}e{sign}{digits:0>2}");
    }
    let s = x.to_string();
    if s.contains('.') {
        f.write_str(&s)
    } else {
        write!(f, "{s}.0")
    }
}

/// Why decoding a byte string failed, worded the way Python words it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub codec: &'static str,
    pub start: usize,
    pub end: usize,
    pub byte: u8,
    pub reason: &'static str,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end - self.start <= 1 {
            write!(
                f,
                "'{}' codec can't decode byte 0x{:02x} in position {}: {}",
                self.codec, self.byte, self.start, self.reason
            )
        } else {
            write!(
                f,
                "'{}' codec can't decode bytes in position {}-{}: {}",
                self.codec,
                self.start,
                self.end - 1,
                self.reason
            )
        }
    }
}

impl std::error::Error for DecodeError {}

/// Text from the stream. Lone surrogates are allowed, so the contents are
/// kept as generalized UTF-8 (surrogates encoded as three byte sequences)
/// instead of a `String`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Text(Vec<u8>);

enum Segment<'a> {
    Str(&'a str),
    Surrogate(u16),
}

fn encoded_surrogate(b: &[u8]) -> Option<u16> {
    match *b {
        [0xed, b1 @ 0xa0..=0xbf, b2 @ 0x80..=0xbf, ..] => {
            Some(0xd000 | (u16::from(b1 & 0x3f) << 6) | u16::from(b2 & 0x3f))
        }
        _ => None,
    }
}

/// Walk generalized UTF-8, handing each run of ordinary text and each
/// lone surrogate to `emit`.
fn scan<'a>(bytes: &'a [u8], mut emit: impl FnMut(Segment<'a>)) -> Result<(), DecodeError> {
    let mut pos = 0;
    while pos < bytes.len() {
        let err = match std::str::from_utf8(&bytes[pos..]) {
            Ok(s) => {
                emit(Segment::Str(s));
                return Ok(());
            }
            Err(err) => err,
        };
        let at = pos + err.valid_up_to();
        if let Ok(s) = std::str::from_utf8(&bytes[pos..at]) {
            if !s.is_empty() {
                emit(Segment::Str(s));
            }
        }
        if let Some(cp) = encoded_surrogate(&bytes[at..]) {
            emit(Segment::Surrogate(cp));
            pos = at + 3;
            continue;
        }
        let byte = bytes[at];
        let (end, reason) = match err.error_len() {
            None => (bytes.len(), "unexpected end of data"),
            Some(1) if !matches!(byte, 0xc2..=0xf4) => (at + 1, "invalid start byte"),
            Some(n) => (at + n, "invalid continuation byte"),
        };
        return Err(DecodeError {
            codec: "utf-8",
            start: at,
            end,
            byte,
            reason,
        });
    }
    Ok(())
}

impl Text {
    /// Decode UTF-8, letting encoded lone surrogates through.
    pub fn decode_surrogatepass(bytes: &[u8]) -> Result<Self, DecodeError> {
        scan(bytes, |_| ())?;
        Ok(Self(bytes.to_vec()))
    }

    pub fn decode_ascii(bytes: &[u8]) -> Result<Self, DecodeError> {
        match bytes.iter().position(|b| !b.is_ascii()) {
            Some(pos) => Err(DecodeError {
                codec: "ascii",
                start: pos,
                end: pos + 1,
                byte: bytes[pos],
                reason: "ordinal not in range(128)",
            }),
            None => Ok(Self(bytes.to_vec())),
        }
    }

    /// Build text from code points. `None` if one is past U+10FFFF.
    pub fn from_code_points(cps: impl IntoIterator<Item = u32>) -> Option<Self> {
        let mut out = Vec::new();
        for cp in cps {
            if (0xd800..0xe000).contains(&cp) {
                // Same layout UTF-8 would use if surrogates were allowed.
                out.extend([
                    0xe0 | (cp >> 12) as u8,
                    0x80 | ((cp >> 6) & 0x3f) as u8,
                    0x80 | (cp & 0x3f) as u8,
                ]);
            } else {
                let c = char::from_u32(cp)?;
                out.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes());
            }
        }
        Some(Self(out))
    }

    /// The text as a `str`, unless it holds lone surrogates.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Writes the Python `repr` of the string.
impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments = Vec::new();
        if scan(&self.0, |seg| segments.push(seg)).is_err() {
            // Only reachable if the invariant was broken somehow.
            return write_bytes(f, &self.0);
        }
        let (mut single, mut double) = (false, false);
        for seg in &segments {
            if let Segment::Str(s) = seg {
                single |= s.contains('\'');
                double |= s.contains('"');
            }
        }
        let quote = pick_quote(single, double);
        f.write_char(quote)?;
        for seg in segments {
            match seg {
                Segment::Surrogate(cp) => write!(f, "\\u{cp:04x}")?,
                Segment::Str(s) => {
                    for c in s.chars() {
                        write_repr_char(f, c, quote)?;
                    }
                }
            }
        }
        f.write_char(quote)
    }
}

/// Whether `repr` can show `c` as is. Control, format, separator (other
/// than space) and private use characters get escaped, as do noncharacters.
/// Unassigned code points are not tracked and print as is.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(
        u32::from(c),
        0xad | 0x600..=0x605
            | 0x61c
            | 0x6dd
            | 0x70f
            | 0x890..=0x891
            | 0x8e2
            | 0x180e
            | 0x200b..=0x200f
            | 0x202a..=0x202e
            | 0x2060..=0x2064
            | 0x2066..=0x206f
            | 0xfeff
            | 0xfff9..=0xfffb
            | 0x110bd
            | 0x110cd
            | 0x13430..=0x1343f
            | 0x1bca0..=0x1bca3
            | 0x1d173..=0x1d17a
            | 0xe0001
            | 0xe0020..=0xe007f
            | 0xe000..=0xf8ff
            | 0xf0000..=0xffffd
            | 0x100000..=0x10fffd
            | 0xfdd0..=0xfdef
    ) && u32::from(c) & 0xfffe != 0xfffe
}

fn write_repr_char(f: &mut fmt::Formatter<'_>, c: char, quote: char) -> fmt::Result {
    match c {
        '\\' => f.write_str("\\\\"),
        '\n' => f.write_str("\\n"),
        '\r' => f.write_str("\\r"),
        '\t' => f.write_str("\\t"),
        c if c == quote => write!(f, "\\{c}"),
        c if !is_printable(c) => match u32::from(c) {
            cp @ 0..=0xff => write!(f, "\\x{cp:02x}"),
            cp @ 0x100..=0xffff => write!(f, "\\u{cp:04x}"),
            cp => write!(f, "\\U{cp:08x}"),
        },
        c => f.write_char(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn apply_keeps_args() {
        let cls = PlaceholderClass::new("m", "C");
        let inst = cls.apply(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(inst.module, "m");
        assert_eq!(inst.name, "C");
        assert_eq!(inst.args, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(inst.state(), None);
    }

    #[test]
    fn apply_new_drops_class_token() {
        let cls = PlaceholderClass::new("m", "C");
        let inst = cls.apply_new(vec![Value::Class(cls.clone()), Value::Int(5)]);
        assert_eq!(inst.args, vec![Value::Int(5)]);
        assert!(cls.apply_new(vec![]).args.is_empty());
    }

    #[test]
    fn state_is_set_once() {
        let mut inst = PlaceholderClass::new("m", "C").apply(vec![]);
        inst.set_state(Value::Int(1)).unwrap();
        assert_eq!(inst.state(), Some(&Value::Int(1)));
        assert_eq!(
            inst.set_state(Value::Int(2)),
            Err(StateAlreadySet("m.C".to_string()))
        );
        assert_eq!(inst.state(), Some(&Value::Int(1)));
    }

    #[test]
    fn none_state_reads_as_unset() {
        let mut inst = PlaceholderClass::new("m", "C").apply(vec![]);
        inst.set_state(Value::None).unwrap();
        assert_eq!(inst.state(), None);
        assert!(inst.set_state(Value::Int(1)).is_err());
    }

    #[test]
    fn fixed_identities() {
        let pers = PlaceholderInstance::persistent(Value::string("0"));
        assert_eq!(pers.to_string(), "pers.obj('0',)");
        let bad = PlaceholderInstance::invalid_utf8("oops");
        assert_eq!(bad.qualified_name(), "builtin.UnicodeDecodeError");
        assert_eq!(bad.args, vec![Value::string("oops")]);
    }

    #[test]
    fn surrogatepass_decoding() {
        let t = Text::decode_surrogatepass(b"a\xed\xa0\x80b").unwrap();
        assert_eq!(t.as_bytes(), b"a\xed\xa0\x80b");
        assert_eq!(t.as_str(), None);
        assert_eq!(t.to_string(), "'a\\ud800b'");

        let t = Text::decode_surrogatepass("h\u{e9}llo".as_bytes()).unwrap();
        assert_eq!(t.as_str(), Some("h\u{e9}llo"));
    }

    #[test]
    fn decode_errors_read_like_python() {
        let err = Text::decode_surrogatepass(b"ab\xff").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'utf-8' codec can't decode byte 0xff in position 2: invalid start byte"
        );
        let err = Text::decode_surrogatepass(b"\xe2\x28\xa1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'utf-8' codec can't decode byte 0xe2 in position 0: invalid continuation byte"
        );
        let err = Text::decode_surrogatepass(b"x\xe2\x82").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'utf-8' codec can't decode bytes in position 1-2: unexpected end of data"
        );
        let err = Text::decode_ascii(b"caf\xe9").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'ascii' codec can't decode byte 0xe9 in position 3: ordinal not in range(128)"
        );
    }

    #[test]
    fn code_points() {
        let t = Text::from_code_points([0x61, 0xdc00, 0x1f600]).unwrap();
        assert_eq!(t.to_string(), "'a\\udc00\u{1f600}'");
        assert_eq!(Text::from_code_points([0x110000]), None);
    }

    #[test]
    fn reprs() {
        let v = Value::Seq(
            SequenceType::List,
            vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::string("it's"),
                Value::Bytes(b"\x00a'".to_vec()),
                Value::Seq(SequenceType::Tuple, vec![Value::None]),
                Value::Seq(SequenceType::Set, vec![]),
                Value::Dict(vec![(Value::string("k"), Value::Bool(true))]),
            ],
        );
        assert_eq!(
            v.to_string(),
            r#"[1, 2.5, "it's", b"\x00a'", (None,), set(), {'k': True}]"#
        );
        assert_eq!(
            Value::Seq(SequenceType::FrozenSet, vec![Value::Int(1)]).to_string(),
            "frozenset({1})"
        );
        assert_eq!(Value::string("a\nb\u{7}").to_string(), "'a\\nb\\x07'");
    }

    #[test]
    fn unprintable_chars_are_escaped() {
        assert_eq!(Value::string("\u{ad}\u{200b}").to_string(), "'\\xad\\u200b'");
        assert_eq!(
            Value::string("\u{a0}\u{2028}\u{e000}\u{ffff}").to_string(),
            "'\\xa0\\u2028\\ue000\\uffff'"
        );
        assert_eq!(Value::string("caf\u{e9} \u{4e2d}").to_string(), "'caf\u{e9} \u{4e2d}'");
    }

    #[test]
    fn float_reprs() {
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Float(-0.0).to_string(), "-0.0");
        assert_eq!(Value::Float(1e16).to_string(), "1e+16");
        assert_eq!(Value::Float(1.5e-7).to_string(), "1.5e-07");
        assert_eq!(Value::Float(0.0001).to_string(), "0.0001");
        assert_eq!(Value::Float(f64::NAN).to_string(), "nan");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn instance_reprs() {
        let cls = PlaceholderClass::new("m", "C");
        assert_eq!(Value::Class(cls.clone()).to_string(), "m.C");
        assert_eq!(cls.apply(vec![]).to_string(), "m.C()");
        assert_eq!(cls.apply(vec![Value::Int(1)]).to_string(), "m.C(1,)");
        let mut inst = cls.apply(vec![]);
        inst.set_state(Value::Dict(vec![])).unwrap();
        assert_eq!(inst.to_string(), "m.C()(state={})");
    }
}
