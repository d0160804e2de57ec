#![allow(non_camel_case_types)]

/// Raw opcode bytes, protocols 0 through 5.
pub mod p_op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const PERSID: u8 = b'P';
    pub const BINPERSID: u8 = b'Q';
    pub const REDUCE: u8 = b'R';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const INST: u8 = b'i';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const OBJ: u8 = b'o';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';

    // Protocol 2
    pub const PROTO: u8 = 0x80;
    pub const NEWOBJ: u8 = 0x81;
    pub const EXT1: u8 = 0x82;
    pub const EXT2: u8 = 0x83;
    pub const EXT4: u8 = 0x84;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // Protocol 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // Protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // Protocol 5
    pub const BYTEARRAY8: u8 = 0x96;
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;
}

/// Name of the opcode with the given byte, if there is one.
pub fn opcode_name(opcode: u8) -> Option<&'static str> {
    use p_op::*;
    Some(match opcode {
        MARK => "MARK",
        STOP => "STOP",
        POP => "POP",
        POP_MARK => "POP_MARK",
        DUP => "DUP",
        FLOAT => "FLOAT",
        INT => "INT",
        BININT => "BININT",
        BININT1 => "BININT1",
        LONG => "LONG",
        BININT2 => "BININT2",
        NONE => "NONE",
        PERSID => "PERSID",
        BINPERSID => "BINPERSID",
        REDUCE => "REDUCE",
        STRING => "STRING",
        BINSTRING => "BINSTRING",
        SHORT_BINSTRING => "SHORT_BINSTRING",
        UNICODE => "UNICODE",
        BINUNICODE => "BINUNICODE",
        APPEND => "APPEND",
        BUILD => "BUILD",
        GLOBAL => "GLOBAL",
        DICT => "DICT",
        EMPTY_DICT => "EMPTY_DICT",
        APPENDS => "APPENDS",
        GET => "GET",
        BINGET => "BINGET",
        INST => "INST",
        LONG_BINGET => "LONG_BINGET",
        LIST => "LIST",
        EMPTY_LIST => "EMPTY_LIST",
        OBJ => "OBJ",
        PUT => "PUT",
        BINPUT => "BINPUT",
        LONG_BINPUT => "LONG_BINPUT",
        SETITEM => "SETITEM",
        TUPLE => "TUPLE",
        EMPTY_TUPLE => "EMPTY_TUPLE",
        SETITEMS => "SETITEMS",
        BINFLOAT => "BINFLOAT",
        PROTO => "PROTO",
        NEWOBJ => "NEWOBJ",
        EXT1 => "EXT1",
        EXT2 => "EXT2",
        EXT4 => "EXT4",
        TUPLE1 => "TUPLE1",
        TUPLE2 => "TUPLE2",
        TUPLE3 => "TUPLE3",
        NEWTRUE => "NEWTRUE",
        NEWFALSE => "NEWFALSE",
        LONG1 => "LONG1",
        LONG4 => "LONG4",
        BINBYTES => "BINBYTES",
        SHORT_BINBYTES => "SHORT_BINBYTES",
        SHORT_BINUNICODE => "SHORT_BINUNICODE",
        BINUNICODE8 => "BINUNICODE8",
        BINBYTES8 => "BINBYTES8",
        EMPTY_SET => "EMPTY_SET",
        ADDITEMS => "ADDITEMS",
        FROZENSET => "FROZENSET",
        NEWOBJ_EX => "NEWOBJ_EX",
        STACK_GLOBAL => "STACK_GLOBAL",
        MEMOIZE => "MEMOIZE",
        FRAME => "FRAME",
        BYTEARRAY8 => "BYTEARRAY8",
        NEXT_BUFFER => "NEXT_BUFFER",
        READONLY_BUFFER => "READONLY_BUFFER",
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
/// A single decoded pickle operation. Operands borrow from the input.
///
/// Text operands of the line-oriented protocol 0 opcodes are kept as raw
/// bytes where their decoding depends on the opcode (`STRING`, `UNICODE`,
/// `PERSID`); string payloads of the binary opcodes are always raw bytes
/// since decoding them is the evaluator's job.
pub enum PickleOp<'a> {
    MARK,
    STOP,
    POP,
    POP_MARK,
    DUP,
    FLOAT(&'a str),
    INT(&'a str),
    BININT(i32),
    BININT1(u8),
    LONG(&'a str),
    BININT2(u16),
    NONE,
    PERSID(&'a [u8]),
    BINPERSID,
    REDUCE,
    STRING(&'a [u8]),
    BINSTRING(&'a [u8]),
    SHORT_BINSTRING(&'a [u8]),
    UNICODE(&'a [u8]),
    BINUNICODE(&'a [u8]),
    APPEND,
    BUILD,
    GLOBAL(&'a str, &'a str),
    DICT,
    EMPTY_DICT,
    APPENDS,
    GET(&'a str),
    BINGET(u8),
    INST(&'a str, &'a str),
    LONG_BINGET(u32),
    LIST,
    EMPTY_LIST,
    OBJ,
    PUT(&'a str),
    BINPUT(u8),
    LONG_BINPUT(u32),
    SETITEM,
    TUPLE,
    EMPTY_TUPLE,
    SETITEMS,
    BINFLOAT(f64),
    PROTO(u8),
    NEWOBJ,
    EXT1(u8),
    EXT2(u16),
    EXT4(i32),
    TUPLE1,
    TUPLE2,
    TUPLE3,
    NEWTRUE,
    NEWFALSE,
    LONG1(&'a [u8]),
    LONG4(&'a [u8]),
    BINBYTES(&'a [u8]),
    SHORT_BINBYTES(&'a [u8]),
    SHORT_BINUNICODE(&'a [u8]),
    BINUNICODE8(&'a [u8]),
    BINBYTES8(&'a [u8]),
    EMPTY_SET,
    ADDITEMS,
    FROZENSET,
    NEWOBJ_EX,
    STACK_GLOBAL,
    MEMOIZE,
    FRAME(u64),
    BYTEARRAY8(&'a [u8]),
    NEXT_BUFFER,
    READONLY_BUFFER,
}

impl PickleOp<'_> {
    /// The opcode's conventional name, for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PickleOp::MARK => "MARK",
            PickleOp::STOP => "STOP",
            PickleOp::POP => "POP",
            PickleOp::POP_MARK => "POP_MARK",
            PickleOp::DUP => "DUP",
            PickleOp::FLOAT(_) => "FLOAT",
            PickleOp::INT(_) => "INT",
            PickleOp::BININT(_) => "BININT",
            PickleOp::BININT1(_) => "BININT1",
            PickleOp::LONG(_) => "LONG",
            PickleOp::BININT2(_) => "BININT2",
            PickleOp::NONE => "NONE",
            PickleOp::PERSID(_) => "PERSID",
            PickleOp::BINPERSID => "BINPERSID",
            PickleOp::REDUCE => "REDUCE",
            PickleOp::STRING(_) => "STRING",
            PickleOp::BINSTRING(_) => "BINSTRING",
            PickleOp::SHORT_BINSTRING(_) => "SHORT_BINSTRING",
            PickleOp::UNICODE(_) => "UNICODE",
            PickleOp::BINUNICODE(_) => "BINUNICODE",
            PickleOp::APPEND => "APPEND",
            PickleOp::BUILD => "BUILD",
            PickleOp::GLOBAL(..) => "GLOBAL",
            PickleOp::DICT => "DICT",
            PickleOp::EMPTY_DICT => "EMPTY_DICT",
            PickleOp::APPENDS => "APPENDS",
            PickleOp::GET(_) => "GET",
            PickleOp::BINGET(_) => "BINGET",
            PickleOp::INST(..) => "INST",
            PickleOp::LONG_BINGET(_) => "LONG_BINGET",
            PickleOp::LIST => "LIST",
            PickleOp::EMPTY_LIST => "EMPTY_LIST",
            PickleOp::OBJ => "OBJ",
            PickleOp::PUT(_) => "PUT",
            PickleOp::BINPUT(_) => "BINPUT",
            PickleOp::LONG_BINPUT(_) => "LONG_BINPUT",
            PickleOp::SETITEM => "SETITEM",
            PickleOp::TUPLE => "TUPLE",
            PickleOp::EMPTY_TUPLE => "EMPTY_TUPLE",
            PickleOp::SETITEMS => "SETITEMS",
            PickleOp::BINFLOAT(_) => "BINFLOAT",
            PickleOp::PROTO(_) => "PROTO",
            PickleOp::NEWOBJ => "NEWOBJ",
            PickleOp::EXT1(_) => "EXT1",
            PickleOp::EXT2(_) => "EXT2",
            PickleOp::EXT4(_) => "EXT4",
            PickleOp::TUPLE1 => "TUPLE1",
            PickleOp::TUPLE2 => "TUPLE2",
            PickleOp::TUPLE3 => "TUPLE3",
            PickleOp::NEWTRUE => "NEWTRUE",
            PickleOp::NEWFALSE => "NEWFALSE",
            PickleOp::LONG1(_) => "LONG1",
            PickleOp::LONG4(_) => "LONG4",
            PickleOp::BINBYTES(_) => "BINBYTES",
            PickleOp::SHORT_BINBYTES(_) => "SHORT_BINBYTES",
            PickleOp::SHORT_BINUNICODE(_) => "SHORT_BINUNICODE",
            PickleOp::BINUNICODE8(_) => "BINUNICODE8",
            PickleOp::BINBYTES8(_) => "BINBYTES8",
            PickleOp::EMPTY_SET => "EMPTY_SET",
            PickleOp::ADDITEMS => "ADDITEMS",
            PickleOp::FROZENSET => "FROZENSET",
            PickleOp::NEWOBJ_EX => "NEWOBJ_EX",
            PickleOp::STACK_GLOBAL => "STACK_GLOBAL",
            PickleOp::MEMOIZE => "MEMOIZE",
            PickleOp::FRAME(_) => "FRAME",
            PickleOp::BYTEARRAY8(_) => "BYTEARRAY8",
            PickleOp::NEXT_BUFFER => "NEXT_BUFFER",
            PickleOp::READONLY_BUFFER => "READONLY_BUFFER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_agree() {
        assert_eq!(opcode_name(p_op::BINUNICODE), Some(PickleOp::BINUNICODE(b"").name()));
        assert_eq!(opcode_name(p_op::STACK_GLOBAL), Some("STACK_GLOBAL"));
        assert_eq!(opcode_name(0xff), None);
        assert_eq!(opcode_name(b'z'), None);
    }
}
