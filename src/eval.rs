use std::collections::{hash_map::Entry, BTreeMap, HashMap, HashSet};

use num_bigint::BigInt;
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    ops::*,
    parsers::{parse_op, ParseError, ParseErrorKind},
    value::*,
};

const MAX_DEPTH: usize = 1000;
const MAX_PROTOCOL: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpicklerOptions {
    /// Replace strings that aren't valid UTF-8 with a
    /// `builtin.UnicodeDecodeError` placeholder instead of failing.
    pub catch_invalid_utf8: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
/// The operand stack. Marks are tracked separately as positions in
/// the stack; nothing can be popped from below the most recent one.
pub struct PickleStack {
    items: Vec<Value>,
    marks: Vec<usize>,
}

impl PickleStack {
    fn floor(&self) -> usize {
        self.marks.last().copied().unwrap_or(0)
    }

    pub fn push(&mut self, val: Value) {
        self.items.push(val);
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.items.len() > self.floor() {
            self.items.pop()
        } else {
            None
        }
    }

    pub fn mark(&mut self) {
        self.marks.push(self.items.len());
    }

    /// Pop everything above the most recent mark, along with the mark.
    pub fn pop_mark(&mut self) -> Option<Vec<Value>> {
        let markidx = self.marks.pop()?;
        Some(self.items.split_off(markidx))
    }

    pub fn last_mut(&mut self) -> Option<&mut Value> {
        if self.items.len() > self.floor() {
            self.items.last_mut()
        } else {
            None
        }
    }

    /// True when nothing has been pushed since the most recent mark.
    pub fn frame_is_empty(&self) -> bool {
        self.items.len() <= self.floor()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Objects that can be reached from more than one place live in a heap
/// and are referred to with `Value::Ref(handle)`. The memo table maps memo
/// ids onto heap handles.
pub struct PickleMemo {
    heap: Vec<Value>,
    ids: BTreeMap<u32, usize>,
}

impl PickleMemo {
    /// Move a value into the heap. References are already there.
    pub fn share(&mut self, val: Value) -> usize {
        match val {
            Value::Ref(handle) => handle,
            val => {
                self.heap.push(val);
                self.heap.len() - 1
            }
        }
    }

    pub fn insert(&mut self, mid: u32, handle: usize) {
        self.ids.insert(mid, handle);
    }

    pub fn get(&self, mid: u32) -> Option<usize> {
        self.ids.get(&mid).copied()
    }

    /// Number of memo ids in use.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Look through a reference. Anything else comes back as is.
    pub fn resolve<'b>(&'b self, val: &'b Value) -> &'b Value {
        match val {
            Value::Ref(handle) => self.heap.get(*handle).unwrap_or(val),
            val => val,
        }
    }

    /// Like `resolve` but you get a mutable reference.
    pub fn resolve_mut<'b>(&'b mut self, val: &'b mut Value) -> &'b mut Value {
        if let Value::Ref(handle) = *val {
            if handle < self.heap.len() {
                return &mut self.heap[handle];
            }
        }
        val
    }

    /// Replace every reference inside `val` with the object it refers to.
    /// A reference to an object that is already being expanded further up
    /// stays a `Value::Ref`.
    pub fn resolve_all(&self, val: Value) -> Result<Value> {
        self.resolve_all_refs(0, val, &mut Vec::new())
    }

    fn resolve_all_iter(
        &self,
        depth: usize,
        vals: Vec<Value>,
        path: &mut Vec<usize>,
    ) -> Result<Vec<Value>> {
        vals.into_iter()
            .map(|val| self.resolve_all_refs(depth + 1, val, path))
            .collect()
    }

    fn resolve_all_refs(&self, depth: usize, val: Value, path: &mut Vec<usize>) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(Error::TooDeep { limit: MAX_DEPTH });
        }
        Ok(match val {
            Value::Ref(handle) => {
                let target = match self.heap.get(handle) {
                    Some(target) if !path.contains(&handle) => target.clone(),
                    _ => return Ok(Value::Ref(handle)),
                };
                path.push(handle);
                let resolved = self.resolve_all_refs(depth + 1, target, path);
                path.pop();
                resolved?
            }
            Value::Instance(PlaceholderInstance {
                module,
                name,
                args,
                state,
            }) => {
                let args = self.resolve_all_iter(depth, args, path)?;
                let state = match state {
                    Some(state) => Some(Box::new(self.resolve_all_refs(depth + 1, *state, path)?)),
                    None => None,
                };
                Value::Instance(PlaceholderInstance {
                    module,
                    name,
                    args,
                    state,
                })
            }
            Value::Seq(st, items) => Value::Seq(st, self.resolve_all_iter(depth, items, path)?),
            Value::Dict(entries) => Value::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        Ok((
                            self.resolve_all_refs(depth + 1, k, path)?,
                            self.resolve_all_refs(depth + 1, v, path)?,
                        ))
                    })
                    .collect::<Result<_>>()?,
            ),
            val => val,
        })
    }
}

/// Interprets a pickle stream without importing or calling anything.
/// Classes become [PlaceholderClass] values and everything built from
/// them becomes a [PlaceholderInstance].
pub struct Unpickler<'a> {
    data: &'a [u8],
    offset: usize,
    options: UnpicklerOptions,
    stack: PickleStack,
    memo: PickleMemo,
}

impl<'a> Unpickler<'a> {
    pub fn new(data: &'a [u8], options: UnpicklerOptions) -> Self {
        Self {
            data,
            offset: 0,
            options,
            stack: PickleStack::default(),
            memo: PickleMemo::default(),
        }
    }

    /// Run until `STOP` and return the object on top of the stack. Any
    /// data after the `STOP` is ignored.
    pub fn load(mut self) -> Result<Value> {
        let mut input = self.data;
        loop {
            self.offset = self.data.len() - input.len();
            if input.is_empty() {
                return Err(Error::MissingStop {
                    offset: self.offset,
                });
            }
            let (rest, op) = parse_op(input).map_err(|e| self.parse_failure(input, e))?;
            trace!(offset = self.offset, op = op.name(), "dispatch");
            input = rest;
            if op == PickleOp::STOP {
                let result = self.pop()?;
                return self.memo.resolve_all(result);
            }
            self.dispatch(op)?;
        }
    }

    fn parse_failure(&self, input: &[u8], err: nom::Err<ParseError<'_>>) -> Error {
        let offset = self.offset;
        let opcode = input.first().and_then(|b| opcode_name(*b)).unwrap_or("?");
        let kind = match err {
            nom::Err::Incomplete(_) => ParseErrorKind::UnexpectedEof,
            nom::Err::Error(e) | nom::Err::Failure(e) => e.kind,
        };
        match kind {
            ParseErrorKind::UnexpectedEof => Error::Truncated { offset, opcode },
            ParseErrorKind::UnknownOpcode(opcode) => Error::UnknownOpcode { offset, opcode },
            ParseErrorKind::LengthOverflow(len) => Error::StringTooLong { offset, len },
            ParseErrorKind::NegativeLength(n) => {
                Error::malformed(offset, format!("{opcode} pickle has negative byte count {n}"))
            }
            ParseErrorKind::InvalidText => {
                Error::malformed(offset, format!("{opcode} operand is not valid UTF-8"))
            }
            ParseErrorKind::Other(kind) => Error::malformed(
                offset,
                format!("bad {opcode} operand ({})", kind.description()),
            ),
        }
    }

    fn fail(&self, details: impl Into<String>) -> Error {
        Error::malformed(self.offset, details)
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| self.fail("unpickling stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>> {
        self.stack
            .pop_mark()
            .ok_or_else(|| self.fail("could not find MARK"))
    }

    /// The object on top of the stack, looking through references.
    fn top_target(&mut self) -> Result<&mut Value> {
        let offset = self.offset;
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| Error::malformed(offset, "unpickling stack underflow"))?;
        Ok(self.memo.resolve_mut(top))
    }

    fn take_top(&mut self) -> Result<Value> {
        Ok(std::mem::replace(self.top_target()?, Value::None))
    }

    fn put_top(&mut self, val: Value) -> Result<()> {
        *self.top_target()? = val;
        Ok(())
    }

    /// Move the top of the stack into the heap, leaving a reference in its
    /// place, and return the handle.
    fn share_top(&mut self) -> Result<usize> {
        let offset = self.offset;
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| Error::malformed(offset, "unpickling stack underflow"))?;
        let handle = self.memo.share(std::mem::replace(top, Value::None));
        *top = Value::Ref(handle);
        Ok(handle)
    }

    fn memo_put(&mut self, mid: u32) -> Result<()> {
        let handle = self.share_top()?;
        self.memo.insert(mid, handle);
        Ok(())
    }

    fn memo_get(&mut self, mid: u32) -> Result<()> {
        let handle = self
            .memo
            .get(mid)
            .ok_or_else(|| self.fail(format!("memo value not found at index {mid}")))?;
        self.stack.push(Value::Ref(handle));
        Ok(())
    }

    fn memo_id(&self, s: &str) -> Result<u32> {
        s.trim()
            .parse()
            .map_err(|_| self.fail(format!("bad memo key {s:?}")))
    }

    fn callable(&self, val: &Value, opname: &str) -> Result<PlaceholderClass> {
        match self.memo.resolve(val) {
            Value::Class(cls) => Ok(cls.clone()),
            other => Err(self.fail(format!(
                "{opname} target is not callable: {}",
                other.type_name()
            ))),
        }
    }

    fn call_args(&self, val: &Value, opname: &str) -> Result<Vec<Value>> {
        match self.memo.resolve(val) {
            Value::Seq(_, items) => Ok(items.clone()),
            other => Err(self.fail(format!(
                "{opname} arguments must be a tuple, not {}",
                other.type_name()
            ))),
        }
    }

    /// Push a new object. Classes and instances go into the heap straight
    /// away so that each one keeps its own identity.
    fn push(&mut self, val: Value) -> Result<()> {
        check_nesting(&val, MAX_DEPTH)?;
        match val {
            val @ (Value::Class(_) | Value::Instance(_)) => {
                let handle = self.memo.share(val);
                self.stack.push(Value::Ref(handle));
            }
            val => self.stack.push(val),
        }
        Ok(())
    }

    fn check_hashable(&self, val: &Value) -> Result<()> {
        self.check_hashable_at(0, val)
    }

    fn check_hashable_at(&self, depth: usize, val: &Value) -> Result<()> {
        if depth >= MAX_DEPTH {
            return Err(Error::TooDeep { limit: MAX_DEPTH });
        }
        match self.memo.resolve(val) {
            v @ (Value::Seq(SequenceType::List | SequenceType::Set, _) | Value::Dict(_)) => {
                Err(self.fail(format!("unhashable type: '{}'", v.type_name())))
            }
            Value::Seq(SequenceType::Tuple, items) => items
                .iter()
                .try_for_each(|item| self.check_hashable_at(depth + 1, item)),
            _ => Ok(()),
        }
    }

    /// Stands in for hashing when merging dict keys and set members.
    /// Placeholder classes and instances are only equal to themselves.
    fn fingerprint(&self, val: &Value) -> String {
        match (val, self.memo.resolve(val)) {
            (Value::Ref(_), Value::Class(_) | Value::Instance(_)) => val.to_string(),
            (_, resolved) => resolved.to_string(),
        }
    }

    fn merge_entries(&self, entries: &mut Vec<(Value, Value)>, new: Vec<(Value, Value)>) {
        let mut index: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(idx, (k, _))| (self.fingerprint(k), idx))
            .collect();
        for (k, v) in new {
            match index.entry(self.fingerprint(&k)) {
                Entry::Occupied(e) => entries[*e.get()].1 = v,
                Entry::Vacant(e) => {
                    e.insert(entries.len());
                    entries.push((k, v));
                }
            }
        }
    }

    fn merge_members(&self, members: &mut Vec<Value>, new: Vec<Value>) {
        let mut seen: HashSet<String> = members.iter().map(|m| self.fingerprint(m)).collect();
        for m in new {
            if seen.insert(self.fingerprint(&m)) {
                members.push(m);
            }
        }
    }

    fn make_kvlist(&self, items: Vec<Value>, opname: &str) -> Result<Vec<(Value, Value)>> {
        if items.len() % 2 != 0 {
            return Err(self.fail(format!("odd number of items for {opname}")));
        }
        let mut kvitems = Vec::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            check_nesting(&k, MAX_DEPTH - 1)?;
            check_nesting(&v, MAX_DEPTH - 1)?;
            self.check_hashable(&k)?;
            kvitems.push((k, v));
        }
        Ok(kvitems)
    }

    fn set_items(&mut self, kvitems: Vec<(Value, Value)>, opname: &str) -> Result<()> {
        let mut target = self.take_top()?;
        match &mut target {
            Value::Dict(entries) => self.merge_entries(entries, kvitems),
            other => {
                return Err(self.fail(format!("cannot {opname} on {}", other.type_name())));
            }
        }
        self.put_top(target)
    }

    fn decode_unicode(&self, bytes: &[u8]) -> Result<Value> {
        match Text::decode_surrogatepass(bytes) {
            Ok(text) => Ok(Value::String(text)),
            Err(err) if self.options.catch_invalid_utf8 => {
                warn!(
                    offset = self.offset,
                    %err,
                    "replacing undecodable string with a placeholder"
                );
                Ok(Value::Instance(PlaceholderInstance::invalid_utf8(
                    err.to_string(),
                )))
            }
            Err(err) => Err(Error::encoding(self.offset, err.to_string())),
        }
    }

    fn unregistered_extension(&self, code: i64) -> Error {
        self.fail(format!("unregistered extension code {code}"))
    }

    fn decode_ascii(&self, bytes: &[u8]) -> Result<Value> {
        Text::decode_ascii(bytes)
            .map(Value::String)
            .map_err(|err| Error::encoding(self.offset, err.to_string()))
    }

    fn parse_int(&self, s: &str) -> Result<Value> {
        let t = s.trim();
        let (neg, t) = match t.strip_prefix('-') {
            Some(t) => (true, t),
            None => (false, t.strip_prefix('+').unwrap_or(t)),
        };
        let (radix, digits) = match t.get(..2) {
            Some("0x" | "0X") => (16, &t[2..]),
            Some("0o" | "0O") => (8, &t[2..]),
            Some("0b" | "0B") => (2, &t[2..]),
            _ => (10, t),
        };
        let digits = digits.replace('_', "");
        let n = BigInt::parse_bytes(digits.as_bytes(), radix)
            .ok_or_else(|| self.fail(format!("invalid integer literal {s:?}")))?;
        Ok(int_value(if neg { -n } else { n }))
    }

    fn dispatch(&mut self, op: PickleOp<'_>) -> Result<()> {
        match op {
            PickleOp::MARK => self.stack.mark(),
            PickleOp::STOP => (),
            PickleOp::POP => {
                if self.stack.frame_is_empty() {
                    let _ = self.pop_mark()?;
                } else {
                    let _ = self.pop()?;
                }
            }
            PickleOp::POP_MARK => {
                let _ = self.pop_mark()?;
            }
            PickleOp::DUP => {
                let handle = self.share_top()?;
                self.stack.push(Value::Ref(handle));
            }
            PickleOp::FLOAT(s) => {
                let x = s
                    .trim()
                    .parse()
                    .map_err(|_| self.fail(format!("invalid float literal {s:?}")))?;
                self.push(Value::Float(x))?;
            }
            PickleOp::INT("00") => self.push(Value::Bool(false))?,
            PickleOp::INT("01") => self.push(Value::Bool(true))?,
            PickleOp::INT(s) => {
                let val = self.parse_int(s)?;
                self.push(val)?;
            }
            PickleOp::LONG(s) => {
                let val = self.parse_int(s.strip_suffix('L').unwrap_or(s))?;
                self.push(val)?;
            }
            PickleOp::BININT(n) => self.push(Value::Int(n.into()))?,
            PickleOp::BININT1(n) => self.push(Value::Int(n.into()))?,
            PickleOp::BININT2(n) => self.push(Value::Int(n.into()))?,
            PickleOp::LONG1(b) | PickleOp::LONG4(b) => {
                self.push(int_value(BigInt::from_signed_bytes_le(b)))?;
            }
            PickleOp::BINFLOAT(x) => self.push(Value::Float(x))?,
            PickleOp::NONE => self.push(Value::None)?,
            PickleOp::NEWTRUE => self.push(Value::Bool(true))?,
            PickleOp::NEWFALSE => self.push(Value::Bool(false))?,
            PickleOp::PERSID(b) => {
                let pid = Text::decode_ascii(b).map_err(|_| {
                    self.fail("persistent IDs in protocol 0 must be ASCII strings")
                })?;
                self.push(Value::Instance(PlaceholderInstance::persistent(
                    Value::String(pid),
                )))?;
            }
            PickleOp::BINPERSID => {
                let pid = self.pop()?;
                self.push(Value::Instance(PlaceholderInstance::persistent(pid)))?;
            }
            PickleOp::STRING(b) => {
                let quoted = match b {
                    [q @ (b'\'' | b'"'), inner @ .., end] if q == end => inner,
                    _ => return Err(self.fail("the STRING opcode argument must be quoted")),
                };
                let raw =
                    unescape_bytes(quoted).map_err(|e| self.fail(format!("STRING: {e}")))?;
                let val = self.decode_ascii(&raw)?;
                self.push(val)?;
            }
            PickleOp::BINSTRING(b) | PickleOp::SHORT_BINSTRING(b) => {
                let val = self.decode_ascii(b)?;
                self.push(val)?;
            }
            PickleOp::UNICODE(b) => {
                let text = decode_raw_unicode_escape(b)
                    .map_err(|e| Error::encoding(self.offset, e))?;
                self.push(Value::String(text))?;
            }
            PickleOp::BINUNICODE(b) | PickleOp::SHORT_BINUNICODE(b) | PickleOp::BINUNICODE8(b) => {
                let val = self.decode_unicode(b)?;
                self.push(val)?;
            }
            PickleOp::BINBYTES(b)
            | PickleOp::SHORT_BINBYTES(b)
            | PickleOp::BINBYTES8(b)
            | PickleOp::BYTEARRAY8(b) => self.push(Value::Bytes(b.to_vec()))?,
            PickleOp::EMPTY_DICT => self.push(Value::Dict(Vec::new()))?,
            PickleOp::EMPTY_LIST => self.push(Value::Seq(SequenceType::List, Vec::new()))?,
            PickleOp::EMPTY_TUPLE => self.push(Value::Seq(SequenceType::Tuple, Vec::new()))?,
            PickleOp::EMPTY_SET => self.push(Value::Seq(SequenceType::Set, Vec::new()))?,
            PickleOp::TUPLE => {
                let items = self.pop_mark()?;
                self.push(Value::Seq(SequenceType::Tuple, items))?;
            }
            PickleOp::TUPLE1 => {
                let t1 = self.pop()?;
                self.push(Value::Seq(SequenceType::Tuple, vec![t1]))?;
            }
            PickleOp::TUPLE2 => {
                let (t2, t1) = (self.pop()?, self.pop()?);
                self.push(Value::Seq(SequenceType::Tuple, vec![t1, t2]))?;
            }
            PickleOp::TUPLE3 => {
                let (t3, t2, t1) = (self.pop()?, self.pop()?, self.pop()?);
                self.push(Value::Seq(SequenceType::Tuple, vec![t1, t2, t3]))?;
            }
            PickleOp::LIST => {
                let items = self.pop_mark()?;
                self.push(Value::Seq(SequenceType::List, items))?;
            }
            PickleOp::DICT => {
                let items = self.pop_mark()?;
                let kvitems = self.make_kvlist(items, "DICT")?;
                let mut entries = Vec::with_capacity(kvitems.len());
                self.merge_entries(&mut entries, kvitems);
                self.push(Value::Dict(entries))?;
            }
            PickleOp::FROZENSET => {
                let items = self.pop_mark()?;
                items.iter().try_for_each(|item| self.check_hashable(item))?;
                let mut members = Vec::with_capacity(items.len());
                self.merge_members(&mut members, items);
                self.push(Value::Seq(SequenceType::FrozenSet, members))?;
            }
            PickleOp::APPEND => {
                let v = self.pop()?;
                check_nesting(&v, MAX_DEPTH - 1)?;
                let offset = self.offset;
                match self.top_target()? {
                    Value::Seq(SequenceType::List, items) => items.push(v),
                    other => {
                        let t = other.type_name();
                        return Err(Error::malformed(offset, format!("cannot APPEND to {t}")));
                    }
                }
            }
            PickleOp::APPENDS => {
                let items = self.pop_mark()?;
                items
                    .iter()
                    .try_for_each(|item| check_nesting(item, MAX_DEPTH - 1))?;
                let offset = self.offset;
                match self.top_target()? {
                    Value::Seq(SequenceType::List, list) => list.extend(items),
                    other => {
                        let t = other.type_name();
                        return Err(Error::malformed(offset, format!("cannot APPENDS to {t}")));
                    }
                }
            }
            PickleOp::SETITEM => {
                let (v, k) = (self.pop()?, self.pop()?);
                check_nesting(&k, MAX_DEPTH - 1)?;
                check_nesting(&v, MAX_DEPTH - 1)?;
                self.check_hashable(&k)?;
                self.set_items(vec![(k, v)], "SETITEM")?;
            }
            PickleOp::SETITEMS => {
                let items = self.pop_mark()?;
                let kvitems = self.make_kvlist(items, "SETITEMS")?;
                self.set_items(kvitems, "SETITEMS")?;
            }
            PickleOp::ADDITEMS => {
                let items = self.pop_mark()?;
                items.iter().try_for_each(|item| {
                    check_nesting(item, MAX_DEPTH - 1)?;
                    self.check_hashable(item)
                })?;
                let mut target = self.take_top()?;
                match &mut target {
                    Value::Seq(SequenceType::Set, members) => self.merge_members(members, items),
                    other => {
                        let t = other.type_name();
                        return Err(self.fail(format!("cannot ADDITEMS to {t}")));
                    }
                }
                self.put_top(target)?;
            }
            PickleOp::GLOBAL(module, name) => {
                self.push(Value::Class(PlaceholderClass::new(module, name)))?;
            }
            PickleOp::STACK_GLOBAL => {
                let (name, module) = (self.pop()?, self.pop()?);
                let cls = match (self.memo.resolve(&module), self.memo.resolve(&name)) {
                    (Value::String(module), Value::String(name)) => {
                        match (module.as_str(), name.as_str()) {
                            (Some(module), Some(name)) => PlaceholderClass::new(module, name),
                            _ => return Err(self.fail("STACK_GLOBAL names must be valid text")),
                        }
                    }
                    _ => return Err(self.fail("STACK_GLOBAL requires str")),
                };
                self.push(Value::Class(cls))?;
            }
            PickleOp::REDUCE => {
                let (args, func) = (self.pop()?, self.pop()?);
                let cls = self.callable(&func, "REDUCE")?;
                let args = self.call_args(&args, "REDUCE")?;
                self.push(Value::Instance(cls.apply(args)))?;
            }
            PickleOp::NEWOBJ => {
                let (args, clsval) = (self.pop()?, self.pop()?);
                let cls = self.callable(&clsval, "NEWOBJ")?;
                let mut full = vec![clsval];
                full.extend(self.call_args(&args, "NEWOBJ")?);
                self.push(Value::Instance(cls.apply_new(full)))?;
            }
            PickleOp::NEWOBJ_EX => {
                let (kwargs, args, clsval) = (self.pop()?, self.pop()?, self.pop()?);
                let cls = self.callable(&clsval, "NEWOBJ_EX")?;
                let mut full = vec![clsval];
                full.extend(self.call_args(&args, "NEWOBJ_EX")?);
                let has_kwargs = match self.memo.resolve(&kwargs) {
                    Value::Dict(entries) => !entries.is_empty(),
                    other => {
                        return Err(self.fail(format!(
                            "NEWOBJ_EX keyword arguments must be a dict, not {}",
                            other.type_name()
                        )))
                    }
                };
                if has_kwargs {
                    full.push(kwargs);
                }
                self.push(Value::Instance(cls.apply_new(full)))?;
            }
            PickleOp::OBJ => {
                let mut items = self.pop_mark()?;
                if items.is_empty() {
                    return Err(self.fail("OBJ without a class"));
                }
                let cls = self.callable(&items.remove(0), "OBJ")?;
                self.push(Value::Instance(cls.apply(items)))?;
            }
            PickleOp::INST(module, name) => {
                let items = self.pop_mark()?;
                let cls = PlaceholderClass::new(module, name);
                self.push(Value::Instance(cls.apply(items)))?;
            }
            PickleOp::BUILD => {
                let state = self.pop()?;
                check_nesting(&state, MAX_DEPTH - 1)?;
                let offset = self.offset;
                match self.top_target()? {
                    Value::Instance(inst) => inst
                        .set_state(state)
                        .map_err(|e| Error::malformed(offset, e.to_string()))?,
                    other => {
                        let t = other.type_name();
                        return Err(Error::malformed(
                            offset,
                            format!("BUILD target {t} does not accept state"),
                        ));
                    }
                }
            }
            PickleOp::GET(s) => {
                let mid = self.memo_id(s)?;
                self.memo_get(mid)?;
            }
            PickleOp::BINGET(mid) => self.memo_get(mid.into())?,
            PickleOp::LONG_BINGET(mid) => self.memo_get(mid)?,
            PickleOp::PUT(s) => {
                let mid = self.memo_id(s)?;
                self.memo_put(mid)?;
            }
            PickleOp::BINPUT(mid) => self.memo_put(mid.into())?,
            PickleOp::LONG_BINPUT(mid) => self.memo_put(mid)?,
            PickleOp::MEMOIZE => {
                let mid = u32::try_from(self.memo.len())
                    .map_err(|_| self.fail("memo table is full"))?;
                self.memo_put(mid)?;
            }
            PickleOp::PROTO(proto) => {
                if proto > MAX_PROTOCOL {
                    return Err(self.fail(format!("unsupported pickle protocol: {proto}")));
                }
                debug!(protocol = proto, "pickle protocol");
            }
            PickleOp::FRAME(len) => trace!(len, "frame"),
            PickleOp::EXT1(code) => return Err(self.unregistered_extension(code.into())),
            PickleOp::EXT2(code) => return Err(self.unregistered_extension(code.into())),
            PickleOp::EXT4(code) => return Err(self.unregistered_extension(code.into())),
            PickleOp::NEXT_BUFFER => {
                return Err(self.fail(
                    "pickle stream refers to out-of-band data but no buffers were given",
                ))
            }
            PickleOp::READONLY_BUFFER => {
                let offset = self.offset;
                if !matches!(self.top_target()?, Value::Bytes(_)) {
                    return Err(Error::malformed(
                        offset,
                        "READONLY_BUFFER needs a buffer on the stack",
                    ));
                }
            }
        }
        Ok(())
    }
}


/// True if `val` has more than `limit` levels of containers, not counting
/// anything behind a reference.
fn nests_deeper_than(val: &Value, limit: usize) -> bool {
    let deeper = |v: &Value| limit == 0 || nests_deeper_than(v, limit - 1);
    match val {
        Value::Seq(_, items) => items.iter().any(deeper),
        Value::Dict(entries) => entries.iter().any(|(k, v)| deeper(k) || deeper(v)),
        Value::Instance(inst) => {
            inst.args.iter().any(deeper) || inst.state.as_deref().is_some_and(deeper)
        }
        _ => false,
    }
}

/// Called whenever a value is about to go inside another one, so no tree
/// ever gets deeper than [MAX_DEPTH].
fn check_nesting(val: &Value, limit: usize) -> Result<()> {
    if nests_deeper_than(val, limit) {
        return Err(Error::TooDeep { limit: MAX_DEPTH });
    }
    Ok(())
}

fn int_value(n: BigInt) -> Value {
    match i64::try_from(&n) {
        Ok(n) => Value::Int(n),
        Err(_) => Value::BigInt(n),
    }
}

/// Undo the backslash escapes of a quoted protocol 0 `STRING`.
fn unescape_bytes(b: &[u8]) -> std::result::Result<Vec<u8>, &'static str> {
    let mut out = Vec::with_capacity(b.len());
    let mut it = b.iter().copied().peekable();
    while let Some(c) = it.next() {
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let Some(e) = it.next() else {
            return Err("trailing \\ in string");
        };
        match e {
            b'\n' => (),
            b'\\' | b'\'' | b'"' => out.push(e),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut n = u32::from(e - b'0');
                for _ in 0..2 {
                    match it.peek() {
                        Some(d @ b'0'..=b'7') => {
                            n = n * 8 + u32::from(d - b'0');
                            it.next();
                        }
                        _ => break,
                    }
                }
                out.push((n & 0xff) as u8);
            }
            b'x' => {
                let hi = it.next().and_then(|d| char::from(d).to_digit(16));
                let lo = it.next().and_then(|d| char::from(d).to_digit(16));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => out.push((hi * 16 + lo) as u8),
                    _ => return Err("invalid \\x escape"),
                }
            }
            e => out.extend([b'\\', e]),
        }
    }
    Ok(out)
}

/// Decode a protocol 0 `UNICODE` operand: latin-1 plus `\uXXXX` and
/// `\UXXXXXXXX` escapes after an odd run of backslashes.
fn decode_raw_unicode_escape(b: &[u8]) -> std::result::Result<Text, String> {
    let mut cps = Vec::with_capacity(b.len());
    let mut pos = 0;
    while pos < b.len() {
        if b[pos] != b'\\' {
            cps.push(u32::from(b[pos]));
            pos += 1;
            continue;
        }
        let start = pos;
        while pos < b.len() && b[pos] == b'\\' {
            cps.push(u32::from(b'\\'));
            pos += 1;
        }
        let width = match b.get(pos) {
            Some(b'u') => 4,
            Some(b'U') => 8,
            _ => continue,
        };
        if (pos - start) % 2 == 0 {
            continue;
        }
        cps.pop();
        pos += 1;
        let digits = b
            .get(pos..pos + width)
            .and_then(|d| std::str::from_utf8(d).ok())
            .and_then(|d| u32::from_str_radix(d, 16).ok())
            .ok_or_else(|| {
                format!(
                    "'rawunicodeescape' codec can't decode bytes in position {start}: \
                     truncated \\uXXXX escape"
                )
            })?;
        cps.push(digits);
        pos += width;
    }
    Text::from_code_points(cps).ok_or_else(|| {
        "'rawunicodeescape' codec can't decode bytes: \\Uxxxxxxxx out of range".to_string()
    })
}

/// Evaluate a pickle and produce the value it describes. Nothing named
/// in the pickle is imported or called.
pub fn evaluate(data: &[u8], options: UnpicklerOptions) -> Result<Value> {
    Unpickler::new(data, options).load()
}
