//! Width-aware layout for evaluated values.
//!
//! A value is written in its compact `repr` form when it fits the room
//! left on the line. Otherwise containers are broken one element per
//! line with hanging indentation, and placeholder instances get their own
//! layout (see [PrettyPrinter::format]).

use crate::{
    error::{Error, Result},
    value::{PlaceholderInstance, SequenceType, Value},
};

pub const DEFAULT_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrettyPrinter {
    /// Target line width.
    pub width: usize,
    /// Extra indentation for each nesting level.
    pub indent_per_level: usize,
}

impl Default for PrettyPrinter {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            indent_per_level: 1,
        }
    }
}

/// True if an instance with state shows up anywhere in `val`. Those never
/// use the compact form.
fn has_state(val: &Value) -> bool {
    match val {
        Value::Instance(inst) => inst.state().is_some() || inst.args.iter().any(has_state),
        Value::Seq(_, items) => items.iter().any(has_state),
        Value::Dict(entries) => entries.iter().any(|(k, v)| has_state(k) || has_state(v)),
        _ => false,
    }
}

fn flat(val: &Value) -> Option<String> {
    (!has_state(val)).then(|| val.to_string())
}

fn flat_tuple(items: &[Value]) -> Option<String> {
    if items.iter().any(has_state) {
        return None;
    }
    let mut rep = String::from("(");
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            rep.push_str(", ");
        }
        rep.push_str(&item.to_string());
    }
    rep.push_str(if items.len() == 1 { ",)" } else { ")" });
    Some(rep)
}

fn push_spaces(out: &mut String, n: usize) {
    out.extend(std::iter::repeat(' ').take(n));
}

impl PrettyPrinter {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    /// Lay out `val`. Placeholder instances render as:
    ///
    /// * `m.C()` with no arguments and no state,
    /// * `m.C` followed by the argument tuple when only arguments are set,
    /// * `m.C()(state=` then the state on the next line when only state is
    ///   set.
    ///
    /// An instance with both arguments and state can't be rendered and the
    /// whole call fails with [Error::UnsupportedRendering].
    pub fn format(&self, val: &Value) -> Result<String> {
        let mut out = String::new();
        self.write_value(&mut out, val, 0, 0)?;
        Ok(out)
    }

    fn fits(&self, rep: &str, indent: usize, allowance: usize) -> bool {
        rep.chars().count() <= self.width.saturating_sub(indent + allowance)
    }

    fn write_value(
        &self,
        out: &mut String,
        val: &Value,
        indent: usize,
        allowance: usize,
    ) -> Result<()> {
        if let Some(rep) = flat(val) {
            if self.fits(&rep, indent, allowance) {
                out.push_str(&rep);
                return Ok(());
            }
        }
        match val {
            Value::Seq(SequenceType::List, items) if !items.is_empty() => {
                out.push('[');
                self.write_items(out, items, indent, allowance + 1)?;
                out.push(']');
            }
            Value::Seq(SequenceType::Tuple, items) if !items.is_empty() => {
                self.write_tuple(out, items, indent, allowance)?;
            }
            Value::Seq(SequenceType::Set, items) if !items.is_empty() => {
                out.push('{');
                self.write_items(out, items, indent, allowance + 1)?;
                out.push('}');
            }
            Value::Seq(SequenceType::FrozenSet, items) if !items.is_empty() => {
                out.push_str("frozenset({");
                self.write_items(out, items, indent + "frozenset".len() + 1, allowance + 2)?;
                out.push_str("})");
            }
            Value::Dict(entries) if !entries.is_empty() => {
                out.push('{');
                push_spaces(out, self.indent_per_level.saturating_sub(1));
                self.write_dict_items(out, entries, indent, allowance + 1)?;
                out.push('}');
            }
            Value::Instance(inst) => self.write_instance(out, inst, indent, allowance)?,
            other => out.push_str(&other.to_string()),
        }
        Ok(())
    }

    fn write_tuple(
        &self,
        out: &mut String,
        items: &[Value],
        indent: usize,
        allowance: usize,
    ) -> Result<()> {
        if let Some(rep) = flat_tuple(items) {
            if items.is_empty() || self.fits(&rep, indent, allowance) {
                out.push_str(&rep);
                return Ok(());
            }
        }
        let end = if items.len() == 1 { ",)" } else { ")" };
        out.push('(');
        self.write_items(out, items, indent, allowance + end.len())?;
        out.push_str(end);
        Ok(())
    }

    fn write_items(
        &self,
        out: &mut String,
        items: &[Value],
        indent: usize,
        allowance: usize,
    ) -> Result<()> {
        let indent = indent + self.indent_per_level;
        push_spaces(out, self.indent_per_level.saturating_sub(1));
        for (idx, item) in items.iter().enumerate() {
            let last = idx + 1 == items.len();
            if idx > 0 {
                out.push_str(",\n");
                push_spaces(out, indent);
            }
            self.write_value(out, item, indent, if last { allowance } else { 1 })?;
        }
        Ok(())
    }

    fn write_dict_items(
        &self,
        out: &mut String,
        entries: &[(Value, Value)],
        indent: usize,
        allowance: usize,
    ) -> Result<()> {
        let indent = indent + self.indent_per_level;
        for (idx, (k, v)) in entries.iter().enumerate() {
            let last = idx + 1 == entries.len();
            if idx > 0 {
                out.push_str(",\n");
                push_spaces(out, indent);
            }
            let key = k.to_string();
            out.push_str(&key);
            out.push_str(": ");
            let vindent = indent + key.chars().count() + 2;
            self.write_value(out, v, vindent, if last { allowance } else { 1 })?;
        }
        Ok(())
    }

    fn write_instance(
        &self,
        out: &mut String,
        inst: &PlaceholderInstance,
        indent: usize,
        allowance: usize,
    ) -> Result<()> {
        match (inst.args.is_empty(), inst.state()) {
            (true, None) => {
                out.push_str(&inst.qualified_name());
                out.push_str("()");
            }
            (false, None) => {
                out.push_str(&inst.qualified_name());
                self.write_tuple(out, &inst.args, indent + 1, allowance + 1)?;
            }
            (true, Some(state)) => {
                out.push_str(&inst.qualified_name());
                out.push_str("()(state=\n");
                let indent = indent + self.indent_per_level;
                push_spaces(out, indent);
                self.write_value(out, state, indent, allowance + 1)?;
                out.push(')');
            }
            (false, Some(_)) => {
                return Err(Error::UnsupportedRendering {
                    class: inst.qualified_name(),
                })
            }
        }
        Ok(())
    }
}
