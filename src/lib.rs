//! Inert dumps of the Python pickle format.
//!
//! The stream is interpreted as far as building the object graph it
//! describes, but nothing it names is ever imported or called. Classes
//! turn into [PlaceholderClass] values and anything constructed from them
//! turns into a [PlaceholderInstance] that just records the arguments and
//! state. Persistent ids (how PyTorch refers to tensor storage) become
//! `pers.obj(pid)` placeholders.
//!
//! ```rust
//! use dump_pickle::{evaluate, PrettyPrinter, UnpicklerOptions};
//!
//! fn main() -> dump_pickle::Result<()> {
//!     // protocol 2 pickle of `collections.OrderedDict()`
//!     let b = b"\x80\x02ccollections\nOrderedDict\nq\x00)Rq\x01.";
//!     let value = evaluate(b, UnpicklerOptions::default())?;
//!     assert_eq!(PrettyPrinter::default().format(&value)?, "collections.OrderedDict()");
//!     Ok(())
//! }
//! ```
//!
//! Pickles stored in zip archives (PyTorch checkpoints for example) can be
//! reached with a [Locator] such as `model.pt@archive/data.pkl` or
//! `model.pt@*/data.pkl`.

/// Command line driver.
pub mod cli;

pub mod error;

/// Evaluating pickle operations.
pub mod eval;

/// Finding the pickle bytes in a file or zip archive.
pub mod locator;

/// Pickle operations.
pub mod ops;

/// Parsers for converting `&[u8]` into pickle operations.
pub mod parsers;

/// Width-aware output.
pub mod pretty;

/// The Value type you can get from evaluating pickle operations.
pub mod value;

pub use crate::error::{Error, ErrorKind, Result};

pub use crate::eval::{evaluate, UnpicklerOptions};

pub use crate::locator::Locator;

pub use crate::pretty::PrettyPrinter;

pub use crate::value::{PlaceholderClass, PlaceholderInstance, SequenceType, Text, Value};
