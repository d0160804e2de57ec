//! Command line driver: resolve a locator, interpret the pickle it points
//! at and print the result.

use std::{
    ffi::OsString,
    io::{self, Write},
};

use clap::{error::ErrorKind as ClapErrorKind, Parser};
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

use crate::{
    error::{Error, Result},
    eval::{evaluate, UnpicklerOptions},
    locator::Locator,
    pretty::{PrettyPrinter, DEFAULT_WIDTH},
    value::Value,
};

/// The accepted forms of `PICKLE_FILE`.
pub const LOCATOR_FORMS: &str = "\
  PICKLE_FILE can be any of:
    path to a pickle file
    file.zip@member.pkl
    file.zip@*/pattern.*
      (shell glob pattern for members)
      (only first match will be shown)";

/// Exit status for a bad command line.
pub const USAGE_EXIT: u8 = 2;

/// Dump a pickle file without running any of the code it refers to
#[derive(Parser, Debug)]
#[command(name = "dump-pickle")]
#[command(author, version, about, long_about = None)]
#[command(after_help = LOCATOR_FORMS)]
struct Cli {
    /// Pickle file, or zip archive member, to dump
    #[arg(value_name = "PICKLE_FILE")]
    locator: String,

    /// Show strings that aren't valid UTF-8 as a placeholder instead of failing
    #[arg(long, env = "DUMP_PICKLE_CATCH_INVALID_UTF8")]
    catch_invalid_utf8: bool,

    /// Target line width for the output
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: usize,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Interpret `data`, write the formatted result plus a newline to `out`
/// and hand back the value.
pub fn dump<W: Write + ?Sized>(
    data: &[u8],
    out: &mut W,
    options: UnpicklerOptions,
    printer: &PrettyPrinter,
) -> Result<Value> {
    let value = evaluate(data, options)?;
    let text = printer.format(&value)?;
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(value)
}

/// Like [dump], reading the pickle from wherever `locator` points.
pub fn dump_locator<W: Write + ?Sized>(
    locator: &Locator,
    out: &mut W,
    options: UnpicklerOptions,
    printer: &PrettyPrinter,
) -> Result<Value> {
    info!(%locator, "dumping");
    let data = locator.read()?;
    dump(&data, out, options, printer)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Somebody else may have installed a subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Run the tool with `argv` (program name first).
///
/// With `output` set to `None` this behaves like a terminal invocation:
/// the dump goes to stdout, a bad command line prints the usage to stderr
/// and returns exit status 2, and logging goes to stderr. With a sink the
/// dump is written there and a bad command line is an [Error::Usage]
/// instead, so nothing ends up on the terminal.
pub fn main<I, T>(argv: I, output: Option<&mut dyn Write>) -> Result<u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion
            ) =>
        {
            let text = e.render().to_string();
            match output {
                Some(out) => out.write_all(text.as_bytes())?,
                None => io::stdout().write_all(text.as_bytes())?,
            }
            return Ok(0);
        }
        Err(e) => {
            if output.is_some() {
                return Err(Error::usage(e.render().to_string().trim_end()));
            }
            let mut stderr = io::stderr().lock();
            writeln!(stderr, "{}", e.render().to_string().trim_end())?;
            writeln!(stderr)?;
            writeln!(stderr, "{LOCATOR_FORMS}")?;
            return Ok(USAGE_EXIT);
        }
    };

    let locator = Locator::parse(&cli.locator)?;
    let options = UnpicklerOptions {
        catch_invalid_utf8: cli.catch_invalid_utf8,
    };
    let printer = PrettyPrinter::new(cli.width);

    match output {
        Some(out) => {
            dump_locator(&locator, out, options, &printer)?;
        }
        None => {
            init_logging(cli.verbose);
            debug!(?options, width = cli.width, "starting");
            dump_locator(&locator, &mut io::stdout().lock(), options, &printer)?;
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn dump_writes_trailing_newline() {
        let mut out = Vec::new();
        let value = dump(
            b"\x80\x02]q\x00(K\x01K\x02e.",
            &mut out,
            UnpicklerOptions::default(),
            &PrettyPrinter::default(),
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[1, 2]\n");
        assert_eq!(value.to_string(), "[1, 2]");
    }

    #[test]
    fn failed_dump_writes_nothing() {
        let mut out = Vec::new();
        let err = dump(
            b"K\x01",
            &mut out,
            UnpicklerOptions::default(),
            &PrettyPrinter::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedStream);
        assert!(out.is_empty());
    }

    #[test]
    fn programmatic_usage_errors() {
        let mut out = Vec::new();
        for argv in [&["dump-pickle"][..], &["dump-pickle", "a.pkl", "b.pkl"]] {
            let err = main(argv.iter().copied(), Some(&mut out as &mut dyn Write)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
        assert!(out.is_empty());
    }

    #[test]
    fn programmatic_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.pkl");
        std::fs::write(&path, b"\x80\x02cm\nC\n)\x81.").unwrap();
        let mut out = Vec::new();
        let argv = [OsString::from("dump-pickle"), path.into_os_string()];
        assert_eq!(main(argv, Some(&mut out as &mut dyn Write)).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), "m.C()\n");
    }

    #[test]
    fn help_mentions_locator_forms() {
        let mut out = Vec::new();
        assert_eq!(main(["dump-pickle", "--help"], Some(&mut out as &mut dyn Write)).unwrap(), 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("file.zip@member.pkl"), "{text}");
    }
}
