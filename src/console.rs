//! Operator-facing console lines and the yes/no prompt.

use std::fmt;
use std::io::{BufRead, Write};

use crate::signal::Interrupt;
use crate::traits::Result;

/// Write one line; a broken console is logged, never fatal.
pub fn say(out: &mut dyn Write, args: fmt::Arguments<'_>) {
    if let Err(err) = out.write_fmt(args).and_then(|()| out.write_all(b"\n")) {
        log::debug!("console write failed: {err}");
    }
}

/// `say!(out, "fmt", args..)` - `writeln!` that cannot fail.
#[macro_export]
macro_rules! say {
    ($out:expr, $($arg:tt)*) => {
        $crate::console::say($out, format_args!($($arg)*))
    };
}

/// Ask `question [y/N]` and read one line. Anything but `y`/`yes` is no,
/// including end of input.
pub fn ask_yes_no<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> Result<bool> {
    write!(out, "{question} [y/N] ")?;
    out.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        writeln!(out)?;
        return Ok(false);
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// [`ask_yes_no`], answered "no" when `interrupt` is set before or while
/// waiting.
///
/// With a Ctrl+C handler installed the blocking read only returns on Enter
/// or end of input, so the flag is checked once it does.
pub fn confirm<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    question: &str,
    interrupt: &Interrupt,
) -> Result<bool> {
    if interrupt.is_set() {
        return Ok(false);
    }
    let answer = ask_yes_no(input, out, question)?;
    Ok(answer && !interrupt.is_set())
}
