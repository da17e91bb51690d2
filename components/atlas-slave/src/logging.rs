use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// Mirrors every formatted log line to stderr (untouched, so terminal colour
/// survives) and to the on-disk log file with ANSI escape sequences
/// stripped. Identical to the master's tee, kept as its own copy since
/// `atlas-master` and `atlas-slave` are separate binaries with no shared
/// library crate between them.
struct TeeWriter {
    file: Mutex<std::fs::File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stripped = strip_ansi(buf);
        self.file
            .lock()
            .expect("log file mutex poisoned")
            .write_all(&stripped)?;
        io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().expect("log file mutex poisoned").flush()?;
        io::stderr().flush()
    }
}

/// Strips `ESC '[' ... <final byte 0x40..=0x7e>` CSI sequences, which is all
/// `env_logger`'s colour output ever emits.
fn strip_ansi(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == 0x1b && bytes.peek() == Some(&b'[') {
            bytes.next();
            for next in bytes.by_ref() {
                if (0x40..=0x7e).contains(&next) {
                    break;
                }
            }
            continue;
        }
        out.push(b);
    }
    out
}

pub fn init(level: LevelFilter, log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let writer = TeeWriter { file: Mutex::new(file) };

    Builder::new()
        .filter_level(level)
        .target(Target::Pipe(Box::new(writer)))
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        let input = b"\x1b[32mINFO\x1b[0m hello";
        assert_eq!(strip_ansi(input), b"INFO hello");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let input = b"plain log line";
        assert_eq!(strip_ansi(input), input);
    }
}
