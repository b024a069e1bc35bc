use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use time::{Date, OffsetDateTime};

// Simple ANSI stripper to prevent the log file from being polluted with escape sequences
pub fn strip_ansi_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' {
            in_escape = true;
        } else if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Appends to `<dir>/<name>.log` and moves it aside to
/// `<dir>/<name>.<YYYY-MM-DD>.log` when the local date changes.
#[derive(Clone)]
pub(crate) struct DailyFileWriter {
    directory: PathBuf,
    name: String,
    state: Arc<Mutex<WriterState>>,
}

struct WriterState {
    date: Option<Date>,
}

fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

impl DailyFileWriter {
    pub fn new(directory: impl AsRef<Path>, name: &str) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            name: name.to_string(),
            state: Arc::new(Mutex::new(WriterState { date: None })),
        }
    }

    fn current_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.name))
    }

    fn archived_path(&self, date: Date) -> PathBuf {
        self.directory.join(format!(
            "{}.{:04}-{:02}-{:02}.log",
            self.name,
            date.year(),
            u8::from(date.month()),
            date.day()
        ))
    }

    fn rotate_if_needed(&self, state: &mut WriterState) -> io::Result<()> {
        let now = today();
        let current = self.current_path();

        let last = match state.date {
            Some(date) => date,
            // First write since start-up: the existing file may be from an earlier day.
            None => match fs::metadata(&current).and_then(|m| m.modified()) {
                Ok(modified) => {
                    let modified = OffsetDateTime::from(modified);
                    let offset = OffsetDateTime::now_local()
                        .map(|n| n.offset())
                        .unwrap_or(time::UtcOffset::UTC);
                    modified.to_offset(offset).date()
                }
                Err(_) => now,
            },
        };

        if last != now && current.exists() {
            fs::rename(&current, self.archived_path(last))?;
        }
        state.date = Some(now);
        Ok(())
    }
}

impl io::Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.rotate_if_needed(&mut state) {
            eprintln!("Failed to rotate log file: {}", e);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for DailyFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
