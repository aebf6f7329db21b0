use std::{
    fs::File,
    io::{self, Write},
    sync::Mutex,
    time::Instant,
};

use chrono::Utc;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Where log lines end up: the console or a file under the temp directory.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum LogKind {
    /// Logs to stdout, the default choice.
    Stdout,

    /// Logs to /tmp/satsuma-<timestamp>.log
    File,
}

struct Inner {
    sink: Box<dyn Write + Send>,
    started: Instant,
}

impl Inner {
    fn new(kind: LogKind) -> Self {
        let started = Instant::now();
        let sink: Box<dyn Write + Send> = match kind {
            LogKind::Stdout => Box::new(io::stdout()),
            LogKind::File => {
                let filename = format!("satsuma-{}.log", Utc::now().timestamp());
                let path = std::env::temp_dir().join(filename);
                Box::new(File::create(path).unwrap())
            }
        };

        Self { sink, started }
    }

    fn log<T>(&mut self, data: T)
    where
        T: std::fmt::Display,
    {
        let elapsed = self.started.elapsed();
        let seconds = elapsed.as_secs();
        let hours = seconds / 3600;
        let minutes = (seconds / 60) % 60;
        let seconds = seconds % 60;
        let millis = elapsed.subsec_millis();

        writeln!(
            self.sink,
            "[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}] {data}"
        )
        .unwrap();
    }
}

struct Logger {
    inner: Mutex<Inner>,
}

impl Logger {
    fn new(kind: LogKind) -> Self {
        Self {
            inner: Mutex::new(Inner::new(kind)),
        }
    }

    fn log<T>(&self, data: T)
    where
        T: std::fmt::Display,
    {
        if let Ok(ref mut inner) = self.inner.lock() {
            inner.log(data);
        }
    }
}

/// Installs the global logger. Calling it twice is a no-op.
pub fn init_logger(kind: LogKind) {
    LOGGER.set(Logger::new(kind)).ok();
}

/// Logs a line through the global logger, silently dropping it when no
/// logger was installed. Emulation code may call this from hot paths, so
/// callers should prefer passing cheap `Display` values.
pub fn log<T>(data: T)
where
    T: std::fmt::Display,
{
    LOGGER.get().map_or((), |logger| logger.log(data));
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{init_logger, log, LogKind};

    #[test]
    fn logger_file() {
        init_logger(LogKind::File);
        log("ok".to_string());

        let dir = std::env::temp_dir();
        let files = fs::read_dir(dir).unwrap();
        for f in files.flatten() {
            let p = f.path();
            if let Some(ext) = p.extension() {
                let s = p.to_str().unwrap();
                if ext == "log" && s.contains("satsuma") {
                    let content = fs::read_to_string(p.clone()).unwrap();
                    fs::remove_file(p).unwrap();
                    assert_eq!(content, "[00:00:00.000] ok\n".to_string());
                }
            }
        }
    }
}
