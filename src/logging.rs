use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

use crate::core::config::LoggingConfig;

pub(crate) const LOG_FILE_NAME: &str = "opsdeck.log";

/// Writes every formatted event to stdout and, when a file is attached, appends
/// it to the run log as well.
#[derive(Clone)]
pub(crate) struct TeeMakeWriter {
    pub file: Option<Arc<Mutex<File>>>,
    pub suppress_stdout: bool,
}

impl TeeMakeWriter {
    pub fn open(log_path: &Path, suppress_stdout: bool) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("opening {}", log_path.display()))?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
            suppress_stdout,
        })
    }
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct TeeWriter {
    file: Option<Arc<Mutex<File>>>,
    suppress_stdout: bool,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
        {
            // Best effort; stdout stays authoritative.
            let _ = file.write_all(buf);
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
        {
            let _ = file.flush();
        }
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Writer for `init`. A log file that cannot be opened is skipped; the
/// stdout setting is kept either way.
fn build_make_writer(config: &LoggingConfig, run_dir: &Path, suppress_stdout: bool) -> TeeMakeWriter {
    if !config.file {
        return TeeMakeWriter {
            file: None,
            suppress_stdout,
        };
    }
    TeeMakeWriter::open(&run_dir.join(LOG_FILE_NAME), suppress_stdout).unwrap_or_else(|e| {
        eprintln!("File logging disabled: {:#}", e);
        TeeMakeWriter {
            file: None,
            suppress_stdout,
        }
    })
}

/// Install the global subscriber. `run_dir` receives the log file when file
/// logging is enabled.
pub(crate) fn init(config: &LoggingConfig, run_dir: &Path, suppress_stdout: bool) {
    let make_writer = build_make_writer(config, run_dir, suppress_stdout);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.max_level())
        .with_writer(make_writer)
        .with_ansi(!config.file)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok(); // Ignore err when already set
}
