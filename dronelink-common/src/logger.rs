use std::fs::{self, File};
use std::io::{self, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncBufReadExt as _, AsyncSeekExt as _, BufReader as AsyncBufReader};

use log::{Level, Log, Metadata, Record, SetLoggerError};

use crate::constants::{APP_ID, LOG_FILE_NAME, LOG_LEVEL};

pub use log::{debug, error, info, trace, warn};

pub const MAX_TAIL_LINES: usize = 50;

/// Appends every record to a log file, optionally echoing the message on stdout/stderr
pub struct Logger {
    name: &'static str,
    use_stdout_stderr: bool,
    path: PathBuf,
}

impl Logger {
    pub fn new(name: &'static str, use_stdout_stderr: bool, path: PathBuf) -> Self {
        Self {
            name,
            use_stdout_stderr,
            path,
        }
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_ID)
            .join(LOG_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the directory of the log file
    pub fn prepare_dir(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
    }

    pub fn init(self) -> Result<(), SetLoggerError> {
        // Records are still echoed when the file can't be created
        if let Err(err) = self.prepare_dir() {
            eprintln!(
                "Cannot create the log directory of {}: {err}",
                self.path.display()
            );
        }

        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(LOG_LEVEL);

        Ok(())
    }

    /// If tail specified, prints the last x lines too before awaiting the next lines
    pub async fn follow(path: &Path, tail: Option<usize>) -> io::Result<()> {
        println!("Waiting for log content, press CTRL+C or send SIGINT to exit");

        if tail.is_some() {
            Self::print(path, tail)?;
        }

        let mut reader = AsyncBufReader::new(AsyncFile::open(path).await?);
        reader.seek(SeekFrom::End(0)).await?;

        loop {
            let mut line = String::new();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                result = reader.read_line(&mut line) => {
                    match result? {
                        0 => tokio::time::sleep(std::time::Duration::from_millis(200)).await,
                        _ => print!("{line}"),
                    }
                }
            };
        }
    }

    pub fn print(path: &Path, tail: Option<usize>) -> io::Result<()> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err),
        };

        match tail {
            Some(count) if count <= MAX_TAIL_LINES => {
                tail_lines(&content, count)
                    .iter()
                    .for_each(|line| println!("{line}"));
            }
            _ => print!("{content}"),
        }

        Ok(())
    }

    pub fn purge(path: &Path) -> io::Result<()> {
        if !fs::exists(path)? {
            return Ok(());
        }

        File::options().write(true).truncate(true).open(path)?;

        Ok(())
    }

    fn format(&self, record: &Record) -> String {
        format!(
            "[{}]<{}> {}: {}\n",
            self.name,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    }
}

pub fn tail_lines(content: &str, count: usize) -> Vec<&str> {
    let lines = content.lines().collect::<Vec<_>>();
    let skip = lines.len().saturating_sub(count);

    lines[skip..].to_vec()
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if self.use_stdout_stderr {
            match record.level() {
                Level::Error | Level::Warn => eprintln!("{}", record.args()),
                _ => println!("{}", record.args()),
            }
        }

        let written = File::options()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(self.format(record).as_bytes()));

        if let Err(err) = written {
            eprintln!("Failed to write to log file {}: {err}", self.path.display());
        }
    }

    fn flush(&self) {}
}
