//! Access log in Common Log Format.

use std::ffi::CString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::IpAddr;
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::response::Status;

/// Where to put the access log.
#[derive(Debug)]
pub enum LogSink {
    Stdout,
    Syslog,
    File(BufWriter<File>),
}

impl LogSink {
    pub fn log(&mut self, message: &str) -> std::io::Result<()> {
        match self {
            Self::Stdout => {
                print!("{}", message);
            }
            Self::Syslog => {
                // LogEncoded output never contains NUL
                if let Ok(message) = CString::new(message) {
                    unsafe {
                        libc::syslog(
                            libc::LOG_INFO,
                            b"%s\0".as_ptr() as *const libc::c_char,
                            message.as_ptr(),
                        )
                    };
                }
            }
            Self::File(file) => {
                write!(file, "{}", message)?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::Stdout
    }
}

/// One line of the access log.
pub struct LogLine<'a> {
    pub client: IpAddr,
    pub time: SystemTime,
    pub method: &'a str,
    pub target: &'a str,
    pub status: Status,
    pub sent: u64,
}

impl<'a> std::fmt::Display for LogLine<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} - - {} \"{} {} HTTP/1.1\" {} {}",
            self.client,
            ClfDate(self.time),
            LogEncoded(self.method),
            LogEncoded(self.target),
            self.status.code(),
            self.sent,
        )
    }
}

/// Common Log Format (CLF) formatted date in local timezone.
pub struct ClfDate(pub SystemTime);

impl std::fmt::Display for ClfDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Local>::from(self.0);
        write!(f, "{}", datetime.format("[%d/%b/%Y:%H:%M:%S %z]"))
    }
}

/// Encode string for logging. Logs should not contain control characters or double quotes.
pub struct LogEncoded<'a>(pub &'a str);

impl<'a> std::fmt::Display for LogEncoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            if !c.is_ascii() || c.is_ascii_control() || c == '"' {
                let mut buf = [0; 4];
                c.encode_utf8(&mut buf);
                for b in buf.iter().take(c.len_utf8()) {
                    write!(f, "%{:02X}", b)?;
                }
            } else {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn log_encoded_works() {
        assert_eq!(
            LogEncoded("some\"log\tcrab\u{1F980}").to_string(),
            "some%22log%09crab%F0%9F%A6%80"
        );
    }

    #[test]
    fn clf_date_works() {
        // contains system's local timezone
        assert!(
            ClfDate(SystemTime::UNIX_EPOCH + Duration::from_secs(1620965123))
                .to_string()
                .contains("May/2021")
        );
    }

    #[test]
    fn log_line_works() {
        let line = LogLine {
            client: IpAddr::V4(Ipv4Addr::LOCALHOST),
            time: SystemTime::UNIX_EPOCH + Duration::from_secs(1620965123),
            method: "GET",
            target: "/a \"b\".png",
            status: Status::NotFound,
            sent: 42,
        }
        .to_string();
        assert!(line.starts_with("127.0.0.1 - - ["));
        assert!(line.ends_with("] \"GET /a %22b%22.png HTTP/1.1\" 404 42\n"));
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        let mut sink = LogSink::File(BufWriter::new(File::create(&path).unwrap()));
        sink.log("first\n").unwrap();
        sink.log("second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
