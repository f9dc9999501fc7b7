//! Server configuration and the accept loop.

use std::ffi::OsStr;
use std::fs::{metadata, OpenOptions};
use std::io::BufWriter;
use std::net::{
    AddrParseError, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener,
    TcpStream,
};
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use nix::sys::socket::{self, sockopt, AddressFamily, InetAddr, SockAddr, SockFlag, SockType};

use crate::access_log::{LogLine, LogSink};
use crate::connection::Connection;
use crate::mime::{MimeMap, DEFAULT_MIME_TYPE};
use crate::request::DEFAULT_MAX_REQUEST_LENGTH;
use crate::router::{Router, DEFAULT_INDEX_NAME};
use crate::transfer::Strategy;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_BACKLOG: usize = 10;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_REQUEST_LENGTH: usize = 16;

/// How long to stop accepting after running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a connection needs to know. Nothing here changes once `serve` starts, apart from
/// what gets written to the access log.
#[derive(Debug)]
pub struct Server {
    pub wwwroot: PathBuf,
    pub bindaddr: Option<String>,
    pub bindport: u16,
    pub backlog: usize,
    pub inet6: bool,
    /// Read and write deadline for each connection.
    pub timeout: Option<Duration>,
    pub max_request_length: usize,
    pub strategy: Strategy,
    pub router: Router,
    pub mime_map: MimeMap,
    pub log_sink: Mutex<LogSink>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            wwwroot: PathBuf::from("."),
            bindaddr: None,
            bindport: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            inet6: false,
            timeout: Some(DEFAULT_TIMEOUT),
            max_request_length: DEFAULT_MAX_REQUEST_LENGTH,
            strategy: Strategy::default(),
            router: Router::default(),
            mime_map: MimeMap::default(),
            log_sink: Mutex::new(LogSink::default()),
        }
    }
}

impl Server {
    pub fn from_command_line() -> Result<Self> {
        let mut args = std::env::args();
        let name = args
            .next()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        match Self::from_args(args)? {
            Some(server) => Ok(server),
            None => {
                Self::default().usage(&name);
                std::process::exit(0);
            }
        }
    }

    /// Build a server from command line arguments, not including the program name.
    ///
    /// Returns None if usage was asked for.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Option<Self>> {
        let mut server = Self::default();
        let mut args = args.into_iter().peekable();
        if let Some(wwwroot) = args.next_if(|arg| !arg.starts_with("--")) {
            server.wwwroot = PathBuf::from(wwwroot);
        }
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" => return Ok(None),
                "--port" => {
                    let number = args.next().context("missing number after --port")?;
                    server.bindport = number
                        .parse()
                        .with_context(|| format!("port number {} is invalid", number))?;
                }
                "--addr" => {
                    server.bindaddr = Some(args.next().context("missing ip after --addr")?);
                }
                "--ipv6" => server.inet6 = true,
                "--backlog" => {
                    let number = args.next().context("missing number after --backlog")?;
                    server.backlog = number
                        .parse()
                        .with_context(|| format!("backlog number {} is invalid", number))?;
                }
                "--index" => {
                    let index = args.next().context("missing filename after --index")?;
                    server.router = Router::new(index);
                }
                "--timeout" => {
                    let number = args.next().context("missing number after --timeout")?;
                    let timeout_secs = number
                        .parse::<u64>()
                        .with_context(|| format!("timeout number {} is invalid", number))?;
                    server.timeout = match timeout_secs {
                        0 => None,
                        timeout_secs => Some(Duration::from_secs(timeout_secs)),
                    };
                }
                "--max-request" => {
                    let number = args.next().context("missing number after --max-request")?;
                    let length = number
                        .parse::<usize>()
                        .with_context(|| format!("max request length {} is invalid", number))?;
                    if length < MIN_REQUEST_LENGTH {
                        return Err(anyhow!(
                            "max request length must be at least {}",
                            MIN_REQUEST_LENGTH
                        ));
                    }
                    server.max_request_length = length;
                }
                "--no-sendfile" => server.strategy = Strategy::Copy,
                "--mimetypes" => {
                    let filename = args.next().context("missing filename after --mimetypes")?;
                    server
                        .mime_map
                        .parse_extension_map_file(OsStr::new(&filename))?;
                }
                "--default-mimetype" => {
                    server.mime_map.default_mimetype = args
                        .next()
                        .context("missing string after --default-mimetype")?;
                }
                "--log" => {
                    let filename = args.next().context("missing filename after --log")?;
                    let file = OpenOptions::new()
                        .append(true)
                        .create(true)
                        .open(&filename)
                        .with_context(|| format!("failed to open log file {}", filename))?;
                    server.log_sink = Mutex::new(LogSink::File(BufWriter::new(file)));
                }
                "--syslog" => server.log_sink = Mutex::new(LogSink::Syslog),
                _ => {
                    return Err(anyhow!("unknown argument `{}'", arg));
                }
            }
        }

        let root = metadata(&server.wwwroot)
            .with_context(|| format!("failed to open wwwroot {}", server.wwwroot.display()))?;
        if !root.is_dir() {
            return Err(anyhow!(
                "wwwroot {} is not a directory",
                server.wwwroot.display()
            ));
        }
        Ok(Some(server))
    }

    pub fn usage(&self, argv0: &str) {
        print!(
            "usage:\t{} [/path/to/wwwroot] [flags]\n\n\
            \tServes files below wwwroot (default: the working directory).\n\n\
            flags:\t--port number (default: {})\n\
            \t\tSpecifies which port to listen on for connections.\n\
            \t\tPass 0 to let the system choose any free port for you.\n\n\
            \t--addr ip (default: all)\n\
            \t\tIf multiple interfaces are present, specifies\n\
            \t\twhich one to bind the listening port to.\n\n\
            \t--ipv6\n\
            \t\tListen on IPv6 address.\n\n\
            \t--backlog number (default: {})\n\
            \t\tLength of the queue of pending connections.\n\n\
            \t--index filename (default: {})\n\
            \t\tDefault file to serve when a directory is requested.\n\n\
            \t--timeout secs (default: {})\n\
            \t\tIf a connection is idle for more than this many seconds,\n\
            \t\tit will be closed. Set to zero to disable timeouts.\n\n\
            \t--max-request bytes (default: {})\n\
            \t\tRequests longer than this are answered with 413.\n\n\
            \t--no-sendfile\n\
            \t\tCopy file contents through a buffer instead of sendfile().\n\n\
            \t--mimetypes filename (optional)\n\
            \t\tParses specified file for extension-MIME associations.\n\n\
            \t--default-mimetype string (optional, default: {})\n\
            \t\tFiles with unknown extensions are served as this mimetype.\n\n\
            \t--log filename (default: stdout)\n\
            \t\tSpecifies which file to append the request log to.\n\n\
            \t--syslog\n\
            \t\tUse syslog for request log.\n\n",
            argv0,
            self.bindport,
            self.backlog,
            DEFAULT_INDEX_NAME,
            self.timeout.map(|timeout| timeout.as_secs()).unwrap_or(0),
            self.max_request_length,
            DEFAULT_MIME_TYPE,
        );
    }

    fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        Ok(if self.inet6 {
            let addr = Ipv6Addr::from_str(self.bindaddr.as_deref().unwrap_or("::"))?;
            SocketAddr::V6(SocketAddrV6::new(addr, self.bindport, 0, 0))
        } else {
            let addr = Ipv4Addr::from_str(self.bindaddr.as_deref().unwrap_or("0.0.0.0"))?;
            SocketAddr::V4(SocketAddrV4::new(addr, self.bindport))
        })
    }

    /// Initialize the TcpListener. This is the socket that we accept connections from.
    ///
    /// Built by hand rather than with `TcpListener::bind` so the backlog can be chosen.
    pub fn create_listener(&self) -> Result<TcpListener> {
        let socket_addr = self.socket_addr().context("malformed --addr argument")?;
        let family = match socket_addr {
            SocketAddr::V4(_) => AddressFamily::Inet,
            SocketAddr::V6(_) => AddressFamily::Inet6,
        };
        let fd = socket::socket(family, SockType::Stream, SockFlag::empty(), None)
            .context("failed to create listening socket")?;
        // Owned from here on, so the descriptor is closed on every error below.
        let listener = unsafe { TcpListener::from_raw_fd(fd) };

        socket::setsockopt(fd, sockopt::ReuseAddr, &true)
            .context("failed to set SO_REUSEADDR")?;
        socket::bind(fd, &SockAddr::new_inet(InetAddr::from_std(&socket_addr)))
            .with_context(|| format!("failed to bind to {}", socket_addr))?;
        socket::listen(fd, self.backlog)
            .with_context(|| format!("failed to listen on {}", socket_addr))?;

        let local_addr = listener
            .local_addr()
            .context("failed to get listening address")?;
        println!("listening on: http://{}/", local_addr);
        Ok(listener)
    }

    /// Accept connections forever, each served by its own detached thread.
    pub fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => self.spawn_connection(stream, addr),
                Err(e) => {
                    // Failed to accept, but keep going; existing connections are unaffected.
                    eprintln!("warning: accept() failed: {}", e);
                    if matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE)) {
                        thread::sleep(ACCEPT_BACKOFF);
                    }
                }
            }
        }
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let server = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("conn {}", addr))
            .spawn(move || Connection::new(&server, stream, addr.ip()).run());
        // The handle is dropped, detaching the thread.
        if let Err(e) = spawned {
            eprintln!("warning: failed to spawn thread for {}: {}", addr, e);
        }
    }

    /// Add a response to the access log.
    pub fn log_request(&self, line: &LogLine) {
        let message = line.to_string();
        let mut sink = self.log_sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = sink.log(&message) {
            eprintln!("warning: failed to write access log: {}", e);
        }
    }
}
