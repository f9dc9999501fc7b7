//! Lifecycle of one accepted connection.

use std::net::{IpAddr, TcpStream};
use std::time::SystemTime;

use crate::access_log::LogLine;
use crate::request::{Request, RequestBuffer, RequestError};
use crate::response::{write_error, Status};
use crate::server::Server;
use crate::transfer;

#[derive(Debug, PartialEq)]
enum ConnectionState {
    /// Reading and parsing the next request.
    AwaitingRequest,
    Routing(Request),
    Transferring { request: Request, path: String },
    Closed,
}

pub struct Connection<'a> {
    server: &'a Server,
    socket: TcpStream,
    client: IpAddr,
    state: ConnectionState,
    request: RequestBuffer,
}

impl<'a> Connection<'a> {
    pub fn new(server: &'a Server, socket: TcpStream, client: IpAddr) -> Self {
        if let Err(e) = socket
            .set_read_timeout(server.timeout)
            .and_then(|()| socket.set_write_timeout(server.timeout))
        {
            eprintln!("warning: failed to set timeouts for {}: {}", client, e);
        }
        Self {
            server,
            socket,
            client,
            state: ConnectionState::AwaitingRequest,
            request: RequestBuffer::new(server.max_request_length),
        }
    }

    /// Serve requests until the peer goes away, sends something we can't handle, or a transfer
    /// fails. The socket is closed when `self` is dropped at the end.
    pub fn run(mut self) {
        while self.state != ConnectionState::Closed {
            self.poll();
        }
    }

    /// Advance the state machine by one step.
    fn poll(&mut self) {
        self.state = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::AwaitingRequest => self.recv_request(),
            ConnectionState::Routing(request) => self.route(request),
            ConnectionState::Transferring { request, path } => self.transfer(request, &path),
            ConnectionState::Closed => ConnectionState::Closed,
        };
    }

    fn recv_request(&mut self) -> ConnectionState {
        match self.request.read_request(&mut self.socket) {
            Ok(request) => ConnectionState::Routing(request),
            Err(e) => {
                if let Some(status) = e.status() {
                    // Closing either way, so only a completed reply is worth logging.
                    if let Ok(sent) = write_error(&mut self.socket, status) {
                        let method = match &e {
                            RequestError::UnsupportedMethod(method) => method.as_str(),
                            _ => "-",
                        };
                        self.log_line(method, "-", status, sent);
                    }
                }
                ConnectionState::Closed
            }
        }
    }

    fn route(&mut self, request: Request) -> ConnectionState {
        match self.server.router.resolve(&request.target) {
            Some(path) => ConnectionState::Transferring { request, path },
            None => match write_error(&mut self.socket, Status::BadRequest) {
                Ok(sent) => {
                    self.log(&request, Status::BadRequest, sent);
                    ConnectionState::AwaitingRequest
                }
                Err(_) => ConnectionState::Closed,
            },
        }
    }

    fn transfer(&mut self, request: Request, path: &str) -> ConnectionState {
        let server = self.server;
        match transfer::serve(
            &mut self.socket,
            &server.wwwroot,
            path,
            &server.mime_map,
            server.strategy,
        ) {
            Ok(reply) => {
                self.log(&request, reply.status, reply.sent);
                ConnectionState::AwaitingRequest
            }
            Err(_) => ConnectionState::Closed,
        }
    }

    fn log(&self, request: &Request, status: Status, sent: u64) {
        self.log_line(&request.method, &request.target, status, sent);
    }

    /// Log a reply. Rejected requests have no parsed target, so `-` stands in for it.
    fn log_line(&self, method: &str, target: &str, status: Status, sent: u64) {
        self.server.log_request(&LogLine {
            client: self.client,
            time: SystemTime::now(),
            method,
            target,
            status,
            sent,
        });
    }
}
