//! A small static file server: one thread per connection, one request line per request, file
//! bodies sent with sendfile() where the platform allows.

pub mod access_log;
pub mod connection;
pub mod mime;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod transfer;

pub use server::Server;
