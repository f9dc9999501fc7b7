use std::sync::Arc;

use anyhow::{Context, Result};
use nix::sys::signal::{signal, SigHandler, Signal};

use statichttpd_rs::Server;

fn main() -> Result<()> {
    println!("{}/{}.", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let server = Server::from_command_line()?;
    let listener = server.create_listener()?;

    // A peer hanging up mid-response should fail the write, not kill the process.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("failed to set SIGPIPE handler")?;

    println!("serving files from {}", server.wwwroot.display());
    Arc::new(server).serve(listener);
    Ok(())
}
