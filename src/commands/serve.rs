//! Frame server command

use cartflash_device::open_transport;
use cartflash_serial::FrameServer;
use std::error::Error;
use std::net::TcpListener;

/// Serve `programmer` to network clients on `listen`
///
/// Clients connect with `serial:ip=<host:port>`. The programmer stays open
/// across sessions, so an emulated cartridge keeps its contents.
pub fn run_serve(programmer: &str, listen: &str) -> Result<(), Box<dyn Error>> {
    let transport = open_transport(programmer)?;
    let listener = TcpListener::bind(listen)
        .map_err(|e| format!("Failed to listen on {}: {}", listen, e))?;
    println!("Serving {} on {}", programmer, listener.local_addr()?);
    FrameServer::new(transport).listen(&listener)?;
    Ok(())
}
