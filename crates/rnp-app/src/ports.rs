//! Dev-server port allocation

use std::net::{SocketAddr, TcpListener};

use rnp_core::prelude::*;

/// Port the app's JS runtime should connect to.
///
/// A configured port is used as is. Otherwise the OS picks a free port on the
/// loopback interface; the probe listener is closed before returning.
pub fn allocate_port(configured: Option<u16>) -> Result<u16> {
    if let Some(port) = configured {
        return Ok(port);
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(addr)?;
    let port = listener.local_addr()?.port();
    debug!("Allocated dev-server port {}", port);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_port_is_used() {
        assert_eq!(allocate_port(Some(8081)).unwrap(), 8081);
    }

    #[test]
    fn test_ephemeral_port_is_bindable() {
        let port = allocate_port(None).unwrap();
        assert_ne!(port, 0);
        assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
    }
}
