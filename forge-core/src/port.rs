// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

//! Port Allocator: finds a free loopback port for a new worker.

use std::net::TcpListener;

use crate::error::{ForgeError, Result};

/// Probe ports monotonically upward from `base_port`, returning the
/// first that binds successfully on the loopback interface. The probe
/// socket is closed immediately after binding — no reservation is made,
/// callers must race-tolerate a bind failure at actual launch time.
pub fn find_available(base_port: u16) -> Result<u16> {
    for candidate in base_port..=u16::MAX {
        if TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
            return Ok(candidate);
        }
    }
    Err(ForgeError::Platform(format!(
        "no available port found at or above {base_port}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_port_at_or_above_base_and_it_is_immediately_bindable() {
        let base = 20_000;
        let port = find_available(base).unwrap();
        assert!(port >= base);
        // The allocator releases the probe socket, so a fresh bind must
        // succeed right away.
        let listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        drop(listener);
    }

    #[test]
    fn skips_a_port_already_in_use() {
        let base = 20_100;
        let held = TcpListener::bind(("127.0.0.1", base)).unwrap();
        let port = find_available(base).unwrap();
        assert_ne!(port, base);
        drop(held);
    }
}
