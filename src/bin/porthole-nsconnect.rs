//! Connect a socket to a path inside another mount namespace
//!
//! Usage: `porthole-nsconnect <socket-path>`, with the unconnected socket on
//! fd 0 and a handle to the target mount namespace on fd 1. The socket stays
//! connected after this process exits, so the caller never has to leave its
//! own namespace.

use nix::sched::{CloneFlags, setns};
use nix::sys::socket::{UnixAddr, connect};
use porthole::nsbus::exit_code;
use std::os::fd::BorrowedFd;
use std::process::exit;

const SOCKET_FD: i32 = 0;
const NAMESPACE_FD: i32 = 1;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [path] = args.as_slice() else {
        eprintln!("usage: porthole-nsconnect <socket-path>");
        exit(exit_code::USAGE);
    };

    // SAFETY: fd 1 is the namespace handle set up by the parent and stays
    // open for the life of this process
    let namespace = unsafe { BorrowedFd::borrow_raw(NAMESPACE_FD) };
    if let Err(e) = setns(namespace, CloneFlags::CLONE_NEWNS) {
        eprintln!("porthole-nsconnect: setns: {}", e);
        exit(exit_code::SETNS);
    }

    let addr = match UnixAddr::new(path.as_str()) {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("porthole-nsconnect: invalid socket path {}: {}", path, e);
            exit(exit_code::USAGE);
        }
    };

    if let Err(e) = connect(SOCKET_FD, &addr) {
        eprintln!("porthole-nsconnect: connect {}: {}", path, e);
        exit(exit_code::CONNECT);
    }

    exit(exit_code::SUCCESS);
}
