//! Client engine for a content-scanning daemon.
//!
//! `dscan` turns paths into scan requests, sends them to the daemon over a
//! Unix-domain or TCP socket, interprets the replies and applies a
//! quarantine action to infected files. Requests are either sent one per
//! connection or pipelined over a single `IDSESSION` connection, where
//! replies are matched back to requests by id.
//!
//! # Quick start
//!
//! ```no_run
//! use dscan::{Endpoint, FsWalker, ModePrefs, ScanMode, Scanner};
//!
//! let endpoint = Endpoint::unix("/run/scand.sock");
//! let (mode, session) = ScanMode::select(&endpoint, false, &ModePrefs::default());
//! let scanner = Scanner::builder(endpoint).mode(mode).session(session).build();
//!
//! let tally = scanner.scan_path("/srv/uploads".as_ref(), &FsWalker, &mut |verdict| {
//!     println!("{verdict}");
//! });
//! std::process::exit(tally.status().code());
//! ```

mod action;
mod admin;
mod endpoint;
mod error;
mod request;
mod scanner;
mod session;
mod tally;
mod transport;
mod walk;

pub use action::Action;
pub use admin::{ping, reload, version};
pub use dscan_proto::{Status, StreamEnd};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use request::{ModePrefs, ScanMode, absolutize};
pub use scanner::{Scanner, ScannerBuilder};
pub use tally::{ExitStatus, ScanVerdict, Tally};
pub use transport::Connection;
pub use walk::{FsWalker, SkipReason, Visit, Walker};
