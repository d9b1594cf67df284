#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! wa-bridge library: the pieces behind the HTTP façade.
//!
//! - `connection`: session lifecycle, pairing and reconnects
//! - `backend`: the seam to the WhatsApp protocol library
//! - `dispatch` / `bulk`: outbound messages
//! - `incoming`: inbound message logging and auto-replies
//! - `spreadsheet`: recipient lists from `.xlsx` uploads
//! - `routes`: REST handlers and the router

pub mod auth;
pub mod backend;
pub mod bulk;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod incoming;
pub mod jid;
pub mod logging;
pub mod pairing;
pub mod routes;
pub mod session;
pub mod spreadsheet;
pub mod state;
pub mod util;

// Re-export key types at crate root for convenience.
pub use auth::ApiToken;
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::{MessageContent, MessageDispatcher};
pub use error::{Error, Result};
pub use state::AppState;
