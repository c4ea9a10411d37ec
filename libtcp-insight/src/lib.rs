#[macro_use]
extern crate log;

mod address;
mod config;
mod connection;
mod duration;
mod error;
mod features;
mod filter;
mod ingest;
mod normalizer;
mod output;
mod packet;
mod resolver;
mod session;
mod state;
mod store;

pub use address::*;
pub use config::*;
pub use connection::*;
pub use duration::{Duration, MICROS_PER_SEC};
pub use error::*;
pub use features::*;
pub use filter::*;
pub use ingest::*;
pub use output::*;
pub use packet::*;
pub use resolver::{FnResolver, HostnameResolver, NullResolver};
pub use session::*;
pub use state::*;
pub use store::*;
