//! ## emnet-stack::ip
//! **IPv4 output path**
//!
//! ### Key Submodules:
//! - `route`: first-hop classification of a destination
//! - `output`: header construction and hand-off to ARP or the link

pub mod output;
pub mod route;

pub use output::{set_destination, Delivery, IpOutput, IpStats};
pub use route::{classify, Route};
