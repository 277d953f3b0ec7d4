//! In-process request routing.
//!
//! [`LocalTransport`] serves registered routes and static folders from a
//! background task once `listen` is called. [`LocalClient`] sends requests to
//! it through a [`TransportHandle`], so two kernels in one process can talk
//! without sockets.

pub mod client;
pub mod router;

pub use client::LocalClient;
pub use router::{LocalTransport, TransportHandle};
