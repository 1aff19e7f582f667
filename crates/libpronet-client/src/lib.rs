mod client;
mod observer;

pub use client::{Client, ClientConfig};
pub use observer::ClientObserver;
