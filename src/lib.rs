//! A small WAMP v2 client on smol, with an example component that
//! subscribes to a topic and prints what it receives.

pub mod client;
pub mod config;
pub mod logging;
pub mod publisher;
pub mod runner;
pub mod subscriber;
