pub mod actuator;
pub mod config;
pub mod datalog;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod frame;
pub mod logging;
pub mod pipeline;
pub mod replay;
pub mod sim;
pub mod source;
pub mod state;
pub mod types;
pub mod udp;

#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub mod extraction;
