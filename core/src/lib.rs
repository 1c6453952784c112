pub mod config;
pub mod decode;
pub mod error;
pub mod invoker;
pub mod outcome;
pub mod routing;
pub mod service;
pub mod session;
pub mod tools;
