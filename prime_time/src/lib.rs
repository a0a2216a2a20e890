//! Prime Time: a line-delimited JSON primality service.
//!
//! Each connection sends newline-terminated `{"method":"isPrime","number":N}`
//! objects and gets one `{"method":"isPrime","prime":B}` line back per
//! request, in order. The first malformed request is answered with a single
//! `malformed request: ...` line and the connection is closed.
pub mod server;
pub mod session;
pub mod types;
pub mod verif;
