//! The declarative gateway engine: expression evaluation, modification rules,
//! route matching, upstream selection, failover, plugin runtime and SSE
//! stream execution.

pub mod builtin;
pub mod expr;
pub mod failover;
pub mod modify;
pub mod plugin;
pub mod route;
pub mod selector;
pub mod sse_exec;
