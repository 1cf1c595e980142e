//! JSON-RPC 2.0 and MCP wire types shared by the stdio bridge and its tests.

pub mod frames;
pub mod handshake;
pub mod methods;
pub mod tools;
