//! Outbound adapters

mod shadowsocks;

pub use shadowsocks::{ShadowsocksOutbound, ShadowsocksStream};
