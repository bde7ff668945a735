//! 桌面端 WebSocket 等待通道。

pub(crate) mod handlers;
