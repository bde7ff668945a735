//! HTTP 接口公共层：错误、响应包裹与请求/响应类型。

pub(crate) mod error;
pub(crate) mod response;
pub(crate) mod types;
