pub mod reqwest_post;
pub mod rest;

pub use reqwest_post::ReqwestPost;
pub use rest::{RestRpcTransport, RpcStatus, UnaryCall};
