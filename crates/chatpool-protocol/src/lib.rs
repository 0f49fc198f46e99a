pub mod chats;
pub mod completions;
pub mod signin;
pub mod sse;
pub mod sts;
pub mod tokens;
