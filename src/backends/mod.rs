/// Built-in embedding backends.
pub mod http;
