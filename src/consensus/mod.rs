pub mod replay;

pub use replay::{catchup_replay, mock_proxy_app, Handshaker, HandshakeError, ReplaySink};
