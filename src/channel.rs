pub use voicelink_tokio_transport::{
    ChannelError, ChannelEvent, ChannelFactory, MessageChannel, WebSocketChannelFactory,
    chat_socket_url,
};
