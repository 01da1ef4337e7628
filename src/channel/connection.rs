// One push connection to a single job's event stream
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::models::ChannelMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the connection observed. The connection itself has no retry policy;
/// `Closed` and `Error` are reported upward and the manager decides.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(ChannelMessage),
    Closed,
    Error(String),
}

/// Wraps one live push connection. Frames that are not job telemetry
/// (pings, binary frames, malformed JSON) are skipped in place.
pub struct ChannelConnection {
    stream: WsStream,
}

impl ChannelConnection {
    pub async fn open(url: &str) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let (stream, _) = connect_async(url).await?;
        debug!("Channel connected: {}", url);
        Ok(Self { stream })
    }

    pub async fn next_event(&mut self) -> ChannelEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ChannelMessage>(&text) {
                        Ok(msg) => return ChannelEvent::Message(msg),
                        Err(e) => {
                            warn!("Malformed channel message skipped: {}", e);
                            continue;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return ChannelEvent::Closed,
                Some(Ok(_)) => continue, // ping/pong/binary frames
                Some(Err(e)) => return ChannelEvent::Error(e.to_string()),
            }
        }
    }
}
