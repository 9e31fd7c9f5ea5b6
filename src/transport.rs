use std::net::TcpStream;

use log::debug;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::config::TlsOptions;
use crate::error::{ConnectError, WriteError};

/// Why a link is being closed; mapped onto the wire close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean end of stream.
    Done,
    /// The stream is being abandoned after a failure.
    Failure,
}

impl CloseReason {
    fn code(self) -> CloseCode {
        match self {
            CloseReason::Done => CloseCode::Normal,
            CloseReason::Failure => CloseCode::Error,
        }
    }
}

/// One established stream to the remote endpoint. Owned and mutated only
/// by the session's pump thread; replaced wholesale on reconnect.
pub trait Link: Send {
    /// Send one binary message.
    fn write_binary(&mut self, payload: &[u8]) -> Result<(), WriteError>;

    /// Best-effort close with a reason code. Errors are logged, not
    /// returned; the link is unusable afterwards either way.
    fn close(&mut self, reason: CloseReason);
}

/// Opens links. The session keeps one connector for its whole lifetime so
/// reconnects go back to the same endpoint with the same settings.
pub trait Connector: Send + Sync {
    fn open(
        &self,
        endpoint: &str,
        tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Link>, ConnectError>;
}

/// Blocking WebSocket link over plain TCP or TLS.
pub struct WsLink {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl Link for WsLink {
    fn write_binary(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        self.ws.send(Message::Binary(payload.to_vec()))?;
        Ok(())
    }

    fn close(&mut self, reason: CloseReason) {
        let frame = CloseFrame {
            code: reason.code(),
            reason: "".into(),
        };
        if let Err(e) = self.ws.close(Some(frame)) {
            debug!("websocket close failed: {}", e);
        }
        if let Err(e) = self.ws.flush() {
            debug!("websocket close flush failed: {}", e);
        }
    }
}

/// Default [`Connector`]: `ws://` or `wss://` via tungstenite, with an
/// optional custom TLS mode for endpoints using self-signed certificates.
#[derive(Debug, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(
        &self,
        endpoint: &str,
        tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Link>, ConnectError> {
        let url = Url::parse(endpoint).map_err(|e| ConnectError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let ws = match tls {
            Some(options) if url.scheme() == "wss" => {
                let host = url.host_str().ok_or_else(|| ConnectError::InvalidEndpoint {
                    url: endpoint.to_string(),
                    reason: "missing host".to_string(),
                })?;
                let port = url.port_or_known_default().unwrap_or(443);
                let stream = TcpStream::connect((host, port))?;

                let mut builder = native_tls::TlsConnector::builder();
                if options.accept_invalid_certs {
                    builder.danger_accept_invalid_certs(true);
                }
                let tls_connector = builder.build()?;

                let (ws, response) = tungstenite::client_tls_with_config(
                    url.as_str(),
                    stream,
                    None,
                    Some(tungstenite::Connector::NativeTls(tls_connector)),
                )
                .map_err(|e| match e {
                    tungstenite::HandshakeError::Failure(err) => ConnectError::from(err),
                    tungstenite::HandshakeError::Interrupted(_) => ConnectError::WebSocket(
                        tungstenite::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::WouldBlock,
                            "tls handshake interrupted",
                        )),
                    ),
                })?;
                debug!("secure websocket connected, status: {}", response.status());
                ws
            }
            _ => {
                let (ws, response) = tungstenite::connect(url.as_str())?;
                debug!("websocket connected, status: {}", response.status());
                ws
            }
        };

        Ok(Box::new(WsLink { ws }))
    }
}
