//! XML stream handling for XMPP connections.
//!
//! Reading and writing are split. [`XmppStream`] owns the read half through
//! a [`Framer`] and a sender into the connection's outbound queue; the write
//! half belongs to a writer task started with [`spawn_writer`], which is the
//! only place bytes reach the transport.

use minidom::Element;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::error::generate_stream_error;
use crate::framer::{Frame, Framer};
use crate::parser::{element_to_string, ns, StreamHeader};
use crate::registry::OutboundStanza;
use crate::XmppError;

/// XMPP stream handler.
pub struct XmppStream<R> {
    /// Incremental element framer over the read half
    framer: Framer<R>,
    /// Queue drained by the writer task
    outbound: mpsc::Sender<OutboundStanza>,
    /// Server domain
    domain: String,
    /// Current stream ID
    stream_id: String,
    /// Parsed client stream header
    client_header: Option<StreamHeader>,
}

impl<R: AsyncRead + Unpin> XmppStream<R> {
    /// Create a new XMPP stream.
    pub fn new(
        reader: R,
        outbound: mpsc::Sender<OutboundStanza>,
        domain: String,
        max_stanza_size: usize,
    ) -> Self {
        Self {
            framer: Framer::new(reader, max_stanza_size),
            outbound,
            domain,
            stream_id: String::new(),
            client_header: None,
        }
    }

    /// Get the most recent client stream header.
    pub fn client_header(&self) -> Option<&StreamHeader> {
        self.client_header.as_ref()
    }

    /// Get the current stream ID.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Sender into this connection's outbound queue.
    pub fn outbound(&self) -> &mpsc::Sender<OutboundStanza> {
        &self.outbound
    }

    /// Read the next frame, recording client stream headers as they pass.
    pub async fn read_frame(&mut self) -> Result<Frame, XmppError> {
        let frame = self.framer.next().await?;

        if let Frame::StreamOpen(ref header) = frame {
            if let Err(e) = header.validate() {
                warn!(error = %e, "Client stream header failed validation");
            }
            if let Some(ref to) = header.to {
                if to != &self.domain {
                    debug!(expected = %self.domain, got = %to, "Domain mismatch in stream header");
                }
            }
            debug!(
                to = ?header.to,
                from = ?header.from,
                version = ?header.version,
                "Received stream header"
            );
            self.client_header = Some(header.clone());
        }

        Ok(frame)
    }

    /// Queue raw XML for the writer.
    pub async fn write_raw(&self, xml: impl Into<String>) -> Result<(), XmppError> {
        self.outbound
            .send(OutboundStanza::new(xml))
            .await
            .map_err(|_| XmppError::stream("Outbound writer closed"))
    }

    /// Queue an element for the writer.
    pub async fn send_element(&self, element: &Element) -> Result<(), XmppError> {
        self.write_raw(element_to_string(element)?).await
    }

    /// Open a new server stream with a fresh stream ID.
    #[instrument(skip(self), name = "xmpp.stream.send_header")]
    pub async fn send_stream_header(&mut self) -> Result<(), XmppError> {
        self.stream_id = uuid::Uuid::new_v4().to_string();

        let header = format!(
            "<?xml version='1.0'?>\
            <stream:stream xmlns='{}' \
            xmlns:stream='{}' \
            id='{}' from='{}' version='1.0'>",
            ns::JABBER_CLIENT,
            ns::STREAM,
            self.stream_id,
            self.domain
        );
        self.write_raw(header).await?;

        debug!(stream_id = %self.stream_id, "Sent stream header");
        Ok(())
    }

    /// Send stream features advertising SASL mechanisms.
    #[instrument(skip(self), name = "xmpp.stream.send_features_sasl")]
    pub async fn send_features_sasl(&self) -> Result<(), XmppError> {
        let features = format!(
            "<stream:features>\
                <mechanisms xmlns='{}'>\
                    <mechanism>PLAIN</mechanism>\
                </mechanisms>\
            </stream:features>",
            ns::SASL
        );
        self.write_raw(features).await?;

        debug!("Sent SASL features");
        Ok(())
    }

    /// Send SASL success.
    pub async fn send_sasl_success(&self) -> Result<(), XmppError> {
        self.write_raw(format!("<success xmlns='{}'/>", ns::SASL))
            .await
    }

    /// Send SASL failure response.
    pub async fn send_sasl_failure(&self, condition: &str) -> Result<(), XmppError> {
        let failure = format!("<failure xmlns='{}'><{}/></failure>", ns::SASL, condition);
        self.write_raw(failure).await
    }

    /// Send stream features for resource binding and session establishment.
    #[instrument(skip(self), name = "xmpp.stream.send_features_bind")]
    pub async fn send_features_bind(&self) -> Result<(), XmppError> {
        let features = format!(
            "<stream:features>\
                <bind xmlns='{}'/>\
                <session xmlns='{}'>\
                    <optional/>\
                </session>\
            </stream:features>",
            ns::BIND,
            ns::SESSION
        );
        self.write_raw(features).await?;

        debug!("Sent bind features");
        Ok(())
    }

    /// Send a stream error followed by the stream close tag.
    pub async fn send_stream_error(
        &self,
        condition: &str,
        text: Option<&str>,
    ) -> Result<(), XmppError> {
        self.write_raw(generate_stream_error(condition, text)).await
    }

    /// Close the server stream element.
    pub async fn close(&self) -> Result<(), XmppError> {
        self.write_raw("</stream:stream>").await
    }
}

/// Spawn the task that owns the write half of a connection.
///
/// It writes queued XML in order until every sender is gone or a write
/// fails, then shuts the transport down.
pub fn spawn_writer<W>(mut writer: W, mut rx: mpsc::Receiver<OutboundStanza>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(stanza) = rx.recv().await {
            trace!(xml = %stanza.xml, "SEND");
            if let Err(e) = write_flushed(&mut writer, stanza.xml.as_bytes()).await {
                debug!(error = %e, "Write failed, stopping writer");
                break;
            }
        }

        // Stop accepting so pending try_send calls fail fast.
        rx.close();
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Transport shutdown failed");
        }
    })
}

async fn write_flushed<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
