//! Incremental element framing for XMPP streams.
//!
//! XMPP uses a single long-lived XML document per connection: the
//! `<stream:stream>` root is opened once and only closed when the session
//! ends, while every stanza is a complete child element of it. The framer
//! slices the raw byte stream into those children by tracking the open
//! elements over markup tokens, so an `<iq>` that contains another `<iq>` (or
//! any nested element sharing its parent's name) is never cut short. A closing
//! tag that does not match the innermost open element ends the top-level
//! element right there; the resulting frame fails to decode and is dropped on
//! its own instead of swallowing everything that follows.
//!
//! [`FrameBuffer`] is the sans-IO core; [`Framer`] drives it from an
//! [`AsyncRead`] transport.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

use crate::parser::StreamHeader;
use crate::XmppError;

/// Name of the stream root element.
const STREAM_TAG: &[u8] = b"stream:stream";

/// Default upper bound for a single buffered element.
pub const DEFAULT_MAX_STANZA_SIZE: usize = 256 * 1024;

/// A unit produced by the framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The peer opened (or re-opened) the stream.
    StreamOpen(StreamHeader),
    /// One complete top-level element, byte-identical to the input span.
    Element(Vec<u8>),
    /// The peer sent `</stream:stream>`.
    StreamClosed,
}

/// Markup token kinds recognised by the scanner.
enum Token {
    /// `<?...?>`, `<!--...-->`, `<!...>`, `<![CDATA[...]]>`
    Skip,
    /// `<name ...>` or `<name .../>`
    Open {
        name: Vec<u8>,
        self_closing: bool,
        stream: bool,
    },
    /// `</name>`
    Close { name: Vec<u8>, stream: bool },
}

/// Sans-IO framing state.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received but not yet emitted
    buffer: Vec<u8>,
    /// Offset up to which `buffer` has been tokenised
    scan: usize,
    /// Names of the elements currently open below the stream root
    open: Vec<Vec<u8>>,
    /// Start of the element currently being assembled
    element_start: Option<usize>,
    /// Maximum size of a single element
    max_stanza_size: usize,
}

impl FrameBuffer {
    /// Create a framer with the default stanza size limit.
    pub fn new() -> Self {
        Self::with_max_stanza_size(DEFAULT_MAX_STANZA_SIZE)
    }

    /// Create a framer that rejects elements larger than `max_stanza_size`.
    pub fn with_max_stanza_size(max_stanza_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(8192),
            scan: 0,
            open: Vec::new(),
            element_start: None,
            max_stanza_size,
        }
    }

    /// Feed data into the framer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Current nesting depth below the stream root.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Number of buffered bytes not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Return the next complete frame, or `None` if more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, XmppError> {
        loop {
            let Some(rel) = self.buffer[self.scan..].iter().position(|&b| b == b'<') else {
                if self.element_start.is_none() {
                    // Character data between stanzas (whitespace keepalives).
                    self.buffer.clear();
                    self.scan = 0;
                } else {
                    self.scan = self.buffer.len();
                }
                self.check_size()?;
                return Ok(None);
            };
            let start = self.scan + rel;

            if self.element_start.is_none() && start > 0 {
                self.consume(start);
                continue;
            }

            let Some((token, end)) = self.scan_token(start)? else {
                self.scan = start;
                self.check_size()?;
                return Ok(None);
            };

            match token {
                Token::Skip => {
                    if self.element_start.is_none() {
                        self.consume(end);
                    } else {
                        self.scan = end;
                    }
                }
                Token::Open { stream: true, .. } => {
                    let tag = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                    if self.element_start.is_some() {
                        debug!(
                            depth = self.open.len(),
                            "Stream re-opened inside an element, discarding partial element"
                        );
                    }
                    self.consume(end);
                    self.open.clear();
                    self.element_start = None;
                    return Ok(Some(Frame::StreamOpen(StreamHeader::parse(&tag)?)));
                }
                Token::Close { stream: true, .. } => {
                    self.consume(end);
                    self.open.clear();
                    self.element_start = None;
                    return Ok(Some(Frame::StreamClosed));
                }
                Token::Open {
                    name, self_closing, ..
                } => {
                    if self.open.is_empty() {
                        self.element_start = Some(start);
                    }
                    if !self_closing {
                        self.open.push(name);
                    }
                    self.scan = end;
                    if self.open.is_empty() {
                        return self.take_element(end).map(Some);
                    }
                }
                Token::Close { name, .. } => {
                    match self.open.pop() {
                        Some(innermost) if innermost == name => {}
                        Some(innermost) => {
                            warn!(
                                expected = %String::from_utf8_lossy(&innermost),
                                got = %String::from_utf8_lossy(&name),
                                "Mismatched closing tag, cutting element short"
                            );
                            self.open.clear();
                        }
                        None => {
                            warn!(
                                got = %String::from_utf8_lossy(&name),
                                "Closing tag outside any element"
                            );
                            self.element_start = Some(start);
                        }
                    }
                    self.scan = end;
                    if self.open.is_empty() {
                        return self.take_element(end).map(Some);
                    }
                }
            }
        }
    }

    /// Tokenise the markup construct starting at `start` (a `<`).
    ///
    /// Returns `None` when the token is not yet complete.
    fn scan_token(&self, start: usize) -> Result<Option<(Token, usize)>, XmppError> {
        let rest = &self.buffer[start..];

        // Wait until enough bytes are buffered to tell the constructs apart.
        for prefix in [&b"<![CDATA["[..], &b"<!--"[..]] {
            let n = rest.len().min(prefix.len());
            if rest.len() < prefix.len() && rest[..n] == prefix[..n] {
                return Ok(None);
            }
        }

        let delimited = |open: usize, close: &[u8]| {
            find(&rest[open..], close).map(|i| (Token::Skip, start + open + i + close.len()))
        };

        if rest.starts_with(b"<?") {
            return Ok(delimited(2, &b"?>"[..]));
        }
        if rest.starts_with(b"<!--") {
            return Ok(delimited(4, &b"-->"[..]));
        }
        if rest.starts_with(b"<![CDATA[") {
            return Ok(delimited(9, &b"]]>"[..]));
        }
        if rest.starts_with(b"<!") {
            return Ok(delimited(2, &b">"[..]));
        }

        let Some(gt) = find_tag_end(rest) else {
            return Ok(None);
        };
        let end = start + gt + 1;

        if rest.get(1) == Some(&b'/') {
            let name = trim_ascii(&rest[2..gt]);
            if name.is_empty() {
                return Err(XmppError::stream("Empty closing tag"));
            }
            return Ok(Some((
                Token::Close {
                    stream: name == STREAM_TAG,
                    name: name.to_vec(),
                },
                end,
            )));
        }

        let name_len = rest[1..gt]
            .iter()
            .position(|&b| b.is_ascii_whitespace() || b == b'/')
            .unwrap_or(gt - 1);
        let name = &rest[1..1 + name_len];
        if name.is_empty() {
            return Err(XmppError::stream("Empty element name"));
        }
        let self_closing = gt > 1 && rest[gt - 1] == b'/';

        Ok(Some((
            Token::Open {
                self_closing,
                stream: name == STREAM_TAG && !self_closing,
                name: name.to_vec(),
            },
            end,
        )))
    }

    /// Emit the element ending at `end` and drop it from the buffer.
    fn take_element(&mut self, end: usize) -> Result<Frame, XmppError> {
        let start = self.element_start.take().unwrap_or(0);
        if end - start > self.max_stanza_size {
            return Err(XmppError::policy_violation(format!(
                "Element exceeds {} bytes",
                self.max_stanza_size
            )));
        }
        let element = self.buffer[start..end].to_vec();
        self.consume(end);
        trace!(len = element.len(), "Framed element");
        Ok(Frame::Element(element))
    }

    /// Drop the first `n` bytes of the buffer.
    fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.scan = 0;
        if let Some(start) = self.element_start.as_mut() {
            *start = start.saturating_sub(n);
        }
    }

    fn check_size(&self) -> Result<(), XmppError> {
        let pending = match self.element_start {
            Some(start) => self.buffer.len() - start,
            None => self.buffer.len(),
        };
        if pending > self.max_stanza_size {
            return Err(XmppError::policy_violation(format!(
                "Element exceeds {} bytes",
                self.max_stanza_size
            )));
        }
        Ok(())
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the `>` that ends the tag starting at `rest[0]`, skipping
/// quoted attribute values.
fn find_tag_end(rest: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in rest.iter().enumerate().skip(1) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

/// Async framer reading from a transport.
pub struct Framer<R> {
    reader: R,
    buffer: FrameBuffer,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    /// Create a new framer over `reader`.
    pub fn new(reader: R, max_stanza_size: usize) -> Self {
        Self {
            reader,
            buffer: FrameBuffer::with_max_stanza_size(max_stanza_size),
        }
    }

    /// Read until the next complete frame is available.
    ///
    /// Returns [`XmppError::EndOfStream`] if the transport closes first.
    pub async fn next(&mut self) -> Result<Frame, XmppError> {
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(frame);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(XmppError::EndOfStream);
            }

            trace!(data = %String::from_utf8_lossy(&chunk[..n]), "Data received");
            self.buffer.feed(&chunk[..n]);
        }
    }
}
