//! Seams to the audio pipeline collaborators.
//!
//! The controller never touches audio data; it drives an HTTP stream
//! reader, a decoder and an output renderer owned by the embedding
//! application through these traits. Collaborators receive the
//! [`SharedState`](crate::model::SharedState) domains at construction and
//! update them from their own threads.

use std::net::Ipv4Addr;

use crate::errors::ControllerError;
use crate::metadata::Metadata;

/// The HTTP/ICY stream reader filling the stream buffer.
pub trait StreamSource: Send {
    /// Open the audio source. `header` is the verbatim HTTP request the
    /// server composed; `threshold` the byte count to buffer before the
    /// stream counts as delivering. With `continue_on_error` a connection
    /// failure leaves the reader waiting instead of aborting (the server
    /// will follow up with `cont`/`codc`).
    fn connect(
        &mut self,
        ip: Ipv4Addr,
        port: u16,
        header: &[u8],
        threshold: usize,
        continue_on_error: bool,
    ) -> Result<(), ControllerError>;

    /// Close the source if open. Returns true when something was closed.
    fn disconnect(&mut self) -> bool;
}

/// The decoder feeding the output buffer from the stream buffer.
pub trait DecodePipeline: Send {
    fn codec_open(
        &mut self,
        codec: u8,
        sample_size: u8,
        sample_rate: u32,
        channels: u8,
        endianness: u8,
    ) -> Result<(), ControllerError>;

    fn flush(&mut self);

    /// True when `name` (e.g. `flc`) is a codec this pipeline can decode;
    /// drives the capability string filtering.
    fn supports(&self, name: &str) -> bool;
}

/// The renderer exposing decoded audio to the hardware player.
pub trait OutputSink: Send {
    fn start(&mut self) -> Result<(), ControllerError>;

    fn flush(&mut self);

    /// Refresh the ICY metadata injected into the outgoing stream.
    fn set_icy(&mut self, metadata: &Metadata, force: bool, now: u32);
}

/// Track metadata lookup. `offset` counts tracks ahead of the one
/// currently rendered, letting the lookup skip over failed starts.
pub trait MetadataSource: Send {
    fn track_metadata(&self, offset: i32) -> Metadata;
}

/// Everything the controller needs from the embedding application.
pub struct Collaborators {
    pub stream: Box<dyn StreamSource>,
    pub decoder: Box<dyn DecodePipeline>,
    pub output: Box<dyn OutputSink>,
    pub metadata: Box<dyn MetadataSource>,
    pub mimetypes: Box<dyn crate::mime::MimeRegistry>,
    pub bridge: Box<dyn crate::bridge::Bridge>,
}
