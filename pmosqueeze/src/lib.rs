//! SlimProto player controller.
//!
//! One controller task per virtual player. The task discovers a Logitech
//! Media Server over UDP, keeps a TCP control channel to it, translates
//! the server's `strm`/`codc`/`aude`/... directives into decoder and
//! output lifecycle calls, and reports playback progress back through
//! `STAT` messages whose exact ordering the server relies on to sequence
//! tracks.
//!
//! The controller never touches audio itself. The HTTP stream reader, the
//! decoder, the output renderer, the metadata lookup and the bridge to
//! the hardware player are all supplied by the embedding application
//! through the [`pipeline`] and [`bridge`] seams; the controller drives
//! them and samples their shared state ([`model`]) under three short-held
//! locks.
//!
//! ```no_run
//! use pmosqueeze::{spawn, Collaborators, PlayerConfig};
//! # fn collaborators() -> Collaborators { unimplemented!() }
//!
//! let config = PlayerConfig::default(); // auto-discover, pass-through
//! let player = spawn(config, collaborators()).unwrap();
//! // ... playback runs until ...
//! drop(player);
//! ```

pub mod bridge;
pub mod buffer;
pub mod caps;
pub mod config;
mod context;
mod controller;
mod errors;
pub mod metadata;
pub mod mime;
pub mod model;
mod negotiate;
pub mod pipeline;
pub mod status;
#[cfg(test)]
pub(crate) mod testkit;
mod util;

pub use bridge::{Bridge, SqAction, TrackInfo};
pub use config::{L24Format, ModeSpec, PlayerConfig};
pub use context::{AtomicJiffies, CliSlot, PlayerContext, WakeFlag};
pub use controller::{spawn, PlayerHandle, MAX_HEADER};
pub use errors::ControllerError;
pub use metadata::Metadata;
pub use mime::{MimeRegistry, StdMimeRegistry};
pub use pipeline::{Collaborators, DecodePipeline, MetadataSource, OutputSink, StreamSource};
pub use status::{ICY_UPDATE_TIME, STREAM_DELAY};
pub use util::gettime_ms;
