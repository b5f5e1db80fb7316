// Adapters layer: concrete implementations of the domain ports (PBX, table sources, differs).

pub mod differ;
pub mod pbx;
pub mod source;
pub mod wire;

pub use differ::{CanonicalDiffer, CommandDiffer, ConfiguredDiffer};
pub use pbx::{Listing, PbxClient, PbxSession};
pub use source::{CommandSource, ConfiguredSource, FileSource};
pub use wire::{DebugSink, TracingSink, WireEvent, WriterSink};
