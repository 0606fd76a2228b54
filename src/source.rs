//! Contract between the engine and whatever parsed the file.
//!
//! The engine never reads the file itself.  A `DocumentSource` hands over the
//! parsed tree plus raw compressed channel bytes on demand; decoding and
//! compositing happen on this side of the boundary.

use crate::document::Document;
use crate::error::DecodeError;

/// Provider of parsed document structure and raw channel data.
///
/// Implementations typically wrap a memory-mapped file or an in-memory parse.
/// `channel_bytes` returns the channel's compressed stream exactly as stored;
/// the engine's decoder handles compression tags 0..=3.
pub trait DocumentSource {
    /// The parsed document: dimensions, depth and the full layer tree.
    fn document(&self) -> &Document;

    /// Raw compressed bytes for one channel of one leaf layer, identified by
    /// the layer's index and the channel's position within its channel list.
    fn channel_bytes(&self, layer_index: usize, channel_pos: usize)
    -> Result<Vec<u8>, DecodeError>;

    /// The file's pre-flattened full-document composite as straight-alpha
    /// RGBA, if the file carries one.  Failure here is non-fatal: the engine
    /// composites from layers alone.
    fn composite_rgba(&self) -> Option<Vec<u8>> {
        None
    }
}
