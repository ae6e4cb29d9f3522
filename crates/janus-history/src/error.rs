use janus_core::CellId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Hard errors from the history engine and the change algebra.
///
/// Every variant indicates a caller bug (a transaction or stored event
/// inconsistent with the documents it claims to describe), never a
/// normal runtime condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// A change or effect referenced a sub-document that does not exist.
    #[error("unknown sub-document {0}")]
    UnknownDoc(CellId),

    /// A sub-document was inserted under an id already present.
    #[error("sub-document {0} already exists")]
    DuplicateDoc(CellId),

    /// A change span reaches beyond the end of its document.
    #[error("change {from}..{to} is out of bounds for a document of length {len}")]
    OutOfBounds { from: usize, to: usize, len: usize },

    /// A change position splits a multi-byte character.
    #[error("position {0} is not a character boundary")]
    NotCharBoundary(usize),

    /// Two change spans in one set overlap.
    #[error("overlapping change spans at {0}")]
    Overlapping(usize),

    /// A change span ends before it starts.
    #[error("change span {from}..{to} ends before it starts")]
    InvertedSpan { from: usize, to: usize },
}
