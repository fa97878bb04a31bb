// Streaming decompression for the patch stream.
//
// The patch engine never sees compressed bytes directly. It asks for N
// decoded bytes and the adapter pulls compressed input from the patch region
// one byte at a time until the request is met.
//
// - `decoder` : StreamDecoder contract, DecoderFactory, StoredDecoder
// - `session` : DecompressionSession, the Sink/Poll/Finish state machine

pub mod decoder;
pub mod session;

pub use decoder::{
    DecoderFactory, DecoderParams, FinishStatus, Poll, PollStatus, SinkError, StoredDecoder,
    StoredFactory, StreamDecoder,
};
pub use session::{DecoderState, DecompressionSession};
