//! External decoder-engine capability façade.
//!
//! The real engine (a third-party protocol-decoder library) is reached
//! only through [`DecodeEngine`] and [`SampleSnapshot`]. This crate
//! defines those two capability traits plus a reference in-memory
//! implementation ([`MockEngine`], [`VecSnapshot`]) sufficient to drive
//! the rest of the workspace's tests without linking against a real
//! decoder backend.

mod mock;

pub use mock::{MockEngine, VecSnapshot};

use std::collections::HashMap;
use thiserror::Error;

/// Opaque handle for a decoder-engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

/// Opaque handle identifying a decoder descriptor known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(pub u32);

/// Opaque handle for one instantiated decoder within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u32);

/// Opaque handle for a channel declared by a decoder descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

/// A typed option value, the Rust-native replacement for the source
/// engine's `GVariant*` option payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// One annotation emission from the engine, as delivered to the output
/// callback.
#[derive(Debug, Clone)]
pub struct AnnotationEvent {
    pub start_sample: u64,
    pub end_sample: u64,
    pub instance: InstanceId,
    pub ann_class: i16,
    pub ann_type: i16,
    /// Lines beginning with `'\n'` are metadata and excluded from
    /// display and from the dedup key by the consumer.
    pub ann_text: Vec<String>,
    pub number_hex: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown session {0:?}")]
    UnknownSession(SessionId),
    #[error("unknown instance {0:?}")]
    UnknownInstance(InstanceId),
    #[error("decoder {0:?} is not registered with the engine")]
    UnknownDecoder(DecoderId),
    #[error("engine send failed: {0}")]
    Send(String),
    #[error("engine start failed: {0}")]
    Start(String),
    #[error("engine end failed: {0}")]
    End(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Callback invoked by the engine for every decoder emission. Runs on
/// the caller's thread, inline, synchronously.
pub type OutputCallback = Box<dyn Fn(AnnotationEvent) + Send + Sync>;

/// The capability surface the decode-stack runtime uses to create
/// sessions, instantiate decoders, push samples, and receive
/// annotations. Deliberately narrow: it models exactly the calls
/// `decoder-core`'s feed loop makes, not a general sigrok binding.
pub trait DecodeEngine: Send + Sync {
    fn session_new(&self) -> EngineResult<SessionId>;

    fn decoder_inst_new(
        &self,
        session: SessionId,
        decoder: DecoderId,
        options: &HashMap<String, Variant>,
    ) -> EngineResult<InstanceId>;

    fn inst_channel_set_all(
        &self,
        inst: InstanceId,
        bindings: &HashMap<ChannelId, u32>,
    ) -> EngineResult<()>;

    fn inst_stack(&self, session: SessionId, prev: InstanceId, next: InstanceId) -> EngineResult<()>;

    fn session_metadata_set_samplerate(&self, session: SessionId, rate: f64) -> EngineResult<()>;

    fn pd_output_callback_add(&self, session: SessionId, cb: OutputCallback) -> EngineResult<()>;

    fn session_start(&self, session: SessionId) -> EngineResult<()>;

    /// Blocking, bounded to one chunk: the caller never holds more
    /// than `chunk_end - sample_start` samples in flight per call.
    fn session_send(
        &self,
        session: SessionId,
        sample_start: u64,
        sample_end: u64,
        channel_ptrs: &[Option<*const u8>],
        channel_const_values: &[u8],
    ) -> EngineResult<()>;

    fn session_end(&self, session: SessionId) -> EngineResult<()>;

    fn session_destroy(&self, session: SessionId);

    /// Channels the given decoder instance declares, in the order the
    /// root-instance lookup in the feed loop expects. Empty for a
    /// non-root instance that binds no channels itself.
    fn inst_channels(&self, inst: InstanceId) -> Vec<ChannelId>;
}

/// A borrowed block of sample bytes, released on drop. Replaces the
/// source's manual `get_samples` / `free_decode_lpb` pairing so every
/// exit path of the feed loop (including cancellation) releases
/// borrowed blocks without an explicit free call.
pub struct SampleBlock<'a> {
    data: &'a [u8],
}

impl<'a> SampleBlock<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data
    }
}

/// The acquisition-layer sample buffer the stack reads from. May be
/// streaming: `len`/`ring_count`/`aligned_count` can grow between
/// calls while a capture is in progress.
pub trait SampleSnapshot: Send + Sync {
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn ring_count(&self) -> u64;
    fn aligned_count(&self) -> u64;
    fn is_able_free(&self) -> bool;
    fn has_data(&self, sig_index: usize) -> bool;

    /// Returns a block covering `[i, *chunk_end)`, possibly lowering
    /// `chunk_end` when the request spans a backing-block boundary.
    /// `None` when `sig_index` carries no per-sample data (the caller
    /// falls back to [`SampleSnapshot::get_sample`]'s constant value).
    fn get_samples(&self, i: u64, chunk_end: &mut u64, sig_index: usize) -> Option<SampleBlock<'_>>;

    fn get_sample(&self, i: u64, sig_index: usize) -> u8;

    fn samplerate(&self) -> f64;
}
