//! Reference in-memory implementations of the engine capability traits.
//!
//! `MockEngine` does not decode anything itself — decoding logic is the
//! opaque third-party engine's job. Callers arrange what a session
//! "emits" via [`MockEngine::set_emitter`]; `session_send` simply
//! invokes that closure with the sample range it was given and
//! forwards whatever [`AnnotationEvent`]s it returns to the registered
//! callback, the same way `NoopPluginHost` stands in for a real plugin
//! host until one exists.

use crate::{
    AnnotationEvent, ChannelId, DecodeEngine, DecoderId, EngineError, EngineResult, InstanceId,
    OutputCallback, SampleBlock, SampleSnapshot, SessionId, Variant,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Emitter = dyn Fn(u64, u64) -> Vec<AnnotationEvent> + Send + Sync;

struct MockSession {
    callback: Option<OutputCallback>,
    samplerate: f64,
    started: bool,
    emit: Option<Arc<Emitter>>,
}

struct MockInstance {
    #[allow(dead_code)]
    decoder: DecoderId,
    channels: HashMap<ChannelId, u32>,
}

#[derive(Default)]
struct Inner {
    next_session: u32,
    next_instance: u32,
    sessions: HashMap<SessionId, MockSession>,
    instances: HashMap<InstanceId, MockInstance>,
    /// Consumed by the next `session_new`, for callers that need to
    /// script a session's emitter before its id is known (the id is
    /// only assigned once the caller they're testing creates it).
    pending_emit: Option<Arc<Emitter>>,
}

/// Reference [`DecodeEngine`] implementation backed by plain maps.
/// Sufficient to exercise every scenario the decode-stack runtime
/// needs to cover; not a real protocol-decoder binding.
#[derive(Default)]
pub struct MockEngine {
    inner: Mutex<Inner>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the closure a session's `session_send` calls will be
    /// routed through. Tests call this after `session_new` to script
    /// exactly which annotation events a chunk of samples produces.
    pub fn set_emitter(
        &self,
        session: SessionId,
        emit: impl Fn(u64, u64) -> Vec<AnnotationEvent> + Send + Sync + 'static,
    ) {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        if let Some(s) = inner.sessions.get_mut(&session) {
            s.emit = Some(Arc::new(emit));
        }
    }

    /// Scripts the emitter for whichever session `session_new` creates
    /// next. Use when the caller under test owns session creation and
    /// the test can't name the `SessionId` in advance.
    pub fn set_next_session_emitter(
        &self,
        emit: impl Fn(u64, u64) -> Vec<AnnotationEvent> + Send + Sync + 'static,
    ) {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        inner.pending_emit = Some(Arc::new(emit));
    }
}

impl DecodeEngine for MockEngine {
    fn session_new(&self) -> EngineResult<SessionId> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        let id = SessionId(inner.next_session);
        inner.next_session += 1;
        let emit = inner.pending_emit.take();
        inner.sessions.insert(
            id,
            MockSession {
                callback: None,
                samplerate: 0.0,
                started: false,
                emit,
            },
        );
        Ok(id)
    }

    fn decoder_inst_new(
        &self,
        session: SessionId,
        decoder: DecoderId,
        _options: &HashMap<String, Variant>,
    ) -> EngineResult<InstanceId> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        if !inner.sessions.contains_key(&session) {
            return Err(EngineError::UnknownSession(session));
        }
        let id = InstanceId(inner.next_instance);
        inner.next_instance += 1;
        inner.instances.insert(
            id,
            MockInstance {
                decoder,
                channels: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn inst_channel_set_all(
        &self,
        inst: InstanceId,
        bindings: &HashMap<ChannelId, u32>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        let instance = inner
            .instances
            .get_mut(&inst)
            .ok_or(EngineError::UnknownInstance(inst))?;
        instance.channels = bindings.clone();
        Ok(())
    }

    fn inst_stack(&self, session: SessionId, prev: InstanceId, next: InstanceId) -> EngineResult<()> {
        let inner = self.inner.lock().expect("mock engine lock poisoned");
        if !inner.sessions.contains_key(&session) {
            return Err(EngineError::UnknownSession(session));
        }
        if !inner.instances.contains_key(&prev) {
            return Err(EngineError::UnknownInstance(prev));
        }
        if !inner.instances.contains_key(&next) {
            return Err(EngineError::UnknownInstance(next));
        }
        Ok(())
    }

    fn session_metadata_set_samplerate(&self, session: SessionId, rate: f64) -> EngineResult<()> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        let s = inner
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        s.samplerate = rate;
        Ok(())
    }

    fn pd_output_callback_add(&self, session: SessionId, cb: OutputCallback) -> EngineResult<()> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        let s = inner
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        s.callback = Some(cb);
        Ok(())
    }

    fn session_start(&self, session: SessionId) -> EngineResult<()> {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        let s = inner
            .sessions
            .get_mut(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        s.started = true;
        Ok(())
    }

    fn session_send(
        &self,
        session: SessionId,
        sample_start: u64,
        sample_end: u64,
        _channel_ptrs: &[Option<*const u8>],
        _channel_const_values: &[u8],
    ) -> EngineResult<()> {
        let (emit, callback_present) = {
            let inner = self.inner.lock().expect("mock engine lock poisoned");
            let s = inner
                .sessions
                .get(&session)
                .ok_or(EngineError::UnknownSession(session))?;
            (s.emit.clone(), s.callback.is_some())
        };
        let Some(emit) = emit else {
            return Ok(());
        };
        let events = emit(sample_start, sample_end);
        if !callback_present {
            return Ok(());
        }
        let inner = self.inner.lock().expect("mock engine lock poisoned");
        let s = inner
            .sessions
            .get(&session)
            .ok_or(EngineError::UnknownSession(session))?;
        if let Some(cb) = &s.callback {
            for event in events {
                cb(event);
            }
        }
        Ok(())
    }

    fn session_end(&self, session: SessionId) -> EngineResult<()> {
        let inner = self.inner.lock().expect("mock engine lock poisoned");
        if !inner.sessions.contains_key(&session) {
            return Err(EngineError::UnknownSession(session));
        }
        Ok(())
    }

    fn session_destroy(&self, session: SessionId) {
        let mut inner = self.inner.lock().expect("mock engine lock poisoned");
        inner.sessions.remove(&session);
    }

    fn inst_channels(&self, inst: InstanceId) -> Vec<ChannelId> {
        let inner = self.inner.lock().expect("mock engine lock poisoned");
        let mut ids: Vec<ChannelId> = inner
            .instances
            .get(&inst)
            .map(|i| i.channels.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Reference [`SampleSnapshot`] backed by one `Vec<u8>` column per
/// channel. Streaming captures are modeled by `ring_count` lagging
/// behind `len` until [`VecSnapshot::advance`] is called.
pub struct VecSnapshot {
    channels: Vec<Vec<u8>>,
    len: u64,
    ring_count: Mutex<u64>,
    samplerate: f64,
}

impl VecSnapshot {
    pub fn new(channels: Vec<Vec<u8>>, samplerate: f64) -> Self {
        let len = channels.iter().map(|c| c.len() as u64).max().unwrap_or(0);
        Self {
            channels,
            len,
            ring_count: Mutex::new(len),
            samplerate,
        }
    }

    /// Builds a snapshot whose `ring_count` starts at 0 and must be
    /// advanced explicitly, simulating an in-progress acquisition.
    pub fn new_streaming(channels: Vec<Vec<u8>>, samplerate: f64) -> Self {
        let len = channels.iter().map(|c| c.len() as u64).max().unwrap_or(0);
        Self {
            channels,
            len,
            ring_count: Mutex::new(0),
            samplerate,
        }
    }

    pub fn advance(&self, to: u64) {
        let mut guard = self.ring_count.lock().expect("ring count lock poisoned");
        *guard = to.min(self.len);
    }
}

impl SampleSnapshot for VecSnapshot {
    fn len(&self) -> u64 {
        self.len
    }

    fn ring_count(&self) -> u64 {
        *self.ring_count.lock().expect("ring count lock poisoned")
    }

    fn aligned_count(&self) -> u64 {
        self.ring_count()
    }

    fn is_able_free(&self) -> bool {
        true
    }

    fn has_data(&self, sig_index: usize) -> bool {
        self.channels.get(sig_index).is_some_and(|c| !c.is_empty())
    }

    fn get_samples(&self, i: u64, chunk_end: &mut u64, sig_index: usize) -> Option<SampleBlock<'_>> {
        let column = self.channels.get(sig_index)?;
        let available = column.len() as u64;
        if *chunk_end > available {
            *chunk_end = available;
        }
        if i >= *chunk_end {
            return Some(SampleBlock::new(&[]));
        }
        Some(SampleBlock::new(&column[i as usize..*chunk_end as usize]))
    }

    fn get_sample(&self, i: u64, sig_index: usize) -> u8 {
        self.channels
            .get(sig_index)
            .and_then(|c| c.get(i as usize))
            .copied()
            .unwrap_or(0)
    }

    fn samplerate(&self) -> f64 {
        self.samplerate
    }
}
