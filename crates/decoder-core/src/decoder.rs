//! Decoder (§4.4): a configured decoder frame with pending/active
//! dual-state staging and a single `commit()` swap point.

use decoder_engine::{ChannelId, DecodeEngine, DecoderId, EngineResult, InstanceId, Variant};
use std::collections::HashMap;

/// One annotation-row declared by a decoder descriptor: a display
/// title and the set of annotation classes it carries. Grounded on
/// `srd_decoder_annotation_row` (`decoder.h`/`decoderstack.cpp`
/// `build_row`): the title drives the "bit"/"warning" default-hidden
/// rule, the classes populate `class_rows`.
#[derive(Debug, Clone)]
pub struct AnnotationRowDesc {
    pub title: String,
    pub classes: Vec<i16>,
}

impl AnnotationRowDesc {
    pub fn new(title: impl Into<String>, classes: Vec<i16>) -> Self {
        Self {
            title: title.into(),
            classes,
        }
    }
}

/// A configured decoder instance within a [`crate::DecoderStack`].
/// Mutators write to the `_pending` side; [`Decoder::commit`] is the
/// sole point that swaps pending state into the active side the
/// worker thread reads.
#[derive(Debug, Clone)]
pub struct Decoder {
    id: DecoderId,
    /// Every channel the underlying decoder descriptor declares,
    /// required or optional, in the stable order the feed loop walks
    /// when building the per-chunk pointer/constant arrays.
    declared_channels: Vec<ChannelId>,
    required_channels: Vec<ChannelId>,
    annotation_rows: Vec<AnnotationRowDesc>,

    channels: HashMap<ChannelId, u32>,
    channels_pending: HashMap<ChannelId, u32>,
    options: HashMap<String, Variant>,
    options_pending: HashMap<String, Variant>,
    decode_start: u64,
    decode_end: u64,
    decode_start_pending: u64,
    decode_end_pending: u64,

    shown: bool,
    dirty: bool,
}

impl Decoder {
    pub fn new(
        id: DecoderId,
        declared_channels: Vec<ChannelId>,
        required_channels: Vec<ChannelId>,
        annotation_rows: Vec<AnnotationRowDesc>,
    ) -> Self {
        Self {
            id,
            declared_channels,
            required_channels,
            annotation_rows,
            channels: HashMap::new(),
            channels_pending: HashMap::new(),
            options: HashMap::new(),
            options_pending: HashMap::new(),
            decode_start: 0,
            decode_end: 0,
            decode_start_pending: 0,
            decode_end_pending: 0,
            shown: true,
            dirty: true,
        }
    }

    pub fn id(&self) -> DecoderId {
        self.id
    }

    pub fn annotation_rows(&self) -> &[AnnotationRowDesc] {
        &self.annotation_rows
    }

    pub fn decode_start(&self) -> u64 {
        self.decode_start
    }

    pub fn decode_end(&self) -> u64 {
        self.decode_end
    }

    pub fn shown(&self) -> bool {
        self.shown
    }

    pub fn set_shown(&mut self, shown: bool) {
        self.shown = shown;
    }

    pub fn channels(&self) -> &HashMap<ChannelId, u32> {
        &self.channels
    }

    pub fn declared_channels(&self) -> &[ChannelId] {
        &self.declared_channels
    }

    pub fn options(&self) -> &HashMap<String, Variant> {
        &self.options
    }

    /// Stages a full replacement of the probe bindings. Callers never
    /// observe a partially-updated map: the write lands entirely on
    /// the pending side until [`Self::commit`].
    pub fn set_probes(&mut self, probes: HashMap<ChannelId, u32>) {
        self.channels_pending = probes;
        self.dirty = true;
    }

    pub fn set_option(&mut self, id: impl Into<String>, value: Variant) {
        self.options_pending.insert(id.into(), value);
        self.dirty = true;
    }

    pub fn set_decode_region(&mut self, start: u64, end: u64) {
        if self.decode_start != start || self.decode_end != end {
            self.dirty = true;
        }
        self.decode_start_pending = start;
        self.decode_end_pending = end;
    }

    /// Copies pending state into active state atomically with respect
    /// to any reader holding only `&self`. Returns whether anything
    /// actually changed, which the stack uses to decide whether a
    /// replay is required.
    pub fn commit(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.channels = self.channels_pending.clone();
        self.options = self.options_pending.clone();
        self.decode_start = self.decode_start_pending;
        self.decode_end = self.decode_end_pending;
        self.dirty = false;
        true
    }

    /// Restores only the decode-region *start* from the pending
    /// snapshot, independent of `commit()`. Used when the stack
    /// replays from the original start without re-validating pending
    /// option changes (`decoder.cpp`'s `_decode_start_back` restore).
    pub fn reset_start(&mut self) {
        self.decode_start = self.decode_start_pending;
    }

    /// Every channel the underlying decoder descriptor declares as
    /// mandatory must have a probe binding on the active side.
    pub fn have_required_probes(&self) -> bool {
        self.required_channels
            .iter()
            .all(|c| self.channels.contains_key(c))
    }

    /// Instantiates this decoder through the engine façade, configured
    /// with the active `options` and `channels`. Callers chain
    /// instances via `engine.inst_stack(session, prev, this)`.
    pub fn create_decoder_inst(
        &self,
        engine: &dyn DecodeEngine,
        session: decoder_engine::SessionId,
    ) -> EngineResult<InstanceId> {
        let inst = engine.decoder_inst_new(session, self.id, &self.options)?;
        engine.inst_channel_set_all(inst, &self.channels)?;
        Ok(inst)
    }
}
