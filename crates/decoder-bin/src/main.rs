//! Decoder-pipeline demo entrypoint.
//!
//! Wires `decoder-engine::MockEngine` + a synthetic `VecSnapshot` into
//! a `decoder-core::DecoderStack`, runs one decode pass to completion,
//! and prints the resulting row table through `decoder-view`'s
//! `DecoderModel` adapter. No real protocol-decoder backend or
//! acquisition device is involved; this binary exists to exercise the
//! workspace end to end, not to decode real captures.

use anyhow::{Context, Result};
use clap::Parser;
use decoder_core::{AnnotationRowDesc, Decoder, DecoderStack, StackSignal};
use decoder_engine::{
    AnnotationEvent, ChannelId, DecodeEngine, DecoderId, MockEngine, SampleSnapshot, VecSnapshot,
};
use decoder_view::DecoderModel;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Once;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "decoder-bin", version, about = "Decoder-stack pipeline demo")]
struct Args {
    /// Number of synthetic samples to feed through the stack.
    #[arg(long, default_value_t = 4096)]
    samples: u64,
    /// Sample rate reported to the engine, in Hz.
    #[arg(long, default_value_t = 1_000_000.0)]
    samplerate: f64,
    /// Number of samples between one emitted annotation and the next.
    #[arg(long, default_value_t = 64)]
    stride: u64,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("decoder-bin.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "decoder-bin.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed (e.g. under a test
                // harness); drop the guard so its writer thread shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Builds a one-channel synthetic capture: a square wave toggling
/// every `stride` samples, long enough to back `samples` total.
fn synthetic_snapshot(samples: u64, samplerate: f64, stride: u64) -> VecSnapshot {
    let mut channel = Vec::with_capacity(samples as usize);
    for i in 0..samples {
        let level = if (i / stride.max(1)) % 2 == 0 { 0u8 } else { 1u8 };
        channel.push(level);
    }
    VecSnapshot::new(vec![channel], samplerate)
}

/// Configures a single-channel decoder declaring one annotation row
/// ("toggle") that carries class 0, with `[0, samples-1]` as its
/// decode region and channel 0 bound to probe 0.
fn configured_decoder(samples: u64) -> Decoder {
    let mut decoder = Decoder::new(
        DecoderId(0),
        vec![ChannelId(0)],
        vec![ChannelId(0)],
        vec![AnnotationRowDesc::new("toggle", vec![0])],
    );
    let mut probes = HashMap::new();
    probes.insert(ChannelId(0), 0u32);
    decoder.set_probes(probes);
    decoder.set_decode_region(0, samples.saturating_sub(1));
    decoder.commit();
    decoder
}

/// Scripts the mock engine to emit one annotation per `stride`-sample
/// window it is asked to send, carrying the window's level as both
/// display text and a hex numeric payload.
fn script_emitter(engine: &MockEngine, stride: u64) {
    engine.set_next_session_emitter(move |start, end| {
        let mut out = Vec::new();
        let mut i = start;
        while i < end {
            let window_end = (i + stride).min(end);
            let level = (i / stride.max(1)) % 2;
            out.push(AnnotationEvent {
                start_sample: i,
                end_sample: window_end.saturating_sub(1).max(i),
                instance: decoder_engine::InstanceId(0),
                ann_class: 0,
                ann_type: 0,
                ann_text: vec!["level: {$}".to_string()],
                number_hex: format!("{level:02X}"),
            });
            i = window_end;
        }
        out
    });
}

fn run(args: &Args) -> Result<()> {
    info!(target: "runtime", samples = args.samples, samplerate = args.samplerate, "startup");

    let snapshot: Arc<dyn SampleSnapshot> = Arc::new(synthetic_snapshot(
        args.samples,
        args.samplerate,
        args.stride,
    ));
    let decoder = configured_decoder(args.samples);
    let stack = DecoderStack::new(decoder);

    let engine = Arc::new(MockEngine::new());
    script_emitter(&engine, args.stride);
    let engine_dyn: Arc<dyn DecodeEngine> = engine;

    let (signals_tx, signals_rx) = crossbeam_channel::unbounded();
    let handle = stack.begin_decode_work(engine_dyn, snapshot, false, true, signals_tx);

    for signal in signals_rx.iter() {
        match signal {
            StackSignal::NewDecodeData => {
                tracing::debug!(target: "runtime", progress = stack.progress(), "new_decode_data");
            }
            StackSignal::DecodeDone => {
                info!(target: "runtime", "decode_done");
                break;
            }
        }
    }
    handle.join().expect("decoder-stack worker thread panicked");

    if let Some(err) = stack.error_message() {
        anyhow::bail!("decode failed: {err}");
    }

    let model = DecoderModel::new();
    model.set_decoder_stack(Some(stack));
    println!(
        "decoded {} row(s) x {} column(s)",
        model.rows(),
        model.columns()
    );
    for r in 0..model.rows().min(10) {
        for c in 0..model.columns() {
            if let Some(cell) = model.cell(r, c) {
                println!("  [{r}][{c}] {cell}");
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging().context("failed to configure logging")?;
    AppStartup::install_panic_hook();

    let args = Args::parse();
    run(&args).context("decoder-bin run failed")
}
