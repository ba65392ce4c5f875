//! Render-path and planner benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessitura::prelude::*;

/// A full eight-voice patch: osc → amp (enveloped) → summer → output.
fn build() -> (Synth, Patch) {
    let mut synth = Synth::new("bench", MAX_POLYPHONY, 1);
    let env = synth.add_voice_control("env", EnvelopeControl::new(0.01, 0.1));
    let osc = synth.add_voice_module("osc", NaiveSquare::new());
    let amp = synth.add_voice_module("amp", Amp::new());
    let sum_in = synth.add_voice_module("sum_in", SumInput::new());
    let sum_out = synth.add_timbre_module("sum_out", SumOutput::new(&sum_in), false);
    let out = synth.add_timbre_module("out", AudioOut::new(), true);

    let mut patch = Patch::new();
    patch.constant(osc.input("freq"), 440.0).unwrap();
    patch.connect(osc.output("out"), amp.input("in")).unwrap();
    patch.drive(env.out(), amp.input("gain")).unwrap();
    patch.connect(amp.output("out"), sum_in.input("in")).unwrap();
    patch
        .connect(sum_out.output("out"), out.input("in"))
        .unwrap();
    (synth, patch)
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");

    let (mut synth, patch) = build();
    synth.finalize(&mut Config::new(44_100)).unwrap();
    synth.apply_patch(&patch, 0).unwrap();
    for vi in 0..MAX_POLYPHONY {
        synth.attach_voice_to_timbre(0, vi);
        synth.voices_mut()[vi].start_note();
    }

    group.bench_function("chunk_64_frames_8_voices", |b| {
        b.iter(|| {
            synth.render_chunk(black_box(MAX_FRAMES));
            black_box(synth.output(0, MAX_FRAMES)[0])
        })
    });

    group.bench_function("chunk_64_frames_8_voices_parallel", |b| {
        b.iter(|| {
            synth.render_chunk_parallel(black_box(MAX_FRAMES), 4);
            black_box(synth.output(0, MAX_FRAMES)[0])
        })
    });

    group.finish();
}

fn bench_planner(c: &mut Criterion) {
    let mut group = c.benchmark_group("planner");

    let (mut synth, patch) = build();
    synth.finalize(&mut Config::new(44_100)).unwrap();

    group.bench_function("apply_patch", |b| {
        b.iter(|| synth.apply_patch(black_box(&patch), 0).unwrap())
    });

    let (mut attach_synth, attach_patch) = build();
    attach_synth.finalize(&mut Config::new(44_100)).unwrap();
    attach_synth.apply_patch(&attach_patch, 0).unwrap();

    group.bench_function("attach_voice", |b| {
        b.iter(|| {
            attach_synth.attach_voice_to_timbre(0, 0);
            attach_synth.detach_voice_from_timbre(0, 0);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_render, bench_planner);
criterion_main!(benches);
