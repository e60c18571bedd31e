//! Criterion benchmarks for shortcut chord matching.
//!
//! Every key event on the machine passes through the matcher from inside a
//! low-level keyboard hook, so both the unfiltered fast path and a full
//! chord must stay far below the hook timeout.
//!
//! Run with:
//! ```bash
//! cargo bench --package mrcam-core --bench chord_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mrcam_core::keymap::windows_vk::{VK_LWIN, VK_MENU, VK_SPACE, VK_UP};
use mrcam_core::ChordMatcher;

fn bench_unfiltered_typing(c: &mut Criterion) {
    let mut matcher = ChordMatcher::new();
    c.bench_function("chord_unfiltered_key", |b| {
        b.iter(|| {
            matcher.on_key_down(black_box(0x41));
            matcher.on_key_up(black_box(0x41))
        })
    });
}

fn bench_full_chords(c: &mut Criterion) {
    let mut matcher = ChordMatcher::new();
    c.bench_function("chord_two_key", |b| {
        b.iter(|| {
            matcher.on_key_down(VK_LWIN as u32);
            matcher.on_key_down(VK_SPACE as u32);
            matcher.on_key_up(VK_SPACE as u32);
            matcher.on_key_up(VK_LWIN as u32);
            black_box(matcher.test_shortcuts())
        })
    });
    c.bench_function("chord_three_key", |b| {
        b.iter(|| {
            matcher.on_key_down(VK_LWIN as u32);
            matcher.on_key_down(VK_MENU as u32);
            matcher.on_key_down(VK_UP as u32);
            matcher.on_key_up(VK_UP as u32);
            matcher.on_key_up(VK_MENU as u32);
            matcher.on_key_up(VK_LWIN as u32);
            black_box(matcher.test_shortcuts())
        })
    });
}

criterion_group!(benches, bench_unfiltered_typing, bench_full_chords);
criterion_main!(benches);
