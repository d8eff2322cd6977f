use std::thread;
use std::time::Duration;

use pc_core::frame::{PipelineOutput, TactusFrame};
use pc_core::PipelineConfig;
use pc_tempo::channel::latest_channel;
use pc_tempo::pipeline::Pipeline;

fn pipeline(config: PipelineConfig) -> Pipeline {
    match Pipeline::new(config) {
        Ok(p) => p,
        Err(e) => panic!("configuration refusée : {e}"),
    }
}

/// Impulsion sur le hop qui contient un battement d'un train à `bpm`.
fn pulse(t0: f64, t1: f64, bpm: f64) -> bool {
    (t1 * bpm / 60.0).floor() > (t0 * bpm / 60.0).floor()
}

struct Step {
    t: f64,
    tactus: Option<TactusFrame>,
    out: PipelineOutput,
}

/// Fait tourner le pipeline hop par hop de `from` à `to` secondes.
fn run(
    p: &mut Pipeline,
    from: f64,
    to: f64,
    novelty: impl Fn(f64, f64) -> f32,
    mut visit: impl FnMut(&Step),
) {
    let rate = f64::from(p.config().hop_rate_hz);
    let dt = 1.0 / rate;
    let first = (from * rate).round() as u64;
    let last = (to * rate).round() as u64;
    for i in first..last {
        let t = i as f64 / rate;
        let tactus = p.process_novelty(novelty(t, t + dt), t);
        let out = p.tick(t, dt as f32);
        assert!((0.0..1.0).contains(&out.phase01), "phase01 = {}", out.phase01);
        visit(&Step { t, tactus, out });
    }
}

fn train(bpm: f64) -> impl Fn(f64, f64) -> f32 {
    move |t0, t1| if pulse(t0, t1, bpm) { 1.0 } else { 0.05 }
}

#[test]
fn impulse_train_locks_near_its_tempo() {
    let mut p = pipeline(PipelineConfig::default());
    let mut lock_conf: Option<f32> = None;
    let mut prev_conf = 0.0f32;
    let mut last_tick: Option<f64> = None;

    run(&mut p, 0.0, 10.0, train(120.0), |s| {
        if let Some(tf) = s.tactus {
            if tf.locked {
                assert!((tf.bpm - 120.0).abs() <= 2.0, "bpm = {}", tf.bpm);
                if lock_conf.is_none() {
                    lock_conf = Some(tf.confidence);
                } else {
                    assert!(tf.confidence >= prev_conf - 0.05, "confidence dropped");
                }
            }
            assert!(tf.confidence < 1.0);
            prev_conf = tf.confidence;
        }
        if s.out.beat_tick {
            if let Some(prev) = last_tick {
                let period = 60.0 / f64::from(s.out.bpm);
                assert!(s.t - prev >= 0.33 * period, "double tick");
            }
            last_tick = Some(s.t);
        }
    });

    let out = p.last_output();
    assert!(out.locked);
    assert!((out.bpm - 120.0).abs() <= 2.0);
    let (Some(at_lock), final_conf) = (lock_conf, p.tactus().confidence) else {
        panic!("never locked");
    };
    assert!(final_conf >= at_lock - 0.05);
    assert!(last_tick.is_some());
}

#[test]
fn silence_never_locks_or_ticks() {
    let mut p = pipeline(PipelineConfig::default());
    let mut ticks = 0;
    run(&mut p, 0.0, 30.0, |_, _| 0.0, |s| {
        assert!(!s.out.locked);
        if s.out.beat_tick {
            ticks += 1;
        }
    });
    assert_eq!(ticks, 0);
    assert!(p.last_output().confidence < 1e-3);
}

#[test]
fn silence_after_lock_releases() {
    let mut p = pipeline(PipelineConfig::default());
    run(&mut p, 0.0, 10.0, train(120.0), |_| {});
    assert!(p.last_output().locked);

    let mut late_ticks = 0;
    run(&mut p, 10.0, 40.0, |_, _| 0.0, |s| {
        if s.t >= 30.0 {
            assert!(!s.out.locked);
            if s.out.beat_tick {
                late_ticks += 1;
            }
        }
    });
    assert_eq!(late_ticks, 0);
    assert!(p.last_output().confidence < 0.05);
}

/// Bruit uniforme [0, 1) déterministe (xorshift32).
fn noise(seed: u32) -> impl FnMut() -> f32 {
    let mut state = seed.max(1);
    move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state >> 8) as f32 / (1u32 << 24) as f32
    }
}

#[test]
fn aperiodic_noise_never_locks_or_ticks() {
    let cases: [(f32, f32); 5] = [
        (0.0, 1e-3),
        (0.0, 0.05),
        (0.0, 1.0),
        (0.0, 20.0),
        (0.5, 1e-3),
    ];
    for (seed, (offset, amplitude)) in (1u32..).zip(cases) {
        let mut p = pipeline(PipelineConfig::default());
        let mut next = noise(seed * 7919);
        let novelty = std::cell::RefCell::new(move || offset + amplitude * next());
        let mut ticks = 0;
        run(&mut p, 0.0, 60.0, |_, _| (*novelty.borrow_mut())(), |s| {
            assert!(
                !s.out.locked,
                "offset {offset} amplitude {amplitude}: locked at t={:.2}",
                s.t
            );
            if let Some(tf) = s.tactus {
                assert!(!tf.locked);
            }
            if s.out.beat_tick {
                ticks += 1;
            }
        });
        assert_eq!(ticks, 0, "offset {offset} amplitude {amplitude}");
    }
}

#[test]
fn impulse_trains_lock_across_the_range() {
    for bpm in [65.0f32, 75.0, 90.0, 150.0, 175.0] {
        let mut p = pipeline(PipelineConfig::default());
        run(&mut p, 0.0, 20.0, train(f64::from(bpm)), |s| {
            if let Some(tf) = s.tactus
                && tf.locked
            {
                assert!((tf.bpm - bpm).abs() <= 2.0, "{bpm} BPM locked at {}", tf.bpm);
            }
        });
        let out = p.last_output();
        assert!(out.locked, "{bpm} BPM never locked");
        assert!((out.bpm - bpm).abs() <= 2.0, "{bpm} BPM ended at {}", out.bpm);
    }
}

#[test]
fn crossing_rivals_do_not_flap() {
    let config = PipelineConfig::default();
    let frames = config.hysteresis_frames as usize;
    let mut p = pipeline(config);

    // Deux trains dont les forces se croisent toutes les 3 s
    let novelty = |t0: f64, t1: f64| {
        let swing = 0.15 * (std::f64::consts::TAU * t0 / 3.0).sin();
        let mut v = 0.05;
        if pulse(t0, t1, 100.0) {
            v += 1.0 + swing;
        }
        if pulse(t0, t1, 130.0) {
            v += 1.0 - swing;
        }
        v as f32
    };

    let mut cycle = 0usize;
    let mut winner = None;
    let mut changes: Vec<usize> = Vec::new();
    run(&mut p, 0.0, 40.0, novelty, |s| {
        if let Some(tf) = s.tactus {
            cycle += 1;
            if tf.winning_bin.is_some() && tf.winning_bin != winner {
                if winner.is_some() {
                    changes.push(cycle);
                }
                winner = tf.winning_bin;
            }
        }
    });

    for pair in changes.windows(2) {
        assert!(pair[1] - pair[0] >= frames, "winner flapped: {changes:?}");
    }
}

#[test]
fn tempo_switch_relocks_without_drift() {
    let mut p = pipeline(PipelineConfig::default());
    run(&mut p, 0.0, 12.0, train(120.0), |_| {});
    assert!(p.last_output().locked);

    let mut relocked_at = None;
    let mut last_tick = 12.0;
    let mut longest_gap = 0.0f64;
    run(&mut p, 12.0, 32.0, train(140.0), |s| {
        if s.out.beat_tick {
            longest_gap = longest_gap.max(s.t - last_tick);
            last_tick = s.t;
        }
        let bpm = s.out.bpm;
        assert!(
            (bpm - 120.0).abs() <= 3.0 || (bpm - 140.0).abs() <= 3.0,
            "intermediate tempo {bpm} at t={:.2}",
            s.t
        );
        if relocked_at.is_none() && s.out.locked && (bpm - 140.0).abs() <= 2.0 {
            relocked_at = Some(s.t);
        }
    });
    assert!(relocked_at.is_some(), "never re-locked to 140 BPM");
    // La re-vérification ne coupe pas les battements
    assert!(longest_gap < 1.5, "beats stopped for {longest_gap:.2} s");
    let out = p.last_output();
    assert!(out.locked);
    assert!((out.bpm - 140.0).abs() <= 2.0);
}

#[test]
fn reset_behaves_like_cold_start() {
    let mut used = pipeline(PipelineConfig::default());
    run(&mut used, 0.0, 10.0, train(120.0), |_| {});
    assert!(used.last_output().locked);
    used.reset();
    let reset_out = used.last_output();
    assert!(!reset_out.locked);
    assert_eq!(reset_out.confidence, 0.0);

    let mut fresh = pipeline(PipelineConfig::default());
    let mut a = Vec::new();
    let mut b = Vec::new();
    run(&mut used, 10.0, 20.0, train(140.0), |s| a.push(s.out));
    run(&mut fresh, 10.0, 20.0, train(140.0), |s| b.push(s.out));

    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.epoch, 1);
        assert_eq!(PipelineOutput { epoch: 0, ..*x }, *y);
    }
}

#[test]
fn slow_consumer_reads_latest_in_order() {
    let (mut tx, mut rx) = latest_channel::<PipelineOutput>();
    let writer = thread::spawn(move || {
        for seq in 1..=2000u32 {
            let _ = tx.publish(&PipelineOutput {
                timestamp: f64::from(seq),
                bpm: seq as f32,
                epoch: seq,
                ..PipelineOutput::default()
            });
            if seq % 100 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
    });

    let mut last = 0u64;
    loop {
        let snap = rx.latest();
        if snap.sequence != last {
            assert!(snap.sequence > last);
            assert_eq!(u64::from(snap.value.epoch), snap.sequence);
            assert_eq!(snap.value.timestamp, snap.sequence as f64);
            last = snap.sequence;
        }
        if last == 2000 {
            break;
        }
        thread::sleep(Duration::from_micros(300));
    }
    assert!(writer.join().is_ok());
}
