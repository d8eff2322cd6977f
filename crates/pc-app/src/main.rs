use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use pc_core::PipelineConfig;
use pc_core::traits::NoveltySource;
use pc_tempo::runtime::{NoveltyFeed, PipelineThread, spawn_pipeline_thread};

pub mod cli;
pub mod consumer;
pub mod synth;

use consumer::Consumer;

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Warn))
        .init();

    // 3. Valider les arguments
    cli.validate()?;

    // 4. Charger la config et appliquer les overrides CLI
    let mut config = resolve_config(&cli.config)?;
    if let Some(rate) = cli.hop_rate {
        config.hop_rate_hz = rate;
        config.clamp_all();
    }

    // 5. Source synthétique
    let mut source = synth::ImpulseTrain::new(cli.bpm, config.hop_rate_hz, cli.duration);
    if let Some(bpm) = cli.switch_bpm {
        source = source.with_switch(cli.switch_at, bpm);
    }
    if let Some(at) = cli.silence_after {
        source = source.with_silence_after(at);
    }

    // 6. Thread producteur
    let PipelineThread {
        feed,
        subscriber,
        control,
    } = spawn_pipeline_thread(config).context("Démarrage du pipeline impossible")?;
    let mut consumer = Consumer::new(subscriber, cli.json);

    // 7. Boucle consommateur
    let dropped_hops = if cli.realtime {
        run_realtime(source, feed, &mut consumer, cli.render_fps)?
    } else {
        run_offline(source, feed, &mut consumer, cli.render_fps)
    };

    consumer.finish(dropped_hops);
    control.shutdown().context("Arrêt du thread producteur")?;
    Ok(())
}

/// Rejoue le flux au plus vite ; le consommateur est échantillonné en temps de flux.
fn run_offline<S: NoveltySource>(
    mut source: S,
    mut feed: NoveltyFeed,
    consumer: &mut Consumer,
    render_fps: u32,
) -> u64 {
    let frame_period = 1.0 / f64::from(render_fps.max(1));
    let mut next_frame = 0.0;
    let mut last_t = None;

    while let Some((raw, t)) = source.next_hop() {
        while feed.free_slots() == 0 {
            thread::yield_now();
        }
        let _ = feed.push(raw, t);
        last_t = Some(t);

        if t >= next_frame {
            let _ = consumer.wait_until(t);
            consumer.frame(t);
            next_frame += frame_period;
        }
    }

    if let Some(t) = last_t {
        let _ = consumer.wait_until(t);
        consumer.frame(t);
    }
    feed.dropped()
}

/// Cadence le flux sur l'horloge murale depuis un thread source ; le
/// consommateur interroge à `render_fps` et extrapole la phase.
fn run_realtime<S: NoveltySource>(
    source: S,
    feed: NoveltyFeed,
    consumer: &mut Consumer,
    render_fps: u32,
) -> Result<u64> {
    let start = Instant::now();
    let handle = thread::Builder::new()
        .name("pc-source".to_string())
        .spawn(move || pace_source(source, feed, start))
        .context("Démarrage du thread source impossible")?;

    let frame_period = Duration::from_secs_f64(1.0 / f64::from(render_fps.max(1)));
    while !handle.is_finished() {
        consumer.frame(start.elapsed().as_secs_f64());
        thread::sleep(frame_period);
    }
    consumer.frame(start.elapsed().as_secs_f64());

    handle
        .join()
        .map_err(|_| anyhow::anyhow!("Le thread source a paniqué"))
}

fn pace_source<S: NoveltySource>(mut source: S, mut feed: NoveltyFeed, start: Instant) -> u64 {
    while let Some((raw, t)) = source.next_hop() {
        let due = Duration::from_secs_f64(t.max(0.0));
        if let Some(wait) = due.checked_sub(start.elapsed()) {
            thread::sleep(wait);
        }
        if !feed.push(raw, t) {
            log::trace!("Hop perdu à t={t:.3}");
        }
    }
    feed.dropped()
}

/// Charge la config TOML, ou les défauts si le fichier est absent.
fn resolve_config(path: &Path) -> Result<PipelineConfig> {
    if path.exists() {
        pc_core::config::load_config(path)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            path.display()
        );
        Ok(PipelineConfig::default())
    }
}
