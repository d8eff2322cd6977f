use std::f32::consts::TAU;

use pc_core::frame::{Candidate, MAX_BINS, MAX_CANDIDATES, ResonatorFrame};
use pc_core::PipelineConfig;

use crate::smoothing::ema;

/// Longueur de la table de fenêtre. Indépendante de la longueur du bloc analysé :
/// la fenêtre est lue par interpolation linéaire.
const WINDOW_LUT_LEN: usize = 512;

/// Maximum global sous lequel une frame est traitée comme du silence.
const MAGNITUDE_EPSILON: f32 = 1e-4;

/// État d'un filtre Goertzel accordé sur un tempo candidat.
#[derive(Clone, Copy, Debug, Default)]
pub struct GoertzelBin {
    /// Tempo cible (BPM).
    pub bpm: f32,
    /// Fréquence cible (Hz) = bpm / 60.
    pub freq_hz: f32,
    /// 2·cos(ω).
    pub coeff: f32,
    /// cos(ω).
    pub cosine: f32,
    /// sin(ω).
    pub sine: f32,
    /// Magnitude du dernier balayage.
    pub raw_magnitude: f32,
    /// Magnitude lissée (EMA).
    pub magnitude: f32,
    /// Phase du dernier balayage, radians [0, 2π). 0 = battement sur le dernier échantillon.
    pub phase: f32,
}

impl GoertzelBin {
    fn tuned(bpm: f32, hop_rate_hz: f32) -> Self {
        let freq_hz = bpm / 60.0;
        let omega = TAU * freq_hz / hop_rate_hz;
        Self {
            bpm,
            freq_hz,
            coeff: 2.0 * omega.cos(),
            cosine: omega.cos(),
            sine: omega.sin(),
            ..Self::default()
        }
    }

    /// Accumulation Goertzel sur `block` (du plus ancien au plus récent).
    ///
    /// Retourne `(re, im)` de `Σ x[n]·e^{jω(N-1-n)}`, dont l'argument est la phase
    /// du battement au dernier échantillon.
    #[inline]
    fn accumulate(&self, block: &[f32]) -> (f32, f32) {
        let mut q1 = 0.0f32;
        let mut q2 = 0.0f32;
        for &x in block {
            let q0 = self.coeff * q1 - q2 + x;
            q2 = q1;
            q1 = q0;
        }
        (q1 - q2 * self.cosine, q2 * self.sine)
    }
}

/// Historique circulaire de z-scores à capacité fixe.
///
/// # Example
/// ```
/// use pc_tempo::resonator::NoveltyHistory;
/// let mut h = NoveltyHistory::with_capacity(3);
/// for z in [1.0, 2.0, 3.0, 4.0] { h.push(z); }
/// assert_eq!(h.len(), 3);
/// assert_eq!(h.get(0), 2.0);
/// assert_eq!(h.get(2), 4.0);
/// ```
#[derive(Clone, Debug)]
pub struct NoveltyHistory {
    buf: Vec<f32>,
    head: usize,
    count: usize,
}

impl NoveltyHistory {
    /// Alloue l'historique. Aucune réallocation ensuite.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            head: 0,
            count: 0,
        }
    }

    /// Ajoute un échantillon, écrasant le plus ancien si plein.
    #[inline]
    pub fn push(&mut self, z: f32) {
        self.buf[self.head] = z;
        self.head = (self.head + 1) % self.buf.len();
        self.count = (self.count + 1).min(self.buf.len());
    }

    /// Échantillon `i`, 0 = le plus ancien.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> f32 {
        let cap = self.buf.len();
        self.buf[(self.head + cap - self.count + i) % cap]
    }

    /// Nombre d'échantillons présents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// `true` si vide.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Capacité fixe.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Vide l'historique sans désallouer.
    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.head = 0;
        self.count = 0;
    }
}

/// Banc de résonateurs Goertzel, un par tempo candidat.
///
/// Le balayage complet tourne à cadence réduite ; les hops intermédiaires ne
/// font qu'alimenter l'historique.
///
/// # Example
/// ```
/// use pc_core::PipelineConfig;
/// use pc_tempo::resonator::ResonatorBank;
/// let mut bank = ResonatorBank::new(&PipelineConfig::default());
/// assert!(bank.update(0.0, 0.0).is_none());
/// ```
pub struct ResonatorBank {
    bins: [GoertzelBin; MAX_BINS],
    bin_count: usize,
    history: NoveltyHistory,
    min_history: usize,
    hops_per_update: u32,
    hop_counter: u32,
    smoothing: f32,
    top_k: usize,
    window: [f32; WINDOW_LUT_LEN],
    /// Bloc fenêtré et centré, pré-alloué à la capacité de l'historique.
    block: Vec<f32>,
    frame: ResonatorFrame,
}

impl ResonatorBank {
    /// Crée le banc et précalcule les coefficients et la fenêtre.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let bin_count = config.bin_count.min(MAX_BINS);
        let spacing = config.bin_spacing();
        let mut bins = [GoertzelBin::default(); MAX_BINS];
        for (i, bin) in bins.iter_mut().take(bin_count).enumerate() {
            *bin = GoertzelBin::tuned(config.min_bpm + i as f32 * spacing, config.hop_rate_hz);
        }

        // Hann
        let mut window = [0.0f32; WINDOW_LUT_LEN];
        for (i, w) in window.iter_mut().enumerate() {
            *w = 0.5 * (1.0 - (TAU * i as f32 / (WINDOW_LUT_LEN as f32 - 1.0)).cos());
        }

        let history_len = config.history_len();
        Self {
            bins,
            bin_count,
            history: NoveltyHistory::with_capacity(history_len),
            min_history: config.min_history_len().max(2),
            hops_per_update: config.hops_per_update(),
            hop_counter: 0,
            smoothing: config.magnitude_smoothing,
            top_k: config.top_k.clamp(1, MAX_CANDIDATES),
            window,
            block: vec![0.0; history_len],
            frame: ResonatorFrame::empty(bin_count, config.min_bpm, spacing),
        }
    }

    /// Ajoute un z-score et, une fois tous les `hops_per_update` hops, balaye
    /// tous les bins.
    ///
    /// Retourne `None` sur les cycles sautés.
    pub fn update(&mut self, z: f32, t: f64) -> Option<&ResonatorFrame> {
        self.history.push(if z.is_finite() { z } else { 0.0 });
        self.hop_counter += 1;
        if self.hop_counter < self.hops_per_update {
            return None;
        }
        self.hop_counter = 0;
        self.sweep(t);
        Some(&self.frame)
    }

    /// Dernière frame produite.
    #[must_use]
    pub fn frame(&self) -> &ResonatorFrame {
        &self.frame
    }

    /// Bins actifs.
    #[must_use]
    pub fn bins(&self) -> &[GoertzelBin] {
        &self.bins[..self.bin_count]
    }

    /// Historique de z-scores.
    #[must_use]
    pub fn history(&self) -> &NoveltyHistory {
        &self.history
    }

    /// Retour au démarrage à froid.
    pub fn reset(&mut self) {
        self.history.clear();
        self.hop_counter = 0;
        for bin in &mut self.bins[..self.bin_count] {
            bin.raw_magnitude = 0.0;
            bin.magnitude = 0.0;
            bin.phase = 0.0;
        }
        self.frame = ResonatorFrame::empty(self.bin_count, self.frame.min_bpm, self.frame.bin_spacing);
    }

    fn sweep(&mut self, t: f64) {
        self.frame.timestamp = t;
        let n = self.history.len();

        if n < self.min_history {
            self.clear_frame();
            return;
        }

        let norm = self.prepare_block(n);
        let block = &self.block[..n];
        let mut max_magnitude = 0.0f32;

        for (i, bin) in self.bins[..self.bin_count].iter_mut().enumerate() {
            let (re, im) = bin.accumulate(block);
            bin.raw_magnitude = (re * re + im * im).sqrt() / norm;
            bin.magnitude = ema(bin.raw_magnitude, bin.magnitude, self.smoothing);
            bin.phase = im.atan2(re).rem_euclid(TAU);
            if bin.phase >= TAU {
                bin.phase = 0.0;
            }
            self.frame.spectrum[i] = bin.magnitude;
            self.frame.phases[i] = bin.phase;
            max_magnitude = max_magnitude.max(bin.magnitude);
        }

        self.frame.max_magnitude = max_magnitude;
        if max_magnitude < MAGNITUDE_EPSILON {
            self.frame.silent = true;
            self.frame.candidate_count = 0;
            return;
        }
        self.frame.silent = false;
        self.rank_candidates(max_magnitude);
    }

    /// Copie l'historique dans le bloc, retire la moyenne et applique la fenêtre.
    ///
    /// Retourne la normalisation d'amplitude (somme des poids / 2).
    fn prepare_block(&mut self, n: usize) -> f32 {
        let mut sum = 0.0f32;
        for i in 0..n {
            let x = self.history.get(i);
            self.block[i] = x;
            sum += x;
        }
        let mean = sum / n as f32;

        let step = (WINDOW_LUT_LEN - 1) as f32 / (n - 1) as f32;
        let mut weight_sum = 0.0f32;
        for (i, x) in self.block[..n].iter_mut().enumerate() {
            let pos = i as f32 * step;
            let lo = (pos as usize).min(WINDOW_LUT_LEN - 1);
            let hi = (lo + 1).min(WINDOW_LUT_LEN - 1);
            let frac = pos - lo as f32;
            let w = self.window[lo] * (1.0 - frac) + self.window[hi] * frac;
            *x = (*x - mean) * w;
            weight_sum += w;
        }
        (weight_sum * 0.5).max(f32::EPSILON)
    }

    fn clear_frame(&mut self) {
        for bin in &mut self.bins[..self.bin_count] {
            bin.raw_magnitude = 0.0;
            bin.magnitude = 0.0;
        }
        self.frame.spectrum.fill(0.0);
        self.frame.candidate_count = 0;
        self.frame.max_magnitude = 0.0;
        self.frame.silent = true;
    }

    /// Top-K des pics locaux par insertion dans un petit tableau trié.
    fn rank_candidates(&mut self, max_magnitude: f32) {
        let spectrum = &self.frame.spectrum[..self.bin_count];
        let mut ranked = [Candidate::default(); MAX_CANDIDATES];
        let mut count = 0usize;

        for (i, &m) in spectrum.iter().enumerate() {
            let left = if i > 0 { spectrum[i - 1] } else { f32::MIN };
            let right = spectrum.get(i + 1).copied().unwrap_or(f32::MIN);
            if m < left || m < right || m < MAGNITUDE_EPSILON {
                continue;
            }
            if count == self.top_k && m <= ranked[count - 1].raw_magnitude {
                continue;
            }
            let mut pos = count.min(self.top_k - 1);
            while pos > 0 && ranked[pos - 1].raw_magnitude < m {
                ranked[pos] = ranked[pos - 1];
                pos -= 1;
            }
            ranked[pos] = Candidate {
                bin: i,
                bpm: 0.0,
                magnitude: 0.0,
                raw_magnitude: m,
                phase: self.frame.phases[i],
            };
            count = (count + 1).min(self.top_k);
        }

        for c in &mut ranked[..count] {
            c.magnitude = c.raw_magnitude / max_magnitude;
            c.bpm = self.frame.refined_bpm(c.bin);
        }
        self.frame.candidates = ranked;
        self.frame.candidate_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_50hz() -> PipelineConfig {
        PipelineConfig {
            hop_rate_hz: 50.0,
            ..PipelineConfig::default()
        }
    }

    /// Train d'impulsions : 1.0 tous les `period` hops, aligné pour que le
    /// dernier hop de chaque bloc de `period` soit un battement.
    fn impulse(i: usize, period: usize) -> f32 {
        if i % period == period - 1 { 5.0 } else { -0.2 }
    }

    #[test]
    fn skipped_cycles_return_none() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        let updates = (0..50usize)
            .filter(|&i| bank.update(0.0, i as f64 * 0.02).is_some())
            .count();
        assert_eq!(updates, 10);
    }

    #[test]
    fn cold_start_reports_zero_magnitude() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        for i in 0..100 {
            if let Some(frame) = bank.update(impulse(i, 25), i as f64 * 0.02) {
                assert!(frame.silent);
                assert!(frame.spectrum().iter().all(|&m| m == 0.0));
                assert!(frame.candidates().is_empty());
            }
        }
    }

    #[test]
    fn impulse_train_peaks_at_its_tempo() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        // 25 hops @ 50 Hz = 0.5 s = 120 BPM
        for i in 0..500 {
            let _ = bank.update(impulse(i, 25), i as f64 * 0.02);
        }
        let frame = bank.frame();
        assert!(!frame.silent);
        let top = frame.candidates()[0];
        assert!((top.bpm - 120.0).abs() < 2.0, "top = {}", top.bpm);
        assert!((top.magnitude - 1.0).abs() < 1e-6);
        for pair in frame.candidates().windows(2) {
            assert!(pair[0].raw_magnitude >= pair[1].raw_magnitude);
        }
    }

    #[test]
    fn phase_is_zero_on_the_beat() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        for i in 0..500 {
            let _ = bank.update(impulse(i, 25), i as f64 * 0.02);
        }
        // Le hop 499 est un battement
        let bin = bank.bins().iter().position(|b| (b.bpm - 120.0).abs() < 0.01).unwrap_or(60);
        let phase = bank.bins()[bin].phase;
        let dist = phase.min(TAU - phase);
        assert!(dist < 0.3, "phase = {phase}");
    }

    #[test]
    fn silence_keeps_defaults() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        for i in 0..1000 {
            let _ = bank.update(0.0, i as f64 * 0.02);
        }
        assert!(bank.frame().silent);
        assert!(bank.frame().candidates().is_empty());
    }

    #[test]
    fn bin_tempos_strictly_increase() {
        let bank = ResonatorBank::new(&PipelineConfig::default());
        let bins = bank.bins();
        let spacing = bins[1].bpm - bins[0].bpm;
        for pair in bins.windows(2) {
            assert!(pair[1].bpm > pair[0].bpm);
            assert!(((pair[1].bpm - pair[0].bpm) - spacing).abs() < 1e-3);
        }
    }

    #[test]
    fn reset_clears_history() {
        let config = config_50hz();
        let mut bank = ResonatorBank::new(&config);
        for i in 0..500 {
            let _ = bank.update(impulse(i, 25), i as f64 * 0.02);
        }
        bank.reset();
        assert!(bank.history().is_empty());
        assert!(bank.frame().silent);
        assert!(bank.bins().iter().all(|b| b.magnitude == 0.0));
    }
}
