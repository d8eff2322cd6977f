use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::frame::{MAX_BINS, MAX_CANDIDATES};

/// Configuration complète du pipeline de tempo.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut saine.
///
/// # Example
/// ```
/// use pc_core::config::PipelineConfig;
/// let config = PipelineConfig::default();
/// assert_eq!(config.bin_count, 121);
/// assert!((config.bin_spacing() - 1.0).abs() < 1e-6);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PipelineConfig {
    // === Plage de tempo ===
    /// Tempo minimal couvert (BPM).
    pub min_bpm: f32,
    /// Tempo maximal couvert (BPM).
    pub max_bpm: f32,
    /// Nombre de bins, espacés uniformément sur `[min_bpm, max_bpm]`.
    pub bin_count: usize,

    // === Résonateurs ===
    /// Cadence nominale des hops de nouveauté (Hz).
    pub hop_rate_hz: f32,
    /// Cadence du balayage complet des bins (Hz).
    pub resonator_rate_hz: f32,
    /// Longueur de l'historique de z-scores (secondes).
    pub history_secs: f32,
    /// Historique minimal avant de reporter des magnitudes (secondes).
    pub min_history_secs: f32,
    /// Facteur EMA des magnitudes [0, 1). 0 = brut.
    pub magnitude_smoothing: f32,
    /// Nombre de candidats classés par frame.
    pub top_k: usize,

    // === Résolveur ===
    /// Avantage relatif qu'un challenger doit tenir (0.1 = 10 %).
    pub hysteresis_margin: f32,
    /// Cycles consécutifs qu'un challenger doit gagner.
    pub hysteresis_frames: u32,
    /// Fenêtre de vérification PENDING → LOCKED (secondes).
    pub verify_secs: f32,
    /// Plancher de magnitude lissée sous lequel le cycle compte comme silence.
    pub silence_floor: f32,
    /// Cycles de silence consécutifs avant de relâcher le verrou.
    pub silence_release_cycles: u32,
    /// Confiance minimale pour passer à LOCKED.
    pub lock_min_confidence: f32,
    /// Rapport minimal pic / médiane du spectre pour qu'un cycle compte
    /// comme périodique. En dessous, le cycle est traité comme du silence.
    pub min_prominence: f32,

    // === Détection de silence ===
    /// Fenêtre de nouveauté brute examinée (secondes).
    pub silence_window_secs: f32,
    /// Seuil sur `1 - contraste` au-delà duquel l'entrée est silencieuse [0, 1).
    pub silence_threshold: f32,
    /// Niveau de nouveauté brute sous lequel tout compte comme du silence.
    pub silence_level_floor: f32,

    // === Horloge de battement (PLL) ===
    /// Gain proportionnel de phase.
    pub pll_phase_gain: f32,
    /// Gain intégral de fréquence (BPM par radian d'erreur).
    pub pll_freq_gain: f32,
    /// Correction de phase maximale par mise à jour (radians).
    pub max_phase_step: f32,
    /// Correction de fréquence intégrée maximale (BPM).
    pub max_freq_correction_bpm: f32,
    /// Écart de tempo au-delà duquel l'horloge se recale d'un coup (BPM).
    pub snap_threshold_bpm: f32,
    /// Fraction de période pendant laquelle un second tick est ignoré.
    pub debounce_ratio: f32,
    /// Delta de temps maximal intégré en une fois (secondes).
    pub max_dt_secs: f32,

    // === Nouveauté ===
    /// Constante de temps de la moyenne EWMA (secondes).
    pub mean_tau_secs: f32,
    /// Constante de temps de la variance EWMA (secondes).
    pub variance_tau_secs: f32,
    /// Borne de clip du z-score.
    pub z_clip: f32,

    // === Canal ===
    /// Capacité de la file d'événements de battement.
    pub event_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 180.0,
            bin_count: 121,
            hop_rate_hz: 62.5,
            resonator_rate_hz: 10.0,
            history_secs: 8.0,
            min_history_secs: 3.0,
            magnitude_smoothing: 0.8,
            top_k: 3,
            hysteresis_margin: 0.10,
            hysteresis_frames: 4,
            verify_secs: 2.5,
            silence_floor: 0.01,
            silence_release_cycles: 10,
            lock_min_confidence: 0.15,
            min_prominence: 6.0,
            silence_window_secs: 4.0,
            silence_threshold: 0.5,
            silence_level_floor: 0.01,
            pll_phase_gain: 0.1,
            pll_freq_gain: 0.02,
            max_phase_step: 0.25,
            max_freq_correction_bpm: 2.0,
            snap_threshold_bpm: 5.0,
            debounce_ratio: 0.33,
            max_dt_secs: 0.1,
            mean_tau_secs: 4.0,
            variance_tau_secs: 6.0,
            z_clip: 6.0,
            event_queue_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// Écart en BPM entre deux bins consécutifs.
    #[must_use]
    pub fn bin_spacing(&self) -> f32 {
        if self.bin_count < 2 {
            return 0.0;
        }
        (self.max_bpm - self.min_bpm) / (self.bin_count - 1) as f32
    }

    /// Période nominale d'un hop (secondes).
    #[must_use]
    pub fn hop_period(&self) -> f32 {
        1.0 / self.hop_rate_hz
    }

    /// Nombre de hops entre deux balayages du banc.
    #[must_use]
    pub fn hops_per_update(&self) -> u32 {
        (self.hop_rate_hz / self.resonator_rate_hz).round().max(1.0) as u32
    }

    /// Longueur de l'historique en échantillons.
    #[must_use]
    pub fn history_len(&self) -> usize {
        (self.history_secs * self.hop_rate_hz).round().max(8.0) as usize
    }

    /// Fenêtre du détecteur de silence en échantillons.
    #[must_use]
    pub fn silence_window_len(&self) -> usize {
        (self.silence_window_secs * self.hop_rate_hz).round().max(2.0) as usize
    }

    /// Historique minimal en échantillons, borné à la longueur de l'historique.
    #[must_use]
    pub fn min_history_len(&self) -> usize {
        ((self.min_history_secs * self.hop_rate_hz).round() as usize).min(self.history_len())
    }

    /// Clamp all numeric fields to their valid ranges.
    /// Called after TOML deserialization to prevent out-of-range values.
    pub fn clamp_all(&mut self) {
        self.min_bpm = self.min_bpm.clamp(20.0, 400.0);
        self.max_bpm = self.max_bpm.clamp(self.min_bpm + 1.0, 600.0);
        self.bin_count = self.bin_count.clamp(2, MAX_BINS);
        self.hop_rate_hz = self.hop_rate_hz.clamp(10.0, 1000.0);
        self.resonator_rate_hz = self.resonator_rate_hz.clamp(0.5, self.hop_rate_hz);
        self.history_secs = self.history_secs.clamp(1.0, 30.0);
        self.min_history_secs = self.min_history_secs.clamp(0.5, self.history_secs);
        self.magnitude_smoothing = self.magnitude_smoothing.clamp(0.0, 0.99);
        self.top_k = self.top_k.clamp(1, MAX_CANDIDATES);
        self.hysteresis_margin = self.hysteresis_margin.clamp(0.0, 2.0);
        self.hysteresis_frames = self.hysteresis_frames.clamp(1, 100);
        self.verify_secs = self.verify_secs.clamp(0.0, 30.0);
        self.silence_floor = self.silence_floor.clamp(0.0, 1.0);
        self.silence_release_cycles = self.silence_release_cycles.clamp(1, 1000);
        self.lock_min_confidence = self.lock_min_confidence.clamp(0.0, 0.95);
        self.min_prominence = self.min_prominence.clamp(1.0, 100.0);
        self.silence_window_secs = self.silence_window_secs.clamp(0.5, 30.0);
        self.silence_threshold = self.silence_threshold.clamp(0.0, 0.99);
        self.silence_level_floor = self.silence_level_floor.clamp(0.0, 1e6);
        self.pll_phase_gain = self.pll_phase_gain.clamp(0.0, 1.0);
        self.pll_freq_gain = self.pll_freq_gain.clamp(0.0, 1.0);
        self.max_phase_step = self.max_phase_step.clamp(0.0, std::f32::consts::PI);
        self.max_freq_correction_bpm = self.max_freq_correction_bpm.clamp(0.0, 20.0);
        self.snap_threshold_bpm = self.snap_threshold_bpm.clamp(0.5, 100.0);
        self.debounce_ratio = self.debounce_ratio.clamp(0.0, 0.95);
        self.max_dt_secs = self.max_dt_secs.clamp(0.001, 1.0);
        self.mean_tau_secs = self.mean_tau_secs.clamp(0.1, 60.0);
        self.variance_tau_secs = self.variance_tau_secs.clamp(0.1, 60.0);
        self.z_clip = self.z_clip.clamp(1.0, 50.0);
        self.event_queue_capacity = self.event_queue_capacity.clamp(1, 4096);
    }

    /// Vérifie les combinaisons que le clamp ne peut pas réparer.
    ///
    /// # Errors
    /// Returns `CoreError` if a field is non-finite or the tempo range is unusable.
    pub fn validate(&self) -> Result<(), CoreError> {
        let floats = [
            ("min_bpm", self.min_bpm),
            ("max_bpm", self.max_bpm),
            ("hop_rate_hz", self.hop_rate_hz),
            ("resonator_rate_hz", self.resonator_rate_hz),
            ("history_secs", self.history_secs),
            ("min_history_secs", self.min_history_secs),
            ("magnitude_smoothing", self.magnitude_smoothing),
            ("hysteresis_margin", self.hysteresis_margin),
            ("verify_secs", self.verify_secs),
            ("silence_floor", self.silence_floor),
            ("lock_min_confidence", self.lock_min_confidence),
            ("min_prominence", self.min_prominence),
            ("silence_window_secs", self.silence_window_secs),
            ("silence_threshold", self.silence_threshold),
            ("silence_level_floor", self.silence_level_floor),
            ("pll_phase_gain", self.pll_phase_gain),
            ("pll_freq_gain", self.pll_freq_gain),
            ("max_phase_step", self.max_phase_step),
            ("max_freq_correction_bpm", self.max_freq_correction_bpm),
            ("snap_threshold_bpm", self.snap_threshold_bpm),
            ("debounce_ratio", self.debounce_ratio),
            ("max_dt_secs", self.max_dt_secs),
            ("mean_tau_secs", self.mean_tau_secs),
            ("variance_tau_secs", self.variance_tau_secs),
            ("z_clip", self.z_clip),
        ];
        for (name, v) in floats {
            if !v.is_finite() {
                return Err(CoreError::Config(format!("{name} n'est pas fini")));
            }
        }
        if self.max_bpm <= self.min_bpm || self.bin_count < 2 || self.bin_count > MAX_BINS {
            return Err(CoreError::InvalidTempoRange {
                min_bpm: self.min_bpm,
                max_bpm: self.max_bpm,
                bins: self.bin_count,
            });
        }
        Ok(())
    }
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize, Default)]
struct ConfigFile {
    tempo: Option<TempoSection>,
    resonator: Option<ResonatorSection>,
    resolver: Option<ResolverSection>,
    clock: Option<ClockSection>,
    silence: Option<SilenceSection>,
    novelty: Option<NoveltySection>,
    channel: Option<ChannelSection>,
}

#[derive(Deserialize)]
struct TempoSection {
    min_bpm: Option<f32>,
    max_bpm: Option<f32>,
    bin_count: Option<usize>,
}

#[derive(Deserialize)]
struct ResonatorSection {
    hop_rate_hz: Option<f32>,
    update_rate_hz: Option<f32>,
    history_secs: Option<f32>,
    min_history_secs: Option<f32>,
    magnitude_smoothing: Option<f32>,
    top_k: Option<usize>,
}

#[derive(Deserialize)]
struct ResolverSection {
    hysteresis_margin: Option<f32>,
    hysteresis_frames: Option<u32>,
    verify_secs: Option<f32>,
    silence_floor: Option<f32>,
    silence_release_cycles: Option<u32>,
    lock_min_confidence: Option<f32>,
    min_prominence: Option<f32>,
}

#[derive(Deserialize)]
struct ClockSection {
    phase_gain: Option<f32>,
    freq_gain: Option<f32>,
    max_phase_step: Option<f32>,
    max_freq_correction_bpm: Option<f32>,
    snap_threshold_bpm: Option<f32>,
    debounce_ratio: Option<f32>,
    max_dt_secs: Option<f32>,
}

#[derive(Deserialize)]
struct SilenceSection {
    window_secs: Option<f32>,
    threshold: Option<f32>,
    level_floor: Option<f32>,
}

#[derive(Deserialize)]
struct NoveltySection {
    mean_tau_secs: Option<f32>,
    variance_tau_secs: Option<f32>,
    z_clip: Option<f32>,
}

#[derive(Deserialize)]
struct ChannelSection {
    event_queue_capacity: Option<usize>,
}

/// Copie chaque champ `Some` d'une section dans la config.
macro_rules! merge {
    ($section:expr, $config:expr, { $($src:ident => $dst:ident),+ $(,)? }) => {
        $(
            if let Some(v) = $section.$src {
                $config.$dst = v;
            }
        )+
    };
}

/// Parse une chaîne TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the TOML is malformed or the merged config is invalid.
///
/// # Example
/// ```
/// use pc_core::config::parse_config;
/// let config = parse_config("[tempo]\nmin_bpm = 80.0\n").unwrap();
/// assert_eq!(config.min_bpm, 80.0);
/// assert_eq!(config.max_bpm, 180.0);
/// ```
pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;
    let mut config = PipelineConfig::default();

    if let Some(s) = file.tempo {
        merge!(s, config, { min_bpm => min_bpm, max_bpm => max_bpm, bin_count => bin_count });
    }
    if let Some(s) = file.resonator {
        merge!(s, config, {
            hop_rate_hz => hop_rate_hz,
            update_rate_hz => resonator_rate_hz,
            history_secs => history_secs,
            min_history_secs => min_history_secs,
            magnitude_smoothing => magnitude_smoothing,
            top_k => top_k,
        });
    }
    if let Some(s) = file.resolver {
        merge!(s, config, {
            hysteresis_margin => hysteresis_margin,
            hysteresis_frames => hysteresis_frames,
            verify_secs => verify_secs,
            silence_floor => silence_floor,
            silence_release_cycles => silence_release_cycles,
            lock_min_confidence => lock_min_confidence,
            min_prominence => min_prominence,
        });
    }
    if let Some(s) = file.clock {
        merge!(s, config, {
            phase_gain => pll_phase_gain,
            freq_gain => pll_freq_gain,
            max_phase_step => max_phase_step,
            max_freq_correction_bpm => max_freq_correction_bpm,
            snap_threshold_bpm => snap_threshold_bpm,
            debounce_ratio => debounce_ratio,
            max_dt_secs => max_dt_secs,
        });
    }
    if let Some(s) = file.silence {
        merge!(s, config, {
            window_secs => silence_window_secs,
            threshold => silence_threshold,
            level_floor => silence_level_floor,
        });
    }
    if let Some(s) = file.novelty {
        merge!(s, config, {
            mean_tau_secs => mean_tau_secs,
            variance_tau_secs => variance_tau_secs,
            z_clip => z_clip,
        });
    }
    if let Some(s) = file.channel {
        merge!(s, config, { event_queue_capacity => event_queue_capacity });
    }

    config.validate()?;
    config.clamp_all();
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use pc_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        return Err(CoreError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    let config =
        parse_config(&content).with_context(|| format!("Config invalide dans {}", path.display()))?;
    log::debug!("Config chargée depuis {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_bins_are_evenly_spaced() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hops_per_update(), 6);
        assert_eq!(config.history_len(), 500);
        assert_eq!(config.min_history_len(), 188);
    }

    #[test]
    fn clamp_repairs_out_of_range_values() {
        let mut config = PipelineConfig {
            bin_count: 10_000,
            debounce_ratio: 3.0,
            top_k: 0,
            ..PipelineConfig::default()
        };
        config.clamp_all();
        assert_eq!(config.bin_count, MAX_BINS);
        assert!(config.debounce_ratio < 1.0);
        assert_eq!(config.top_k, 1);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let result = parse_config("[tempo]\nmin_bpm = 150.0\nmax_bpm = 90.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        for toml in [
            "[resolver]\nverify_secs = nan\n",
            "[clock]\ndebounce_ratio = nan\n",
            "[silence]\nthreshold = inf\n",
            "[novelty]\nz_clip = -inf\n",
        ] {
            assert!(parse_config(toml).is_err(), "accepted: {toml:?}");
        }
    }

    #[test]
    fn every_float_field_is_checked() {
        let config = PipelineConfig {
            max_phase_step: f32::NAN,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn silence_section_is_merged() {
        let config = parse_config("[silence]\nwindow_secs = 2.0\nlevel_floor = 0.5\n")
            .unwrap_or_default();
        assert!((config.silence_window_secs - 2.0).abs() < 1e-6);
        assert!((config.silence_level_floor - 0.5).abs() < 1e-6);
        assert_eq!(config.silence_window_len(), 125);
    }

    #[test]
    fn partial_sections_override_defaults() {
        let toml = "[resolver]\nhysteresis_frames = 6\n\n[clock]\nphase_gain = 0.2\n";
        let config = parse_config(toml).unwrap_or_default();
        assert_eq!(config.hysteresis_frames, 6);
        assert!((config.pll_phase_gain - 0.2).abs() < 1e-6);
        assert!((config.verify_secs - 2.5).abs() < 1e-6);
    }

    #[test]
    fn load_from_file() {
        let mut file = match tempfile::NamedTempFile::new() {
            Ok(f) => f,
            Err(e) => panic!("tempfile: {e}"),
        };
        let _ = writeln!(file, "[novelty]\nz_clip = 4.0\n[channel]\nevent_queue_capacity = 16");
        let config = load_config(file.path()).unwrap_or_default();
        assert!((config.z_clip - 4.0).abs() < 1e-6);
        assert_eq!(config.event_queue_capacity, 16);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/pulsecore.toml"));
        assert!(err.is_err());
    }
}
