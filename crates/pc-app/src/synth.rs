use pc_core::traits::NoveltySource;

/// Niveau de nouveauté hors impulsion.
const FLOOR: f32 = 0.05;

/// Amplitude et période (s) de la dérive lente de ligne de base.
const DRIFT_AMPLITUDE: f32 = 0.03;
const DRIFT_PERIOD: f64 = 23.0;

/// Train d'impulsions synthétique, un hop à la fois.
///
/// L'accumulateur de battements est continu : un changement de tempo garde la
/// position dans le battement courant. Après `silence_after`, la source ne
/// livre plus que des zéros.
#[derive(Debug, Clone)]
pub struct ImpulseTrain {
    bpm: f32,
    hop_rate: f32,
    duration: f64,
    switch: Option<(f64, f32)>,
    silence_after: Option<f64>,
    index: u64,
    beats: f64,
}

impl ImpulseTrain {
    /// Train à `bpm` échantillonné à `hop_rate` Hz pendant `duration` secondes.
    #[must_use]
    pub fn new(bpm: f32, hop_rate: f32, duration: f64) -> Self {
        Self {
            bpm,
            hop_rate: hop_rate.max(1.0),
            duration,
            switch: None,
            silence_after: None,
            index: 0,
            // Départ à mi-battement
            beats: 0.5,
        }
    }

    /// Passe à `bpm` à partir de l'instant `at`.
    #[must_use]
    pub fn with_switch(mut self, at: f64, bpm: f32) -> Self {
        self.switch = Some((at, bpm));
        self
    }

    /// Silence total à partir de l'instant `at`.
    #[must_use]
    pub fn with_silence_after(mut self, at: f64) -> Self {
        self.silence_after = Some(at);
        self
    }

    /// Tempo en vigueur à l'instant `t`.
    #[must_use]
    pub fn bpm_at(&self, t: f64) -> f32 {
        match self.switch {
            Some((at, bpm)) if t >= at => bpm,
            _ => self.bpm,
        }
    }

    /// Timestamp du prochain hop.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.index as f64 / f64::from(self.hop_rate)
    }
}

impl NoveltySource for ImpulseTrain {
    fn next_hop(&mut self) -> Option<(f32, f64)> {
        let t = self.now();
        if t >= self.duration {
            return None;
        }
        self.index += 1;

        let before = self.beats;
        self.beats += f64::from(self.bpm_at(t)) / 60.0 / f64::from(self.hop_rate);

        if self.silence_after.is_some_and(|at| t >= at) {
            return Some((0.0, t));
        }
        if self.beats.floor() > before.floor() {
            return Some((1.0, t));
        }
        let drift = DRIFT_AMPLITUDE * (std::f64::consts::TAU * t / DRIFT_PERIOD).sin() as f32;
        Some((FLOOR + drift, t))
    }

    fn hop_rate_hz(&self) -> f32 {
        self.hop_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_times(src: &mut ImpulseTrain) -> Vec<f64> {
        std::iter::from_fn(|| src.next_hop())
            .filter(|&(v, _)| v > 0.5)
            .map(|(_, t)| t)
            .collect()
    }

    #[test]
    fn pulse_count_matches_tempo() {
        let mut src = ImpulseTrain::new(120.0, 62.5, 10.0);
        assert_eq!(pulse_times(&mut src).len(), 20);
        assert!(src.next_hop().is_none());
    }

    #[test]
    fn switch_changes_spacing() {
        let mut src = ImpulseTrain::new(120.0, 100.0, 20.0).with_switch(10.0, 150.0);
        let times = pulse_times(&mut src);
        let early = times.iter().filter(|&&t| t < 10.0).count();
        let late = times.iter().filter(|&&t| t >= 10.0).count();
        assert_eq!(early, 20);
        assert!((24..=26).contains(&late), "late = {late}");
    }

    #[test]
    fn silence_after_yields_zeros() {
        let mut src = ImpulseTrain::new(120.0, 50.0, 4.0).with_silence_after(2.0);
        let tail: Vec<f32> = std::iter::from_fn(|| src.next_hop())
            .filter(|&(_, t)| t >= 2.0)
            .map(|(v, _)| v)
            .collect();
        assert_eq!(tail.len(), 100);
        assert!(tail.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn timestamps_follow_hop_rate() {
        let mut src = ImpulseTrain::new(90.0, 50.0, 1.0);
        let ts: Vec<f64> = std::iter::from_fn(|| src.next_hop()).map(|(_, t)| t).collect();
        assert_eq!(ts.len(), 50);
        assert!(ts.windows(2).all(|w| (w[1] - w[0] - 0.02).abs() < 1e-9));
    }
}
