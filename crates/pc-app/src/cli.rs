use std::path::PathBuf;

use clap::Parser;

/// pulsecore : suivi de tempo et de phase de battement en temps réel.
///
/// Alimente le pipeline avec un train d'impulsions synthétique et affiche ce
/// que voit un consommateur qui interroge la sortie à cadence de rendu.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Tempo du train d'impulsions synthétique.
    #[arg(long, default_value_t = 120.0)]
    pub bpm: f32,

    /// Nouveau tempo après `--switch-at` secondes.
    #[arg(long)]
    pub switch_bpm: Option<f32>,

    /// Instant du changement de tempo (secondes).
    #[arg(long, default_value_t = 15.0)]
    pub switch_at: f64,

    /// Durée du flux (secondes).
    #[arg(long, default_value_t = 30.0)]
    pub duration: f64,

    /// Cadence de hop de la nouveauté (Hz). Remplace la valeur de la config.
    #[arg(long)]
    pub hop_rate: Option<f32>,

    /// Cadence d'interrogation du consommateur (Hz).
    #[arg(long, default_value_t = 30)]
    pub render_fps: u32,

    /// Silence total après N secondes.
    #[arg(long)]
    pub silence_after: Option<f64>,

    /// Cadencer le flux en temps réel au lieu de le rejouer au plus vite.
    #[arg(long, default_value_t = false)]
    pub realtime: bool,

    /// Une ligne JSON par frame consommateur ayant vu une nouvelle séquence.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    /// Vérifie les combinaisons d'arguments.
    ///
    /// # Errors
    /// Returns an error if a tempo, duration or rate is not strictly positive.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            anyhow::bail!("--bpm doit être strictement positif (reçu {}).", self.bpm);
        }
        if let Some(bpm) = self.switch_bpm
            && !(bpm.is_finite() && bpm > 0.0)
        {
            anyhow::bail!("--switch-bpm doit être strictement positif (reçu {bpm}).");
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            anyhow::bail!("--duration doit être strictement positive.");
        }
        if self.render_fps == 0 {
            anyhow::bail!("--render-fps doit être au moins 1.");
        }
        if let Some(rate) = self.hop_rate
            && !(rate.is_finite() && rate > 0.0)
        {
            anyhow::bail!("--hop-rate doit être strictement positif.");
        }
        if self.switch_bpm.is_some() && self.switch_at >= self.duration {
            log::warn!(
                "--switch-at ({:.1} s) dépasse la durée ({:.1} s) : pas de changement de tempo.",
                self.switch_at,
                self.duration
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(std::iter::once("pulsecore").chain(args.iter().copied())) {
            Ok(cli) => cli,
            Err(e) => panic!("parse: {e}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let cli = parse(&[]);
        assert!(cli.validate().is_ok());
        assert_eq!(cli.render_fps, 30);
        assert!(!cli.realtime);
    }

    #[test]
    fn flags_are_parsed() {
        let cli = parse(&[
            "--bpm",
            "128",
            "--switch-bpm",
            "140",
            "--switch-at",
            "12",
            "--hop-rate",
            "100",
            "--json",
        ]);
        assert_eq!(cli.bpm, 128.0);
        assert_eq!(cli.switch_bpm, Some(140.0));
        assert_eq!(cli.hop_rate, Some(100.0));
        assert!(cli.json);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse(&["--bpm", "0"]).validate().is_err());
        assert!(parse(&["--duration=-1"]).validate().is_err());
        assert!(parse(&["--render-fps", "0"]).validate().is_err());
        assert!(parse(&["--switch-bpm=-3"]).validate().is_err());
    }
}
