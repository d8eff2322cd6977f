//! Canal "dernière valeur" sans verrou entre producteur et consommateur.
//!
//! Un petit tableau fixe de slots, chacun protégé par un tampon de séquence
//! (seqlock). L'écrivain remplit le slot suivant puis publie atomiquement la
//! paire {séquence, index}. Le lecteur copie le slot référencé et vérifie le
//! tampon après coup : une lecture déchirée est détectée et recommencée.
//!
//! Aucune des deux extrémités ne bloque. Les valeurs transitent sous forme de
//! mots `u64` atomiques, ce qui évite tout code `unsafe`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use pc_core::frame::PipelineOutput;

/// Nombre de slots tournants.
const SLOTS: usize = 3;

/// Capacité d'un slot, en mots de 64 bits.
pub const SLOT_WORDS: usize = 4;

/// Bits réservés à l'index de slot dans le mot publié.
const IDX_BITS: u32 = 2;
const IDX_MASK: u64 = (1 << IDX_BITS) - 1;

/// Tentatives de lecture avant repli sur la dernière valeur cohérente.
const MAX_READ_RETRIES: usize = 16;

/// Valeur transportable par le canal : encodée sur `SLOT_WORDS` mots.
pub trait WordPacked: Copy + Default {
    /// Encode la valeur.
    fn pack(&self) -> [u64; SLOT_WORDS];
    /// Décode une valeur encodée par `pack`.
    fn unpack(words: &[u64; SLOT_WORDS]) -> Self;
}

#[inline(always)]
fn pack_pair(hi: u32, lo: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}

#[inline(always)]
fn unpack_pair(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

impl WordPacked for PipelineOutput {
    fn pack(&self) -> [u64; SLOT_WORDS] {
        let flags = u64::from(self.beat_tick) | (u64::from(self.locked) << 1);
        [
            self.timestamp.to_bits(),
            pack_pair(self.phase01.to_bits(), self.bpm.to_bits()),
            pack_pair(self.confidence.to_bits(), self.epoch),
            flags,
        ]
    }

    fn unpack(words: &[u64; SLOT_WORDS]) -> Self {
        let (phase, bpm) = unpack_pair(words[1]);
        let (confidence, epoch) = unpack_pair(words[2]);
        Self {
            timestamp: f64::from_bits(words[0]),
            phase01: f32::from_bits(phase),
            beat_tick: words[3] & 1 != 0,
            bpm: f32::from_bits(bpm),
            confidence: f32::from_bits(confidence),
            locked: words[3] & 2 != 0,
            epoch,
        }
    }
}

/// Valeur lue accompagnée de sa séquence de publication.
///
/// La séquence 0 signifie "rien publié encore" ; elle croît strictement à
/// chaque publication.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Snapshot<T> {
    /// Valeur publiée.
    pub value: T,
    /// Séquence de publication.
    pub sequence: u64,
}

struct Slot {
    /// Pair = stable (2·seq), impair = écriture en cours.
    stamp: AtomicU64,
    words: [AtomicU64; SLOT_WORDS],
}

impl Slot {
    fn new() -> Self {
        Self {
            stamp: AtomicU64::new(0),
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

struct Shared {
    slots: [Slot; SLOTS],
    /// `seq << IDX_BITS | idx` ; 0 tant que rien n'est publié.
    published: AtomicU64,
}

/// Extrémité écrivain. Unique : non clonable.
pub struct Publisher<T> {
    shared: Arc<Shared>,
    sequence: u64,
    _marker: PhantomData<fn(T)>,
}

/// Extrémité lecteur. Clonable ; chaque clone garde son propre cache.
pub struct Subscriber<T> {
    shared: Arc<Shared>,
    cached: Snapshot<T>,
}

impl<T: Copy> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            cached: self.cached,
        }
    }
}

/// Crée un canal dernière-valeur.
///
/// # Example
/// ```
/// use pc_core::frame::PipelineOutput;
/// use pc_tempo::channel::latest_channel;
/// let (mut tx, mut rx) = latest_channel::<PipelineOutput>();
/// assert_eq!(rx.latest().sequence, 0);
/// tx.publish(&PipelineOutput { bpm: 120.0, ..Default::default() });
/// let snap = rx.latest();
/// assert_eq!(snap.sequence, 1);
/// assert_eq!(snap.value.bpm, 120.0);
/// ```
#[must_use]
pub fn latest_channel<T: WordPacked>() -> (Publisher<T>, Subscriber<T>) {
    let shared = Arc::new(Shared {
        slots: std::array::from_fn(|_| Slot::new()),
        published: AtomicU64::new(0),
    });
    (
        Publisher {
            shared: Arc::clone(&shared),
            sequence: 0,
            _marker: PhantomData,
        },
        Subscriber {
            shared,
            cached: Snapshot::default(),
        },
    )
}

impl<T: WordPacked> Publisher<T> {
    /// Écrit `value` dans le slot suivant puis la publie. Retourne la séquence.
    pub fn publish(&mut self, value: &T) -> u64 {
        self.sequence += 1;
        let seq = self.sequence;
        let idx = (seq % SLOTS as u64) as usize;
        let slot = &self.shared.slots[idx];

        slot.stamp.store(seq.wrapping_mul(2).wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (word, bits) in slot.words.iter().zip(value.pack()) {
            word.store(bits, Ordering::Relaxed);
        }
        slot.stamp.store(seq.wrapping_mul(2), Ordering::Release);

        self.shared
            .published
            .store((seq << IDX_BITS) | idx as u64, Ordering::Release);
        seq
    }

    /// Dernière séquence publiée.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl<T: WordPacked> Subscriber<T> {
    /// Retourne la valeur complète la plus récente.
    ///
    /// Si l'écrivain réécrit le slot pendant toute la fenêtre de tentatives,
    /// la dernière valeur cohérente déjà lue est retournée.
    pub fn latest(&mut self) -> Snapshot<T> {
        for _ in 0..MAX_READ_RETRIES {
            let published = self.shared.published.load(Ordering::Acquire);
            if published == 0 {
                return self.cached;
            }
            let seq = published >> IDX_BITS;
            if seq <= self.cached.sequence {
                return self.cached;
            }
            let slot = &self.shared.slots[(published & IDX_MASK) as usize];

            let before = slot.stamp.load(Ordering::Acquire);
            if before != seq.wrapping_mul(2) {
                continue;
            }
            let mut words = [0u64; SLOT_WORDS];
            for (dst, src) in words.iter_mut().zip(&slot.words) {
                *dst = src.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if slot.stamp.load(Ordering::Relaxed) != before {
                continue;
            }

            self.cached = Snapshot {
                value: T::unpack(&words),
                sequence: seq,
            };
            return self.cached;
        }
        self.cached
    }

    /// `true` si une séquence plus récente que la dernière lue est publiée.
    #[must_use]
    pub fn has_update(&self) -> bool {
        (self.shared.published.load(Ordering::Acquire) >> IDX_BITS) > self.cached.sequence
    }

    /// Séquence de la dernière valeur lue.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.cached.sequence
    }
}
