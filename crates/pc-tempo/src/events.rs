use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pc_core::frame::BeatEvent;
use rtrb::{PushError, RingBuffer};

/// Extrémité producteur de la file de battements.
///
/// Ne bloque jamais : un push sur file pleine est abandonné et compté.
pub struct BeatEventSender {
    producer: rtrb::Producer<BeatEvent>,
    dropped: Arc<AtomicU64>,
}

/// Extrémité consommateur de la file de battements.
pub struct BeatEventReceiver {
    consumer: rtrb::Consumer<BeatEvent>,
    dropped: Arc<AtomicU64>,
}

/// Crée une file SPSC bornée pour les événements de battement.
///
/// # Example
/// ```
/// use pc_core::frame::BeatEvent;
/// use pc_tempo::events::beat_event_queue;
/// let (mut tx, mut rx) = beat_event_queue(1);
/// assert!(tx.push(BeatEvent::default()));
/// assert!(!tx.push(BeatEvent::default()));
/// assert_eq!(rx.drain().count(), 1);
/// assert_eq!(rx.dropped(), 1);
/// ```
#[must_use]
pub fn beat_event_queue(capacity: usize) -> (BeatEventSender, BeatEventReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        BeatEventSender {
            producer,
            dropped: Arc::clone(&dropped),
        },
        BeatEventReceiver { consumer, dropped },
    )
}

impl BeatEventSender {
    /// Pousse un événement. Retourne `false` si la file était pleine.
    #[inline]
    pub fn push(&mut self, event: BeatEvent) -> bool {
        match self.producer.push(event) {
            Ok(()) => true,
            Err(PushError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Nombre d'événements abandonnés depuis la création.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl BeatEventReceiver {
    /// Retire l'événement le plus ancien, s'il existe.
    #[inline]
    pub fn pop(&mut self) -> Option<BeatEvent> {
        self.consumer.pop().ok()
    }

    /// Vide la file de façon opportuniste, du plus ancien au plus récent.
    pub fn drain(&mut self) -> impl Iterator<Item = BeatEvent> + '_ {
        std::iter::from_fn(move || self.consumer.pop().ok())
    }

    /// Nombre d'événements en attente.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    /// `true` si aucun événement n'attend.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Nombre d'événements abandonnés par le producteur.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(t: f64) -> BeatEvent {
        BeatEvent {
            timestamp: t,
            phase_at_event: 0.0,
            strength: 0.5,
        }
    }

    #[test]
    fn events_come_out_in_order() {
        let (mut tx, mut rx) = beat_event_queue(8);
        for i in 0..5u32 {
            assert!(tx.push(beat(f64::from(i))));
        }
        assert_eq!(rx.len(), 5);
        let ts: Vec<f64> = rx.drain().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert!(rx.is_empty());
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let (mut tx, mut rx) = beat_event_queue(2);
        assert!(tx.push(beat(0.0)));
        assert!(tx.push(beat(1.0)));
        assert!(!tx.push(beat(2.0)));
        assert!(!tx.push(beat(3.0)));
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.pop().map(|e| e.timestamp), Some(0.0));
        assert!(tx.push(beat(4.0)));
        let ts: Vec<f64> = rx.drain().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![1.0, 4.0]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (mut tx, mut rx) = beat_event_queue(0);
        assert!(tx.push(beat(0.0)));
        assert!(rx.pop().is_some());
    }
}
