//! Per-address rising-edge detection with re-arm.

use std::collections::BTreeMap;

/// Smallest contiguous coil range covering a set of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilSpan {
    pub start: u16,
    pub quantity: u16,
}

impl CoilSpan {
    /// Span from the lowest to the highest address, inclusive.
    ///
    /// Returns `None` for an empty set.
    pub fn covering(addresses: impl IntoIterator<Item = u16>) -> Option<Self> {
        let mut iter = addresses.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), a| (lo.min(a), hi.max(a)));

        // 0..=65535 needs 65536 coils, which does not fit; saturate.
        let quantity = u16::try_from(u32::from(max - min) + 1).unwrap_or(u16::MAX);

        Some(Self {
            start: min,
            quantity,
        })
    }

    /// Offset of `address` inside the span.
    pub fn index_of(&self, address: u16) -> Option<usize> {
        let offset = address.checked_sub(self.start)? as usize;
        (offset < self.quantity as usize).then_some(offset)
    }
}

/// Observation state of one watched coil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchedAddress {
    /// Last observed state; `None` until the first valid read.
    pub previous: Option<bool>,
    /// Armed for the next rising edge.
    pub ready: bool,
}

impl Default for WatchedAddress {
    fn default() -> Self {
        Self {
            previous: None,
            ready: true,
        }
    }
}

impl WatchedAddress {
    /// Feed one observation; returns `true` when a rising edge should fire.
    pub fn observe(&mut self, current: bool) -> bool {
        let fire = match self.previous {
            None => false,
            Some(false) if current && self.ready => {
                self.ready = false;
                true
            }
            Some(true) if !current => {
                self.ready = true;
                false
            }
            Some(_) => false,
        };
        self.previous = Some(current);
        fire
    }
}

/// State table for every address one monitor watches.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    span: CoilSpan,
    watched: BTreeMap<u16, WatchedAddress>,
}

impl EdgeDetector {
    /// Build a detector with every address unobserved and armed.
    pub fn new(addresses: impl IntoIterator<Item = u16>) -> Option<Self> {
        let watched: BTreeMap<u16, WatchedAddress> = addresses
            .into_iter()
            .map(|a| (a, WatchedAddress::default()))
            .collect();
        let span = CoilSpan::covering(watched.keys().copied())?;

        Some(Self { span, watched })
    }

    /// The range to request each cycle.
    pub fn span(&self) -> CoilSpan {
        self.span
    }

    /// Watched addresses in ascending order.
    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.watched.keys().copied()
    }

    /// Current state of one address.
    pub fn state(&self, address: u16) -> Option<WatchedAddress> {
        self.watched.get(&address).copied()
    }

    /// Apply one decoded read of the span.
    ///
    /// `bits[i]` is the state of coil `span.start + i`. Returns the addresses
    /// with a rising edge, in ascending order.
    pub fn observe(&mut self, bits: &[bool]) -> Vec<u16> {
        let span = self.span;
        self.watched
            .iter_mut()
            .filter_map(|(&address, state)| {
                let current = *bits.get(span.index_of(address)?)?;
                state.observe(current).then_some(address)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rising edges a per-address sequence should produce: every false->true
    /// transition after the first sample.
    fn expected_edges(sequence: &[bool]) -> Vec<usize> {
        sequence
            .windows(2)
            .enumerate()
            .filter(|(_, w)| !w[0] && w[1])
            .map(|(i, _)| i + 1)
            .collect()
    }

    #[test]
    fn test_span_covering() {
        assert_eq!(
            CoilSpan::covering([7, 5]),
            Some(CoilSpan {
                start: 5,
                quantity: 3
            })
        );
        assert_eq!(
            CoilSpan::covering([42]),
            Some(CoilSpan {
                start: 42,
                quantity: 1
            })
        );
        assert_eq!(CoilSpan::covering([]), None);
    }

    #[test]
    fn test_span_index_of() {
        let span = CoilSpan::covering([5, 7]).unwrap();
        assert_eq!(span.index_of(5), Some(0));
        assert_eq!(span.index_of(7), Some(2));
        assert_eq!(span.index_of(4), None);
        assert_eq!(span.index_of(8), None);
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut state = WatchedAddress::default();
        assert!(!state.observe(true));
        assert_eq!(state.previous, Some(true));
        assert!(state.ready);
    }

    #[test]
    fn test_held_on_fires_once() {
        let mut state = WatchedAddress::default();
        let fired: Vec<bool> = [false, true, true, true]
            .into_iter()
            .map(|s| state.observe(s))
            .collect();
        assert_eq!(fired, vec![false, true, false, false]);
        assert!(!state.ready);

        assert!(!state.observe(false));
        assert!(state.ready);
        assert!(state.observe(true));
    }

    #[test]
    fn test_all_sequences_match_reference() {
        for len in 1..=10 {
            for pattern in 0u32..(1 << len) {
                let sequence: Vec<bool> = (0..len).map(|i| pattern & (1 << i) != 0).collect();

                let mut state = WatchedAddress::default();
                let fired: Vec<usize> = sequence
                    .iter()
                    .enumerate()
                    .filter(|&(_, &s)| state.observe(s))
                    .map(|(i, _)| i)
                    .collect();

                assert_eq!(fired, expected_edges(&sequence), "sequence {:?}", sequence);
            }
        }
    }

    #[test]
    fn test_detector_two_addresses() {
        let mut detector = EdgeDetector::new([5, 7]).unwrap();
        assert_eq!(
            detector.span(),
            CoilSpan {
                start: 5,
                quantity: 3
            }
        );

        // [coil5, coil6, coil7]; coil 6 is unwatched noise.
        let polls = [
            [false, true, false],
            [false, false, true],
            [true, true, true],
            [true, false, false],
            [false, true, false],
        ];
        let fired: Vec<(usize, Vec<u16>)> = polls
            .iter()
            .enumerate()
            .map(|(i, bits)| (i + 1, detector.observe(bits)))
            .filter(|(_, edges)| !edges.is_empty())
            .collect();

        assert_eq!(fired, vec![(2, vec![7]), (3, vec![5])]);
    }

    #[test]
    fn test_simultaneous_edges_fire_independently() {
        let mut detector = EdgeDetector::new([9, 3]).unwrap();
        let span = detector.span();
        let mut bits = vec![false; span.quantity as usize];
        assert!(detector.observe(&bits).is_empty());

        bits[0] = true;
        bits[6] = true;
        assert_eq!(detector.observe(&bits), vec![3, 9]);
        assert_eq!(detector.addresses().collect::<Vec<_>>(), vec![3, 9]);
    }

    #[test]
    fn test_short_read_leaves_missing_addresses_untouched() {
        let mut detector = EdgeDetector::new([0, 4]).unwrap();
        assert!(detector.observe(&[false, false]).is_empty());

        assert_eq!(detector.state(0).unwrap().previous, Some(false));
        assert_eq!(detector.state(4).unwrap(), WatchedAddress::default());
        assert!(detector.state(1).is_none());
    }
}
