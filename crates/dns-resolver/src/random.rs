use rand::Rng;

/// A source of uniform random choices, used to break ties between
/// equally good nameservers and addresses.
///
/// Every `rand::Rng` is one of these, so callers can pass `StdRng`,
/// `ThreadRng`, or anything else.  Tests use a fixed source.
pub trait RandomSource {
    /// An index in `0..n`.  `n` is never zero.
    fn uniform_choice(&mut self, n: usize) -> usize;
}

impl<R: Rng> RandomSource for R {
    fn uniform_choice(&mut self, n: usize) -> usize {
        self.gen_range(0..n)
    }
}

/// Pick one of the candidates, or `None` if there are none.
///
/// The index from the source is wrapped into range, so a misbehaving
/// source can never pick something which isn't a candidate.
pub fn choose<'a, T, R: RandomSource + ?Sized>(rng: &mut R, candidates: &'a [T]) -> Option<&'a T> {
    if candidates.is_empty() {
        None
    } else {
        candidates.get(rng.uniform_choice(candidates.len()) % candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::test_util::FixedChoice;

    #[test]
    fn choose_none_from_empty() {
        let candidates: Vec<u8> = Vec::new();
        assert_eq!(None, choose(&mut FixedChoice(0), &candidates));
    }

    #[test]
    fn choose_single_candidate_is_deterministic() {
        for i in 0..10 {
            assert_eq!(Some(&"only"), choose(&mut FixedChoice(i), &["only"]));
        }
    }

    #[test]
    fn choose_wraps_out_of_range_index() {
        assert_eq!(Some(&'b'), choose(&mut FixedChoice(4), &['a', 'b', 'c']));
    }

    #[test]
    fn rng_choice_is_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in 1..50 {
            assert!(rng.uniform_choice(n) < n);
        }
    }
}
