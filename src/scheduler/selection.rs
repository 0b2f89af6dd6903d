use rand::seq::SliceRandom;
use rand::Rng;

use crate::state::data::ImageRecord;

/// Pick the next slideshow image.
///
/// Uniform over the candidates, leaving out the image on screen so the
/// same picture never shows twice in a row. A single candidate is picked
/// even if it is the current one.
pub fn pick<'a, R>(candidates: &'a [ImageRecord], current: Option<i64>, rng: &mut R) -> Option<&'a ImageRecord>
where
    R: Rng + ?Sized,
{
    match candidates {
        [] => None,
        [only] => Some(only),
        _ => {
            // ids are unique, so at least one candidate remains
            let others: Vec<&ImageRecord> = candidates.iter().filter(|r| Some(r.id) != current).collect();
            others.choose(rng).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn records(ids: &[i64]) -> Vec<ImageRecord> {
        ids.iter()
            .map(|&id| ImageRecord {
                id,
                filename: format!("epd_{id}.png"),
                url: String::new(),
                created_at: Utc::now(),
                active: true,
            })
            .collect()
    }

    #[test]
    fn test_empty_set() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pick(&[], None, &mut rng).is_none());
        assert!(pick(&[], Some(4), &mut rng).is_none());
    }

    #[test]
    fn test_single_image_is_reselected() {
        let mut rng = StdRng::seed_from_u64(1);
        let set = records(&[7]);
        for _ in 0..10 {
            assert_eq!(pick(&set, Some(7), &mut rng).map(|r| r.id), Some(7));
        }
    }

    #[test]
    fn test_never_repeats_current() {
        let mut rng = StdRng::seed_from_u64(42);
        let set = records(&[1, 2, 3]);
        let mut current = None;
        let mut seen = HashSet::new();

        for _ in 0..200 {
            let next = pick(&set, current, &mut rng).unwrap().id;
            assert_ne!(Some(next), current);
            seen.insert(next);
            current = Some(next);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_current_not_in_set() {
        let mut rng = StdRng::seed_from_u64(3);
        let set = records(&[1, 2]);
        let picked = pick(&set, Some(99), &mut rng).unwrap().id;
        assert!(picked == 1 || picked == 2);
    }
}
