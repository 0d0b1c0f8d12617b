// Integer generators.
// Bounded draws are uniform over their range and shrink towards zero, or
// towards the bound nearest to zero when zero is out of range.

use crate::generator::{frequency, Generator};

/// Magnitude of the "small" half of `any_integer` and `naturals`.
const SMALL_BOUND: i32 = 1000;

/// Uniform integers in `min..=max`.
pub fn integers(min: i32, max: i32) -> Generator<i32> {
    Generator::from(move |data| Ok(data.draw_int(i64::from(min), i64::from(max))? as i32))
}

/// Uniform `i64`s in `min..=max`.
pub fn longs(min: i64, max: i64) -> Generator<i64> {
    Generator::from(move |data| data.draw_int(min, max))
}

/// Any `i32`; half of the draws come from a small range around zero so that
/// small values and their neighbours turn up often.
pub fn any_integer() -> Generator<i32> {
    frequency(vec![
        (1, integers(-SMALL_BOUND, SMALL_BOUND)),
        (1, integers(i32::MIN, i32::MAX)),
    ])
    .to_generator()
}

/// Non-negative `i32`s, biased towards small values like [`any_integer`].
pub fn naturals() -> Generator<i32> {
    frequency(vec![(1, integers(0, SMALL_BOUND)), (1, integers(0, i32::MAX))]).to_generator()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Session;

    #[test]
    fn test_integers_stay_in_bounds() {
        let generator = integers(-5, 5);
        for seed in 0..200 {
            let value = Session::random(seed, 10).generate(&generator).0.unwrap();
            assert!((-5..=5).contains(&value));
        }
    }

    #[test]
    fn test_single_value_range_makes_no_random_decision() {
        let (value, trace) = Session::random(3, 10).generate(&integers(7, 7));
        assert_eq!(value.unwrap(), 7);
        assert_eq!(trace.choice_count(), 1);
    }

    #[test]
    fn test_naturals_are_non_negative() {
        let generator = naturals();
        for seed in 0..200 {
            assert!(Session::random(seed, 10).generate(&generator).0.unwrap() >= 0);
        }
    }

    #[test]
    fn test_any_integer_reaches_both_signs() {
        let generator = any_integer();
        let values: Vec<i32> = (0..200)
            .map(|seed| Session::random(seed, 10).generate(&generator).0.unwrap())
            .collect();
        assert!(values.iter().any(|v| *v < 0));
        assert!(values.iter().any(|v| *v > 0));
        assert!(values.iter().any(|v| v.abs() > SMALL_BOUND));
    }

    #[test]
    fn test_longs_cover_extremes_of_range() {
        let generator = longs(i64::MIN, i64::MAX);
        let (value, trace) = Session::random(1, 10).generate(&generator);
        assert_eq!(trace.choices()[0].value, value.unwrap());
    }
}
