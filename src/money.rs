pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Currency amount in dollars to integer cents for the payment provider.
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn from_cents(cents: i64) -> f64 {
    round_two(cents as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_two_halves_up() {
        assert_eq!(round_two(12.955), 12.96);
        assert_eq!(round_two(4.004), 4.0);
    }

    #[test]
    fn cents_round_trip() {
        assert_eq!(to_cents(12.95), 1295);
        assert_eq!(to_cents(5.0), 500);
        assert_eq!(from_cents(1295), 12.95);
    }
}
