use rand::Rng;

const ONSETS: &[&str] = &[
    "b", "d", "f", "g", "k", "l", "m", "n", "p", "r", "s", "t", "v", "z",
];
const VOWELS: &[&str] = &["a", "e", "i", "o", "u"];

/// Random pronounceable display name for sessions that carry no identity
/// at all, e.g. "rokela".
#[must_use]
pub fn pronounceable() -> String {
    let mut rng = rand::rng();
    let syllables = rng.random_range(3..=4);
    let mut name = String::with_capacity(syllables * 2);
    for _ in 0..syllables {
        name.push_str(ONSETS[rng.random_range(0..ONSETS.len())]);
        name.push_str(VOWELS[rng.random_range(0..VOWELS.len())]);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_pronounceable_length() {
        for _ in 0..50 {
            let name = pronounceable();
            assert!(name.len() >= 6 && name.len() <= 8, "{name}");
            assert!(name.chars().all(|c| c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_names_vary() {
        let a = pronounceable();
        let b = pronounceable();
        let c = pronounceable();
        assert!(a != b || b != c);
    }
}
