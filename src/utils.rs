pub const ASCII_CHARS: [char; 26] = ascii_chars();
pub const ASCII_PAIRS: [[char; 2]; 676] = ascii_pairs();

const fn ascii_chars() -> [char; 26] {
    let mut chars = ['\0'; 26];
    let mut c: u8 = b'a';
    while c <= b'z' {
        chars[(c - b'a') as usize] = c as char;
        c += 1;
    }
    chars
}

const fn ascii_pairs() -> [[char; 2]; 676] {
    let mut result = [['a', 'a']; 676];
    let mut idx = 0;

    let mut c1: u8 = b'a';
    while c1 <= b'z' {
        let mut c2: u8 = b'a';
        while c2 <= b'z' {
            result[idx] = [c1 as char, c2 as char];
            idx += 1;
            c2 += 1;
        }
        c1 += 1;
    }
    result
}

/// A short lowercase name for the `index`-th item of a list.
///
/// The first 26 names are single letters, the next 676 are letter pairs, and beyond that
/// names fall back to `p` followed by the index.
///
/// # Examples
/// ```
/// # use lazytensor::utils::ascii_name;
/// assert_eq!(ascii_name(0), "a");
/// assert_eq!(ascii_name(25), "z");
/// assert_eq!(ascii_name(26), "aa");
/// assert_eq!(ascii_name(27), "ab");
/// ```
pub fn ascii_name(index: usize) -> String {
    if let Some(c) = ASCII_CHARS.get(index) {
        c.to_string()
    } else if let Some(pair) = ASCII_PAIRS.get(index - ASCII_CHARS.len()) {
        String::from_iter(pair)
    } else {
        format!("p{index}")
    }
}

pub fn join_into_string(c: impl IntoIterator<Item = impl ToString>, separator: &str) -> String {
    c.into_iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ascii_name_boundaries() {
        assert_eq!(ascii_name(26 + 675), "zz");
        assert_eq!(ascii_name(26 + 676), "p702");
    }

    #[test]
    fn test_ascii_names_are_distinct() {
        let names = (0..1000).map(ascii_name).collect::<HashSet<_>>();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_join_into_string() {
        assert_eq!(join_into_string([4u64, 3], ","), "4,3");
        assert_eq!(join_into_string(Vec::<u64>::new(), ","), "");
    }
}
