#[macro_export]
macro_rules! choose {
    ($cond: expr => $true_val: expr, $false_val: expr) => {{
        if $cond {
            $true_val
        } else {
            $false_val
        }
    }};
}

/// Masks all but the trailing `visible` characters of the supplied text. Used to keep account names
/// out of the logs.
#[inline]
pub fn protect(text: &str, visible: usize) -> String {
    let count = text.chars().count();

    text.chars()
        .enumerate()
        .map(|(idx, chr)| choose!(idx + visible < count => '*', chr))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect() {
        assert_eq!(protect("someuser", 3), "*****ser");
        assert_eq!(protect("ab", 3), "ab");
        assert_eq!(protect("", 3), "");
    }
}
