use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use regex::Regex;

lazy_static! {
    /// Matches anything that looks like an HTML tag. This is naive pattern
    /// removal, not a sanitizer, and can be bypassed.
    static ref HTML_TAG_REGEX: Regex = Regex::new(r"<[^>]*>").expect("pattern is valid");
}

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Strips HTML tags from user-submitted text
pub fn strip_html(text: &str) -> String {
    HTML_TAG_REGEX.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod test {
    use super::{random_string, strip_html};

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<b>better</b>"), "better");
        assert_eq!(strip_html("no tags here"), "no tags here");
        assert_eq!(strip_html("a <a href=\"x\">link</a>!"), "a link!");
    }

    #[test]
    fn test_random_string_length() {
        assert_eq!(random_string(20).len(), 20);
    }
}
