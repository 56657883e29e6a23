//! Step handlers: generate purified shell for each provisioning step.
//!
//! Every interpolated value goes through [`quote`] or [`quote_path`];
//! handlers never splice raw descriptor text into a script.

pub mod conda;
pub mod installer;

use std::path::Path;

/// Single-quote a word for bash, escaping embedded single quotes.
pub fn quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quote a path. A leading `~/` is kept expandable as `"$HOME"/...`.
pub fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    match text.strip_prefix("~/") {
        Some(rest) => format!("\"$HOME\"/{}", quote(rest)),
        None => quote(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote("psi4"), "'psi4'");
    }

    #[test]
    fn test_quote_embedded_single_quote() {
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_quote_neutralizes_metacharacters() {
        assert_eq!(quote("x; rm -rf /"), "'x; rm -rf /'");
    }

    #[test]
    fn test_quote_path_home_relative() {
        assert_eq!(quote_path(Path::new("~/miniconda")), "\"$HOME\"/'miniconda'");
        assert_eq!(quote_path(Path::new("/opt/conda")), "'/opt/conda'");
    }
}
