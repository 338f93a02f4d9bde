use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unterminated quote in command: {0}")]
    UnterminatedQuote(String),
    #[error("trailing backslash in command: {0}")]
    TrailingBackslash(String),
}

/// Splits a shell-quoted command string into an argv vector, honoring single
/// quotes, double quotes, and backslash escapes. This runs once at config
/// load; execution never re-interprets the tokens.
pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandParseError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    parts.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(CommandParseError::UnterminatedQuote(line.to_string()));
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(CommandParseError::UnterminatedQuote(line.to_string()));
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(CommandParseError::UnterminatedQuote(line.to_string()));
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(CommandParseError::TrailingBackslash(line.to_string())),
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        parts.push(current);
    }

    if parts.is_empty() {
        return Err(CommandParseError::Empty);
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &str) -> Vec<String> {
        split_command_line(line).unwrap()
    }

    #[test]
    fn splits_plain_words() {
        assert_eq!(split("npm install --production"), vec![
            "npm",
            "install",
            "--production"
        ]);
    }

    #[test]
    fn honors_double_quotes() {
        assert_eq!(split(r#"git commit -m "my message""#), vec![
            "git",
            "commit",
            "-m",
            "my message"
        ]);
    }

    #[test]
    fn honors_single_quotes() {
        assert_eq!(split("echo 'a \"b\" c'"), vec!["echo", r#"a "b" c"#]);
    }

    #[test]
    fn honors_backslash_escapes() {
        assert_eq!(split(r"touch file\ name"), vec!["touch", "file name"]);
        assert_eq!(split(r#"echo "a \"quoted\" word""#), vec![
            "echo",
            r#"a "quoted" word"#
        ]);
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(split("  pm2   reload  all "), vec!["pm2", "reload", "all"]);
    }

    #[test]
    fn empty_quotes_produce_empty_argument() {
        assert_eq!(split("cmd ''"), vec!["cmd", ""]);
    }

    #[test]
    fn rejects_empty_and_unterminated_input() {
        assert_eq!(split_command_line(""), Err(CommandParseError::Empty));
        assert_eq!(split_command_line("   "), Err(CommandParseError::Empty));
        assert!(matches!(
            split_command_line("echo 'oops"),
            Err(CommandParseError::UnterminatedQuote(_))
        ));
        assert!(matches!(
            split_command_line(r"echo oops\"),
            Err(CommandParseError::TrailingBackslash(_))
        ));
    }
}
