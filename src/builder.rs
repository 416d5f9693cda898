use crate::error::TemplateError;

/// Placeholder syntax expected by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderStyle {
    /// `?` (MySQL, SQLite)
    #[default]
    QuestionMark,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

/// A template with its named tokens replaced by positional placeholders.
///
/// `order[i]` is the name bound at position `i + 1`; names keep the case they
/// had in the template and repeat when the template repeats them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedQuery {
    pub sql: String,
    pub order: Vec<String>,
}

impl EncodedQuery {
    /// Reconstructs the named form, for diagnostics.
    pub fn decode(&self) -> Result<String, TemplateError> {
        decode(&self.sql, &self.order)
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Named(&'a str),
    Question(usize),
    /// `$n`: index and byte position
    Dollar(usize, usize),
}

#[derive(Clone, Copy, PartialEq)]
enum Lexer {
    Normal,
    Quoted(u8),
    /// `$tag$ ... $tag$`; the delimiter's byte range in the input
    DollarQuoted(usize, usize),
    LineComment,
    BlockComment,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

/// Length of a `$tag$` delimiter starting at `at`, if there is one. The tag
/// is empty or an identifier not starting with a digit.
fn dollar_tag(bytes: &[u8], at: usize) -> Option<usize> {
    let mut end = at + 1;
    while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
        end += 1;
    }
    let tag = &bytes[at + 1..end];
    let valid = !matches!(tag.first(), Some(b) if b.is_ascii_digit());
    (valid && bytes.get(end) == Some(&b'$')).then_some(end + 1 - at)
}

fn flush<'a>(tokens: &mut Vec<Token<'a>>, sql: &'a str, from: usize, to: usize) {
    if to > from {
        tokens.push(Token::Text(&sql[from..to]));
    }
}

/// Splits SQL into plain text and placeholder tokens. Quoted literals,
/// quoted identifiers and comments are passed through untouched.
fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut state = Lexer::Normal;
    let mut text_start = 0;
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            Lexer::Normal => match b {
                b'\'' | b'"' | b'`' => {
                    state = Lexer::Quoted(b);
                    i += 1;
                }
                b'-' if next == Some(b'-') => {
                    state = Lexer::LineComment;
                    i += 2;
                }
                b'/' if next == Some(b'*') => {
                    state = Lexer::BlockComment;
                    i += 2;
                }
                // `::type` casts
                b':' if next == Some(b':') => i += 2,
                b':' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < len && is_name_byte(bytes[end]) {
                        end += 1;
                    }
                    while end > start && bytes[end - 1] == b'.' {
                        end -= 1;
                    }
                    if end > start {
                        flush(&mut tokens, sql, text_start, i);
                        tokens.push(Token::Named(&sql[start..end]));
                        text_start = end;
                        i = end;
                    } else {
                        i += 1;
                    }
                }
                b'?' => {
                    flush(&mut tokens, sql, text_start, i);
                    tokens.push(Token::Question(i));
                    i += 1;
                    text_start = i;
                }
                b'$' if next.is_some_and(|n| n.is_ascii_digit()) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < len && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                    let index = sql[start..end].parse().unwrap_or(usize::MAX);
                    flush(&mut tokens, sql, text_start, i);
                    tokens.push(Token::Dollar(index, i));
                    text_start = end;
                    i = end;
                }
                b'$' if i == 0 || !is_name_byte(bytes[i - 1]) => match dollar_tag(bytes, i) {
                    Some(tag_len) => {
                        state = Lexer::DollarQuoted(i, tag_len);
                        i += tag_len;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            },
            // MySQL reads a backslash in a string as an escape.
            Lexer::Quoted(quote) if b == b'\\' && quote != b'`' => i += 2,
            Lexer::Quoted(quote) => {
                if b == quote {
                    state = Lexer::Normal;
                }
                i += 1;
            }
            Lexer::DollarQuoted(tag_start, tag_len) => {
                if bytes[i..].starts_with(&bytes[tag_start..tag_start + tag_len]) {
                    state = Lexer::Normal;
                    i += tag_len;
                } else {
                    i += 1;
                }
            }
            Lexer::LineComment => {
                if b == b'\n' {
                    state = Lexer::Normal;
                }
                i += 1;
            }
            Lexer::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = Lexer::Normal;
                    i += 2;
                } else {
                    i += 1;
                }
            }
        }
    }
    flush(&mut tokens, sql, text_start, len);
    tokens
}

/// Converts named placeholders (`:name`) to positional placeholders (`?`).
///
/// # Examples
///
/// ```
/// use sqlx_named_runner::builder::build_query;
///
/// let query = build_query("SELECT * FROM users WHERE id = :id AND name = :name")?;
/// assert_eq!(query.sql, "SELECT * FROM users WHERE id = ? AND name = ?");
/// assert_eq!(query.order, vec!["id", "name"]);
/// # Ok::<(), sqlx_named_runner::error::TemplateError>(())
/// ```
///
/// # Errors
///
/// `NullTemplate` for an empty template, `UnnamedParameter` when the template
/// already contains a positional placeholder outside quotes and comments.
pub fn build_query(template: &str) -> Result<EncodedQuery, TemplateError> {
    build_query_with(template, PlaceholderStyle::QuestionMark)
}

/// [`build_query`] with an explicit placeholder style.
pub fn build_query_with(
    template: &str,
    style: PlaceholderStyle,
) -> Result<EncodedQuery, TemplateError> {
    if template.trim().is_empty() {
        return Err(TemplateError::NullTemplate);
    }

    let mut sql = String::with_capacity(template.len());
    let mut order = Vec::new();
    for token in tokenize(template) {
        match token {
            Token::Text(text) => sql.push_str(text),
            Token::Named(name) => {
                order.push(name.to_owned());
                match style {
                    PlaceholderStyle::QuestionMark => sql.push('?'),
                    PlaceholderStyle::Dollar => {
                        sql.push('$');
                        sql.push_str(&order.len().to_string());
                    }
                }
            }
            Token::Question(position) => {
                return Err(TemplateError::UnnamedParameter { position });
            }
            Token::Dollar(_, position) => {
                return Err(TemplateError::UnnamedParameter { position });
            }
        }
    }
    Ok(EncodedQuery { sql, order })
}

/// Puts the names back into positional SQL (`?` or `$n`).
pub fn decode(positional_sql: &str, order: &[String]) -> Result<String, TemplateError> {
    let tokens = tokenize(positional_sql);
    let questions = tokens
        .iter()
        .filter(|t| matches!(t, Token::Question(_)))
        .count();
    if questions > 0 && questions != order.len() {
        return Err(TemplateError::PlaceholderMismatch {
            placeholders: questions,
            names: order.len(),
        });
    }

    let mut sql = String::with_capacity(positional_sql.len() + order.len() * 8);
    let mut next = order.iter();
    for token in tokens {
        match token {
            Token::Text(text) => sql.push_str(text),
            Token::Named(name) => {
                return Err(TemplateError::NamedInPositional {
                    name: name.to_owned(),
                })
            }
            Token::Question(_) => {
                let name = next.next().ok_or(TemplateError::PlaceholderMismatch {
                    placeholders: questions,
                    names: order.len(),
                })?;
                sql.push(':');
                sql.push_str(name);
            }
            Token::Dollar(index, _) => {
                let name = index
                    .checked_sub(1)
                    .and_then(|i| order.get(i))
                    .ok_or(TemplateError::PlaceholderMismatch {
                        placeholders: index,
                        names: order.len(),
                    })?;
                sql.push(':');
                sql.push_str(name);
            }
        }
    }
    Ok(sql)
}

/// Rewrites `?` placeholders of already-positional SQL into `style`. `$n`
/// placeholders are left as written.
///
/// ```
/// use sqlx_named_runner::builder::{restyle, PlaceholderStyle};
///
/// let sql = restyle("SELECT * FROM t WHERE a = ? AND b = '?' AND c = ?", PlaceholderStyle::Dollar)?;
/// assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = '?' AND c = $2");
/// # Ok::<(), sqlx_named_runner::error::TemplateError>(())
/// ```
///
/// # Errors
///
/// `NamedInPositional` if a `:name` token is present.
pub fn restyle(positional_sql: &str, style: PlaceholderStyle) -> Result<String, TemplateError> {
    let mut sql = String::with_capacity(positional_sql.len() + 8);
    let mut index = 0;
    for token in tokenize(positional_sql) {
        match token {
            Token::Text(text) => sql.push_str(text),
            Token::Named(name) => {
                return Err(TemplateError::NamedInPositional {
                    name: name.to_owned(),
                })
            }
            Token::Question(_) => {
                index += 1;
                match style {
                    PlaceholderStyle::QuestionMark => sql.push('?'),
                    PlaceholderStyle::Dollar => {
                        sql.push('$');
                        sql.push_str(&index.to_string());
                    }
                }
            }
            Token::Dollar(n, _) => {
                sql.push('$');
                sql.push_str(&n.to_string());
            }
        }
    }
    Ok(sql)
}

/// Number of positional placeholders in already-positional SQL.
///
/// # Errors
///
/// `NamedInPositional` if a `:name` token is present.
pub fn count_placeholders(sql: &str) -> Result<usize, TemplateError> {
    if sql.trim().is_empty() {
        return Err(TemplateError::NullTemplate);
    }
    let mut count = 0;
    for token in tokenize(sql) {
        match token {
            Token::Text(_) => {}
            Token::Named(name) => {
                return Err(TemplateError::NamedInPositional {
                    name: name.to_owned(),
                })
            }
            Token::Question(_) | Token::Dollar(..) => count += 1,
        }
    }
    Ok(count)
}
