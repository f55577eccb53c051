use std::collections::HashMap;
use std::fmt;

/// Parsed form of an `evalhub.conf` file, before defaults are applied.
#[derive(Debug, Default)]
pub struct ConfigFile {
    /// Top-level `key value;` directives (worker_threads, access_log, ...).
    pub directives: HashMap<String, String>,
    /// Contents of the `upstream { ... }` block.
    pub upstream: Option<HashMap<String, String>>,
    /// The `numbers { ... }` block.
    pub numbers: Option<ServiceBlock>,
    /// The `social { ... }` block.
    pub social: Option<ServiceBlock>,
}

/// A `numbers { ... }` or `social { ... }` block.
#[derive(Debug, Default)]
pub struct ServiceBlock {
    pub directives: HashMap<String, String>,
    /// `register { key value; ... }` entries, in file order.
    pub register: Option<Vec<(String, String)>>,
}

/// A lexical unit. Quoted text is always a `Word`, so a quoted `"}"` is a
/// value and never closes a block.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    Semi,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Open => f.write_str("{"),
            Token::Close => f.write_str("}"),
            Token::Semi => f.write_str(";"),
        }
    }
}

/// Parses the block syntax:
///
/// ```text
/// worker_threads 4;
/// upstream { base_url http://host/evaluation-service; }
/// numbers { listen 3000; register { email "a@b.c"; } }
/// social { listen 3001; cache_ttl_ms 60000; }
/// ```
///
/// Malformed input (missing `;`, unbalanced braces, unknown blocks) is an
/// error rather than being skipped.
pub fn parse_config(input: &str) -> Result<ConfigFile, String> {
    let tokens = tokenize(input)?;
    let mut config = ConfigFile::default();
    let mut i = 0;

    while i < tokens.len() {
        let name = match &tokens[i] {
            Token::Word(w) => w.as_str(),
            other => return Err(format!("unexpected '{other}' at top level")),
        };

        if tokens.get(i + 1) == Some(&Token::Open) {
            i += 2;
            match name {
                "upstream" => {
                    let (block, new_i) = parse_flat_block(&tokens, i, "upstream")?;
                    config.upstream = Some(block.into_iter().collect());
                    i = new_i;
                }
                "numbers" => {
                    let (block, new_i) = parse_service_block(&tokens, i, "numbers")?;
                    config.numbers = Some(block);
                    i = new_i;
                }
                "social" => {
                    let (block, new_i) = parse_service_block(&tokens, i, "social")?;
                    config.social = Some(block);
                    i = new_i;
                }
                other => return Err(format!("unknown block '{other}'")),
            }
            continue;
        }

        let ((key, value), new_i) = parse_directive(&tokens, i)?;
        config.directives.insert(key, value);
        i = new_i;
    }

    Ok(config)
}

/// Parses the contents of a service block up to and including its `}`.
fn parse_service_block(
    tokens: &[Token],
    mut i: usize,
    name: &str,
) -> Result<(ServiceBlock, usize), String> {
    let mut block = ServiceBlock::default();
    while i < tokens.len() {
        if tokens[i] == Token::Close {
            return Ok((block, i + 1));
        }

        // Parse: `register { ... }`
        let is_register = matches!(&tokens[i], Token::Word(w) if w == "register");
        if is_register && tokens.get(i + 1) == Some(&Token::Open) {
            let (entries, new_i) = parse_flat_block(tokens, i + 2, "register")?;
            block.register = Some(entries);
            i = new_i;
            continue;
        }

        let ((key, value), new_i) = parse_directive(tokens, i)?;
        block.directives.insert(key, value);
        i = new_i;
    }
    Err(format!("unterminated block '{name}'"))
}

/// Parses a block that holds only `key value;` directives.
fn parse_flat_block(
    tokens: &[Token],
    mut i: usize,
    name: &str,
) -> Result<(Vec<(String, String)>, usize), String> {
    let mut entries = Vec::new();
    while i < tokens.len() {
        if tokens[i] == Token::Close {
            return Ok((entries, i + 1));
        }
        let (entry, new_i) = parse_directive(tokens, i)?;
        entries.push(entry);
        i = new_i;
    }
    Err(format!("unterminated block '{name}'"))
}

/// Parses `key value;` starting at `i`.
fn parse_directive(tokens: &[Token], i: usize) -> Result<((String, String), usize), String> {
    let key = match &tokens[i] {
        Token::Word(k) => k,
        other => return Err(format!("unexpected '{other}'")),
    };
    match (tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(Token::Word(value)), Some(Token::Semi)) => {
            Ok(((key.clone(), value.clone()), i + 3))
        }
        (Some(Token::Open), _) => Err(format!("unexpected block '{key}'")),
        _ => Err(format!("expected `{key} <value>;`")),
    }
}

/// Splits the raw text into words and the structural characters `{`, `}`
/// and `;`. Quoted strings keep their spaces; `#` starts a comment that runs
/// to the end of the line.
fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_comment = false;

    for c in input.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }

        if let Some(q) = quote {
            if c == q {
                tokens.push(Token::Word(std::mem::take(&mut current)));
                quote = None;
            } else {
                current.push(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                flush_word(&mut tokens, &mut current);
                quote = Some(c);
            }
            '#' => {
                flush_word(&mut tokens, &mut current);
                in_comment = true;
            }
            '{' | '}' | ';' => {
                flush_word(&mut tokens, &mut current);
                tokens.push(match c {
                    '{' => Token::Open,
                    '}' => Token::Close,
                    _ => Token::Semi,
                });
            }
            c if c.is_whitespace() => flush_word(&mut tokens, &mut current),
            _ => current.push(c),
        }
    }

    if quote.is_some() {
        return Err("unterminated quoted string".to_string());
    }
    flush_word(&mut tokens, &mut current);
    Ok(tokens)
}

fn flush_word(tokens: &mut Vec<Token>, current: &mut String) {
    if !current.is_empty() {
        tokens.push(Token::Word(std::mem::take(current)));
    }
}
