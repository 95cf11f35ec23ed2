use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    Word(String),
    StringLit(String),
    Number(u64),
    LBrace,
    RBrace,
    Semicolon,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Word(s) => write!(f, "{s}"),
            TokenType::StringLit(s) => write!(f, "\"{s}\""),
            TokenType::Number(n) => write!(f, "{n}"),
            TokenType::LBrace => write!(f, "{{"),
            TokenType::RBrace => write!(f, "}}"),
            TokenType::Semicolon => write!(f, ";"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.col)
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenType,
    pub loc: Loc,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at {}", self.kind, self.loc)
    }
}

pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn loc(&self) -> Loc {
        Loc {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_ignorable(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_quoted(&mut self) -> Result<String, String> {
        let start = self.loc();
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('"') => return Ok(s),
                Some('\\') => match self.advance() {
                    Some(c) => s.push(c),
                    None => return Err(format!("unterminated string at {start}")),
                },
                Some(c) => s.push(c),
                None => return Err(format!("unterminated string at {start}")),
            }
        }
    }

    fn is_word_char(c: char) -> bool {
        !c.is_whitespace() && !matches!(c, '{' | '}' | ';' | '"' | '#')
    }

    fn read_word(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if !Self::is_word_char(c) {
                break;
            }
            s.push(c);
            self.advance();
        }
        s
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ignorable();
            let loc = self.loc();
            let Some(c) = self.peek() else { break };
            match c {
                '{' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::LBrace,
                        loc,
                    });
                }
                '}' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::RBrace,
                        loc,
                    });
                }
                ';' => {
                    self.advance();
                    tokens.push(Token {
                        kind: TokenType::Semicolon,
                        loc,
                    });
                }
                '"' => {
                    let s = self.read_quoted()?;
                    tokens.push(Token {
                        kind: TokenType::StringLit(s),
                        loc,
                    });
                }
                _ => {
                    let word = self.read_word();
                    if word.is_empty() {
                        return Err(format!("unexpected character '{c}' at {loc}"));
                    }
                    let kind = match word.parse::<u64>() {
                        Ok(n) => TokenType::Number(n),
                        Err(_) => TokenType::Word(word),
                    };
                    tokens.push(Token { kind, loc });
                }
            }
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenType> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_a_simple_directive() {
        assert_eq!(
            kinds("listen 8080;"),
            vec![
                TokenType::Word("listen".into()),
                TokenType::Number(8080),
                TokenType::Semicolon
            ]
        );
    }

    #[test]
    fn strips_comments() {
        assert_eq!(
            kinds("# a comment\nlisten 80; # trailing\n"),
            vec![
                TokenType::Word("listen".into()),
                TokenType::Number(80),
                TokenType::Semicolon
            ]
        );
    }

    #[test]
    fn nested_blocks() {
        assert_eq!(
            kinds("server { location /x { } }"),
            vec![
                TokenType::Word("server".into()),
                TokenType::LBrace,
                TokenType::Word("location".into()),
                TokenType::Word("/x".into()),
                TokenType::LBrace,
                TokenType::RBrace,
                TokenType::RBrace,
            ]
        );
    }

    #[test]
    fn quoted_string_with_escape() {
        assert_eq!(
            kinds(r#"index "my index.html";"#),
            vec![
                TokenType::Word("index".into()),
                TokenType::StringLit("my index.html".into()),
                TokenType::Semicolon
            ]
        );
    }
}
