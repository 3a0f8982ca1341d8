//! 文本块的文件表示。
//!
//! ```text
//! // 根节点的属性与子块不带花括号
//! version = 1
//! Line {
//!     uid = 1
//!     vertices {
//!         element {
//!             index = 0
//!         }
//!     }
//! }
//! ```
//!
//! 含空白或特殊字符的值用双引号包裹，内部的 `"` 与 `\` 以反斜杠转义。

use std::fmt::Write as _;

use cadflow_core::block::TextBlock;
use thiserror::Error;

const INDENT: &str = "    ";

/// 块嵌套深度上限，超出时报格式错误而不是继续递归。
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct FormatError {
    pub line: usize,
    pub message: String,
}

impl FormatError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Equals,
    Open,
    Close,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('/') => {
                    let mut probe = self.chars.clone();
                    probe.next();
                    if probe.peek() != Some(&'/') {
                        return;
                    }
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => return,
            }
        }
    }

    /// 下一个记号及其所在行号。
    fn next_token(&mut self) -> Result<Option<(Token, usize)>, FormatError> {
        self.skip_trivia();
        let line = self.line;
        let Some(&c) = self.chars.peek() else {
            return Ok(None);
        };
        let token = match c {
            '=' => {
                self.chars.next();
                Token::Equals
            }
            '{' => {
                self.chars.next();
                Token::Open
            }
            '}' => {
                self.chars.next();
                Token::Close
            }
            '"' => {
                self.chars.next();
                Token::Word(self.quoted(line)?)
            }
            _ => Token::Word(self.bare()),
        };
        Ok(Some((token, line)))
    }

    fn quoted(&mut self, start: usize) -> Result<String, FormatError> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(value),
                Some('\\') => match self.chars.next() {
                    Some(escaped @ ('"' | '\\')) => value.push(escaped),
                    Some(other) => {
                        return Err(FormatError::new(
                            self.line,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                    None => break,
                },
                Some('\n') => {
                    self.line += 1;
                    value.push('\n');
                }
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(FormatError::new(start, "unterminated quoted value"))
    }

    fn bare(&mut self) -> String {
        let mut value = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '=' | '{' | '}' | '"') {
                break;
            }
            value.push(c);
            self.chars.next();
        }
        value
    }
}

/// 解析文件内容为根文本块。
pub fn parse(source: &str) -> Result<TextBlock, FormatError> {
    let mut lexer = Lexer::new(source);
    let mut root = TextBlock::root();
    parse_body(&mut lexer, &mut root, None, 0)?;
    Ok(root)
}

/// 读取属性与子块，直到匹配的 `}`（`opened` 为其所在行）或文件结束。
fn parse_body(
    lexer: &mut Lexer<'_>,
    block: &mut TextBlock,
    opened: Option<usize>,
    depth: usize,
) -> Result<(), FormatError> {
    loop {
        let Some((token, line)) = lexer.next_token()? else {
            return match opened {
                Some(open_line) => Err(FormatError::new(
                    open_line,
                    format!("block `{}` is not closed", block.name()),
                )),
                None => Ok(()),
            };
        };

        let name = match token {
            Token::Word(name) => name,
            Token::Close if opened.is_some() => return Ok(()),
            Token::Close => return Err(FormatError::new(line, "unexpected `}`")),
            Token::Equals => return Err(FormatError::new(line, "expected a name before `=`")),
            Token::Open => return Err(FormatError::new(line, "expected a name before `{`")),
        };

        match lexer.next_token()? {
            Some((Token::Equals, _)) => match lexer.next_token()? {
                Some((Token::Word(value), _)) => {
                    block.set_attribute(name, value);
                }
                Some((_, value_line)) => {
                    return Err(FormatError::new(
                        value_line,
                        format!("attribute `{name}` is missing a value"),
                    ));
                }
                None => {
                    return Err(FormatError::new(
                        line,
                        format!("attribute `{name}` is missing a value"),
                    ));
                }
            },
            Some((Token::Open, open_line)) => {
                if depth >= MAX_DEPTH {
                    return Err(FormatError::new(
                        open_line,
                        format!("blocks nested deeper than {MAX_DEPTH} levels"),
                    ));
                }
                let child = block.add_child(name);
                parse_body(lexer, child, Some(open_line), depth + 1)?;
            }
            Some((_, next_line)) => {
                return Err(FormatError::new(
                    next_line,
                    format!("expected `=` or `{{` after `{name}`"),
                ));
            }
            None => {
                return Err(FormatError::new(
                    line,
                    format!("unexpected end of input after `{name}`"),
                ));
            }
        }
    }
}

/// 把文本块写成文件内容。根块的名称不输出。
pub fn dump(block: &TextBlock) -> String {
    let mut out = String::new();
    write_body(&mut out, block, 0);
    out
}

fn write_body(out: &mut String, block: &TextBlock, depth: usize) {
    let indent = INDENT.repeat(depth);
    for (key, value) in block.attributes() {
        let _ = writeln!(out, "{indent}{} = {}", quote(key), quote(value));
    }
    for child in block.children() {
        let _ = writeln!(out, "{indent}{} {{", quote(child.name()));
        write_body(out, child, depth + 1);
        let _ = writeln!(out, "{indent}}}");
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value.starts_with("//")
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | '{' | '}' | '"' | '\\'))
}

fn quote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
