use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NewickError {
    #[error("Unexpected end of input")]
    UnexpectedEnd,
    #[error("Unexpected character '{found}' at position {position}")]
    UnexpectedChar { found: char, position: usize },
    #[error("Invalid branch length '{0}'")]
    InvalidBranch(String),
    #[error("Trailing input after the closing semicolon")]
    TrailingInput,
    #[error("Tip label '{0}' is not a valid taxon index")]
    InvalidLabel(String),
    #[error("Tree is not strictly bifurcating")]
    NotBinary,
    #[error("Taxon {0} appears more than once")]
    DuplicateTip(usize),
    #[error("Tip node carries no label")]
    MissingLabel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewickNode {
    pub label: Option<String>,
    pub branch: Option<f64>,
    pub children: Vec<NewickNode>,
}

pub fn parse(text: &str) -> Result<NewickNode, NewickError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    parser.skip_whitespace();
    let root = parser.node()?;
    parser.skip_whitespace();
    match parser.next() {
        Some(';') => {}
        Some(c) => {
            return Err(NewickError::UnexpectedChar {
                found: c,
                position: parser.pos - 1,
            });
        }
        None => return Err(NewickError::UnexpectedEnd),
    }
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(NewickError::TrailingInput);
    }
    Ok(root)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn node(&mut self) -> Result<NewickNode, NewickError> {
        self.skip_whitespace();
        let mut children = Vec::new();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                children.push(self.node()?);
                self.skip_whitespace();
                match self.next() {
                    Some(',') => continue,
                    Some(')') => break,
                    Some(c) => {
                        return Err(NewickError::UnexpectedChar {
                            found: c,
                            position: self.pos - 1,
                        });
                    }
                    None => return Err(NewickError::UnexpectedEnd),
                }
            }
        }
        self.skip_whitespace();
        let label = self.label();
        let branch = self.branch()?;
        if children.is_empty() && label.is_none() && branch.is_none() {
            return match self.peek() {
                Some(c) => Err(NewickError::UnexpectedChar {
                    found: c,
                    position: self.pos,
                }),
                None => Err(NewickError::UnexpectedEnd),
            };
        }
        Ok(NewickNode {
            label,
            branch,
            children,
        })
    }

    fn label(&mut self) -> Option<String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '(' | ')' | ',' | ':' | ';') {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        if out.is_empty() { None } else { Some(out) }
    }

    fn branch(&mut self) -> Result<Option<f64>, NewickError> {
        self.skip_whitespace();
        if self.peek() != Some(':') {
            return Ok(None);
        }
        self.pos += 1;
        self.skip_whitespace();
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E') {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Some)
            .map_err(|_| NewickError::InvalidBranch(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_nested_clades_with_branch_lengths() {
        let tree = parse("(0:0.1,(1:0.2,2:0.3):0.05);").unwrap();

        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].label.as_deref(), Some("0"));
        assert_eq!(tree.children[0].branch, Some(0.1));
        let inner = &tree.children[1];
        assert_eq!(inner.branch, Some(0.05));
        assert_eq!(inner.children.len(), 2);
        assert_eq!(inner.children[1].label.as_deref(), Some("2"));
    }

    #[test]
    fn parse_tolerates_whitespace_between_tokens() {
        let tree = parse(" ( alpha : 1.5 , beta : 2 ) ;\n").unwrap();

        assert_eq!(tree.children[0].label.as_deref(), Some("alpha"));
        assert_eq!(tree.children[1].branch, Some(2.0));
    }

    #[test]
    fn parse_preserves_branch_lengths_exactly() {
        let value = 0.123_456_789_012_345_67_f64;
        let text = format!("(0:{value},1:1e-9);");
        let tree = parse(&text).unwrap();

        assert_eq!(tree.children[0].branch, Some(value));
        assert_eq!(tree.children[1].branch, Some(1e-9));
    }

    #[test]
    fn parse_rejects_unbalanced_parentheses() {
        assert_eq!(parse("(0:0.1,1:0.2"), Err(NewickError::UnexpectedEnd));
        assert!(matches!(
            parse("((0:0.1,1:0.2);"),
            Err(NewickError::UnexpectedChar { found: ';', .. })
        ));
    }

    #[test]
    fn parse_rejects_trailing_garbage() {
        assert_eq!(parse("(0:0.1,1:0.2); extra"), Err(NewickError::TrailingInput));
    }

    #[test]
    fn parse_rejects_malformed_branch_lengths() {
        assert_eq!(
            parse("(0:abc,1:0.2);"),
            Err(NewickError::InvalidBranch(String::new()))
        );
    }
}
