//! Best-effort generation of strings matching a regular expression.
//!
//! Handles the subset of regex syntax that shows up in OpenAPI `pattern`
//! constraints: literals, `.`, escapes, character classes, groups,
//! alternation, and the usual quantifiers. Anything else makes
//! [`generate_matching`] return `None` and the caller falls back to a plain
//! random value. Candidates are re-validated against the real regex before
//! use, so the approximation only has to be right often enough.

use std::iter::Peekable;
use std::str::Chars;

use rand::Rng;
use rand::rngs::StdRng;

/// Unbounded quantifiers are capped at this many repetitions.
const REPEAT_CAP: usize = 3;
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone)]
enum Node {
    Literal(char),
    AnyChar,
    /// Inclusive character ranges, one is drawn uniformly.
    Class(Vec<(char, char)>),
    Sequence(Vec<Node>),
    Alternation(Vec<Node>),
    Repeat {
        node: Box<Node>,
        min: usize,
        max: usize,
    },
}

/// Attempts to produce a string matching `pattern`.
pub(super) fn generate_matching(rng: &mut StdRng, pattern: &str) -> Option<String> {
    let trimmed = pattern.strip_prefix('^').unwrap_or(pattern);
    let trimmed = trimmed.strip_suffix('$').unwrap_or(trimmed);

    let mut parser = Parser {
        chars: trimmed.chars().peekable(),
    };
    let ast = parser.alternation(0)?;
    if parser.chars.next().is_some() {
        // Trailing unparsed input, e.g. an unbalanced ')'.
        return None;
    }

    let mut out = String::new();
    render(rng, &ast, &mut out);
    Some(out)
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn alternation(&mut self, depth: usize) -> Option<Node> {
        if depth > MAX_DEPTH {
            return None;
        }
        let mut branches = vec![self.sequence(depth)?];
        while self.chars.peek() == Some(&'|') {
            self.chars.next();
            branches.push(self.sequence(depth)?);
        }
        if branches.len() == 1 {
            branches.pop()
        } else {
            Some(Node::Alternation(branches))
        }
    }

    fn sequence(&mut self, depth: usize) -> Option<Node> {
        let mut nodes = Vec::new();
        while let Some(&next) = self.chars.peek() {
            if next == '|' || next == ')' {
                break;
            }
            let atom = self.atom(depth)?;
            let atom = self.quantified(atom)?;
            nodes.push(atom);
        }
        Some(Node::Sequence(nodes))
    }

    fn atom(&mut self, depth: usize) -> Option<Node> {
        match self.chars.next()? {
            '(' => {
                // Non-capturing marker is irrelevant for generation.
                if self.chars.peek() == Some(&'?') {
                    self.chars.next();
                    match self.chars.next()? {
                        ':' => {}
                        // Lookaround and named groups are out of scope.
                        _ => return None,
                    }
                }
                let inner = self.alternation(depth + 1)?;
                if self.chars.next()? != ')' {
                    return None;
                }
                Some(inner)
            }
            '[' => self.char_class(),
            '.' => Some(Node::AnyChar),
            '\\' => self.escape(),
            // Dangling quantifier or stray close.
            '*' | '+' | '?' | '{' | ')' => None,
            literal => Some(Node::Literal(literal)),
        }
    }

    fn quantified(&mut self, node: Node) -> Option<Node> {
        let (min, max) = match self.chars.peek() {
            Some('?') => {
                self.chars.next();
                (0, 1)
            }
            Some('*') => {
                self.chars.next();
                (0, REPEAT_CAP)
            }
            Some('+') => {
                self.chars.next();
                (1, REPEAT_CAP)
            }
            Some('{') => {
                self.chars.next();
                let min = self.number()?;
                match self.chars.next()? {
                    '}' => (min, min),
                    ',' => {
                        if self.chars.peek() == Some(&'}') {
                            self.chars.next();
                            (min, min + REPEAT_CAP)
                        } else {
                            let max = self.number()?;
                            if self.chars.next()? != '}' {
                                return None;
                            }
                            (min, max.max(min))
                        }
                    }
                    _ => return None,
                }
            }
            _ => return Some(node),
        };
        Some(Node::Repeat {
            node: Box::new(node),
            min,
            max,
        })
    }

    fn number(&mut self) -> Option<usize> {
        let mut digits = String::new();
        while let Some(&next) = self.chars.peek() {
            if next.is_ascii_digit() {
                digits.push(next);
                self.chars.next();
            } else {
                break;
            }
        }
        digits.parse().ok()
    }

    fn char_class(&mut self) -> Option<Node> {
        if self.chars.peek() == Some(&'^') {
            // Negated classes are not approximated.
            return None;
        }
        let mut ranges = Vec::new();
        loop {
            let current = self.chars.next()?;
            if current == ']' {
                break;
            }
            let low = if current == '\\' {
                match self.escape()? {
                    Node::Literal(c) => c,
                    Node::Class(escaped) => {
                        ranges.extend(escaped);
                        continue;
                    }
                    _ => return None,
                }
            } else {
                current
            };
            if self.chars.peek() == Some(&'-') {
                self.chars.next();
                match self.chars.peek() {
                    Some(']') | None => {
                        // Trailing dash is a literal.
                        ranges.push((low, low));
                        ranges.push(('-', '-'));
                    }
                    Some(_) => {
                        let high = self.chars.next()?;
                        if high < low {
                            return None;
                        }
                        ranges.push((low, high));
                    }
                }
            } else {
                ranges.push((low, low));
            }
        }
        if ranges.is_empty() {
            None
        } else {
            Some(Node::Class(ranges))
        }
    }

    fn escape(&mut self) -> Option<Node> {
        let node = match self.chars.next()? {
            'd' => Node::Class(vec![('0', '9')]),
            'w' => Node::Class(vec![('a', 'z'), ('A', 'Z'), ('0', '9'), ('_', '_')]),
            's' => Node::Literal(' '),
            'n' => Node::Literal('\n'),
            't' => Node::Literal('\t'),
            'D' | 'W' | 'S' | 'b' | 'B' => return None,
            literal => Node::Literal(literal),
        };
        Some(node)
    }
}

fn render(rng: &mut StdRng, node: &Node, out: &mut String) {
    match node {
        Node::Literal(c) => out.push(*c),
        Node::AnyChar => {
            let index = rng.random_range(0..26);
            out.push(char::from(b'a' + index));
        }
        Node::Class(ranges) => {
            let index = rng.random_range(0..ranges.len());
            let (low, high) = ranges[index];
            let offset = rng.random_range(0..=(high as u32 - low as u32));
            out.push(char::from_u32(low as u32 + offset).unwrap_or(low));
        }
        Node::Sequence(nodes) => {
            for inner in nodes {
                render(rng, inner, out);
            }
        }
        Node::Alternation(branches) => {
            let index = rng.random_range(0..branches.len());
            render(rng, &branches[index], out);
        }
        Node::Repeat { node, min, max } => {
            let times = rng.random_range(*min..=*max);
            for _ in 0..times {
                render(rng, node, out);
            }
        }
    }
}
