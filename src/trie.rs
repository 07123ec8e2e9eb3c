//! Prefix-code trie over terminal literals.

use std::collections::HashMap;

use crate::error::{Result, ScfgError};

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    terminal: Option<usize>,
}

/// Maps character input onto terminal indices.
///
/// The stored literals always form a prefix code: no literal is a prefix of
/// another, so at every position at most one literal can match.
#[derive(Debug, Default, Clone)]
pub struct TerminalTrie {
    root: TrieNode,
    len: usize,
}

/// Outcome of offering a literal to the trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added(usize),
    Existing(usize),
}

impl TerminalTrie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `literal` with the next free index, or returns the index it
    /// already has. Fails if the literal is empty or would break the
    /// prefix-code property.
    pub fn insert(&mut self, literal: &str) -> std::result::Result<Insertion, String> {
        if literal.is_empty() {
            return Err("terminal literal is empty".to_string());
        }
        if let Some(index) = self.get(literal) {
            return Ok(Insertion::Existing(index));
        }

        let next_index = self.len;
        let mut node = &mut self.root;
        for ch in literal.chars() {
            if node.terminal.is_some() {
                return Err(format!(
                    "an existing terminal is a prefix of '{}'",
                    literal
                ));
            }
            node = node.children.entry(ch).or_default();
        }
        if !node.children.is_empty() {
            return Err(format!(
                "'{}' is a prefix of an existing terminal",
                literal
            ));
        }
        node.terminal = Some(next_index);
        self.len += 1;
        Ok(Insertion::Added(next_index))
    }

    pub fn get(&self, literal: &str) -> Option<usize> {
        let mut node = &self.root;
        for ch in literal.chars() {
            node = node.children.get(&ch)?;
        }
        node.terminal
    }

    /// Splits `input` into terminal indices.
    pub fn tokenize(&self, input: &str) -> Result<Vec<usize>> {
        let mut tokens = Vec::new();
        let mut chars = input.char_indices().peekable();
        let mut char_position = 0usize;

        while chars.peek().is_some() {
            let token_start = char_position;
            let mut node = &self.root;
            let mut matched = None;

            while let Some(&(_, ch)) = chars.peek() {
                match node.children.get(&ch) {
                    Some(child) => {
                        node = child;
                        chars.next();
                        char_position += 1;
                        if let Some(index) = node.terminal {
                            matched = Some(index);
                            break;
                        }
                    }
                    None => break,
                }
            }

            match matched {
                Some(index) => tokens.push(index),
                None => {
                    return Err(ScfgError::Tokenization {
                        input: input.to_string(),
                        position: token_start,
                    })
                }
            }
        }

        Ok(tokens)
    }
}
