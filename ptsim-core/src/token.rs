//! Token arena: one binary synchronization slot per network arc.
//!
//! Misuse (setting a set token, resetting a pending one, out-of-range
//! indices) means the network was wired incorrectly and panics.

use crate::types::TokenIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    Pending,
    Set,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub state: TokenState,
    /// Cleared when an exclusive split routes past this token.
    pub last_chosen: bool,
    pub was_ever_set: bool,
    pub set_count: u32,
    pub reset_count: u32,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            state: TokenState::Pending,
            last_chosen: true,
            was_ever_set: false,
            set_count: 0,
            reset_count: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TokenArena {
    tokens: Vec<Token>,
}

impl TokenArena {
    pub fn new(size: usize) -> Self {
        Self {
            tokens: vec![Token::default(); size],
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn slot(&mut self, idx: TokenIndex) -> &mut Token {
        let len = self.tokens.len();
        self.tokens
            .get_mut(idx)
            .unwrap_or_else(|| panic!("token {idx} outside arena of {len}"))
    }

    /// Pending → Set.
    pub fn set(&mut self, idx: TokenIndex) {
        let token = self.slot(idx);
        assert!(
            token.state == TokenState::Pending,
            "token protocol violation: token {idx} set while already set"
        );
        token.state = TokenState::Set;
        token.was_ever_set = true;
        token.set_count += 1;
    }

    /// Set → Pending.
    pub fn reset(&mut self, idx: TokenIndex) {
        let token = self.slot(idx);
        assert!(
            token.state == TokenState::Set,
            "token protocol violation: token {idx} reset while pending"
        );
        token.state = TokenState::Pending;
        token.reset_count += 1;
    }

    pub fn is_set(&self, idx: TokenIndex) -> bool {
        self.tokens[idx].state == TokenState::Set
    }

    pub fn was_ever_set(&self, idx: TokenIndex) -> bool {
        self.tokens[idx].was_ever_set
    }

    pub fn last_chosen(&self, idx: TokenIndex) -> bool {
        self.tokens[idx].last_chosen
    }

    /// Mark `chosen` among the outputs of an exclusive split.
    pub fn mark_chosen(&mut self, outputs: &[TokenIndex], chosen: TokenIndex) {
        for &idx in outputs {
            self.slot(idx).last_chosen = idx == chosen;
        }
    }

    pub fn get(&self, idx: TokenIndex) -> &Token {
        &self.tokens[idx]
    }

    /// Indices of tokens currently set.
    pub fn set_tokens(&self) -> Vec<TokenIndex> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TokenState::Set)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }
}
