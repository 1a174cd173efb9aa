//! Word supply for the match: loads the word list and hands out random,
//! not-yet-used words.
//!
//! The word file is a flat list of `word,difficulty` lines. Malformed lines
//! are skipped with a warning rather than failing the load, so a single bad
//! entry never takes the server down. The loaded list is immutable; picking
//! draws a fresh RNG each time, so concurrent picks share no state.

use log::warn;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Difficulty tier of a word, driving the base score of a correct guess.
///
/// Word files use `easy`/`hard`; the numeric `1`/`2` aliases of the legacy
/// data files are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Hard,
}

impl Difficulty {
    fn parse(tag: &str) -> Option<Difficulty> {
        match tag.to_lowercase().as_str() {
            "easy" | "1" => Some(Difficulty::Easy),
            "hard" | "2" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    pub fn base_score(&self) -> i32 {
        match self {
            Difficulty::Easy => 10,
            Difficulty::Hard => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub difficulty: Difficulty,
}

impl Word {
    pub fn new(text: &str, difficulty: Difficulty) -> Self {
        Self {
            text: text.to_string(),
            difficulty,
        }
    }

    /// Key used for the match's case-insensitive used-word bookkeeping.
    pub fn key(&self) -> String {
        self.text.to_lowercase()
    }
}

/// Why a word could not be supplied. An empty word file is a configuration
/// problem; exhaustion happens in a long match once every word has been
/// offered, and the match ends gracefully on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSupplyError {
    Empty,
    Exhausted,
}

impl fmt::Display for WordSupplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordSupplyError::Empty => write!(f, "word list is empty"),
            WordSupplyError::Exhausted => write!(f, "all words have been used"),
        }
    }
}

impl std::error::Error for WordSupplyError {}

/// Immutable word list, read once at startup.
pub struct Lexicon {
    words: Vec<Word>,
}

impl Lexicon {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    /// Loads `word,difficulty` lines from the given file. Lines with the
    /// wrong field count, an unknown difficulty tag or an empty word are
    /// skipped with a warning.
    pub fn load(path: &Path) -> io::Result<Lexicon> {
        let contents = fs::read_to_string(path)?;
        let mut words = Vec::new();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.splitn(2, ',');
            let text = parts.next().unwrap_or("").trim();
            let tag = parts.next().unwrap_or("").trim();

            match Difficulty::parse(tag) {
                Some(difficulty) if !text.is_empty() => {
                    words.push(Word::new(text, difficulty));
                }
                _ => {
                    warn!(
                        "Skipping malformed word list line {}: {:?}",
                        line_no + 1,
                        line
                    );
                }
            }
        }

        Ok(Lexicon::new(words))
    }

    /// Picks a uniformly random word whose key is not in `excluding`.
    pub fn pick(&self, excluding: &HashSet<String>) -> Result<Word, WordSupplyError> {
        if self.words.is_empty() {
            return Err(WordSupplyError::Empty);
        }

        let eligible: Vec<&Word> = self
            .words
            .iter()
            .filter(|w| !excluding.contains(&w.key()))
            .collect();

        eligible
            .choose(&mut rand::thread_rng())
            .map(|w| (*w).clone())
            .ok_or(WordSupplyError::Exhausted)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn write_temp_words(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("lexicon_test_{}.txt", name));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let path = write_temp_words(
            "malformed",
            "cat,easy\nno difficulty here\nhouse,hard\n,easy\ndog,unknown\n\n",
        );
        let lexicon = Lexicon::load(&path).unwrap();
        assert_eq!(lexicon.len(), 2);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_accepts_legacy_numeric_tags() {
        let path = write_temp_words("legacy", "chat,1\nelephant,2\n");
        let lexicon = Lexicon::load(&path).unwrap();
        assert_eq!(lexicon.len(), 2);
        let word = lexicon.pick(&HashSet::new()).unwrap();
        assert!(word.text == "chat" || word.text == "elephant");
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/words.txt");
        assert!(Lexicon::load(&path).is_err());
    }

    #[test]
    fn test_pick_excludes_used_words() {
        let lexicon = Lexicon::new(vec![
            Word::new("cat", Difficulty::Easy),
            Word::new("house", Difficulty::Hard),
        ]);

        let mut used = HashSet::new();
        used.insert("cat".to_string());

        for _ in 0..20 {
            let word = lexicon.pick(&used).unwrap();
            assert_eq!(word.text, "house");
        }
    }

    #[test]
    fn test_exclusion_is_case_insensitive() {
        let lexicon = Lexicon::new(vec![Word::new("Cat", Difficulty::Easy)]);
        let mut used = HashSet::new();
        used.insert("cat".to_string());
        assert_eq!(lexicon.pick(&used), Err(WordSupplyError::Exhausted));
    }

    #[test]
    fn test_empty_is_distinct_from_exhausted() {
        let empty = Lexicon::new(Vec::new());
        assert_eq!(empty.pick(&HashSet::new()), Err(WordSupplyError::Empty));

        let lexicon = Lexicon::new(vec![Word::new("cat", Difficulty::Easy)]);
        let mut used = HashSet::new();
        used.insert("cat".to_string());
        assert_eq!(lexicon.pick(&used), Err(WordSupplyError::Exhausted));
    }

    #[test]
    fn test_base_scores() {
        assert_eq!(Difficulty::Easy.base_score(), 10);
        assert_eq!(Difficulty::Hard.base_score(), 20);
    }
}
