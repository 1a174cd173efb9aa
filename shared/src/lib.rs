use std::fmt;

pub const MIN_PLAYERS: usize = 3;
pub const MAX_PLAYERS: usize = 10;
pub const ROUND_DURATION_SECS: u32 = 60;
pub const LOBBY_COUNTDOWN_SECS: u32 = 15;
pub const WORDS_PER_CHOICE: usize = 2;
pub const ROUNDS_PER_PLAYER: usize = 3;
pub const LOW_TIME_SECS: u32 = 10;
pub const ROUND_PAUSE_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Drawer,
    Guesser,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Drawer => "drawer",
            Role::Guesser => "guesser",
        }
    }
}

/// One line received from a client, after the name handshake.
///
/// Anything without a known prefix is chat: free text is how guess attempts
/// arrive. The legacy client wraps chat in `CHAT:`, so both forms map to the
/// same variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    ChosenWord(String),
    Chat(String),
    Draw(String),
    Clear,
}

impl ClientMessage {
    pub fn from_line(line: &str) -> ClientMessage {
        if let Some(word) = line.strip_prefix("CHOSEN_WORD:") {
            ClientMessage::ChosenWord(word.trim().to_string())
        } else if let Some(payload) = line.strip_prefix("DRAW:") {
            ClientMessage::Draw(payload.to_string())
        } else if line.strip_prefix("CLEAR:").is_some() {
            ClientMessage::Clear
        } else if let Some(text) = line.strip_prefix("CHAT:") {
            ClientMessage::Chat(text.trim().to_string())
        } else {
            ClientMessage::Chat(line.trim().to_string())
        }
    }
}

/// One line sent to a client. `Display` produces the wire form without the
/// trailing newline; the connection's writer appends it.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Role(Role),
    WordOptions(Vec<String>),
    WordConfirmed(String),
    Time(u32),
    RevealLetter(u8),
    GuessCorrect(String),
    Notification(String),
    Podium(Vec<(String, i32)>),
    Chat { name: String, text: String },
    Draw(String),
    Clear,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Role(role) => write!(f, "ROLE:{}", role.as_str()),
            ServerMessage::WordOptions(words) => {
                write!(f, "CHOIX_MOTS:{}", words.join(","))
            }
            ServerMessage::WordConfirmed(word) => {
                write!(f, "CHOSEN_WORD_CONFIRMED:{}", word)
            }
            ServerMessage::Time(seconds) => write!(f, "TEMPS:{}", seconds),
            ServerMessage::RevealLetter(n) => write!(f, "REVEAL_LETTER:{}", n),
            ServerMessage::GuessCorrect(text) => write!(f, "GUESS_CORRECT:{}", text),
            ServerMessage::Notification(text) => write!(f, "NOTIFICATION:{}", text),
            ServerMessage::Podium(standings) => {
                write!(f, "PODIUM:")?;
                for (rank, (name, score)) in standings.iter().enumerate() {
                    write!(f, "\n{}. {} - {} points", rank + 1, name, score)?;
                }
                Ok(())
            }
            ServerMessage::Chat { name, text } => write!(f, "CHAT:{}: {}", name, text),
            ServerMessage::Draw(payload) => write!(f, "DRAW:{}", payload),
            ServerMessage::Clear => write!(f, "CLEAR:"),
        }
    }
}
