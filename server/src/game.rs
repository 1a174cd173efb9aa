//! Match orchestration: the authoritative round state machine.
//!
//! All game state lives in one `GameState` guarded by a single mutex. Every
//! operation follows the same discipline: lock, mutate, collect the outbound
//! lines into a local outbox, unlock, then send. The lock is never held
//! across an `.await` or a network send, so a broadcast to many clients can
//! never stall guess or disconnect handling. Timed continuations (round-end
//! pause, round countdown) are spawned tasks, never sleeps under the lock.

use crate::lexicon::{Lexicon, Word, WordSupplyError};
use crate::network::Registry;
use crate::player::Player;
use crate::timer::{RoundTimer, TimerEvent};
use log::{debug, info, warn};
use shared::{
    Role, ServerMessage, LOBBY_COUNTDOWN_SECS, MAX_PLAYERS, MIN_PLAYERS, ROUNDS_PER_PLAYER,
    ROUND_DURATION_SECS, ROUND_PAUSE_SECS, WORDS_PER_CHOICE,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Match tuning. Defaults mirror the protocol constants; tests shrink the
/// timings to keep runs fast.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub min_players: usize,
    pub max_players: usize,
    pub round_duration_secs: u32,
    pub lobby_countdown_secs: u32,
    pub rounds_per_player: usize,
    pub round_pause_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: MIN_PLAYERS,
            max_players: MAX_PLAYERS,
            round_duration_secs: ROUND_DURATION_SECS,
            lobby_countdown_secs: LOBBY_COUNTDOWN_SECS,
            rounds_per_player: ROUNDS_PER_PLAYER,
            round_pause_secs: ROUND_PAUSE_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Lobby,
    ChoosingWord,
    Drawing,
    RoundOver,
    Finished,
}

struct GameState {
    phase: Phase,
    players: Vec<Player>,
    round: usize,
    drawer: Option<String>,
    current_word: Option<Word>,
    word_options: Vec<Word>,
    used_words: HashSet<String>,
    found: Vec<String>,
    remaining_seconds: u32,
}

impl GameState {
    fn new() -> Self {
        Self {
            phase: Phase::Lobby,
            players: Vec::new(),
            round: 0,
            drawer: None,
            current_word: None,
            word_options: Vec::new(),
            used_words: HashSet::new(),
            found: Vec::new(),
            remaining_seconds: 0,
        }
    }

    fn connected_names(&self) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| p.connected)
            .map(|p| p.name.clone())
            .collect()
    }

    fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected).count()
    }

    /// Every connected guesser has been credited this round.
    fn round_complete(&self) -> bool {
        self.players
            .iter()
            .filter(|p| p.connected && Some(p.name.as_str()) != self.drawer.as_deref())
            .all(|p| self.found.contains(&p.name))
    }

    /// All players, connected or not, best score first. Ties keep join order.
    fn standings(&self) -> Vec<(String, i32)> {
        let mut podium: Vec<&Player> = self.players.iter().collect();
        podium.sort_by(|a, b| b.score.cmp(&a.score));
        podium.iter().map(|p| (p.name.clone(), p.score)).collect()
    }
}

/// An outbound line decided under the state lock, sent after release.
enum Outgoing {
    Broadcast(ServerMessage),
    To(String, ServerMessage),
}

pub struct Game {
    registry: Arc<Registry>,
    lexicon: Lexicon,
    config: GameConfig,
    state: Mutex<GameState>,
    timer: Mutex<Option<RoundTimer>>,
    weak_self: Weak<Game>,
}

impl Game {
    pub fn new(registry: Arc<Registry>, lexicon: Lexicon, config: GameConfig) -> Arc<Game> {
        Arc::new_cyclic(|weak| Game {
            registry,
            lexicon,
            config,
            state: Mutex::new(GameState::new()),
            timer: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    pub fn has_started(&self) -> bool {
        self.state.lock().unwrap().phase != Phase::Lobby
    }

    /// Registers a player after a successful name handshake. A returning
    /// name revives its old record, score intact.
    pub fn add_player(&self, name: &str) {
        let outbox = {
            let mut state = self.state.lock().unwrap();
            match state.players.iter_mut().find(|p| p.name == name) {
                Some(player) => player.connected = true,
                None => state.players.push(Player::new(name)),
            }
            info!("Player {} joined ({} connected)", name, state.connected_count());
            vec![Outgoing::Broadcast(ServerMessage::Notification(format!(
                "{} joined the game. ({} players)",
                name,
                state.connected_count()
            )))]
        };
        self.dispatch(outbox);
    }

    /// Transitions out of the lobby and launches the first round. Starting
    /// twice is a no-op, so concurrent countdown paths cannot duplicate
    /// game state.
    pub fn start(&self) {
        let outbox = {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Lobby {
                return;
            }
            state.phase = Phase::RoundOver;
            state.round = 0;
            info!("Match starting with {} players", state.connected_count());
            vec![Outgoing::Broadcast(ServerMessage::Clear)]
        };
        self.dispatch(outbox);
        self.begin_round();
    }

    /// Starts the next round: rotates the drawer, deals two unused word
    /// options, fans out roles. Only valid between rounds.
    pub fn begin_round(&self) {
        let mut outbox = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::RoundOver {
                return;
            }

            let connected = state.connected_names();
            if connected.len() < self.config.min_players {
                Self::abort_locked(&mut state, &mut outbox);
            } else {
                match self.deal_options(&state) {
                    Err(err) => {
                        warn!("Cannot start round {}: {}", state.round + 1, err);
                        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(
                            "No words left to play.".to_string(),
                        )));
                        Self::finish_locked(&mut state, &mut outbox);
                    }
                    Ok(options) => {
                        let drawer = connected[state.round % connected.len()].clone();
                        info!("Round {}: {} is drawing", state.round + 1, drawer);

                        state.drawer = Some(drawer.clone());
                        state.current_word = None;
                        state.found.clear();
                        state.remaining_seconds = self.config.round_duration_secs;
                        state.word_options = options.clone();
                        state.phase = Phase::ChoosingWord;

                        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(format!(
                            "{} is drawing this round!",
                            drawer
                        ))));
                        for name in &connected {
                            let role = if *name == drawer {
                                Role::Drawer
                            } else {
                                Role::Guesser
                            };
                            outbox.push(Outgoing::To(name.clone(), ServerMessage::Role(role)));
                        }
                        outbox.push(Outgoing::To(
                            drawer,
                            ServerMessage::WordOptions(
                                options.iter().map(|w| w.text.clone()).collect(),
                            ),
                        ));
                    }
                }
            }
        }
        self.dispatch(outbox);
    }

    /// The drawer picks one of the offered words. Anyone else, or a word
    /// that was not offered, is ignored. Locks in the word, confirms it
    /// (plainly to the drawer, masked to guessers) and starts the countdown.
    pub fn choose_word(&self, name: &str, word: &str) {
        let outbox = {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::ChoosingWord {
                debug!("Ignoring word choice outside selection: {}", name);
                return;
            }
            if state.drawer.as_deref() != Some(name) {
                debug!("Ignoring word choice from non-drawer {}", name);
                return;
            }
            let chosen = match state
                .word_options
                .iter()
                .find(|w| w.text.to_lowercase() == word.to_lowercase())
            {
                Some(w) => w.clone(),
                None => {
                    debug!("Drawer {} picked an unoffered word {:?}", name, word);
                    return;
                }
            };

            state.used_words.insert(chosen.key());
            state.current_word = Some(chosen.clone());
            state.word_options.clear();
            state.remaining_seconds = self.config.round_duration_secs;
            state.phase = Phase::Drawing;
            info!("Round {}: word locked in", state.round + 1);

            let mask: String = chosen.text.chars().map(|_| '_').collect();
            let mut outbox = Vec::new();
            for player in state.players.iter().filter(|p| p.connected) {
                let view = if player.name == name {
                    chosen.text.clone()
                } else {
                    mask.clone()
                };
                outbox.push(Outgoing::To(
                    player.name.clone(),
                    ServerMessage::WordConfirmed(view),
                ));
            }
            outbox
        };
        self.dispatch(outbox);
        self.start_round_timer();
    }

    /// Routes a chat line: an exact guess scores, a near miss earns the
    /// sender a private hint, everything else is relayed as chat.
    pub async fn handle_chat(&self, name: &str, text: &str) {
        enum Verdict {
            Correct { complete: bool },
            Relay,
            Swallow,
        }

        let (outbox, verdict) = {
            let mut state = self.state.lock().unwrap();
            let mut outbox = Vec::new();

            let active_word = if state.phase == Phase::Drawing
                && state.drawer.as_deref() != Some(name)
            {
                state.current_word.clone()
            } else {
                None
            };

            let verdict = if let Some(word) = active_word {
                let normalized_word = normalize(&word.text);
                let normalized_guess = normalize(text);

                if normalized_word == normalized_guess {
                    if state.found.iter().any(|n| n.as_str() == name) {
                        // Already credited this round: no points, no echo
                        // (re-broadcasting the word would leak it).
                        Verdict::Swallow
                    } else {
                        let order = state.found.len() + 1;
                        let points = score_for(&word, state.remaining_seconds, state.connected_count(), order);
                        if let Some(player) = state.players.iter_mut().find(|p| p.name == name) {
                            player.add_points(points);
                        }
                        state.found.push(name.to_string());
                        info!("{} guessed the word (order {}, {} points)", name, order, points);

                        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(format!(
                            "{} found the word in position {} and gains {} points!",
                            name, order, points
                        ))));
                        outbox.push(Outgoing::To(
                            name.to_string(),
                            ServerMessage::GuessCorrect(format!(
                                "You found the word '{}'!",
                                word.text
                            )),
                        ));
                        if let Some(drawer) = state.drawer.clone() {
                            outbox.push(Outgoing::To(
                                drawer,
                                ServerMessage::GuessCorrect(format!(
                                    "{} found the word '{}'!",
                                    name, word.text
                                )),
                            ));
                        }
                        Verdict::Correct {
                            complete: state.round_complete(),
                        }
                    }
                } else {
                    if is_near_miss(&normalized_word, &normalized_guess) {
                        outbox.push(Outgoing::To(
                            name.to_string(),
                            ServerMessage::Notification("So close! Almost the word.".to_string()),
                        ));
                    }
                    Verdict::Relay
                }
            } else {
                Verdict::Relay
            };

            if let Verdict::Relay = verdict {
                outbox.push(Outgoing::Broadcast(ServerMessage::Chat {
                    name: name.to_string(),
                    text: text.to_string(),
                }));
            }
            (outbox, verdict)
        };
        self.dispatch(outbox);

        if let Verdict::Correct { complete: true } = verdict {
            self.end_round(Some("Everyone found the word!")).await;
        }
    }

    /// Ends the active round: stops the countdown, reveals the word,
    /// broadcasts standings and either schedules the next round or finishes
    /// the game once every player has drawn their share.
    pub async fn end_round(&self, lead: Option<&str>) {
        let (outbox, next_round) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Drawing {
                return;
            }
            state.phase = Phase::RoundOver;
            let word = state.current_word.take();
            state.drawer = None;
            state.round += 1;

            let mut outbox = Vec::new();
            if let Some(text) = lead {
                outbox.push(Outgoing::Broadcast(ServerMessage::Notification(
                    text.to_string(),
                )));
            }
            if let Some(word) = word {
                outbox.push(Outgoing::Broadcast(ServerMessage::Notification(format!(
                    "The word was '{}'.",
                    word.text
                ))));
            }
            outbox.push(Outgoing::Broadcast(ServerMessage::Podium(state.standings())));

            let connected = state.connected_count();
            let next_round = if connected < self.config.min_players {
                Self::abort_locked(&mut state, &mut outbox);
                false
            } else if state.round >= connected * self.config.rounds_per_player {
                Self::finish_locked(&mut state, &mut outbox);
                false
            } else {
                true
            };
            (outbox, next_round)
        };

        self.stop_timer().await;
        self.dispatch(outbox);

        if next_round {
            // Let everyone read the result, then continue. The pause runs
            // outside the lock so guesses and disconnects stay responsive.
            if let Some(game) = self.weak_self.upgrade() {
                let pause = self.config.round_pause_secs;
                tokio::spawn(async move {
                    sleep(Duration::from_secs(pause)).await;
                    game.begin_round();
                });
            }
        }
    }

    /// Handles a disconnect. The record is kept (marked disconnected) once a
    /// match is underway; a lobby leaver is dropped outright. Losing the
    /// drawer abandons the round; dropping below the minimum aborts the
    /// match.
    pub async fn remove_player(&self, name: &str) {
        enum Followup {
            Nothing,
            AbortTimer,
            NextRound,
            CompleteRound,
        }

        let (outbox, followup) = {
            let mut state = self.state.lock().unwrap();
            let Some(idx) = state.players.iter().position(|p| p.name == name) else {
                return;
            };
            let mut outbox = Vec::new();

            let followup = match state.phase {
                Phase::Lobby => {
                    state.players.remove(idx);
                    outbox.push(Outgoing::Broadcast(ServerMessage::Notification(format!(
                        "{} left the game.",
                        name
                    ))));
                    Followup::Nothing
                }
                Phase::Finished => {
                    state.players[idx].connected = false;
                    Followup::Nothing
                }
                _ => {
                    state.players[idx].connected = false;
                    outbox.push(Outgoing::Broadcast(ServerMessage::Notification(format!(
                        "{} left the game.",
                        name
                    ))));

                    if state.connected_count() < self.config.min_players {
                        Self::abort_locked(&mut state, &mut outbox);
                        Followup::AbortTimer
                    } else if state.drawer.as_deref() == Some(name)
                        && matches!(state.phase, Phase::ChoosingWord | Phase::Drawing)
                    {
                        info!("Drawer {} left, abandoning the round", name);
                        state.phase = Phase::RoundOver;
                        state.drawer = None;
                        state.current_word = None;
                        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(
                            "The drawer left. Starting a new round.".to_string(),
                        )));
                        Followup::NextRound
                    } else if state.phase == Phase::Drawing && state.round_complete() {
                        Followup::CompleteRound
                    } else {
                        Followup::Nothing
                    }
                }
            };
            (outbox, followup)
        };
        self.dispatch(outbox);

        match followup {
            Followup::Nothing => {}
            Followup::AbortTimer => self.stop_timer().await,
            Followup::NextRound => {
                self.stop_timer().await;
                self.begin_round();
            }
            Followup::CompleteRound => {
                self.end_round(Some("Everyone found the word!")).await;
            }
        }
    }

    fn deal_options(&self, state: &GameState) -> Result<Vec<Word>, WordSupplyError> {
        let mut options = Vec::new();
        let mut excluded = state.used_words.clone();
        while options.len() < WORDS_PER_CHOICE {
            let word = self.lexicon.pick(&excluded)?;
            excluded.insert(word.key());
            options.push(word);
        }
        Ok(options)
    }

    fn abort_locked(state: &mut GameState, outbox: &mut Vec<Outgoing>) {
        warn!("Too few players, aborting the match");
        state.phase = Phase::Finished;
        state.drawer = None;
        state.current_word = None;
        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(
            "Too few players to continue. Ending the game.".to_string(),
        )));
    }

    fn finish_locked(state: &mut GameState, outbox: &mut Vec<Outgoing>) {
        info!("Match finished after {} rounds", state.round);
        state.phase = Phase::Finished;
        state.drawer = None;
        state.current_word = None;
        outbox.push(Outgoing::Broadcast(ServerMessage::Notification(
            "Game over! Final standings:".to_string(),
        )));
        outbox.push(Outgoing::Broadcast(ServerMessage::Podium(state.standings())));
    }

    fn start_round_timer(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = RoundTimer::start(self.config.round_duration_secs, tx);
        *self.timer.lock().unwrap() = Some(timer);

        let Some(game) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TimerEvent::Tick(remaining) => game.on_tick(remaining),
                    TimerEvent::RevealLetter(n) => game.on_reveal(n),
                    TimerEvent::LowTime(remaining) => game.on_low_time(remaining),
                    TimerEvent::Expired => game.end_round(Some("Time's up!")).await,
                }
            }
        });
    }

    // Timer events are gated on the drawing phase so a tick racing a round
    // transition can never reach clients late.
    fn on_tick(&self, remaining: u32) {
        {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Drawing {
                return;
            }
            state.remaining_seconds = remaining;
        }
        self.registry
            .broadcast(&ServerMessage::Time(remaining).to_string(), None);
    }

    fn on_reveal(&self, n: u8) {
        if self.state.lock().unwrap().phase != Phase::Drawing {
            return;
        }
        self.registry
            .broadcast(&ServerMessage::RevealLetter(n).to_string(), None);
    }

    fn on_low_time(&self, remaining: u32) {
        if self.state.lock().unwrap().phase != Phase::Drawing {
            return;
        }
        self.registry.broadcast(
            &ServerMessage::Notification(format!("Only {} seconds left!", remaining)).to_string(),
            None,
        );
    }

    async fn stop_timer(&self) {
        let timer = self.timer.lock().unwrap().take();
        if let Some(timer) = timer {
            timer.stop().await;
        }
    }

    fn dispatch(&self, outbox: Vec<Outgoing>) {
        for outgoing in outbox {
            match outgoing {
                Outgoing::Broadcast(msg) => self.registry.broadcast(&msg.to_string(), None),
                Outgoing::To(name, msg) => {
                    self.registry.send_to(&name, &msg.to_string());
                }
            }
        }
    }
}

/// Case- and diacritic-insensitive form used for guess comparison:
/// NFD-decompose, drop combining marks, lowercase.
fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// The legacy near-miss comparison, preserved literally: equal lengths admit
/// exactly one substitution; lengths differing by one admit a single skipped
/// character on the longer word.
fn is_near_miss(word: &str, guess: &str) -> bool {
    let a: Vec<char> = word.chars().collect();
    let b: Vec<char> = guess.chars().collect();

    if a.len().abs_diff(b.len()) > 1 {
        return false;
    }

    if a.len() == b.len() {
        return a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() == 1;
    }

    let (longer, shorter) = if a.len() > b.len() { (&a, &b) } else { (&b, &a) };
    let mut i = 0;
    let mut j = 0;
    let mut skipped = false;
    while i < longer.len() && j < shorter.len() {
        if longer[i] != shorter[j] {
            if skipped {
                return false;
            }
            skipped = true;
            i += 1;
            continue;
        }
        i += 1;
        j += 1;
    }
    true
}

/// `base + remaining/2 + max(0, (players - order + 1) * 5)`, the drawer
/// excluded from scoring by the caller.
fn score_for(word: &Word, remaining_seconds: u32, total_players: usize, order: usize) -> i32 {
    let base = word.difficulty.base_score();
    let time_bonus = (remaining_seconds / 2) as i32;
    let order_bonus = (total_players as i32 - order as i32 + 1).max(0) * 5;
    base + time_bonus + order_bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::lexicon::Difficulty;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config() -> GameConfig {
        GameConfig {
            min_players: 3,
            max_players: 10,
            round_duration_secs: 40,
            lobby_countdown_secs: 1,
            rounds_per_player: 3,
            // Long enough that scheduled continuations never fire mid-test.
            round_pause_secs: 600,
        }
    }

    fn test_lexicon() -> Lexicon {
        Lexicon::new(vec![
            Word::new("cat", Difficulty::Easy),
            Word::new("house", Difficulty::Hard),
        ])
    }

    /// Registers a fake peer backed by a raw channel so tests can observe
    /// every line a client would receive.
    fn join(registry: &Arc<Registry>, game: &Arc<Game>, id: u32, name: &str) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(id, "127.0.0.1:0".parse().unwrap(), tx));
        registry.add(Arc::clone(&conn));
        assert!(registry.set_name(id, name));
        game.add_player(name);
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn setup_three() -> (
        Arc<Registry>,
        Arc<Game>,
        Vec<(String, UnboundedReceiver<String>)>,
    ) {
        let registry = Registry::new();
        let game = Game::new(Arc::clone(&registry), test_lexicon(), test_config());
        let mut clients = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            let rx = join(&registry, &game, id, name);
            clients.push((name.to_string(), rx));
        }
        (registry, game, clients)
    }

    /// Round 0 always hands the pen to the first connected player.
    fn start_round_one(game: &Arc<Game>) {
        game.start();
    }

    #[test]
    fn test_normalize_strips_accents_and_case() {
        assert_eq!(normalize("Éléphant"), "elephant");
        assert_eq!(normalize("elephant"), "elephant");
        assert_eq!(normalize("ÀÇÜ"), "acu");
    }

    #[test]
    fn test_near_miss_single_substitution() {
        assert!(is_near_miss("house", "mouse"));
        assert!(!is_near_miss("house", "mice"));
        assert!(!is_near_miss("house", "house"));
    }

    #[test]
    fn test_near_miss_single_insertion_or_deletion() {
        assert!(is_near_miss("house", "house1"));
        assert!(is_near_miss("house", "huse"));
        assert!(!is_near_miss("house", "ho"));
    }

    #[test]
    fn test_score_formula() {
        let word = Word::new("cat", Difficulty::Easy);
        // First guesser, easy word, 40s left, 4 players: 10 + 20 + 20 = 50.
        assert_eq!(score_for(&word, 40, 4, 1), 50);
        // Later guessers earn a smaller order bonus.
        assert_eq!(score_for(&word, 40, 4, 4), 35);

        let hard = Word::new("labyrinth", Difficulty::Hard);
        assert_eq!(score_for(&hard, 0, 4, 1), 40);
        // The order bonus never goes negative.
        assert_eq!(score_for(&hard, 0, 2, 5), 20);
    }

    #[tokio::test]
    async fn test_start_twice_is_a_noop() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        let before = {
            let state = game.state.lock().unwrap();
            (state.round, state.drawer.clone())
        };

        game.start();

        let state = game.state.lock().unwrap();
        assert_eq!((state.round, state.drawer.clone()), before);
        drop(state);
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }
    }

    #[tokio::test]
    async fn test_round_one_deals_roles_and_options() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);

        let alice = drain(&mut clients[0].1);
        assert!(alice.contains(&"ROLE:drawer".to_string()));
        assert!(alice.iter().any(|l| l.starts_with("CHOIX_MOTS:")));

        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"ROLE:guesser".to_string()));
        assert!(!bob.iter().any(|l| l.starts_with("CHOIX_MOTS:")));
    }

    #[tokio::test]
    async fn test_choose_word_from_non_drawer_is_ignored() {
        let (_registry, game, _clients) = setup_three();
        start_round_one(&game);

        game.choose_word("bob", "cat");

        let state = game.state.lock().unwrap();
        assert!(state.current_word.is_none());
        drop(state);
        assert!(game.timer.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_choose_word_must_be_an_offered_option() {
        let (_registry, game, _clients) = setup_three();
        start_round_one(&game);

        game.choose_word("alice", "zeppelin");

        assert!(game.state.lock().unwrap().current_word.is_none());
    }

    #[tokio::test]
    async fn test_chosen_word_is_masked_for_guessers() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }

        game.choose_word("alice", "cat");

        let alice = drain(&mut clients[0].1);
        assert!(alice.contains(&"CHOSEN_WORD_CONFIRMED:cat".to_string()));
        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"CHOSEN_WORD_CONFIRMED:___".to_string()));
        assert!(!bob.iter().any(|l| l.contains("cat")));
    }

    #[tokio::test]
    async fn test_correct_guess_scores_exactly() {
        let (_registry, game, mut clients) = setup_three();
        let mut dave = join(&game.registry, &game, 4, "dave");
        start_round_one(&game);
        game.choose_word("alice", "cat");
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }
        drain(&mut dave);

        // No tick has landed yet: 40 seconds remain, 4 players connected.
        game.handle_chat("bob", "Cat").await;

        let score = {
            let state = game.state.lock().unwrap();
            state.players.iter().find(|p| p.name == "bob").unwrap().score
        };
        assert_eq!(score, 50);

        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"GUESS_CORRECT:You found the word 'cat'!".to_string()));
        let alice = drain(&mut clients[0].1);
        assert!(alice.contains(&"GUESS_CORRECT:bob found the word 'cat'!".to_string()));
    }

    #[tokio::test]
    async fn test_accented_guess_matches() {
        let registry = Registry::new();
        // Exactly two words: the deal always offers both.
        let lexicon = Lexicon::new(vec![
            Word::new("Éléphant", Difficulty::Easy),
            Word::new("house", Difficulty::Hard),
        ]);
        let game = Game::new(Arc::clone(&registry), lexicon, test_config());
        let mut rxs = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            rxs.push(join(&registry, &game, id, name));
        }
        game.start();
        game.choose_word("alice", "Éléphant");

        game.handle_chat("bob", "elephant").await;

        let state = game.state.lock().unwrap();
        assert_eq!(state.found, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_correct_guess_earns_nothing() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        game.choose_word("alice", "cat");
        game.handle_chat("bob", "cat").await;
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }
        let score_before = {
            let state = game.state.lock().unwrap();
            state.players.iter().find(|p| p.name == "bob").unwrap().score
        };

        game.handle_chat("bob", "cat").await;

        let state = game.state.lock().unwrap();
        let bob = state.players.iter().find(|p| p.name == "bob").unwrap();
        assert_eq!(bob.score, score_before);
        assert_eq!(state.found.iter().filter(|n| *n == "bob").count(), 1);
        drop(state);

        // And nobody hears about it, the word included.
        for (_, rx) in clients.iter_mut() {
            assert!(drain(rx).is_empty());
        }
    }

    #[tokio::test]
    async fn test_drawer_guess_is_plain_chat() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        game.choose_word("alice", "cat");
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }

        game.handle_chat("alice", "cat").await;

        let state = game.state.lock().unwrap();
        assert!(state.found.is_empty());
        assert!(state.current_word.is_some());
        drop(state);
        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"CHAT:alice: cat".to_string()));
    }

    #[tokio::test]
    async fn test_near_miss_hints_only_the_guesser() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        game.choose_word("alice", "cat");
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }

        game.handle_chat("bob", "car").await;

        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"NOTIFICATION:So close! Almost the word.".to_string()));
        // The attempt still shows up as chat for everyone.
        assert!(bob.contains(&"CHAT:bob: car".to_string()));
        let carol = drain(&mut clients[2].1);
        assert!(!carol.iter().any(|l| l.contains("So close")));
        assert!(carol.contains(&"CHAT:bob: car".to_string()));
    }

    #[tokio::test]
    async fn test_all_guessed_ends_round_early() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        game.choose_word("alice", "cat");

        game.handle_chat("bob", "cat").await;
        assert!(game.state.lock().unwrap().current_word.is_some());

        game.handle_chat("carol", "cat").await;

        let state = game.state.lock().unwrap();
        assert!(state.current_word.is_none());
        assert_eq!(state.round, 1);
        drop(state);
        // The countdown is stopped as part of the transition.
        assert!(game.timer.lock().unwrap().is_none());

        let bob = drain(&mut clients[1].1);
        assert!(bob.contains(&"NOTIFICATION:Everyone found the word!".to_string()));
        assert!(bob.contains(&"NOTIFICATION:The word was 'cat'.".to_string()));
        assert!(bob.iter().any(|l| l.starts_with("PODIUM:")));
    }

    #[tokio::test]
    async fn test_used_word_is_never_offered_again() {
        let registry = Registry::new();
        let words = vec![
            Word::new("cat", Difficulty::Easy),
            Word::new("house", Difficulty::Hard),
            Word::new("tree", Difficulty::Easy),
            Word::new("piano", Difficulty::Hard),
        ];
        let game = Game::new(Arc::clone(&registry), Lexicon::new(words), test_config());
        let mut rxs = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            rxs.push(join(&registry, &game, id, name));
        }
        game.start();

        let options_line = drain(&mut rxs[0])
            .into_iter()
            .find(|l| l.starts_with("CHOIX_MOTS:"))
            .unwrap();
        let first_choice = options_line
            .trim_start_matches("CHOIX_MOTS:")
            .split(',')
            .next()
            .unwrap()
            .to_string();
        game.choose_word("alice", &first_choice);

        // Finish the round and deal the next one.
        game.handle_chat("bob", &first_choice).await;
        game.handle_chat("carol", &first_choice).await;
        assert_eq!(game.state.lock().unwrap().phase, Phase::RoundOver);
        game.begin_round();

        let next_options = drain(&mut rxs[1])
            .into_iter()
            .find(|l| l.starts_with("CHOIX_MOTS:"))
            .unwrap();
        assert!(!next_options
            .trim_start_matches("CHOIX_MOTS:")
            .split(',')
            .any(|w| w.eq_ignore_ascii_case(&first_choice)));
    }

    #[tokio::test]
    async fn test_drawer_disconnect_starts_new_round() {
        let registry = Registry::new();
        // Enough words that the follow-up round can still deal two options.
        let lexicon = Lexicon::new(vec![
            Word::new("cat", Difficulty::Easy),
            Word::new("house", Difficulty::Hard),
            Word::new("tree", Difficulty::Easy),
            Word::new("piano", Difficulty::Hard),
        ]);
        let game = Game::new(Arc::clone(&registry), lexicon, test_config());
        let mut rxs = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol"), (4, "dave")] {
            rxs.push(join(&registry, &game, id, name));
        }
        game.start();
        game.choose_word("alice", "cat");
        for rx in rxs.iter_mut() {
            drain(rx);
        }

        game.remove_player("alice").await;

        let state = game.state.lock().unwrap();
        assert_eq!(state.phase, Phase::ChoosingWord);
        let drawer = state.drawer.clone().unwrap();
        assert_ne!(drawer, "alice");
        drop(state);

        let bob = drain(&mut rxs[1]);
        assert!(bob.contains(&"NOTIFICATION:The drawer left. Starting a new round.".to_string()));
    }

    #[tokio::test]
    async fn test_below_minimum_aborts_the_match() {
        let (_registry, game, mut clients) = setup_three();
        start_round_one(&game);
        game.choose_word("alice", "cat");
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }

        game.remove_player("carol").await;

        let state = game.state.lock().unwrap();
        assert_eq!(state.phase, Phase::Finished);
        drop(state);
        assert!(game.timer.lock().unwrap().is_none());

        let bob = drain(&mut clients[1].1);
        assert!(bob
            .contains(&"NOTIFICATION:Too few players to continue. Ending the game.".to_string()));

        // Guesses are dead after the abort.
        game.handle_chat("bob", "cat").await;
        let state = game.state.lock().unwrap();
        assert!(state.found.is_empty());
    }

    #[tokio::test]
    async fn test_guesser_disconnect_can_complete_round() {
        let (_registry, game, mut clients) = setup_three();
        let mut dave = join(&game.registry, &game, 4, "dave");
        start_round_one(&game);
        game.choose_word("alice", "cat");
        game.handle_chat("bob", "cat").await;
        game.handle_chat("carol", "cat").await;
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }
        drain(&mut dave);

        // dave is the only guesser still searching; his leave completes it.
        game.remove_player("dave").await;

        let state = game.state.lock().unwrap();
        assert_eq!(state.phase, Phase::RoundOver);
        assert!(state.current_word.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_revives_score() {
        let (_registry, game, mut clients) = setup_three();
        let mut dave = join(&game.registry, &game, 4, "dave");
        start_round_one(&game);
        game.choose_word("alice", "cat");
        game.handle_chat("dave", "cat").await;
        drain(&mut dave);

        game.remove_player("dave").await;
        game.add_player("dave");

        let state = game.state.lock().unwrap();
        let dave_rec = state.players.iter().find(|p| p.name == "dave").unwrap();
        assert!(dave_rec.connected);
        assert_eq!(dave_rec.score, 50);
        drop(state);
        for (_, rx) in clients.iter_mut() {
            drain(rx);
        }
    }

    #[tokio::test]
    async fn test_word_supply_exhaustion_finishes_gracefully() {
        let registry = Registry::new();
        // Two words total: round one consumes both options' pool.
        let game = Game::new(Arc::clone(&registry), test_lexicon(), test_config());
        let mut rxs = Vec::new();
        for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            rxs.push(join(&registry, &game, id, name));
        }
        game.start();
        game.choose_word("alice", "cat");
        game.handle_chat("bob", "cat").await;
        game.handle_chat("carol", "cat").await;
        for rx in rxs.iter_mut() {
            drain(rx);
        }

        // Only "house" is unused; a two-word deal cannot be satisfied.
        game.begin_round();

        let state = game.state.lock().unwrap();
        assert_eq!(state.phase, Phase::Finished);
        drop(state);
        let bob = drain(&mut rxs[1]);
        assert!(bob.contains(&"NOTIFICATION:No words left to play.".to_string()));
        assert!(bob.iter().any(|l| l.starts_with("PODIUM:")));
    }
}
