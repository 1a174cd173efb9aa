/// A participant's identity and cumulative score.
///
/// Records are created at the name handshake and survive disconnection:
/// a mid-match leaver keeps its score for the final standings and is only
/// marked disconnected. Reconnecting under the same name revives the record.
#[derive(Debug, Clone)]
pub struct Player {
    pub name: String,
    pub score: i32,
    pub connected: bool,
}

impl Player {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            score: 0,
            connected: true,
        }
    }

    pub fn add_points(&mut self, points: i32) {
        self.score += points;
    }
}
