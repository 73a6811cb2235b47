use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sync::snapshot::GameId;

/// Characters used for generated room codes.
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Length of generated room codes.
const ROOM_CODE_LENGTH: usize = 4;

/// How hard a question is; drives the points a correct answer earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// 100 points.
    #[default]
    Easy,
    /// 200 points.
    Medium,
    /// 300 points.
    Hard,
}

impl Difficulty {
    /// Points awarded for a correct answer.
    pub fn points(self) -> u32 {
        match self {
            Difficulty::Easy => 100,
            Difficulty::Medium => 200,
            Difficulty::Hard => 300,
        }
    }
}

/// One multiple-choice question supplied by the content layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Prompt shown to players.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index of the correct entry in `options`.
    pub correct_option: usize,
    /// Difficulty of the question.
    pub difficulty: Difficulty,
}

impl Question {
    /// Whether `option` is the right answer.
    pub fn is_correct(&self, option: usize) -> bool {
        self.correct_option == option
    }
}

/// Ordered questions of one game. Indices wrap around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionSet {
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Wrap an ordered list of questions.
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// Question at `index` (modulo the set length).
    pub fn get(&self, index: usize) -> Option<&Question> {
        if self.questions.is_empty() {
            return None;
        }
        self.questions.get(index % self.questions.len())
    }

    /// Number of questions.
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// True when there is nothing to ask.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Timing and cadence of a game, in seconds and question counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSettings {
    /// Seconds a question stays open.
    pub question_duration: u32,
    /// Insert an intermission after every N questions (0 disables).
    pub intermission_frequency: u32,
    /// Show the leaderboard after every N questions (0 disables). Wins over intermission.
    pub leaderboard_frequency: u32,
    /// Seconds an intermission or leaderboard stays on screen.
    pub intermission_duration: u32,
    /// Seconds the correct answer is revealed.
    pub answer_reveal_duration: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            question_duration: 20,
            intermission_frequency: 3,
            leaderboard_frequency: 5,
            intermission_duration: 10,
            answer_reveal_duration: 5,
        }
    }
}

/// Generate a short room code such as `K7QD`.
pub fn generate_room_code() -> GameId {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}
