//! DTO definitions used by the admin REST API and documentation layer.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::format_system_time,
    state::game::{Difficulty, GameSettings, Question, QuestionSet},
    sync::{presence::ActivePlayer, wire::StateMessage},
};

/// Payload used to open a lobby with a fresh question set.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenLobbyRequest {
    /// Questions played in order, wrapping around.
    pub questions: Vec<QuestionInput>,
    /// Falls back to the configured defaults when omitted.
    #[serde(default)]
    pub settings: Option<GameSettings>,
}

impl Validate for OpenLobbyRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.questions.is_empty() {
            let mut err = ValidationError::new("questions_empty");
            err.message = Some("at least one question is required".into());
            errors.add("questions", err);
        }

        for question in &self.questions {
            if let Err(question_errors) = question.validate() {
                errors.merge_self("questions", Err(question_errors));
            }
        }

        if let Some(settings) = &self.settings {
            if settings.question_duration == 0 {
                let mut err = ValidationError::new("question_duration");
                err.message = Some("questionDuration must be positive".into());
                errors.add("settings", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl OpenLobbyRequest {
    /// Split into the domain question set and optional settings.
    pub fn into_parts(self) -> (QuestionSet, Option<GameSettings>) {
        let questions = self.questions.into_iter().map(Question::from).collect();
        (QuestionSet::new(questions), self.settings)
    }
}

/// One multiple-choice question.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    /// Question text.
    pub text: String,
    /// Answer options, at least two.
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_option: usize,
    /// Drives the points awarded.
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.text.trim().is_empty() {
            let mut err = ValidationError::new("text_empty");
            err.message = Some("question text must not be empty".into());
            errors.add("text", err);
        }

        if self.options.len() < 2 {
            let mut err = ValidationError::new("options_len");
            err.message =
                Some(format!("at least two options are required (got {})", self.options.len()).into());
            errors.add("options", err);
        }

        if self.correct_option >= self.options.len() {
            let mut err = ValidationError::new("correct_option_range");
            err.message = Some(
                format!(
                    "correctOption {} is out of range for {} options",
                    self.correct_option,
                    self.options.len()
                )
                .into(),
            );
            errors.add("correct_option", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            text: value.text,
            options: value.options,
            correct_option: value.correct_option,
            difficulty: value.difficulty,
        }
    }
}

/// Result of a driver command.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GameStatusResponse {
    /// Room served by this host.
    pub game_id: String,
    /// Snapshot published by the command, absent once the game idles.
    pub state: Option<StateMessage>,
}

/// Players heard from within the presence window.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    /// Room served by this host.
    pub game_id: String,
    /// Number of players in `players`.
    pub active_count: usize,
    /// Players heard from within the window.
    pub players: Vec<ActivePlayer>,
    /// RFC 3339 time of the report.
    pub generated_at: String,
}

/// Per-player scores, attached or departed.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoresResponse {
    /// Room served by this host.
    pub game_id: String,
    /// Best score first.
    pub scores: Vec<ScoreEntry>,
    /// RFC 3339 time of the report.
    pub generated_at: String,
}

impl ScoresResponse {
    /// Scores sorted best first, stamped with the current time.
    pub fn new(game_id: impl Into<String>, mut scores: Vec<ScoreEntry>) -> Self {
        scores.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.player_name.cmp(&b.player_name))
        });
        Self {
            game_id: game_id.into(),
            scores,
            generated_at: format_system_time(SystemTime::now()),
        }
    }
}

/// One player's score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    /// Player name.
    pub player_name: String,
    /// Points earned in the epoch.
    pub score: u32,
    /// False once the player context detached; the score is final.
    pub attached: bool,
}

impl PresenceResponse {
    /// Response stamped with the current time.
    pub fn new(game_id: impl Into<String>, players: Vec<ActivePlayer>) -> Self {
        Self {
            game_id: game_id.into(),
            active_count: players.len(),
            players,
            generated_at: format_system_time(SystemTime::now()),
        }
    }
}
